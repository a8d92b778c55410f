//! Multi-resolution tile pyramid geometry.
//!
//! An [`ImagePyramid`] describes how a large microscopy image is cut into
//! fixed-size tiles at each zoom level. Zoom levels use the map numbering:
//! zoom 0 is the coarsest level and `max_zoom()` the finest. The grid origin
//! is the top-left corner of the image extent.
//!
//! The geometry is configuration, never a constant: deployments disagree on
//! tile size and level count, and the server-side level numbering depends on
//! `max_zoom()` (see [`crate::address::server_level`]).

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::extent::Extent;

/// Address of a single tile in map zoom numbering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TileCoord {
    pub z: u8,
    pub x: u32,
    pub y: u32,
}

impl TileCoord {
    pub fn new(z: u8, x: u32, y: u32) -> Self {
        Self { z, x, y }
    }
}

impl std::fmt::Display for TileCoord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.z, self.x, self.y)
    }
}

/// Half-open rectangle of tile indices `[min_x, max_x) x [min_y, max_y)` at one zoom.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileRange {
    pub z: u8,
    pub min_x: u32,
    pub max_x: u32,
    pub min_y: u32,
    pub max_y: u32,
}

impl TileRange {
    pub fn is_empty(&self) -> bool {
        self.min_x >= self.max_x || self.min_y >= self.max_y
    }

    /// Number of tiles covered by the range.
    pub fn len(&self) -> usize {
        if self.is_empty() {
            0
        } else {
            ((self.max_x - self.min_x) as usize) * ((self.max_y - self.min_y) as usize)
        }
    }

    pub fn contains(&self, coord: &TileCoord) -> bool {
        coord.z == self.z
            && (self.min_x..self.max_x).contains(&coord.x)
            && (self.min_y..self.max_y).contains(&coord.y)
    }

    /// Iterate the covered coordinates row by row.
    pub fn iter(&self) -> impl Iterator<Item = TileCoord> + '_ {
        let z = self.z;
        (self.min_y..self.max_y)
            .flat_map(move |y| (self.min_x..self.max_x).map(move |x| TileCoord::new(z, x, y)))
    }
}

/// Errors raised while building or querying a pyramid.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GridError {
    #[error("Invalid image extent {0:?}")]
    InvalidExtent([f64; 4]),

    #[error("Tile size must be positive")]
    ZeroTileSize,

    #[error("Pyramid needs at least one resolution")]
    NoResolutions,

    #[error("Too many zoom levels: {0}")]
    TooManyLevels(usize),

    #[error("Resolution {value} at zoom {z} must be positive and finite")]
    InvalidResolution { z: usize, value: f64 },

    #[error("Resolutions must strictly decrease with zoom (zoom {z})")]
    ResolutionsNotDecreasing { z: usize },

    #[error("Zoom {z} is outside 0..={max_zoom}")]
    ZoomOutOfRange { z: u8, max_zoom: u8 },

    #[error("Cannot derive a zoom level from resolution {0}")]
    UnusableResolution(f64),
}

/// Fixed multi-resolution tile grid shared read-only by every tile source.
#[derive(Debug, Clone, PartialEq)]
pub struct ImagePyramid {
    extent: Extent,
    tile_size_px: u32,
    resolutions: Vec<f64>,
}

impl ImagePyramid {
    /// Create a pyramid, validating the geometry.
    ///
    /// `resolutions[z]` is the number of map units per rendered pixel at zoom
    /// `z`; it must strictly decrease as `z` grows.
    pub fn new(
        extent: Extent,
        tile_size_px: u32,
        resolutions: Vec<f64>,
    ) -> Result<Self, GridError> {
        if !extent.is_valid() {
            return Err(GridError::InvalidExtent(extent.to_array()));
        }
        if tile_size_px == 0 {
            return Err(GridError::ZeroTileSize);
        }
        if resolutions.is_empty() {
            return Err(GridError::NoResolutions);
        }
        if resolutions.len() > u8::MAX as usize + 1 {
            return Err(GridError::TooManyLevels(resolutions.len()));
        }
        for (z, &value) in resolutions.iter().enumerate() {
            if !value.is_finite() || value <= 0.0 {
                return Err(GridError::InvalidResolution { z, value });
            }
            if z > 0 && value >= resolutions[z - 1] {
                return Err(GridError::ResolutionsNotDecreasing { z });
            }
        }

        Ok(Self {
            extent,
            tile_size_px,
            resolutions,
        })
    }

    /// 2048 px tiles, 4 levels (first live deployment).
    pub fn legacy_2048() -> Self {
        Self {
            extent: Extent::new(0.0, 0.0, 65536.0, 65536.0),
            tile_size_px: 2048,
            resolutions: vec![8.0, 4.0, 2.0, 1.0],
        }
    }

    /// 4096 px tiles, 4 levels (older stitched well-plate layout).
    pub fn legacy_4096() -> Self {
        Self {
            extent: Extent::new(0.0, 0.0, 131072.0, 131072.0),
            tile_size_px: 4096,
            resolutions: vec![8.0, 4.0, 2.0, 1.0],
        }
    }

    /// 256 px tiles, 5 levels, matching the Zarr chunk layout.
    pub fn zarr_chunk_256() -> Self {
        Self {
            extent: Extent::new(0.0, 0.0, 16384.0, 16384.0),
            tile_size_px: 256,
            resolutions: vec![16.0, 8.0, 4.0, 2.0, 1.0],
        }
    }

    pub fn extent(&self) -> &Extent {
        &self.extent
    }

    pub fn tile_size_px(&self) -> u32 {
        self.tile_size_px
    }

    pub fn resolutions(&self) -> &[f64] {
        &self.resolutions
    }

    /// Finest zoom level.
    pub fn max_zoom(&self) -> u8 {
        (self.resolutions.len() - 1) as u8
    }

    pub fn resolution(&self, z: u8) -> Option<f64> {
        self.resolutions.get(z as usize).copied()
    }

    /// Width of one tile in map units at zoom `z`.
    pub fn tile_span(&self, z: u8) -> Result<f64, GridError> {
        self.resolution(z)
            .map(|r| r * self.tile_size_px as f64)
            .ok_or(GridError::ZoomOutOfRange {
                z,
                max_zoom: self.max_zoom(),
            })
    }

    /// Zoom level whose resolution is closest to `resolution`.
    pub fn zoom_for_resolution(&self, resolution: f64) -> Result<u8, GridError> {
        if !resolution.is_finite() || resolution <= 0.0 {
            return Err(GridError::UnusableResolution(resolution));
        }

        let mut best = 0usize;
        let mut best_delta = f64::INFINITY;
        for (z, r) in self.resolutions.iter().enumerate() {
            let delta = (r - resolution).abs();
            if delta < best_delta {
                best = z;
                best_delta = delta;
            }
        }
        Ok(best as u8)
    }

    /// Map-space rectangle covered by a tile.
    pub fn tile_bounds(&self, coord: TileCoord) -> Result<Extent, GridError> {
        let span = self.tile_span(coord.z)?;
        let min_x = self.extent.min_x + coord.x as f64 * span;
        let min_y = self.extent.min_y + coord.y as f64 * span;
        Ok(Extent::new(min_x, min_y, min_x + span, min_y + span))
    }

    /// Number of tile columns and rows needed to cover the image at zoom `z`.
    pub fn tile_count(&self, z: u8) -> Result<(u32, u32), GridError> {
        let span = self.tile_span(z)?;
        let cols = (self.extent.width() / span).ceil() as u32;
        let rows = (self.extent.height() / span).ceil() as u32;
        Ok((cols, rows))
    }

    /// A coordinate is valid when its zoom exists and the tile overlaps the image.
    pub fn is_valid(&self, coord: TileCoord) -> bool {
        self.tile_bounds(coord)
            .map(|bounds| bounds.intersects(&self.extent))
            .unwrap_or(false)
    }

    /// Tiles at zoom `z` whose rectangles overlap `area`, clipped to the image.
    pub fn tile_range_for_extent(&self, area: &Extent, z: u8) -> Result<TileRange, GridError> {
        let span = self.tile_span(z)?;
        let (cols, rows) = self.tile_count(z)?;

        let to_index = |v: f64, origin: f64, limit: u32, round_up: bool| -> u32 {
            let raw = (v - origin) / span;
            let raw = if round_up { raw.ceil() } else { raw.floor() };
            raw.clamp(0.0, limit as f64) as u32
        };

        Ok(TileRange {
            z,
            min_x: to_index(area.min_x, self.extent.min_x, cols, false),
            max_x: to_index(area.max_x, self.extent.min_x, cols, true),
            min_y: to_index(area.min_y, self.extent.min_y, rows, false),
            max_y: to_index(area.max_y, self.extent.min_y, rows, true),
        })
    }
}

/// Serializable description of a pyramid, as found in configuration files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PyramidConfig {
    /// Image extent `[min_x, min_y, max_x, max_y]` in full-resolution pixels
    pub extent: Extent,
    /// Edge length of a square tile in pixels
    pub tile_size_px: u32,
    /// Map units per pixel for each zoom, coarsest first
    pub resolutions: Vec<f64>,
}

impl PyramidConfig {
    /// Validate and build the pyramid.
    pub fn build(&self) -> Result<ImagePyramid, GridError> {
        ImagePyramid::new(self.extent, self.tile_size_px, self.resolutions.clone())
    }
}

impl From<&ImagePyramid> for PyramidConfig {
    fn from(pyramid: &ImagePyramid) -> Self {
        Self {
            extent: pyramid.extent,
            tile_size_px: pyramid.tile_size_px,
            resolutions: pyramid.resolutions.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_non_decreasing_resolutions() {
        let extent = Extent::new(0.0, 0.0, 100.0, 100.0);
        assert_eq!(
            ImagePyramid::new(extent, 256, vec![4.0, 4.0, 1.0]),
            Err(GridError::ResolutionsNotDecreasing { z: 1 })
        );
        assert_eq!(
            ImagePyramid::new(extent, 256, vec![1.0, 2.0]),
            Err(GridError::ResolutionsNotDecreasing { z: 1 })
        );
    }

    #[test]
    fn test_rejects_bad_geometry() {
        let extent = Extent::new(0.0, 0.0, 100.0, 100.0);
        assert_eq!(
            ImagePyramid::new(extent, 0, vec![1.0]),
            Err(GridError::ZeroTileSize)
        );
        assert_eq!(
            ImagePyramid::new(extent, 256, vec![]),
            Err(GridError::NoResolutions)
        );
        assert!(matches!(
            ImagePyramid::new(extent, 256, vec![2.0, -1.0]),
            Err(GridError::InvalidResolution { z: 1, .. })
        ));
        assert!(matches!(
            ImagePyramid::new(Extent::new(0.0, 0.0, 0.0, 10.0), 256, vec![1.0]),
            Err(GridError::InvalidExtent(_))
        ));
    }

    #[test]
    fn test_legacy_2048_geometry() {
        let grid = ImagePyramid::legacy_2048();
        assert_eq!(grid.max_zoom(), 3);
        assert_eq!(grid.tile_size_px(), 2048);
        assert_eq!(grid.tile_count(0).unwrap(), (4, 4));
        assert_eq!(grid.tile_count(3).unwrap(), (32, 32));

        let bounds = grid.tile_bounds(TileCoord::new(3, 1, 2)).unwrap();
        assert_eq!(bounds, Extent::new(2048.0, 4096.0, 4096.0, 6144.0));

        assert_eq!(grid.zoom_for_resolution(8.0).unwrap(), 0);
        assert_eq!(grid.zoom_for_resolution(1.2).unwrap(), 3);
        assert_eq!(grid.zoom_for_resolution(100.0).unwrap(), 0);
        assert_eq!(grid.zoom_for_resolution(0.01).unwrap(), 3);
    }

    #[test]
    fn test_zarr_chunk_256_geometry() {
        let grid = ImagePyramid::zarr_chunk_256();
        assert_eq!(grid.max_zoom(), 4);
        assert_eq!(grid.tile_size_px(), 256);
        assert_eq!(grid.tile_count(0).unwrap(), (4, 4));
        assert_eq!(grid.tile_count(4).unwrap(), (64, 64));

        let bounds = grid.tile_bounds(TileCoord::new(0, 3, 3)).unwrap();
        assert_eq!(bounds, Extent::new(12288.0, 12288.0, 16384.0, 16384.0));

        assert_eq!(grid.zoom_for_resolution(16.0).unwrap(), 0);
        assert_eq!(grid.zoom_for_resolution(3.5).unwrap(), 2);
        assert_eq!(grid.zoom_for_resolution(1.0).unwrap(), 4);
    }

    #[test]
    fn test_legacy_4096_geometry() {
        let grid = ImagePyramid::legacy_4096();
        assert_eq!(grid.max_zoom(), 3);
        assert_eq!(grid.tile_span(0).unwrap(), 32768.0);
        assert_eq!(grid.tile_count(3).unwrap(), (32, 32));
    }

    #[test]
    fn test_zoom_for_unusable_resolution() {
        let grid = ImagePyramid::zarr_chunk_256();
        assert!(grid.zoom_for_resolution(0.0).is_err());
        assert!(grid.zoom_for_resolution(-2.0).is_err());
        assert!(grid.zoom_for_resolution(f64::NAN).is_err());
    }

    #[test]
    fn test_validity_of_coordinates() {
        let grid = ImagePyramid::zarr_chunk_256();
        assert!(grid.is_valid(TileCoord::new(0, 0, 0)));
        assert!(grid.is_valid(TileCoord::new(4, 63, 63)));
        assert!(!grid.is_valid(TileCoord::new(4, 64, 0)));
        assert!(!grid.is_valid(TileCoord::new(5, 0, 0)));
    }

    #[test]
    fn test_partial_last_tile_is_valid() {
        let grid = ImagePyramid::new(Extent::new(0.0, 0.0, 300.0, 100.0), 256, vec![1.0]).unwrap();
        assert_eq!(grid.tile_count(0).unwrap(), (2, 1));
        assert!(grid.is_valid(TileCoord::new(0, 1, 0)));
        assert!(!grid.is_valid(TileCoord::new(0, 2, 0)));
    }

    #[test]
    fn test_tile_range_for_extent_is_clipped() {
        let grid = ImagePyramid::zarr_chunk_256();
        // Span at zoom 4 is 256 units.
        let area = Extent::new(-100.0, 300.0, 700.0, 520.0);
        let range = grid.tile_range_for_extent(&area, 4).unwrap();
        assert_eq!(
            range,
            TileRange {
                z: 4,
                min_x: 0,
                max_x: 3,
                min_y: 1,
                max_y: 3,
            }
        );
        assert_eq!(range.len(), 6);
        assert_eq!(range.iter().count(), 6);
        assert!(range.contains(&TileCoord::new(4, 2, 2)));
        assert!(!range.contains(&TileCoord::new(3, 2, 2)));

        let outside = Extent::new(-5000.0, -5000.0, -10.0, -10.0);
        assert!(grid.tile_range_for_extent(&outside, 4).unwrap().is_empty());
    }

    #[test]
    fn test_pyramid_config_roundtrip() {
        let grid = ImagePyramid::legacy_2048();
        let config = PyramidConfig::from(&grid);
        let json = serde_json::to_string(&config).unwrap();
        let parsed: PyramidConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.build().unwrap(), grid);
    }
}
