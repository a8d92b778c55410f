//! Viewport-driven tile scheduling.
//!
//! On every view change the scheduler works out which tiles cover the
//! viewport at the current zoom, plus a prefetch ring around it, and asks
//! the raster layer for each of them. The layer decides whether a fetch is
//! needed; repeated passes over an unchanged view never produce duplicate
//! fetches.

use thiserror::Error;

use crate::address::TileRequest;
use crate::extent::Extent;
use crate::grid::{GridError, TileRange};
use crate::layer::{RasterLayer, TileDemand, TileTicket};
use crate::priority;

/// Default number of tile rings prefetched around the visible area.
pub const DEFAULT_PREFETCH_MARGIN: u32 = 1;

/// Errors raised while deriving the viewport.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ViewError {
    #[error("Map has no size yet")]
    MissingSize,

    #[error("Map size {0}x{1} is empty")]
    EmptySize(u32, u32),

    #[error("View resolution {0} is not usable")]
    InvalidResolution(f64),

    #[error("View center ({0}, {1}) is not finite")]
    InvalidCenter(f64, f64),

    #[error(transparent)]
    Grid(#[from] GridError),
}

/// Current map view: center, resolution (map units per screen pixel) and size.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewState {
    pub center: (f64, f64),
    pub resolution: f64,
    /// Size in screen pixels, unknown until the map is laid out
    pub size: Option<(u32, u32)>,
}

impl ViewState {
    pub fn new(center: (f64, f64), resolution: f64, size: (u32, u32)) -> Self {
        Self {
            center,
            resolution,
            size: Some(size),
        }
    }

    /// Map-space rectangle visible in the view.
    pub fn extent(&self) -> Result<Extent, ViewError> {
        let (width, height) = self.size.ok_or(ViewError::MissingSize)?;
        if width == 0 || height == 0 {
            return Err(ViewError::EmptySize(width, height));
        }
        if !self.resolution.is_finite() || self.resolution <= 0.0 {
            return Err(ViewError::InvalidResolution(self.resolution));
        }
        let (cx, cy) = self.center;
        if !cx.is_finite() || !cy.is_finite() {
            return Err(ViewError::InvalidCenter(cx, cy));
        }

        let half_w = width as f64 * self.resolution / 2.0;
        let half_h = height as f64 * self.resolution / 2.0;
        Ok(Extent::new(cx - half_w, cy - half_h, cx + half_w, cy + half_h))
    }
}

/// A tile fetch to dispatch.
#[derive(Debug, Clone, PartialEq)]
pub struct TileJob {
    pub ticket: TileTicket,
    pub request: TileRequest,
}

impl TileJob {
    pub fn priority(&self) -> u32 {
        self.request.priority
    }
}

/// Outcome of one scheduling pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SchedulePass {
    /// Tiles that need a network fetch, most urgent first
    pub fetches: Vec<TileJob>,
    /// Pending tiles whose priority changed
    pub reprioritized: Vec<(TileTicket, u32)>,
    /// Tiles intersecting the viewport, if the pass ran
    pub visible: Option<TileRange>,
}

impl SchedulePass {
    pub fn is_empty(&self) -> bool {
        self.fetches.is_empty() && self.reprioritized.is_empty()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ViewportTileScheduler {
    prefetch_margin: u32,
}

impl Default for ViewportTileScheduler {
    fn default() -> Self {
        Self::new(DEFAULT_PREFETCH_MARGIN)
    }
}

impl ViewportTileScheduler {
    pub fn new(prefetch_margin: u32) -> Self {
        Self { prefetch_margin }
    }

    pub fn prefetch_margin(&self) -> u32 {
        self.prefetch_margin
    }

    /// Run a pass, logging and skipping it if the view cannot be resolved.
    ///
    /// A malformed view leaves previously queued priorities untouched.
    pub fn reprioritize(&self, view: &ViewState, layer: &mut RasterLayer) -> SchedulePass {
        match self.try_reprioritize(view, layer) {
            Ok(pass) => pass,
            Err(e) => {
                log::warn!("Skipping tile reprioritization for {}: {}", layer.id(), e);
                SchedulePass::default()
            }
        }
    }

    /// Run a pass, returning view math errors to the caller.
    pub fn try_reprioritize(
        &self,
        view: &ViewState,
        layer: &mut RasterLayer,
    ) -> Result<SchedulePass, ViewError> {
        let extent = view.extent()?;
        let grid = layer.source().grid().clone();
        let zoom = grid.zoom_for_resolution(view.resolution)?;
        let visible = grid.tile_range_for_extent(&extent, zoom)?;

        let margin = self.prefetch_margin as f64 * grid.tile_span(zoom)?;
        let wanted = grid.tile_range_for_extent(&extent.buffered(margin), zoom)?;
        let viewport = extent.to_array();

        let mut pass = SchedulePass {
            visible: Some(visible),
            ..SchedulePass::default()
        };

        for coord in wanted.iter() {
            if !grid.is_valid(coord) {
                continue;
            }
            let bounds = grid.tile_bounds(coord)?;
            let priority =
                priority::estimate(&bounds, Some(viewport.as_slice()), grid.tile_size_px());

            match layer.demand(coord, priority) {
                TileDemand::Fetch(ticket) => match layer.source().request(coord, priority) {
                    Ok(request) => pass.fetches.push(TileJob { ticket, request }),
                    Err(e) => {
                        log::warn!("Cannot address tile {}: {}", coord, e);
                        layer.abandon(&ticket);
                    }
                },
                TileDemand::Reprioritized { ticket, priority } => {
                    pass.reprioritized.push((ticket, priority));
                }
                TileDemand::Pending | TileDemand::Resolved => {}
            }
        }

        // Tiles still queued for an earlier view or zoom go behind everything above.
        for coord in layer.pending_coords() {
            if wanted.contains(&coord) {
                continue;
            }
            if let TileDemand::Reprioritized { ticket, priority } =
                layer.demand(coord, priority::MAX_PRIORITY)
            {
                pass.reprioritized.push((ticket, priority));
            }
        }

        pass.fetches.sort_by_key(TileJob::priority);
        log::debug!(
            "{} at zoom {}: {} visible, {} new fetches, {} reprioritized",
            layer.id(),
            zoom,
            visible.len(),
            pass.fetches.len(),
            pass.reprioritized.len()
        );
        Ok(pass)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use url::Url;

    use crate::address::{ChannelMode, RasterMode, TileSource, TimeScope};
    use crate::channel::ChannelId;
    use crate::grid::{ImagePyramid, TileCoord};
    use crate::layer::{black_tile, LayerId, TileContent};

    fn layer_on(grid: ImagePyramid) -> RasterLayer {
        let source = TileSource::builder(Url::parse("http://localhost/").unwrap(), Arc::new(grid))
            .mode(RasterMode {
                channels: ChannelMode::Single(ChannelId::Brightfield),
                scope: TimeScope::LiveGrid { timestamp: None },
            })
            .build()
            .unwrap();
        RasterLayer::new(LayerId(1), source)
    }

    fn approx_eq(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_view_extent() {
        let view = ViewState::new((100.0, 50.0), 2.0, (40, 20));
        let extent = view.extent().unwrap();
        assert!(approx_eq(extent.min_x, 60.0));
        assert!(approx_eq(extent.max_x, 140.0));
        assert!(approx_eq(extent.min_y, 30.0));
        assert!(approx_eq(extent.max_y, 70.0));
    }

    #[test]
    fn test_malformed_views_are_errors() {
        let mut view = ViewState::new((0.0, 0.0), 1.0, (10, 10));
        view.size = None;
        assert_eq!(view.extent(), Err(ViewError::MissingSize));

        let view = ViewState::new((0.0, 0.0), 0.0, (10, 10));
        assert_eq!(view.extent(), Err(ViewError::InvalidResolution(0.0)));

        let view = ViewState::new((0.0, 0.0), 1.0, (0, 10));
        assert_eq!(view.extent(), Err(ViewError::EmptySize(0, 10)));
    }

    #[test]
    fn test_malformed_view_skips_pass() {
        let mut layer = layer_on(ImagePyramid::zarr_chunk_256());
        let view = ViewState {
            center: (0.0, 0.0),
            resolution: 1.0,
            size: None,
        };
        let pass = ViewportTileScheduler::default().reprioritize(&view, &mut layer);
        assert!(pass.is_empty());
        assert!(pass.visible.is_none());
        assert_eq!(layer.pending_count(), 0);
    }

    #[test]
    fn test_visible_tiles_fetched_first() {
        let mut layer = layer_on(ImagePyramid::zarr_chunk_256());
        // Finest zoom (resolution 1), 512x512 view at the image corner.
        let view = ViewState::new((256.0, 256.0), 1.0, (512, 512));
        let pass = ViewportTileScheduler::new(1).reprioritize(&view, &mut layer);

        let visible = pass.visible.unwrap();
        assert_eq!((visible.min_x, visible.max_x), (0, 2));
        assert_eq!((visible.min_y, visible.max_y), (0, 2));

        // 2x2 visible plus one ring clipped at the image edge: 3x3.
        assert_eq!(pass.fetches.len(), 9);
        let urgent: Vec<_> = pass.fetches.iter().take(4).map(|j| j.ticket.coord).collect();
        for coord in &urgent {
            assert!(visible.contains(coord));
        }
        assert!(pass.fetches[..4].iter().all(|j| j.priority() == 1));
        assert!(pass.fetches[4..].iter().all(|j| j.priority() >= 5));
        assert!(pass.fetches.iter().all(|j| j.request.server_level == 0));
    }

    #[test]
    fn test_second_pass_issues_no_duplicate_fetch() {
        let mut layer = layer_on(ImagePyramid::legacy_2048());
        let scheduler = ViewportTileScheduler::new(0);
        let view = ViewState::new((3000.0, 3000.0), 1.0, (1000, 1000));

        let first = scheduler.reprioritize(&view, &mut layer);
        assert!(!first.fetches.is_empty());
        for job in &first.fetches {
            layer.resolve(&job.ticket, black_tile(4), TileContent::Imagery);
        }

        let second = scheduler.reprioritize(&view, &mut layer);
        assert!(second.is_empty());
    }

    #[test]
    fn test_pan_reprioritizes_pending_tiles() {
        let mut layer = layer_on(ImagePyramid::zarr_chunk_256());
        let scheduler = ViewportTileScheduler::new(2);
        let view = ViewState::new((128.0, 128.0), 1.0, (256, 256));
        let first = scheduler.reprioritize(&view, &mut layer);
        assert!(first.fetches.iter().any(|j| j.ticket.coord == TileCoord::new(4, 2, 0)));

        // Pan one tile right: tile (2,0) moves into view.
        let view = ViewState::new((640.0, 128.0), 1.0, (256, 256));
        let second = scheduler.reprioritize(&view, &mut layer);
        assert!(second
            .reprioritized
            .iter()
            .any(|(t, p)| t.coord == TileCoord::new(4, 2, 0) && *p == 1));
        assert_eq!(layer.pending_priority(TileCoord::new(4, 2, 0)), Some(1));
    }

    #[test]
    fn test_pan_demotes_tiles_left_behind() {
        let mut layer = layer_on(ImagePyramid::zarr_chunk_256());
        let scheduler = ViewportTileScheduler::new(0);
        let view = ViewState::new((512.0, 512.0), 1.0, (512, 512));
        let first = scheduler.reprioritize(&view, &mut layer);
        assert_eq!(first.fetches.len(), 4);

        let view = ViewState::new((15104.0, 15104.0), 1.0, (512, 512));
        let second = scheduler.reprioritize(&view, &mut layer);
        assert_eq!(second.fetches.len(), 4);
        assert!(second.fetches.iter().all(|j| j.priority() == 1));
        assert_eq!(second.reprioritized.len(), 4);
        for job in &first.fetches {
            assert!(second
                .reprioritized
                .iter()
                .any(|(t, p)| *t == job.ticket && *p == priority::MAX_PRIORITY));
            assert_eq!(
                layer.pending_priority(job.ticket.coord),
                Some(priority::MAX_PRIORITY)
            );
        }

        // A third pass over the same view leaves the demoted tiles alone.
        let third = scheduler.reprioritize(&view, &mut layer);
        assert!(third.is_empty());
    }

    #[test]
    fn test_zoom_change_demotes_other_levels() {
        let mut layer = layer_on(ImagePyramid::zarr_chunk_256());
        let scheduler = ViewportTileScheduler::new(0);
        scheduler.reprioritize(&ViewState::new((512.0, 512.0), 1.0, (512, 512)), &mut layer);

        let view = ViewState::new((512.0, 512.0), 16.0, (512, 512));
        let coarse = scheduler.reprioritize(&view, &mut layer);
        assert!(coarse.fetches.iter().all(|j| j.ticket.coord.z == 0));
        assert!(coarse
            .reprioritized
            .iter()
            .all(|(t, p)| t.coord.z == 4 && *p == priority::MAX_PRIORITY));
        assert_eq!(coarse.reprioritized.len(), 4);
    }

    #[test]
    fn test_coarse_zoom_on_both_pyramids() {
        for (grid, expected_level) in [
            (ImagePyramid::legacy_2048(), 3u8),
            (ImagePyramid::zarr_chunk_256(), 4u8),
        ] {
            let coarsest = grid.resolutions()[0];
            let extent = *grid.extent();
            let (cx, cy) = extent.center();
            let mut layer = layer_on(grid);
            let view = ViewState::new((cx, cy), coarsest, (800, 600));
            let pass = ViewportTileScheduler::new(0).reprioritize(&view, &mut layer);
            assert!(!pass.fetches.is_empty());
            assert!(pass.fetches.iter().all(|j| j.ticket.coord.z == 0));
            assert!(pass.fetches.iter().all(|j| j.request.server_level == expected_level));
        }
    }

    #[test]
    fn test_view_outside_image_fetches_nothing() {
        let mut layer = layer_on(ImagePyramid::zarr_chunk_256());
        let view = ViewState::new((-5000.0, -5000.0), 1.0, (256, 256));
        let pass = ViewportTileScheduler::new(1).reprioritize(&view, &mut layer);
        assert!(pass.fetches.is_empty());
    }
}
