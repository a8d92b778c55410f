//! Persistent mask overlay drawn above the raster layer.
//!
//! The overlay is created once with the map and survives every raster swap.
//! It holds segmentation masks as polygons in map coordinates.

use crate::channel::Rgb;
use crate::extent::Extent;

/// Minimum number of vertices required for a valid polygon.
pub const MIN_POLYGON_VERTICES: usize = 3;

/// Unique identifier for a mask.
pub type MaskId = u32;

/// One segmented object outline.
#[derive(Debug, Clone, PartialEq)]
pub struct Mask {
    pub id: MaskId,
    /// Label assigned by the segmentation service
    pub label: String,
    pub color: Rgb,
    /// Polygon vertices in map coordinates
    pub vertices: Vec<(f64, f64)>,
}

impl Mask {
    /// Check if a point lies inside the outline (ray casting).
    pub fn contains_point(&self, x: f64, y: f64) -> bool {
        if self.vertices.len() < MIN_POLYGON_VERTICES {
            return false;
        }
        let mut inside = false;
        let mut j = self.vertices.len() - 1;
        for i in 0..self.vertices.len() {
            let (xi, yi) = self.vertices[i];
            let (xj, yj) = self.vertices[j];
            if ((yi > y) != (yj > y)) && (x < (xj - xi) * (y - yi) / (yj - yi) + xi) {
                inside = !inside;
            }
            j = i;
        }
        inside
    }

    /// Bounding rectangle of the outline.
    pub fn bounds(&self) -> Option<Extent> {
        let (first, rest) = self.vertices.split_first()?;
        let mut extent = Extent::new(first.0, first.1, first.0, first.1);
        for &(x, y) in rest {
            extent.min_x = extent.min_x.min(x);
            extent.min_y = extent.min_y.min(y);
            extent.max_x = extent.max_x.max(x);
            extent.max_y = extent.max_y.max(y);
        }
        Some(extent)
    }
}

/// The annotation vector layer.
#[derive(Debug)]
pub struct MaskOverlay {
    masks: Vec<Mask>,
    next_id: MaskId,
    visible: bool,
}

impl Default for MaskOverlay {
    fn default() -> Self {
        Self::new()
    }
}

impl MaskOverlay {
    pub fn new() -> Self {
        Self {
            masks: Vec::new(),
            next_id: 0,
            visible: true,
        }
    }

    /// Add a mask; outlines with fewer than three vertices are ignored.
    pub fn add(&mut self, label: &str, color: Rgb, vertices: Vec<(f64, f64)>) -> Option<MaskId> {
        if vertices.len() < MIN_POLYGON_VERTICES {
            log::debug!("Ignoring mask '{}' with {} vertices", label, vertices.len());
            return None;
        }
        let id = self.next_id;
        self.next_id += 1;
        self.masks.push(Mask {
            id,
            label: label.to_string(),
            color,
            vertices,
        });
        Some(id)
    }

    /// Replace all masks, e.g. with a fresh segmentation result.
    pub fn replace(
        &mut self,
        masks: impl IntoIterator<Item = (String, Rgb, Vec<(f64, f64)>)>,
    ) -> usize {
        self.masks.clear();
        masks
            .into_iter()
            .filter_map(|(label, color, vertices)| self.add(&label, color, vertices))
            .count()
    }

    pub fn remove(&mut self, id: MaskId) -> Option<Mask> {
        let pos = self.masks.iter().position(|m| m.id == id)?;
        Some(self.masks.remove(pos))
    }

    pub fn clear(&mut self) {
        self.masks.clear();
    }

    pub fn masks(&self) -> &[Mask] {
        &self.masks
    }

    pub fn len(&self) -> usize {
        self.masks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.masks.is_empty()
    }

    pub fn is_visible(&self) -> bool {
        self.visible
    }

    pub fn set_visible(&mut self, visible: bool) {
        self.visible = visible;
    }

    /// Topmost mask containing the point.
    pub fn hit_test(&self, x: f64, y: f64) -> Option<&Mask> {
        self.masks.iter().rev().find(|m| m.contains_point(x, y))
    }
}
