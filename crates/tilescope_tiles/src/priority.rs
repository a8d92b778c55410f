//! Load priority hints for tile requests.
//!
//! Lower values are more urgent. The value travels to the tile server as the
//! `priority` query parameter so it can order its own work; the client only
//! uses it to order dispatch of queued requests. Rendering stays correct
//! when the server ignores the hint, only responsiveness suffers.

use crate::extent::Extent;

/// Priority of a tile overlapping the viewport.
pub const VISIBLE_PRIORITY: u32 = 1;

/// Priority used when no usable viewport is known.
pub const DEFAULT_PRIORITY: u32 = 10;

/// Offset added to the distance rank of tiles outside the viewport.
pub const OFFSCREEN_BASE_PRIORITY: u32 = 5;

/// Least urgent priority.
pub const MAX_PRIORITY: u32 = 20;

/// Priority of a tile given the current viewport bounds.
///
/// `viewport` is taken as a raw bounds slice; anything other than four
/// finite values yields [`DEFAULT_PRIORITY`].
pub fn estimate(tile: &Extent, viewport: Option<&[f64]>, tile_size_px: u32) -> u32 {
    match viewport.and_then(Extent::from_slice) {
        Some(view) => estimate_in_view(tile, &view, tile_size_px),
        None => DEFAULT_PRIORITY,
    }
}

/// Priority of a tile against a known viewport extent.
pub fn estimate_in_view(tile: &Extent, view: &Extent, tile_size_px: u32) -> u32 {
    if tile.intersects(view) {
        return VISIBLE_PRIORITY;
    }

    let distance = tile.center_distance(view);
    let rank = (distance / tile_size_px.max(1) as f64).floor();
    if !rank.is_finite() {
        return MAX_PRIORITY;
    }
    let rank = rank.min(MAX_PRIORITY as f64) as u32;
    (rank + OFFSCREEN_BASE_PRIORITY).min(MAX_PRIORITY)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tile_at(x: f64, y: f64, size: f64) -> Extent {
        Extent::new(x, y, x + size, y + size)
    }

    #[test]
    fn test_visible_tile_is_most_urgent() {
        let view = [0.0, 0.0, 1000.0, 800.0];
        let tile = tile_at(900.0, 700.0, 256.0);
        assert_eq!(estimate(&tile, Some(view.as_slice()), 256), VISIBLE_PRIORITY);
    }

    #[test]
    fn test_edge_touching_tile_is_not_visible() {
        let view = [0.0, 0.0, 256.0, 256.0];
        let tile = tile_at(256.0, 0.0, 256.0);
        // Centers are 256 apart: floor(256 / 256) + 5.
        assert_eq!(estimate(&tile, Some(view.as_slice()), 256), 6);
    }

    #[test]
    fn test_offscreen_priority_grows_with_distance_and_caps() {
        let view = [0.0, 0.0, 256.0, 256.0];
        let mut last = 0;
        for step in 1..40 {
            let tile = tile_at(step as f64 * 256.0, 0.0, 256.0);
            let p = estimate(&tile, Some(view.as_slice()), 256);
            assert!(p >= last, "priority decreased at step {}", step);
            assert!(p <= MAX_PRIORITY);
            assert!(p >= OFFSCREEN_BASE_PRIORITY);
            last = p;
        }
        assert_eq!(last, MAX_PRIORITY);
    }

    #[test]
    fn test_distance_formula() {
        let view = [0.0, 0.0, 100.0, 100.0];
        // Center (50,50) vs (50+3*256, 50): distance 768 -> rank 3 -> 8.
        let tile = Extent::new(768.0, 0.0, 868.0, 100.0);
        assert_eq!(estimate(&tile, Some(view.as_slice()), 256), 8);
    }

    #[test]
    fn test_malformed_viewport_uses_default() {
        let tile = tile_at(0.0, 0.0, 256.0);
        assert_eq!(estimate(&tile, None, 256), DEFAULT_PRIORITY);
        assert_eq!(estimate(&tile, Some(&[][..]), 256), DEFAULT_PRIORITY);
        assert_eq!(estimate(&tile, Some(&[0.0, 0.0, 1.0][..]), 256), DEFAULT_PRIORITY);
        assert_eq!(
            estimate(&tile, Some(&[0.0, 0.0, 1.0, 1.0, 1.0][..]), 256),
            DEFAULT_PRIORITY
        );
        assert_eq!(
            estimate(&tile, Some(&[f64::NAN, 0.0, 1.0, 1.0][..]), 256),
            DEFAULT_PRIORITY
        );
    }

    #[test]
    fn test_zero_tile_size_does_not_panic() {
        let view = [0.0, 0.0, 10.0, 10.0];
        let tile = tile_at(1000.0, 1000.0, 10.0);
        assert_eq!(estimate(&tile, Some(view.as_slice()), 0), MAX_PRIORITY);
    }
}
