//! Render what the map shows into a single image.
//!
//! Tiles are sampled nearest-neighbour at the zoom the scheduler picks for
//! the view. Tiles that are not resolved yet stay black.

use image::{Rgba, RgbaImage};
use tilescope_tiles::{MaskOverlay, RasterLayer, TileCoord, ViewError, ViewState};

const BACKGROUND: Rgba<u8> = Rgba([0, 0, 0, 255]);

/// Mask fill opacity, out of 255.
const MASK_ALPHA: u16 = 96;

/// Compose the resolved tiles covering `view` into one RGBA image.
pub fn compose(layer: &RasterLayer, view: &ViewState) -> Result<RgbaImage, ViewError> {
    let extent = view.extent()?;
    let (width, height) = view.size.ok_or(ViewError::MissingSize)?;

    let grid = layer.source().grid();
    let z = grid.zoom_for_resolution(view.resolution)?;
    let span = grid.tile_span(z)?;
    let origin = grid.extent();

    let mut out = RgbaImage::from_pixel(width, height, BACKGROUND);
    for py in 0..height {
        let my = extent.min_y + (py as f64 + 0.5) * view.resolution;
        let ty = ((my - origin.min_y) / span).floor();
        if ty < 0.0 {
            continue;
        }
        for px in 0..width {
            let mx = extent.min_x + (px as f64 + 0.5) * view.resolution;
            let tx = ((mx - origin.min_x) / span).floor();
            if tx < 0.0 {
                continue;
            }
            let Some((tile, _)) = layer.tile(TileCoord::new(z, tx as u32, ty as u32)) else {
                continue;
            };

            let fx = (mx - origin.min_x) / span - tx;
            let fy = (my - origin.min_y) / span - ty;
            let ix = ((fx * tile.width() as f64) as u32).min(tile.width() - 1);
            let iy = ((fy * tile.height() as f64) as u32).min(tile.height() - 1);
            out.put_pixel(px, py, *tile.get_pixel(ix, iy));
        }
    }
    Ok(out)
}

/// Blend mask fills over a composed view. Hidden overlays draw nothing.
pub fn draw_masks(
    image: &mut RgbaImage,
    overlay: &MaskOverlay,
    view: &ViewState,
) -> Result<(), ViewError> {
    if !overlay.is_visible() || overlay.is_empty() {
        return Ok(());
    }
    let extent = view.extent()?;

    for (px, py, pixel) in image.enumerate_pixels_mut() {
        let mx = extent.min_x + (px as f64 + 0.5) * view.resolution;
        let my = extent.min_y + (py as f64 + 0.5) * view.resolution;
        if let Some(mask) = overlay.hit_test(mx, my) {
            for (c, m) in pixel.0.iter_mut().zip(mask.color) {
                *c = ((*c as u16 * (255 - MASK_ALPHA) + m as u16 * MASK_ALPHA) / 255) as u8;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use tilescope_tiles::{
        ChannelId, ChannelMode, ImagePyramid, LayerId, RasterMode, TileContent, TileDemand,
        TileSource, TimeScope,
    };
    use url::Url;

    fn layer() -> RasterLayer {
        let source = TileSource::builder(
            Url::parse("http://localhost/").unwrap(),
            Arc::new(ImagePyramid::zarr_chunk_256()),
        )
        .mode(RasterMode {
            channels: ChannelMode::Single(ChannelId::Brightfield),
            scope: TimeScope::LiveGrid { timestamp: None },
        })
        .build()
        .unwrap();
        RasterLayer::new(LayerId(1), source)
    }

    fn fill(layer: &mut RasterLayer, coord: TileCoord, color: [u8; 4]) {
        let TileDemand::Fetch(ticket) = layer.demand(coord, 1) else {
            panic!("tile {} should be fetchable", coord);
        };
        let image = RgbaImage::from_pixel(256, 256, Rgba(color));
        layer.resolve(&ticket, image, TileContent::Imagery);
    }

    #[test]
    fn test_compose_places_tiles_and_leaves_gaps_black() {
        let mut layer = layer();
        fill(&mut layer, TileCoord::new(4, 0, 0), [255, 0, 0, 255]);
        fill(&mut layer, TileCoord::new(4, 1, 1), [0, 0, 255, 255]);

        let view = ViewState::new((256.0, 256.0), 1.0, (512, 512));
        let image = compose(&layer, &view).unwrap();

        assert_eq!(image.dimensions(), (512, 512));
        assert_eq!(image.get_pixel(10, 10), &Rgba([255, 0, 0, 255]));
        assert_eq!(image.get_pixel(500, 500), &Rgba([0, 0, 255, 255]));
        assert_eq!(image.get_pixel(500, 10), &BACKGROUND);
        assert_eq!(image.get_pixel(10, 500), &BACKGROUND);
    }

    #[test]
    fn test_compose_outside_image_is_black() {
        let layer = layer();
        let view = ViewState::new((-1000.0, -1000.0), 1.0, (8, 8));
        let image = compose(&layer, &view).unwrap();
        assert!(image.pixels().all(|p| *p == BACKGROUND));
    }

    #[test]
    fn test_compose_needs_size() {
        let view = ViewState {
            center: (0.0, 0.0),
            resolution: 1.0,
            size: None,
        };
        assert!(matches!(compose(&layer(), &view), Err(ViewError::MissingSize)));
    }

    #[test]
    fn test_masks_tint_covered_pixels() {
        let view = ViewState::new((8.0, 8.0), 1.0, (16, 16));
        let mut image = RgbaImage::from_pixel(16, 16, BACKGROUND);
        let mut overlay = MaskOverlay::new();
        overlay
            .add("cell", [255, 255, 255], vec![(0.0, 0.0), (8.0, 0.0), (8.0, 8.0), (0.0, 8.0)])
            .unwrap();

        draw_masks(&mut image, &overlay, &view).unwrap();
        assert_eq!(image.get_pixel(2, 2), &Rgba([96, 96, 96, 255]));
        assert_eq!(image.get_pixel(12, 12), &BACKGROUND);

        let mut hidden = RgbaImage::from_pixel(16, 16, BACKGROUND);
        overlay.set_visible(false);
        draw_masks(&mut hidden, &overlay, &view).unwrap();
        assert!(hidden.pixels().all(|p| *p == BACKGROUND));
    }
}
