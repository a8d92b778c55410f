use wasm_bindgen::prelude::*;

use tilescope_tiles::{ChannelId, ChannelSelection, DisplayEvent, TileCoord, ViewState};

use crate::config::AppConfig;
use crate::fetch::WebFetcher;
use crate::storage::MapPreferences;
use crate::viewer::MapViewer;

#[wasm_bindgen(start)]
pub fn start() {
    console_error_panic_hook::set_once();

    let level = AppConfig::load_from_local_storage()
        .unwrap_or_default()
        .preferences
        .log_level
        .to_level_filter()
        .to_level()
        .unwrap_or(log::Level::Error);
    if let Err(e) = console_log::init_with_level(level) {
        web_sys::console::log_1(&format!("Logger already set: {}", e).into());
    }
    log::info!("Tilescope WASM starting...");
}

fn js_err(e: impl std::fmt::Display) -> JsValue {
    JsValue::from_str(&e.to_string())
}

/// Map viewer handle exposed to the page.
#[wasm_bindgen]
pub struct TileMap {
    viewer: MapViewer<WebFetcher>,
}

#[wasm_bindgen]
impl TileMap {
    /// Build a viewer from the stored configuration and open it if the
    /// session was already set up.
    #[wasm_bindgen(constructor)]
    pub fn new() -> Result<TileMap, JsValue> {
        let config = AppConfig::load_from_local_storage().unwrap_or_default();
        let preferences = MapPreferences::browser().map_err(js_err)?;
        let mut viewer =
            MapViewer::new(&config, WebFetcher::new(), preferences).map_err(js_err)?;
        if viewer.auto_open().map_err(js_err)? {
            log::info!("Map restored from session");
        }
        Ok(TileMap { viewer })
    }

    pub fn open(&mut self) -> Result<(), JsValue> {
        self.viewer.open().map_err(js_err)
    }

    #[wasm_bindgen(js_name = setView)]
    pub fn set_view(
        &mut self,
        center_x: f64,
        center_y: f64,
        resolution: f64,
        width: u32,
        height: u32,
    ) {
        self.viewer
            .set_view(ViewState::new((center_x, center_y), resolution, (width, height)));
    }

    /// Stored configuration as JSON, defaults when none is stored.
    #[wasm_bindgen(js_name = exportConfig)]
    pub fn export_config() -> Result<String, JsValue> {
        AppConfig::load_from_local_storage()
            .unwrap_or_default()
            .to_json()
            .map_err(js_err)
    }

    /// Validate and store a configuration; it applies from the next page load.
    #[wasm_bindgen(js_name = importConfig)]
    pub fn import_config(json: &str) -> Result<(), JsValue> {
        let config = AppConfig::from_json(json).map_err(js_err)?;
        config.save_to_local_storage().map_err(js_err)
    }

    #[wasm_bindgen(js_name = selectDataset)]
    pub fn select_dataset(&mut self, dataset_id: Option<String>) -> Result<(), JsValue> {
        self.viewer
            .handle(DisplayEvent::DatasetSelected(dataset_id))
            .map_err(js_err)
    }

    /// Apply a comma-separated list of channel codes.
    #[wasm_bindgen(js_name = applyChannels)]
    pub fn apply_channels(&mut self, codes: &str) -> Result<(), JsValue> {
        let selection = ChannelSelection::parse_codes(codes).map_err(js_err)?;
        self.viewer
            .handle(DisplayEvent::ChannelsApplied(selection))
            .map_err(js_err)
    }

    #[wasm_bindgen(js_name = setMerge)]
    pub fn set_merge(&mut self, merge: bool) -> Result<(), JsValue> {
        self.viewer
            .handle(DisplayEvent::MergeToggled(merge))
            .map_err(js_err)
    }

    #[wasm_bindgen(js_name = selectTimepoint)]
    pub fn select_timepoint(&mut self, timepoint: Option<String>) -> Result<(), JsValue> {
        self.viewer
            .handle(DisplayEvent::TimepointSelected(timepoint))
            .map_err(js_err)
    }

    #[wasm_bindgen(js_name = setContrast)]
    pub fn set_contrast(&mut self, code: u8, contrast: f64) -> Result<(), JsValue> {
        let id = ChannelId::try_from(code).map_err(js_err)?;
        self.viewer
            .update_settings(id, |p| p.contrast = contrast)
            .map_err(js_err)
    }

    #[wasm_bindgen(js_name = setBrightness)]
    pub fn set_brightness(&mut self, code: u8, brightness: f64) -> Result<(), JsValue> {
        let id = ChannelId::try_from(code).map_err(js_err)?;
        self.viewer
            .update_settings(id, |p| p.brightness = brightness)
            .map_err(js_err)
    }

    /// A new scan landed in the live grid.
    #[wasm_bindgen(js_name = liveGridRefreshed)]
    pub fn live_grid_refreshed(&mut self, timestamp: String) -> Result<(), JsValue> {
        self.viewer
            .handle(DisplayEvent::LiveGridRefreshed(timestamp))
            .map_err(js_err)
    }

    /// Apply finished fetches; call once per animation frame.
    pub fn tick(&mut self) -> usize {
        self.viewer.tick()
    }

    /// RGBA bytes of a resolved tile, if any.
    #[wasm_bindgen(js_name = tileRgba)]
    pub fn tile_rgba(&self, z: u8, x: u32, y: u32) -> Option<Vec<u8>> {
        let raster = self.viewer.surface().raster()?;
        raster
            .tile(TileCoord::new(z, x, y))
            .map(|(image, _)| image.as_raw().clone())
    }

    #[wasm_bindgen(js_name = addMask)]
    pub fn add_mask(&mut self, label: &str, r: u8, g: u8, b: u8, xy: Vec<f64>) -> Option<u32> {
        let vertices = xy.chunks_exact(2).map(|p| (p[0], p[1])).collect();
        self.viewer
            .surface_mut()
            .annotations_mut()
            .add(label, [r, g, b], vertices)
    }

    #[wasm_bindgen(js_name = clearMasks)]
    pub fn clear_masks(&mut self) {
        self.viewer.surface_mut().annotations_mut().clear();
    }
}
