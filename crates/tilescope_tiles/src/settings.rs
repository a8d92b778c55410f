//! Per-channel image processing settings sent along with every tile request.
//!
//! Settings live for the UI session only. They are serialized into four
//! independent JSON query parameters, each a dictionary keyed by channel code.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::channel::{ChannelCatalog, ChannelId, Rgb};

/// Default contrast (fraction of saturated pixels).
pub const DEFAULT_CONTRAST: f64 = 0.03;

/// Default brightness multiplier.
pub const DEFAULT_BRIGHTNESS: f64 = 1.0;

/// Default lower threshold percentile.
pub const DEFAULT_THRESHOLD_MIN: i32 = 2;

/// Default upper threshold percentile.
pub const DEFAULT_THRESHOLD_MAX: i32 = 98;

/// Percentile window used for intensity scaling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Threshold {
    pub min: i32,
    pub max: i32,
}

impl Default for Threshold {
    fn default() -> Self {
        Self {
            min: DEFAULT_THRESHOLD_MIN,
            max: DEFAULT_THRESHOLD_MAX,
        }
    }
}

/// Processing parameters for one channel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChannelProcessing {
    pub contrast: f64,
    pub brightness: f64,
    pub threshold: Threshold,
    pub color: Rgb,
}

impl ChannelProcessing {
    /// Defaults, using the given display color.
    pub fn with_color(color: Rgb) -> Self {
        Self {
            contrast: DEFAULT_CONTRAST,
            brightness: DEFAULT_BRIGHTNESS,
            threshold: Threshold::default(),
            color,
        }
    }
}

impl Default for ChannelProcessing {
    fn default() -> Self {
        Self::with_color([255, 255, 255])
    }
}

/// Format a color as `#RRGGBB`.
pub fn color_to_hex(color: Rgb) -> String {
    format!("#{:02X}{:02X}{:02X}", color[0], color[1], color[2])
}

/// The four query parameters carrying processing settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettingsQuery {
    pub contrast_settings: String,
    pub brightness_settings: String,
    pub threshold_settings: String,
    pub color_settings: String,
}

impl SettingsQuery {
    /// Parameters as `(name, value)` pairs, in request order.
    pub fn pairs(&self) -> [(&'static str, &str); 4] {
        [
            ("contrast_settings", self.contrast_settings.as_str()),
            ("brightness_settings", self.brightness_settings.as_str()),
            ("threshold_settings", self.threshold_settings.as_str()),
            ("color_settings", self.color_settings.as_str()),
        ]
    }
}

impl Default for SettingsQuery {
    fn default() -> Self {
        ProcessingSettings::new().to_query()
    }
}

/// Processing settings for all channels, keyed by channel.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ProcessingSettings {
    channels: BTreeMap<ChannelId, ChannelProcessing>,
}

impl ProcessingSettings {
    /// Empty settings; channels are filled in by [`ProcessingSettings::initialize`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Settings with defaults for every channel of the catalog.
    pub fn from_catalog(catalog: &ChannelCatalog) -> Self {
        let mut settings = Self::new();
        settings.initialize(catalog);
        settings
    }

    /// Fill in defaults for channels that have no settings yet.
    ///
    /// Runs when the channel selector opens; existing entries are kept.
    pub fn initialize(&mut self, catalog: &ChannelCatalog) {
        for info in catalog.iter() {
            self.channels
                .entry(info.id)
                .or_insert_with(|| ChannelProcessing::with_color(info.color));
        }
    }

    pub fn get(&self, id: ChannelId) -> Option<&ChannelProcessing> {
        self.channels.get(&id)
    }

    /// Settings for a channel, or the channel's defaults when unset.
    pub fn get_or_default(&self, id: ChannelId) -> ChannelProcessing {
        self.channels
            .get(&id)
            .copied()
            .unwrap_or_else(|| ChannelProcessing::with_color(id.default_color()))
    }

    pub fn set(&mut self, id: ChannelId, processing: ChannelProcessing) {
        self.channels.insert(id, processing);
    }

    /// Update one channel in place, creating defaults first if needed.
    pub fn update(&mut self, id: ChannelId, f: impl FnOnce(&mut ChannelProcessing)) {
        let entry = self
            .channels
            .entry(id)
            .or_insert_with(|| ChannelProcessing::with_color(id.default_color()));
        f(entry);
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Serialize into the four JSON dictionaries sent with tile requests.
    pub fn to_query(&self) -> SettingsQuery {
        let mut contrast = Map::new();
        let mut brightness = Map::new();
        let mut threshold = Map::new();
        let mut color = Map::new();

        for (id, p) in &self.channels {
            let key = id.key();
            contrast.insert(key.clone(), Value::from(p.contrast));
            brightness.insert(key.clone(), Value::from(p.brightness));
            threshold.insert(
                key.clone(),
                serde_json::json!({ "min": p.threshold.min, "max": p.threshold.max }),
            );
            color.insert(key, Value::from(color_to_hex(p.color)));
        }

        SettingsQuery {
            contrast_settings: Value::Object(contrast).to_string(),
            brightness_settings: Value::Object(brightness).to_string(),
            threshold_settings: Value::Object(threshold).to_string(),
            color_settings: Value::Object(color).to_string(),
        }
    }
}
