//! Configuration file support for tilescope.
//!
//! This module provides serialization and deserialization of application settings:
//! the tile service address, fetch preferences, pyramid geometry per dataset and
//! channel display overrides.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tilescope_tiles::{
    ChannelCatalog, GridError, ImagePyramid, PyramidConfig, Rgb, SelectionError,
    TileSourceFactory, ViewportTileScheduler,
};
use url::Url;

use crate::constants::{
    DEFAULT_MAX_BODY_BYTES, DEFAULT_MAX_CONNECTIONS, DEFAULT_REQUEST_TIMEOUT_SECS,
    DEFAULT_SERVER_URL,
};

/// Log level setting for the application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Show only errors
    Error,
    /// Show errors and warnings
    Warn,
    /// Show errors, warnings, and info messages
    #[default]
    Info,
    /// Show debug-level logging
    Debug,
    /// Show all log messages including trace
    Trace,
}

impl LogLevel {
    /// Get the display name for this log level.
    pub fn name(&self) -> &'static str {
        match self {
            LogLevel::Error => "Error",
            LogLevel::Warn => "Warn",
            LogLevel::Info => "Info",
            LogLevel::Debug => "Debug",
            LogLevel::Trace => "Trace",
        }
    }

    /// Convert to log crate's LevelFilter.
    pub fn to_level_filter(&self) -> log::LevelFilter {
        match self {
            LogLevel::Error => log::LevelFilter::Error,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Trace => log::LevelFilter::Trace,
        }
    }
}

/// Current configuration file format version.
/// Increment this when making breaking changes to the config format.
pub const CONFIG_VERSION: u32 = 1;

/// Built-in pyramid geometries seen in deployments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PyramidPreset {
    /// 2048 px tiles, 4 levels
    #[serde(rename = "legacy_2048")]
    Legacy2048,
    /// 4096 px tiles, 4 levels
    #[serde(rename = "legacy_4096")]
    Legacy4096,
    /// 256 px chunk-aligned tiles, 5 levels
    #[serde(rename = "zarr_chunk_256")]
    ZarrChunk256,
}

impl PyramidPreset {
    pub fn pyramid(self) -> ImagePyramid {
        match self {
            PyramidPreset::Legacy2048 => ImagePyramid::legacy_2048(),
            PyramidPreset::Legacy4096 => ImagePyramid::legacy_4096(),
            PyramidPreset::ZarrChunk256 => ImagePyramid::zarr_chunk_256(),
        }
    }
}

/// Pyramid geometry, either a preset name or explicit values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PyramidSetting {
    Preset(PyramidPreset),
    Custom(PyramidConfig),
}

impl PyramidSetting {
    pub fn build(&self) -> Result<ImagePyramid, GridError> {
        match self {
            PyramidSetting::Preset(preset) => Ok(preset.pyramid()),
            PyramidSetting::Custom(config) => config.build(),
        }
    }
}

impl Default for PyramidSetting {
    fn default() -> Self {
        PyramidSetting::Preset(PyramidPreset::ZarrChunk256)
    }
}

/// Application configuration that can be exported and imported.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Version of the configuration file format
    pub version: u32,

    /// Application name (for identification)
    #[serde(default = "default_app_name")]
    pub app_name: String,

    /// Base URL of the tile service
    #[serde(default = "default_server_url")]
    pub server_url: String,

    /// User preferences
    #[serde(default)]
    pub preferences: UserPreferences,

    /// Pyramid geometry for datasets without their own entry
    #[serde(default)]
    pub pyramid: PyramidSetting,

    /// Pyramid geometry per dataset id
    #[serde(default)]
    pub datasets: BTreeMap<String, PyramidSetting>,

    /// Channel display overrides
    #[serde(default)]
    pub channels: Vec<ChannelDisplayConfig>,
}

fn default_app_name() -> String {
    "tilescope".to_string()
}

fn default_server_url() -> String {
    DEFAULT_SERVER_URL.to_string()
}

/// User preferences section of the config.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserPreferences {
    /// Log verbosity level
    #[serde(default)]
    pub log_level: LogLevel,

    /// Timeout for one tile request, in seconds
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Concurrent tile fetches (native only)
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    /// Rings of tiles prefetched around the viewport
    #[serde(default = "default_prefetch_margin")]
    pub prefetch_margin: u32,

    /// Largest response body read from the tile service, in bytes
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: u64,
}

fn default_request_timeout_secs() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECS
}

fn default_max_connections() -> usize {
    DEFAULT_MAX_CONNECTIONS
}

fn default_prefetch_margin() -> u32 {
    tilescope_tiles::scheduler::DEFAULT_PREFETCH_MARGIN
}

fn default_max_body_bytes() -> u64 {
    DEFAULT_MAX_BODY_BYTES
}

impl Default for UserPreferences {
    fn default() -> Self {
        Self {
            log_level: LogLevel::default(),
            request_timeout_secs: default_request_timeout_secs(),
            max_connections: default_max_connections(),
            prefetch_margin: default_prefetch_margin(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

/// Display override for one channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelDisplayConfig {
    /// Channel code, e.g. 0 for brightfield or 12 for 488 nm
    pub id: u8,
    /// Display name of the channel
    pub name: String,
    /// RGB display color
    pub color: Rgb,
}

impl AppConfig {
    /// Create a new configuration with default values.
    pub fn new() -> Self {
        Self {
            version: CONFIG_VERSION,
            app_name: default_app_name(),
            server_url: default_server_url(),
            preferences: UserPreferences::default(),
            pyramid: PyramidSetting::default(),
            datasets: BTreeMap::new(),
            channels: Vec::new(),
        }
    }

    /// Serialize the configuration to JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Deserialize configuration from JSON.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;

        // Validate version compatibility
        if config.version > CONFIG_VERSION {
            return Err(ConfigError::VersionTooNew {
                file_version: config.version,
                supported_version: CONFIG_VERSION,
            });
        }

        config.validate()?;
        Ok(config)
    }

    /// Check everything that can be wrong without touching the network.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.server_url()?;
        self.channel_catalog()?;
        self.source_factory()?;
        Ok(())
    }

    pub fn server_url(&self) -> Result<Url, ConfigError> {
        Url::parse(&self.server_url).map_err(|source| ConfigError::InvalidUrl {
            url: self.server_url.clone(),
            source,
        })
    }

    /// Channel catalog with display overrides applied.
    ///
    /// Unknown channel ids are rejected rather than ignored.
    pub fn channel_catalog(&self) -> Result<ChannelCatalog, ConfigError> {
        let mut catalog = ChannelCatalog::new();
        for channel in &self.channels {
            catalog.set_display(channel.id, &channel.name, channel.color)?;
        }
        Ok(catalog)
    }

    /// Pyramid geometry used for a dataset.
    pub fn pyramid_for(&self, dataset_id: Option<&str>) -> Result<ImagePyramid, ConfigError> {
        let (name, setting) = match dataset_id.and_then(|id| self.datasets.get_key_value(id)) {
            Some((id, setting)) => (id.as_str(), setting),
            None => ("default", &self.pyramid),
        };
        setting.build().map_err(|source| ConfigError::InvalidPyramid {
            name: name.to_string(),
            source,
        })
    }

    /// Tile source factory carrying the default and per-dataset pyramids.
    pub fn source_factory(&self) -> Result<TileSourceFactory, ConfigError> {
        let mut factory = TileSourceFactory::new(self.server_url()?, self.pyramid_for(None)?);
        for id in self.datasets.keys() {
            factory = factory.with_dataset_grid(id, self.pyramid_for(Some(id))?);
        }
        Ok(factory)
    }

    pub fn scheduler(&self) -> ViewportTileScheduler {
        ViewportTileScheduler::new(self.preferences.prefetch_margin)
    }

    /// Get the default filename for config export.
    pub fn default_filename() -> &'static str {
        "tilescope-config.json"
    }

    /// Get the default config file path for auto-load/save.
    /// Returns None on WASM (no filesystem access).
    #[cfg(not(target_arch = "wasm32"))]
    pub fn default_path() -> Option<std::path::PathBuf> {
        // Try to use XDG config directory, fall back to home directory
        if let Some(config_dir) = dirs::config_dir() {
            Some(config_dir.join("tilescope").join(Self::default_filename()))
        } else {
            dirs::home_dir().map(|home_dir| {
                home_dir
                    .join(".config")
                    .join("tilescope")
                    .join(Self::default_filename())
            })
        }
    }

    /// Load configuration from a file.
    #[cfg(not(target_arch = "wasm32"))]
    pub fn load_from_path(path: &std::path::Path) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path)?;
        let config = Self::from_json(&json)?;
        log::info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    /// Try to load configuration from the default path.
    /// Returns None if the file doesn't exist or can't be read.
    #[cfg(not(target_arch = "wasm32"))]
    pub fn load_from_default_path() -> Option<Self> {
        let path = Self::default_path()?;
        if !path.exists() {
            log::debug!("No config file found at {:?}", path);
            return None;
        }

        match Self::load_from_path(&path) {
            Ok(config) => Some(config),
            Err(e) => {
                log::warn!("Failed to load config file {:?}: {}", path, e);
                None
            }
        }
    }

    /// Save configuration to a file, creating parent directories.
    #[cfg(not(target_arch = "wasm32"))]
    pub fn save_to_path(&self, path: &std::path::Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let json = self.to_json()?;
        std::fs::write(path, json)?;
        log::info!("Saved configuration to {:?}", path);
        Ok(())
    }

    /// Save configuration to the default path.
    #[cfg(not(target_arch = "wasm32"))]
    pub fn save_to_default_path(&self) -> Result<std::path::PathBuf, ConfigError> {
        let path = Self::default_path().ok_or_else(|| {
            ConfigError::IoError(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "Could not determine config directory",
            ))
        })?;
        self.save_to_path(&path)?;
        Ok(path)
    }

    /// LocalStorage key for WASM config persistence.
    #[cfg(target_arch = "wasm32")]
    const LOCALSTORAGE_KEY: &'static str = "tilescope-config";

    /// Try to load configuration from localStorage (WASM only).
    /// Returns None if not found or can't be parsed.
    #[cfg(target_arch = "wasm32")]
    pub fn load_from_local_storage() -> Option<Self> {
        let window = web_sys::window()?;
        let storage = window.local_storage().ok()??;

        match storage.get_item(Self::LOCALSTORAGE_KEY) {
            Ok(Some(json)) => match Self::from_json(&json) {
                Ok(config) => {
                    log::info!("Loaded configuration from localStorage");
                    Some(config)
                }
                Err(e) => {
                    log::warn!("Failed to parse config from localStorage: {}", e);
                    None
                }
            },
            Ok(None) => {
                log::debug!("No config found in localStorage");
                None
            }
            Err(e) => {
                log::warn!("Failed to read from localStorage: {:?}", e);
                None
            }
        }
    }

    /// Save configuration to localStorage (WASM only).
    #[cfg(target_arch = "wasm32")]
    pub fn save_to_local_storage(&self) -> Result<(), ConfigError> {
        let window = web_sys::window()
            .ok_or_else(|| ConfigError::StorageError("No window object available".to_string()))?;

        let storage = window
            .local_storage()
            .map_err(|e| ConfigError::StorageError(format!("localStorage access error: {:?}", e)))?
            .ok_or_else(|| ConfigError::StorageError("localStorage not available".to_string()))?;

        let json = self.to_json()?;

        storage
            .set_item(Self::LOCALSTORAGE_KEY, &json)
            .map_err(|e| {
                ConfigError::StorageError(format!("Failed to save to localStorage: {:?}", e))
            })?;

        log::info!("Saved configuration to localStorage");
        Ok(())
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// JSON parsing error
    #[error("Failed to parse configuration: {0}")]
    ParseError(#[from] serde_json::Error),

    /// Configuration version is newer than supported
    #[error("Config version {file_version} is newer than supported version {supported_version}")]
    VersionTooNew {
        file_version: u32,
        supported_version: u32,
    },

    /// I/O error when reading/writing config
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Storage error (localStorage in WASM)
    #[error("Storage error: {0}")]
    StorageError(String),

    /// Server URL does not parse
    #[error("Invalid server URL '{url}': {source}")]
    InvalidUrl {
        url: String,
        source: url::ParseError,
    },

    /// Pyramid geometry is inconsistent
    #[error("Invalid pyramid '{name}': {source}")]
    InvalidPyramid { name: String, source: GridError },

    /// Channel override names an unknown channel
    #[error("Invalid channel override: {0}")]
    Channel(#[from] SelectionError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use tilescope_tiles::ChannelId;

    #[test]
    fn test_default_config_roundtrip() {
        let config = AppConfig::new();
        let json = config.to_json().unwrap();
        let loaded = AppConfig::from_json(&json).unwrap();
        assert_eq!(loaded.server_url, DEFAULT_SERVER_URL);
        assert_eq!(loaded.preferences.max_connections, DEFAULT_MAX_CONNECTIONS);
        assert_eq!(loaded.pyramid, PyramidSetting::Preset(PyramidPreset::ZarrChunk256));
    }

    #[test]
    fn test_version_too_new() {
        let json = r#"{ "version": 99 }"#;
        assert!(matches!(
            AppConfig::from_json(json),
            Err(ConfigError::VersionTooNew { file_version: 99, .. })
        ));
    }

    #[test]
    fn test_missing_sections_use_defaults() {
        let config = AppConfig::from_json(r#"{ "version": 1 }"#).unwrap();
        assert_eq!(config.app_name, "tilescope");
        assert_eq!(config.preferences.log_level, LogLevel::Info);
        assert!(config.datasets.is_empty());
    }

    #[test]
    fn test_per_dataset_pyramids() {
        let json = r#"{
            "version": 1,
            "pyramid": "legacy_2048",
            "datasets": {
                "plate-zarr": "zarr_chunk_256",
                "plate-custom": {
                    "extent": [0, 0, 8192, 8192],
                    "tile_size_px": 512,
                    "resolutions": [4, 2, 1]
                }
            }
        }"#;
        let config = AppConfig::from_json(json).unwrap();
        assert_eq!(config.pyramid_for(None).unwrap().max_zoom(), 3);
        assert_eq!(config.pyramid_for(Some("unknown")).unwrap().tile_size_px(), 2048);
        assert_eq!(config.pyramid_for(Some("plate-zarr")).unwrap().max_zoom(), 4);
        let custom = config.pyramid_for(Some("plate-custom")).unwrap();
        assert_eq!((custom.tile_size_px(), custom.max_zoom()), (512, 2));

        let factory = config.source_factory().unwrap();
        assert_eq!(factory.grid_for(Some("plate-zarr")).max_zoom(), 4);
    }

    #[test]
    fn test_invalid_pyramid_rejected() {
        let json = r#"{
            "version": 1,
            "datasets": {
                "broken": { "extent": [0, 0, 10, 10], "tile_size_px": 256, "resolutions": [1, 2] }
            }
        }"#;
        assert!(matches!(
            AppConfig::from_json(json),
            Err(ConfigError::InvalidPyramid { .. })
        ));
    }

    #[test]
    fn test_channel_overrides_validated() {
        let json = r#"{
            "version": 1,
            "channels": [ { "id": 13, "name": "Cy5", "color": [200, 0, 0] } ]
        }"#;
        let config = AppConfig::from_json(json).unwrap();
        let catalog = config.channel_catalog().unwrap();
        assert_eq!(catalog.get(ChannelId::Fluorescence638).label, "Cy5");

        let json =
            r#"{ "version": 1, "channels": [ { "id": 7, "name": "?", "color": [0, 0, 0] } ] }"#;
        assert!(matches!(
            AppConfig::from_json(json),
            Err(ConfigError::Channel(SelectionError::UnknownChannel(7)))
        ));
    }

    #[test]
    fn test_invalid_server_url() {
        let json = r#"{ "version": 1, "server_url": "not a url" }"#;
        assert!(matches!(
            AppConfig::from_json(json),
            Err(ConfigError::InvalidUrl { .. })
        ));
    }

    #[test]
    fn test_save_and_load_file() {
        let dir = std::env::temp_dir().join(format!("tilescope-config-{}", std::process::id()));
        let path = dir.join("nested").join(AppConfig::default_filename());

        let mut config = AppConfig::new();
        config.server_url = "http://scope.local:9000/lens/".to_string();
        config.preferences.log_level = LogLevel::Debug;
        config.preferences.max_body_bytes = 1024;
        config.save_to_path(&path).unwrap();

        let loaded = AppConfig::load_from_path(&path).unwrap();
        assert_eq!(loaded.server_url, "http://scope.local:9000/lens/");
        assert_eq!(loaded.preferences.log_level, LogLevel::Debug);
        assert_eq!(loaded.preferences.max_body_bytes, 1024);
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_body_cap_defaults() {
        let config = AppConfig::from_json(r#"{ "version": 1, "preferences": {} }"#).unwrap();
        assert_eq!(config.preferences.max_body_bytes, DEFAULT_MAX_BODY_BYTES);
    }

    #[test]
    fn test_log_level_filter() {
        assert_eq!(LogLevel::Debug.to_level_filter(), log::LevelFilter::Debug);
        assert_eq!(LogLevel::default().name(), "Info");
    }
}
