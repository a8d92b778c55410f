//! Tile source construction and request URL building.
//!
//! A [`TileSource`] is built once per raster layer from the resolved display
//! mode and produces one request URL per tile on demand.
//!
//! ## Level numbering
//!
//! Map zoom grows with detail, the tile server numbers levels the other way
//! round: `server_level = max_zoom - map_zoom`. `max_zoom` must come from the
//! same [`ImagePyramid`] the map uses, otherwise the server silently returns
//! tiles of the wrong resolution.

use std::sync::Arc;

use thiserror::Error;
use url::Url;

use crate::channel::{ChannelId, ChannelSelection};
use crate::grid::{ImagePyramid, TileCoord};
use crate::settings::{ProcessingSettings, SettingsQuery};

/// Convert a map zoom to the server's resolution level.
pub fn server_level(map_zoom: u8, max_zoom: u8) -> Option<u8> {
    max_zoom.checked_sub(map_zoom)
}

/// Convert a server resolution level back to a map zoom.
pub fn map_zoom(server_level: u8, max_zoom: u8) -> Option<u8> {
    max_zoom.checked_sub(server_level)
}

/// Tile-serving endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    /// Live scan grid, one channel
    Tile,
    /// Stored timepoint of a dataset, one channel
    TileForTimepoint,
    /// Several channels composited server-side
    MergedTiles,
}

impl Endpoint {
    /// Path segment relative to the service base URL.
    pub fn path(self) -> &'static str {
        match self {
            Endpoint::Tile => "tile",
            Endpoint::TileForTimepoint => "tile-for-timepoint",
            Endpoint::MergedTiles => "merged-tiles",
        }
    }
}

/// Which channels a raster layer shows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelMode {
    Single(ChannelId),
    Merged(ChannelSelection),
}

/// Which acquisition a raster layer shows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimeScope {
    /// The live scan grid, optionally pinned to an acquisition timestamp
    LiveGrid { timestamp: Option<String> },
    /// A named timepoint snapshot
    Timepoint(String),
}

/// Fully resolved raster display mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RasterMode {
    pub channels: ChannelMode,
    pub scope: TimeScope,
}

impl RasterMode {
    /// Endpoint serving this mode.
    pub fn endpoint(&self) -> Endpoint {
        match (&self.channels, &self.scope) {
            (ChannelMode::Merged(_), _) => Endpoint::MergedTiles,
            (ChannelMode::Single(_), TimeScope::Timepoint(_)) => Endpoint::TileForTimepoint,
            (ChannelMode::Single(_), TimeScope::LiveGrid { .. }) => Endpoint::Tile,
        }
    }

    /// Channel name for single requests, comma-joined names for merged ones.
    pub fn channel_spec(&self) -> String {
        match &self.channels {
            ChannelMode::Single(id) => id.server_name().to_string(),
            ChannelMode::Merged(selection) => selection.server_names_csv(),
        }
    }

    pub fn timepoint(&self) -> Option<&str> {
        match &self.scope {
            TimeScope::Timepoint(name) => Some(name),
            TimeScope::LiveGrid { .. } => None,
        }
    }
}

/// Errors while building a tile source or a request URL.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SourceError {
    #[error("Endpoint '{}' requires a dataset id", .0.path())]
    MissingDataset(Endpoint),

    #[error("Base URL '{0}' cannot carry a path")]
    UnusableBaseUrl(String),

    #[error("Failed to build tile URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("Tile {0} is outside the pyramid")]
    InvalidTile(TileCoord),

    #[error("Tile source is missing a display mode")]
    MissingMode,
}

/// One tile load, created per tile and discarded once resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct TileRequest {
    pub coord: TileCoord,
    pub server_level: u8,
    pub dataset_id: Option<String>,
    pub timepoint: Option<String>,
    pub channel_spec: String,
    pub priority: u32,
    /// Edge length of the tile, for placeholders
    pub tile_size_px: u32,
    pub url: Url,
}

impl TileRequest {
    /// Change the priority hint, rewriting it in the URL in place.
    pub fn set_priority(&mut self, priority: u32) {
        let pairs: Vec<(String, String)> = self
            .url
            .query_pairs()
            .into_owned()
            .map(|(k, v)| {
                if k == "priority" {
                    (k, priority.to_string())
                } else {
                    (k, v)
                }
            })
            .collect();
        self.url.query_pairs_mut().clear().extend_pairs(pairs);
        self.priority = priority;
    }
}

/// Produces request URLs for one raster layer.
#[derive(Debug, Clone)]
pub struct TileSource {
    base_url: Url,
    grid: Arc<ImagePyramid>,
    dataset_id: Option<String>,
    mode: RasterMode,
    settings: SettingsQuery,
}

impl TileSource {
    /// Start building a source against a service base URL and pyramid.
    pub fn builder(base_url: Url, grid: Arc<ImagePyramid>) -> TileSourceBuilder {
        TileSourceBuilder {
            base_url,
            grid,
            dataset_id: None,
            mode: None,
            settings: SettingsQuery::default(),
        }
    }

    pub fn grid(&self) -> &Arc<ImagePyramid> {
        &self.grid
    }

    pub fn mode(&self) -> &RasterMode {
        &self.mode
    }

    pub fn dataset_id(&self) -> Option<&str> {
        self.dataset_id.as_deref()
    }

    pub fn endpoint(&self) -> Endpoint {
        self.mode.endpoint()
    }

    /// Build the request for one tile.
    pub fn request(&self, coord: TileCoord, priority: u32) -> Result<TileRequest, SourceError> {
        if !self.grid.is_valid(coord) {
            return Err(SourceError::InvalidTile(coord));
        }
        let level =
            server_level(coord.z, self.grid.max_zoom()).ok_or(SourceError::InvalidTile(coord))?;

        let mut url = self.base_url.join(self.endpoint().path())?;
        {
            let mut query = url.query_pairs_mut();
            let z = level.to_string();
            let x = coord.x.to_string();
            let y = coord.y.to_string();
            let priority_str = priority.to_string();
            let dataset = self.dataset_id.as_deref();

            match (&self.mode.channels, &self.mode.scope) {
                (ChannelMode::Single(channel), TimeScope::LiveGrid { timestamp }) => {
                    query.append_pair("channel_name", channel.server_name());
                    append_tile_position(&mut query, &z, &x, &y, &priority_str);
                    append_settings(&mut query, &self.settings);
                    if let Some(dataset) = dataset {
                        query.append_pair("dataset_id", dataset);
                    }
                    if let Some(timestamp) = timestamp {
                        query.append_pair("timestamp", timestamp);
                    }
                }
                (ChannelMode::Single(channel), TimeScope::Timepoint(timepoint)) => {
                    let dataset = dataset.ok_or(SourceError::MissingDataset(self.endpoint()))?;
                    query.append_pair("dataset_id", dataset);
                    query.append_pair("timepoint", timepoint);
                    query.append_pair("channel_name", channel.server_name());
                    append_tile_position(&mut query, &z, &x, &y, &priority_str);
                    append_settings(&mut query, &self.settings);
                }
                (ChannelMode::Merged(selection), scope) => {
                    let dataset = dataset.ok_or(SourceError::MissingDataset(self.endpoint()))?;
                    query.append_pair("dataset_id", dataset);
                    query.append_pair("channels", &selection.server_names_csv());
                    append_tile_position(&mut query, &z, &x, &y, &priority_str);
                    append_settings(&mut query, &self.settings);
                    match scope {
                        TimeScope::Timepoint(timepoint) => {
                            query.append_pair("timepoint", timepoint);
                        }
                        TimeScope::LiveGrid {
                            timestamp: Some(timestamp),
                        } => {
                            query.append_pair("timestamp", timestamp);
                        }
                        TimeScope::LiveGrid { timestamp: None } => {}
                    }
                }
            }
        }

        Ok(TileRequest {
            coord,
            server_level: level,
            dataset_id: self.dataset_id.clone(),
            timepoint: self.mode.timepoint().map(str::to_string),
            channel_spec: self.mode.channel_spec(),
            priority,
            tile_size_px: self.grid.tile_size_px(),
            url,
        })
    }
}

type QueryPairs<'a> = url::form_urlencoded::Serializer<'a, url::UrlQuery<'a>>;

fn append_tile_position(query: &mut QueryPairs<'_>, z: &str, x: &str, y: &str, priority: &str) {
    query
        .append_pair("z", z)
        .append_pair("x", x)
        .append_pair("y", y)
        .append_pair("priority", priority);
}

fn append_settings(query: &mut QueryPairs<'_>, settings: &SettingsQuery) {
    for (name, value) in settings.pairs() {
        query.append_pair(name, value);
    }
}

/// Builder for [`TileSource`], used once per layer transition.
pub struct TileSourceBuilder {
    base_url: Url,
    grid: Arc<ImagePyramid>,
    dataset_id: Option<String>,
    mode: Option<RasterMode>,
    settings: SettingsQuery,
}

impl TileSourceBuilder {
    pub fn dataset(mut self, dataset_id: Option<String>) -> Self {
        self.dataset_id = dataset_id;
        self
    }

    pub fn mode(mut self, mode: RasterMode) -> Self {
        self.mode = Some(mode);
        self
    }

    /// Snapshot the processing settings; later edits need a new source.
    pub fn settings(mut self, settings: &ProcessingSettings) -> Self {
        self.settings = settings.to_query();
        self
    }

    pub fn build(self) -> Result<TileSource, SourceError> {
        let mode = self.mode.ok_or(SourceError::MissingMode)?;
        let endpoint = mode.endpoint();
        if endpoint != Endpoint::Tile && self.dataset_id.is_none() {
            return Err(SourceError::MissingDataset(endpoint));
        }

        let mut base_url = self.base_url;
        if base_url.cannot_be_a_base() {
            return Err(SourceError::UnusableBaseUrl(base_url.to_string()));
        }
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        base_url.set_query(None);

        Ok(TileSource {
            base_url,
            grid: self.grid,
            dataset_id: self.dataset_id,
            mode,
            settings: self.settings,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    use crate::settings::ChannelProcessing;

    fn base() -> Url {
        Url::parse("https://scope.example.org/agent-lens").unwrap()
    }

    fn params(url: &Url) -> HashMap<String, String> {
        url.query_pairs().into_owned().collect()
    }

    fn keys(url: &Url) -> Vec<String> {
        url.query_pairs().map(|(k, _)| k.into_owned()).collect()
    }

    fn live(channel: ChannelId) -> RasterMode {
        RasterMode {
            channels: ChannelMode::Single(channel),
            scope: TimeScope::LiveGrid { timestamp: None },
        }
    }

    #[test]
    fn test_level_inversion_roundtrip() {
        for max_zoom in [3u8, 4] {
            for zoom in 0..=max_zoom {
                let level = server_level(zoom, max_zoom).unwrap();
                assert_eq!(map_zoom(level, max_zoom), Some(zoom));
            }
            assert_eq!(server_level(max_zoom + 1, max_zoom), None);
        }
        assert_eq!(server_level(0, 3), Some(3));
        assert_eq!(server_level(0, 4), Some(4));
    }

    #[test]
    fn test_single_channel_live_url() {
        let grid = Arc::new(ImagePyramid::legacy_2048());
        let source = TileSource::builder(base(), grid)
            .mode(live(ChannelId::Brightfield))
            .settings(&ProcessingSettings::new())
            .build()
            .unwrap();

        let request = source.request(TileCoord::new(1, 2, 3), 1).unwrap();
        assert_eq!(request.url.path(), "/agent-lens/tile");
        assert_eq!(
            keys(&request.url),
            vec![
                "channel_name",
                "z",
                "x",
                "y",
                "priority",
                "contrast_settings",
                "brightness_settings",
                "threshold_settings",
                "color_settings"
            ]
        );
        let p = params(&request.url);
        assert_eq!(p["channel_name"], "BF_LED_matrix_full");
        assert_eq!(p["z"], "2");
        assert_eq!(p["x"], "2");
        assert_eq!(p["y"], "3");
        assert_eq!(p["priority"], "1");
        assert_eq!(request.server_level, 2);
    }

    #[test]
    fn test_level_follows_configured_max_zoom() {
        let coord = TileCoord::new(0, 0, 0);
        let legacy = TileSource::builder(base(), Arc::new(ImagePyramid::legacy_2048()))
            .mode(live(ChannelId::Brightfield))
            .build()
            .unwrap();
        let zarr = TileSource::builder(base(), Arc::new(ImagePyramid::zarr_chunk_256()))
            .mode(live(ChannelId::Brightfield))
            .build()
            .unwrap();

        assert_eq!(params(&legacy.request(coord, 1).unwrap().url)["z"], "3");
        assert_eq!(params(&zarr.request(coord, 1).unwrap().url)["z"], "4");
    }

    #[test]
    fn test_live_url_with_dataset_and_timestamp() {
        let source = TileSource::builder(base(), Arc::new(ImagePyramid::zarr_chunk_256()))
            .dataset(Some("plate-7".to_string()))
            .mode(RasterMode {
                channels: ChannelMode::Single(ChannelId::Fluorescence488),
                scope: TimeScope::LiveGrid {
                    timestamp: Some("2026-10-18T10:00:00".to_string()),
                },
            })
            .build()
            .unwrap();

        let url = source.request(TileCoord::new(4, 0, 0), 7).unwrap().url;
        let p = params(&url);
        assert_eq!(p["dataset_id"], "plate-7");
        assert_eq!(p["timestamp"], "2026-10-18T10:00:00");
        assert_eq!(p["z"], "0");
        assert_eq!(p["priority"], "7");
    }

    #[test]
    fn test_timepoint_url() {
        let source = TileSource::builder(base(), Arc::new(ImagePyramid::legacy_2048()))
            .dataset(Some("plate-7".to_string()))
            .mode(RasterMode {
                channels: ChannelMode::Single(ChannelId::Fluorescence638),
                scope: TimeScope::Timepoint("t0003".to_string()),
            })
            .build()
            .unwrap();

        let request = source.request(TileCoord::new(3, 5, 6), 20).unwrap();
        assert_eq!(request.url.path(), "/agent-lens/tile-for-timepoint");
        assert_eq!(&keys(&request.url)[..3], ["dataset_id", "timepoint", "channel_name"]);
        assert_eq!(request.timepoint.as_deref(), Some("t0003"));
        assert_eq!(params(&request.url)["z"], "0");
    }

    #[test]
    fn test_merged_url_carries_channel_list() {
        let selection = ChannelSelection::from_channels([
            ChannelId::Fluorescence488,
            ChannelId::Fluorescence638,
        ])
        .unwrap();
        let mut settings = ProcessingSettings::new();
        settings.set(ChannelId::Fluorescence488, ChannelProcessing::default());

        let source = TileSource::builder(base(), Arc::new(ImagePyramid::legacy_2048()))
            .dataset(Some("plate-7".to_string()))
            .mode(RasterMode {
                channels: ChannelMode::Merged(selection),
                scope: TimeScope::Timepoint("t1".to_string()),
            })
            .settings(&settings)
            .build()
            .unwrap();

        let request = source.request(TileCoord::new(0, 0, 0), 1).unwrap();
        assert_eq!(request.url.path(), "/agent-lens/merged-tiles");
        let p = params(&request.url);
        assert_eq!(p["channels"], "Fluorescence_488_nm_Ex,Fluorescence_638_nm_Ex");
        assert_eq!(p["timepoint"], "t1");
        assert!(!p.contains_key("channel_name"));
        assert_eq!(request.channel_spec, p["channels"]);

        let contrast: serde_json::Value = serde_json::from_str(&p["contrast_settings"]).unwrap();
        assert_eq!(contrast["12"], 0.03);
    }

    #[test]
    fn test_merged_live_url_keeps_timestamp() {
        let selection =
            ChannelSelection::from_channels([ChannelId::Brightfield, ChannelId::Fluorescence488])
                .unwrap();
        let live_at = |timestamp: Option<&str>| {
            TileSource::builder(base(), Arc::new(ImagePyramid::zarr_chunk_256()))
                .dataset(Some("plate-7".to_string()))
                .mode(RasterMode {
                    channels: ChannelMode::Merged(selection.clone()),
                    scope: TimeScope::LiveGrid {
                        timestamp: timestamp.map(str::to_string),
                    },
                })
                .build()
                .unwrap()
        };

        let url = live_at(Some("2026-10-18T10:00:00"))
            .request(TileCoord::new(4, 0, 0), 1)
            .unwrap()
            .url;
        assert_eq!(url.path(), "/agent-lens/merged-tiles");
        let p = params(&url);
        assert_eq!(p["timestamp"], "2026-10-18T10:00:00");
        assert!(!p.contains_key("timepoint"));

        let url = live_at(None).request(TileCoord::new(4, 0, 0), 1).unwrap().url;
        assert!(!params(&url).contains_key("timestamp"));
    }

    #[test]
    fn test_dataset_required_for_stored_endpoints() {
        let result = TileSource::builder(base(), Arc::new(ImagePyramid::legacy_2048()))
            .mode(RasterMode {
                channels: ChannelMode::Single(ChannelId::Brightfield),
                scope: TimeScope::Timepoint("t1".to_string()),
            })
            .build();
        assert_eq!(
            result.unwrap_err(),
            SourceError::MissingDataset(Endpoint::TileForTimepoint)
        );

        let missing_mode =
            TileSource::builder(base(), Arc::new(ImagePyramid::legacy_2048())).build();
        assert_eq!(missing_mode.unwrap_err(), SourceError::MissingMode);
    }

    #[test]
    fn test_invalid_tile_rejected() {
        let source = TileSource::builder(base(), Arc::new(ImagePyramid::zarr_chunk_256()))
            .mode(live(ChannelId::Brightfield))
            .build()
            .unwrap();
        let coord = TileCoord::new(5, 0, 0);
        assert_eq!(source.request(coord, 1), Err(SourceError::InvalidTile(coord)));
        let coord = TileCoord::new(0, 9, 0);
        assert_eq!(source.request(coord, 1), Err(SourceError::InvalidTile(coord)));
    }

    #[test]
    fn test_set_priority_rewrites_url() {
        let source = TileSource::builder(base(), Arc::new(ImagePyramid::zarr_chunk_256()))
            .mode(live(ChannelId::Brightfield))
            .build()
            .unwrap();
        let mut request = source.request(TileCoord::new(2, 1, 1), 12).unwrap();
        let before = keys(&request.url);
        request.set_priority(1);
        assert_eq!(request.priority, 1);
        assert_eq!(params(&request.url)["priority"], "1");
        assert_eq!(keys(&request.url), before);
        assert_eq!(request.tile_size_px, 256);
    }

    #[test]
    fn test_base_url_query_is_dropped() {
        let base = Url::parse("http://localhost:9527/svc/?token=abc").unwrap();
        let source = TileSource::builder(base, Arc::new(ImagePyramid::zarr_chunk_256()))
            .mode(live(ChannelId::Brightfield))
            .build()
            .unwrap();
        let url = source.request(TileCoord::new(0, 0, 0), 1).unwrap().url;
        assert_eq!(url.path(), "/svc/tile");
        assert!(!params(&url).contains_key("token"));
    }
}
