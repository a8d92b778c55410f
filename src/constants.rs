//! Global constants for the tilescope application

/// Tile service used when no configuration overrides it
pub const DEFAULT_SERVER_URL: &str = "http://localhost:9527/agent-lens/";

/// Number of concurrent tile fetches on native, close to a browser's per-host limit
pub const DEFAULT_MAX_CONNECTIONS: usize = 6;

/// Per-request timeout for tile and timepoint fetches
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 20;

/// Largest tile or listing response read into memory
pub const DEFAULT_MAX_BODY_BYTES: u64 = 64 * 1024 * 1024;

/// Payloads shorter than this carry no imagery
pub const MIN_PAYLOAD_LEN: usize = 100;

/// Local storage key of the selected dataset
pub const DATASET_STORAGE_KEY: &str = "imageMapDataset";

/// Session storage key gating map auto-load
pub const MAP_SETUP_STORAGE_KEY: &str = "mapSetupExplicit";
