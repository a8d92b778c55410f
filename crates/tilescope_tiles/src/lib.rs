//! Tile pyramid addressing, prioritization and raster layer lifecycle for
//! large microscopy images.
//!
//! This crate does no I/O. It decides which tiles to fetch, in what order
//! and under which URL, and tracks what has been resolved. Fetching and
//! decoding live in the application crate.

pub mod address;
pub mod annotation;
pub mod channel;
pub mod extent;
pub mod grid;
pub mod layer;
pub mod lifecycle;
pub mod priority;
pub mod scheduler;
pub mod settings;

pub use address::{
    ChannelMode, Endpoint, RasterMode, SourceError, TileRequest, TileSource, TimeScope,
};
pub use annotation::{Mask, MaskOverlay};
pub use channel::{ChannelCatalog, ChannelId, ChannelInfo, ChannelSelection, Rgb, SelectionError};
pub use extent::Extent;
pub use grid::{GridError, ImagePyramid, PyramidConfig, TileCoord, TileRange};
pub use layer::{
    black_tile, ApplyOutcome, LayerId, RasterLayer, TileContent, TileDemand, TileImage, TileTicket,
};
pub use lifecycle::{
    transition, DisplayEvent, DisplayState, Effect, MapSurface, TileSourceFactory, Transition,
    TransitionError,
};
pub use scheduler::{SchedulePass, TileJob, ViewError, ViewState, ViewportTileScheduler};
pub use settings::{ChannelProcessing, ProcessingSettings, SettingsQuery, Threshold};
