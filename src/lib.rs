//! Tilescope - tiled microscopy image viewer
//!
//! Displays stitched microscopy scans served as a tile pyramid, with
//! channel selection, per-channel processing and a segmentation mask
//! overlay. Runs natively as a command-line renderer and in the browser.

pub mod config;
pub mod constants;
pub mod fetch;
pub mod snapshot;
pub mod storage;
pub mod timepoints;
pub mod viewer;

pub use config::{AppConfig, ConfigError};
pub use viewer::{MapViewer, ViewerError};

// WASM entry point
#[cfg(target_arch = "wasm32")]
mod wasm;

#[cfg(target_arch = "wasm32")]
pub use wasm::*;
