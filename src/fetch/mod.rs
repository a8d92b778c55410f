//! Tile fetching.
//!
//! A [`TileFetcher`] takes scheduled [`TileJob`]s, runs them against the
//! tile service and hands back one [`FetchResult`] per job. Every failure
//! mode ends in pixels: a network error, a bad status, an empty payload or
//! an undecodable image all resolve to an opaque black tile. Nothing is
//! retried automatically.
//!
//! Results carry the job's ticket; the caller writes them back through the
//! raster layer, which drops results for layers or requests that are no
//! longer current.

mod inline;
mod payload;
mod queue;

#[cfg(not(target_arch = "wasm32"))]
mod http;
#[cfg(not(target_arch = "wasm32"))]
mod native_worker;
#[cfg(target_arch = "wasm32")]
mod web;

pub use inline::InlineFetcher;
pub use payload::{PayloadError, decode_payload};
pub use queue::FetchQueue;

#[cfg(test)]
pub(crate) use payload::tests::encoded_tile;

#[cfg(not(target_arch = "wasm32"))]
pub use http::HttpTransport;
#[cfg(not(target_arch = "wasm32"))]
pub use native_worker::FetchPool;
#[cfg(target_arch = "wasm32")]
pub use web::WebFetcher;

use std::time::Duration;

use tilescope_tiles::{LayerId, TileContent, TileImage, TileJob, TileTicket, black_tile};
use url::Url;

/// Raw answer from the tile service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportResponse {
    pub status: u16,
    pub body: String,
}

impl TransportResponse {
    pub fn ok(body: impl Into<String>) -> Self {
        Self {
            status: 200,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// A request that produced no response at all.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Response body exceeds {0} bytes")]
    BodyTooLarge(u64),
}

/// Blocking GET against the tile service.
pub trait TileTransport: Send + Sync {
    fn get(&self, url: &Url) -> Result<TransportResponse, TransportError>;
}

/// Pixels for one finished job.
#[derive(Debug, Clone)]
pub struct FetchResult {
    pub ticket: TileTicket,
    pub image: TileImage,
    pub content: TileContent,
}

/// Turn a transport outcome into tile pixels, falling back to black.
pub fn resolve_response(
    job: &TileJob,
    response: Result<TransportResponse, TransportError>,
) -> FetchResult {
    let coord = job.ticket.coord;
    let size = job.request.tile_size_px;

    let decoded = match response {
        Ok(response) if response.is_success() => match decode_payload(&response.body, size) {
            Ok(image) => Some(image),
            Err(e) if e.is_empty_tile() => {
                log::debug!("No imagery for tile {}: {}", coord, e);
                None
            }
            Err(e) => {
                log::warn!("Tile {} payload rejected: {}", coord, e);
                None
            }
        },
        Ok(response) => {
            log::warn!("Tile {} request failed with status {}", coord, response.status);
            None
        }
        Err(e) => {
            log::warn!("Tile {} request failed: {}", coord, e);
            None
        }
    };

    let (image, content) = match decoded {
        Some(image) => (image, TileContent::Imagery),
        None => (black_tile(size), TileContent::Placeholder),
    };
    FetchResult {
        ticket: job.ticket,
        image,
        content,
    }
}

/// Something that runs tile jobs and collects their results.
///
/// Jobs still queued can be reprioritized or discarded; jobs already in
/// flight always run to completion.
pub trait TileFetcher {
    fn submit(&mut self, job: TileJob);

    /// Change the priority of a queued job. Returns false if it is no longer queued.
    fn reprioritize(&mut self, ticket: &TileTicket, priority: u32) -> bool;

    /// Drop queued jobs of every layer except `keep`, returning their tickets.
    fn discard_queued_except(&mut self, keep: LayerId) -> Vec<TileTicket>;

    /// Take one completed result. Non-blocking.
    fn take_one_result(&mut self) -> Option<FetchResult>;

    /// Jobs submitted whose results have not been taken yet.
    fn pending_count(&self) -> usize;

    /// Make progress on executors without background threads.
    fn poll(&mut self) {}
}
