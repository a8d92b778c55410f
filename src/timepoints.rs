//! Timepoint listing for a dataset.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use url::Url;

use crate::fetch::{TileTransport, TransportError};

/// One stored acquisition of a dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Timepoint {
    pub name: String,
    /// Remaining fields reported by the service, kept as-is
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
struct ListResponse {
    success: bool,
    #[serde(default)]
    timepoints: Vec<Timepoint>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum TimepointError {
    #[error("Cannot build timepoint URL: {0}")]
    Url(#[from] url::ParseError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("Timepoint listing failed with status {0}")]
    Status(u16),

    #[error("Malformed timepoint listing: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Service rejected timepoint listing: {0}")]
    Rejected(String),
}

/// `list-timepoints?dataset_id=<id>` relative to the service base URL.
pub fn timepoints_url(base_url: &Url, dataset_id: &str) -> Result<Url, TimepointError> {
    let mut base = base_url.clone();
    if !base.path().ends_with('/') {
        let path = format!("{}/", base.path());
        base.set_path(&path);
    }
    let mut url = base.join("list-timepoints")?;
    url.query_pairs_mut().append_pair("dataset_id", dataset_id);
    Ok(url)
}

/// Parse a listing body; `success: false` is an error.
pub fn parse_timepoints(body: &str) -> Result<Vec<Timepoint>, TimepointError> {
    let response: ListResponse = serde_json::from_str(body)?;
    if !response.success {
        return Err(TimepointError::Rejected(
            response
                .message
                .unwrap_or_else(|| "no reason given".to_string()),
        ));
    }
    Ok(response.timepoints)
}

/// Fetch and parse the timepoints of a dataset.
pub fn list_timepoints(
    transport: &dyn TileTransport,
    base_url: &Url,
    dataset_id: &str,
) -> Result<Vec<Timepoint>, TimepointError> {
    let url = timepoints_url(base_url, dataset_id)?;
    let response = transport.get(&url)?;
    if !response.is_success() {
        return Err(TimepointError::Status(response.status));
    }
    let timepoints = parse_timepoints(&response.body)?;
    log::info!("Dataset '{}' has {} timepoints", dataset_id, timepoints.len());
    Ok(timepoints)
}
