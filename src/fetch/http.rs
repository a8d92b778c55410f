//! Blocking HTTP transport (native only).

use std::io::Read;
use std::time::Duration;

use url::Url;

use super::{TileTransport, TransportError, TransportResponse};
use crate::constants::DEFAULT_MAX_BODY_BYTES;

/// `ureq` agent shared by all fetch workers.
pub struct HttpTransport {
    agent: ureq::Agent,
    timeout: Duration,
    max_body_bytes: u64,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(timeout)
            .user_agent(concat!("tilescope/", env!("CARGO_PKG_VERSION")))
            .build();
        Self {
            agent,
            timeout,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }

    /// Limit how much of a response body is read.
    pub fn with_max_body(mut self, max_body_bytes: u64) -> Self {
        self.max_body_bytes = max_body_bytes;
        self
    }

    fn read_body(&self, response: ureq::Response) -> Result<String, TransportError> {
        read_capped(response.into_reader(), self.max_body_bytes)
    }
}

/// Read a UTF-8 body of at most `cap` bytes.
fn read_capped(reader: impl Read, cap: u64) -> Result<String, TransportError> {
    let mut body = String::new();
    reader
        .take(cap.saturating_add(1))
        .read_to_string(&mut body)
        .map_err(|e| TransportError::Network(e.to_string()))?;
    if body.len() as u64 > cap {
        return Err(TransportError::BodyTooLarge(cap));
    }
    Ok(body)
}

impl TileTransport for HttpTransport {
    fn get(&self, url: &Url) -> Result<TransportResponse, TransportError> {
        match self.agent.get(url.as_str()).call() {
            Ok(response) => {
                let status = response.status();
                let body = self.read_body(response)?;
                Ok(TransportResponse { status, body })
            }
            // Error statuses still carry a response; the caller decides what they mean.
            Err(ureq::Error::Status(status, response)) => {
                let body = self.read_body(response).unwrap_or_else(|e| {
                    log::debug!("Dropping body of {} response from {}: {}", status, url, e);
                    String::new()
                });
                Ok(TransportResponse { status, body })
            }
            Err(ureq::Error::Transport(transport)) => {
                if transport.kind() == ureq::ErrorKind::Io
                    && transport.to_string().contains("timed out")
                {
                    Err(TransportError::Timeout(self.timeout))
                } else {
                    Err(TransportError::Network(transport.to_string()))
                }
            }
        }
    }
}
