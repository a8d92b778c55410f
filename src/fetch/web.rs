//! Browser tile fetching (WASM only)
//!
//! Each job is handed to `window.fetch` as soon as it is submitted; the
//! browser's own connection limit decides how many run at once. Results are
//! collected in a shared buffer and drained by the main loop on each tick.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use tilescope_tiles::{LayerId, TileJob, TileTicket};
use url::Url;
use wasm_bindgen::JsCast;
use wasm_bindgen::JsValue;
use wasm_bindgen_futures::JsFuture;
use web_sys::{Request, RequestInit, RequestMode, Response};

use super::{FetchResult, TileFetcher, TransportError, TransportResponse, resolve_response};

pub struct WebFetcher {
    /// Completed results waiting to be processed by main thread
    results: Rc<RefCell<VecDeque<FetchResult>>>,
    outstanding: usize,
}

impl WebFetcher {
    pub fn new() -> Self {
        Self {
            results: Rc::new(RefCell::new(VecDeque::new())),
            outstanding: 0,
        }
    }
}

impl Default for WebFetcher {
    fn default() -> Self {
        Self::new()
    }
}

fn js_error(e: JsValue) -> TransportError {
    TransportError::Network(format!("{:?}", e))
}

async fn fetch_text(url: &Url) -> Result<TransportResponse, TransportError> {
    let window = web_sys::window()
        .ok_or_else(|| TransportError::Network("No window object available".to_string()))?;

    let init = RequestInit::new();
    init.set_method("GET");
    init.set_mode(RequestMode::Cors);
    let request = Request::new_with_str_and_init(url.as_str(), &init).map_err(js_error)?;

    let response: Response = JsFuture::from(window.fetch_with_request(&request))
        .await
        .map_err(js_error)?
        .dyn_into()
        .map_err(js_error)?;
    let status = response.status();
    let body = JsFuture::from(response.text().map_err(js_error)?)
        .await
        .map_err(js_error)?
        .as_string()
        .unwrap_or_default();

    Ok(TransportResponse { status, body })
}

impl TileFetcher for WebFetcher {
    fn submit(&mut self, job: TileJob) {
        self.outstanding += 1;
        let results = Rc::clone(&self.results);
        wasm_bindgen_futures::spawn_local(async move {
            let response = fetch_text(&job.request.url).await;
            let result = resolve_response(&job, response);
            results.borrow_mut().push_back(result);
        });
    }

    /// Jobs are in flight as soon as they are submitted.
    fn reprioritize(&mut self, _ticket: &TileTicket, _priority: u32) -> bool {
        false
    }

    fn discard_queued_except(&mut self, _keep: LayerId) -> Vec<TileTicket> {
        Vec::new()
    }

    fn take_one_result(&mut self) -> Option<FetchResult> {
        let result = self.results.borrow_mut().pop_front();
        if result.is_some() {
            self.outstanding = self.outstanding.saturating_sub(1);
        }
        result
    }

    fn pending_count(&self) -> usize {
        self.outstanding
    }
}
