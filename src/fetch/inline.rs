//! Fetcher running jobs on the calling thread.

use std::collections::VecDeque;
use std::sync::Arc;

use tilescope_tiles::{LayerId, TileJob, TileTicket};

use super::{FetchQueue, FetchResult, TileFetcher, TileTransport, resolve_response};

/// Runs one queued job per [`TileFetcher::poll`], most urgent first.
pub struct InlineFetcher {
    transport: Arc<dyn TileTransport>,
    queue: FetchQueue,
    results: VecDeque<FetchResult>,
}

impl InlineFetcher {
    pub fn new(transport: Arc<dyn TileTransport>) -> Self {
        Self {
            transport,
            queue: FetchQueue::new(),
            results: VecDeque::new(),
        }
    }

    /// Run every queued job.
    pub fn run_until_idle(&mut self) {
        while !self.queue.is_empty() {
            self.poll();
        }
    }
}

impl TileFetcher for InlineFetcher {
    fn submit(&mut self, job: TileJob) {
        self.queue.push(job);
    }

    fn reprioritize(&mut self, ticket: &TileTicket, priority: u32) -> bool {
        self.queue.reprioritize(ticket, priority)
    }

    fn discard_queued_except(&mut self, keep: LayerId) -> Vec<TileTicket> {
        self.queue.discard_except(keep)
    }

    fn take_one_result(&mut self) -> Option<FetchResult> {
        self.results.pop_front()
    }

    fn pending_count(&self) -> usize {
        self.queue.len() + self.results.len()
    }

    fn poll(&mut self) {
        if let Some(job) = self.queue.pop() {
            let response = self.transport.get(&job.request.url);
            self.results.push_back(resolve_response(&job, response));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use tilescope_tiles::{TileContent, TileCoord};
    use url::Url;

    use crate::fetch::tests::job;
    use crate::fetch::{TransportError, TransportResponse};

    /// Records requested URLs and fails every request.
    #[derive(Default)]
    struct RecordingTransport {
        seen: Mutex<Vec<Url>>,
    }

    impl TileTransport for RecordingTransport {
        fn get(&self, url: &Url) -> Result<TransportResponse, TransportError> {
            self.seen.lock().unwrap().push(url.clone());
            Err(TransportError::Network("offline".to_string()))
        }
    }

    #[test]
    fn test_runs_most_urgent_first() {
        let transport = Arc::new(RecordingTransport::default());
        let mut fetcher = InlineFetcher::new(transport.clone());
        fetcher.submit(job(1, TileCoord::new(4, 0, 0), 9));
        fetcher.submit(job(1, TileCoord::new(4, 1, 0), 1));
        assert_eq!(fetcher.pending_count(), 2);

        fetcher.poll();
        let first = fetcher.take_one_result().unwrap();
        assert_eq!(first.ticket.coord, TileCoord::new(4, 1, 0));
        assert_eq!(first.content, TileContent::Placeholder);

        fetcher.run_until_idle();
        assert_eq!(fetcher.pending_count(), 1);
        assert!(fetcher.take_one_result().is_some());
        assert_eq!(fetcher.pending_count(), 0);
        assert_eq!(transport.seen.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_no_automatic_retry() {
        let transport = Arc::new(RecordingTransport::default());
        let mut fetcher = InlineFetcher::new(transport.clone());
        fetcher.submit(job(1, TileCoord::new(4, 0, 0), 1));
        for _ in 0..5 {
            fetcher.poll();
        }
        assert_eq!(transport.seen.lock().unwrap().len(), 1);
    }
}
