//! Background worker threads for tile fetching (native only)
//!
//! This module provides a `FetchPool`: a fixed number of threads sharing one
//! priority queue, much like a browser's per-host connection limit. Results
//! come back over a channel and are drained from the main thread with
//! `take_one_result`, mirroring the WASM `WebFetcher` API.

use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};

use tilescope_tiles::{LayerId, TileJob, TileTicket};
use web_time::Instant;

use super::{FetchQueue, FetchResult, TileFetcher, TileTransport, resolve_response};

/// Queue and shutdown flag guarded by one lock.
#[derive(Default)]
struct PoolState {
    queue: FetchQueue,
    shutdown: bool,
}

struct Shared {
    state: Mutex<PoolState>,
    wake: Condvar,
}

impl Shared {
    /// Lock the state; a panicked worker cannot leave the queue half-updated.
    fn lock(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Fixed pool of fetch threads.
pub struct FetchPool {
    shared: Arc<Shared>,
    /// Receiver for results from the worker threads
    result_rx: Receiver<FetchResult>,
    /// Handles to the worker threads (for joining on drop)
    workers: Vec<JoinHandle<()>>,
    /// Jobs submitted whose result has not been taken yet
    outstanding: usize,
}

impl FetchPool {
    /// Spawn `connections` worker threads (at least one).
    ///
    /// Returns `Err` if a thread fails to spawn.
    pub fn spawn(transport: Arc<dyn TileTransport>, connections: usize) -> Result<Self, String> {
        let shared = Arc::new(Shared {
            state: Mutex::new(PoolState::default()),
            wake: Condvar::new(),
        });
        let (result_tx, result_rx) = mpsc::channel::<FetchResult>();

        let mut pool = Self {
            shared,
            result_rx,
            workers: Vec::new(),
            outstanding: 0,
        };

        for index in 0..connections.max(1) {
            let shared = Arc::clone(&pool.shared);
            let transport = Arc::clone(&transport);
            let result_tx = result_tx.clone();
            let handle = thread::Builder::new()
                .name(format!("tile-fetch-{}", index))
                .spawn(move || {
                    log::debug!("Tile fetch worker {} started", index);
                    Self::worker_loop(&shared, transport.as_ref(), &result_tx);
                    log::debug!("Tile fetch worker {} exiting", index);
                })
                .map_err(|e| format!("Failed to spawn fetch thread: {}", e))?;
            pool.workers.push(handle);
        }

        log::info!("Tile fetch pool spawned with {} connections", pool.workers.len());
        Ok(pool)
    }

    /// Worker main loop: wait for a job, run it, send the result.
    fn worker_loop(
        shared: &Shared,
        transport: &dyn TileTransport,
        result_tx: &Sender<FetchResult>,
    ) {
        loop {
            let job = {
                let mut state = shared.lock();
                loop {
                    if state.shutdown {
                        return;
                    }
                    if let Some(job) = state.queue.pop() {
                        break job;
                    }
                    state = shared
                        .wake
                        .wait(state)
                        .unwrap_or_else(|poisoned| poisoned.into_inner());
                }
            };

            let started = Instant::now();
            let response = transport.get(&job.request.url);
            let result = resolve_response(&job, response);
            log::trace!(
                "Fetched tile {} (priority {}) in {:?}",
                job.ticket.coord,
                job.priority(),
                started.elapsed()
            );

            if result_tx.send(result).is_err() {
                log::warn!("Result channel closed, fetch worker exiting");
                return;
            }
        }
    }
}

impl TileFetcher for FetchPool {
    fn submit(&mut self, job: TileJob) {
        self.shared.lock().queue.push(job);
        self.outstanding += 1;
        self.shared.wake.notify_one();
    }

    fn reprioritize(&mut self, ticket: &TileTicket, priority: u32) -> bool {
        self.shared.lock().queue.reprioritize(ticket, priority)
    }

    fn discard_queued_except(&mut self, keep: LayerId) -> Vec<TileTicket> {
        let dropped = self.shared.lock().queue.discard_except(keep);
        self.outstanding = self.outstanding.saturating_sub(dropped.len());
        dropped
    }

    fn take_one_result(&mut self) -> Option<FetchResult> {
        match self.result_rx.try_recv() {
            Ok(result) => {
                self.outstanding = self.outstanding.saturating_sub(1);
                Some(result)
            }
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => {
                log::warn!("Fetch workers disconnected");
                None
            }
        }
    }

    fn pending_count(&self) -> usize {
        self.outstanding
    }
}

impl Drop for FetchPool {
    fn drop(&mut self) {
        log::debug!("Shutting down tile fetch pool");

        self.shared.lock().shutdown = true;
        self.shared.wake.notify_all();

        for handle in self.workers.drain(..) {
            if let Err(e) = handle.join() {
                log::warn!("Fetch thread panicked: {:?}", e);
            }
        }
    }
}
