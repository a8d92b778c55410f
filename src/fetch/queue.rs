//! Priority queue of tile jobs waiting for a connection.

use tilescope_tiles::{LayerId, TileJob, TileTicket};

/// Jobs ordered by priority, then by submission order.
///
/// Queues stay small (a screenful of tiles plus the prefetch ring), so a
/// linear scan beats keeping a heap consistent under reprioritization.
#[derive(Debug, Default)]
pub struct FetchQueue {
    jobs: Vec<(u64, TileJob)>,
    next_order: u64,
}

impl FetchQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, job: TileJob) {
        self.jobs.push((self.next_order, job));
        self.next_order += 1;
    }

    /// Remove and return the most urgent job.
    pub fn pop(&mut self) -> Option<TileJob> {
        let index = self
            .jobs
            .iter()
            .enumerate()
            .min_by_key(|(_, (order, job))| (job.priority(), *order))
            .map(|(i, _)| i)?;
        Some(self.jobs.swap_remove(index).1)
    }

    /// Update a queued job's priority and the hint in its URL.
    pub fn reprioritize(&mut self, ticket: &TileTicket, priority: u32) -> bool {
        match self.jobs.iter_mut().find(|(_, job)| job.ticket == *ticket) {
            Some((_, job)) => {
                job.request.set_priority(priority);
                true
            }
            None => false,
        }
    }

    /// Drop jobs of other layers, returning their tickets.
    pub fn discard_except(&mut self, keep: LayerId) -> Vec<TileTicket> {
        let mut dropped = Vec::new();
        self.jobs.retain(|(_, job)| {
            if job.ticket.layer == keep {
                true
            } else {
                dropped.push(job.ticket);
                false
            }
        });
        dropped
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::tests::job;
    use tilescope_tiles::TileCoord;

    #[test]
    fn test_pops_most_urgent_then_oldest() {
        let mut queue = FetchQueue::new();
        queue.push(job(1, TileCoord::new(4, 0, 0), 7));
        queue.push(job(1, TileCoord::new(4, 1, 0), 1));
        queue.push(job(1, TileCoord::new(4, 2, 0), 1));
        queue.push(job(1, TileCoord::new(4, 3, 0), 5));

        let order: Vec<u32> = std::iter::from_fn(|| queue.pop())
            .map(|j| j.ticket.coord.x)
            .collect();
        assert_eq!(order, vec![1, 2, 3, 0]);
    }

    #[test]
    fn test_reprioritize_moves_job_forward() {
        let mut queue = FetchQueue::new();
        let far = job(1, TileCoord::new(4, 5, 5), 12);
        let ticket = far.ticket;
        queue.push(job(1, TileCoord::new(4, 0, 0), 6));
        queue.push(far);

        assert!(queue.reprioritize(&ticket, 1));
        let next = queue.pop().unwrap();
        assert_eq!(next.ticket, ticket);
        assert_eq!(next.priority(), 1);
        assert!(next.request.url.query_pairs().any(|(k, v)| k == "priority" && v == "1"));
        assert!(!queue.reprioritize(&ticket, 3));
    }

    #[test]
    fn test_discard_other_layers() {
        let mut queue = FetchQueue::new();
        queue.push(job(1, TileCoord::new(4, 0, 0), 1));
        queue.push(job(2, TileCoord::new(4, 0, 0), 1));
        queue.push(job(1, TileCoord::new(4, 1, 0), 1));

        let dropped = queue.discard_except(LayerId(2));
        assert_eq!(dropped.len(), 2);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.pop().unwrap().ticket.layer, LayerId(2));
    }
}
