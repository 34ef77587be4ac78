//! Deduplicating work queue with at-most-one-in-flight delivery.
//!
//! The queue is a set of pending identities, not a list of events:
//! rapid re-adds of the same identity coalesce, and an identity that is
//! re-added while a worker holds it is parked and redelivered only
//! after the worker calls [`WorkQueue::done`]. Two workers can never
//! hold the same identity at once.

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::Semaphore;
use tracing::trace;

use steward_api::ObjectRef;

#[derive(Default)]
struct QueueState {
    /// Identities waiting for a worker, in arrival order.
    pending: VecDeque<ObjectRef>,
    /// Identities queued or parked; the dedup set.
    dirty: HashSet<ObjectRef>,
    /// Identities currently held by a worker.
    processing: HashSet<ObjectRef>,
    shutting_down: bool,
}

/// Work queue of identities needing reconciliation.
pub struct WorkQueue {
    state: Mutex<QueueState>,
    /// One permit per entry in `pending`.
    ready: Semaphore,
}

impl WorkQueue {
    /// Create a new empty queue.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            ready: Semaphore::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Enqueue an identity for immediate processing.
    ///
    /// No-op if the identity is already queued. If it is currently
    /// being processed it is parked instead, and requeued on `done`.
    pub fn add(&self, key: ObjectRef) {
        let mut state = self.lock();
        if state.shutting_down || state.dirty.contains(&key) {
            return;
        }
        state.dirty.insert(key.clone());
        if state.processing.contains(&key) {
            trace!(%key, "Parked until in-flight pass completes");
            return;
        }
        state.pending.push_back(key);
        drop(state);
        self.ready.add_permits(1);
    }

    /// Enqueue an identity after a delay.
    pub fn add_after(self: &Arc<Self>, key: ObjectRef, delay: Duration) {
        let queue = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            queue.add(key);
        });
    }

    /// Pull the next identity, waiting until one is available.
    ///
    /// Returns `None` once the queue has shut down and drained.
    pub async fn next(&self) -> Option<ObjectRef> {
        loop {
            match self.ready.acquire().await {
                Ok(permit) => permit.forget(),
                Err(_) => return None,
            }
            let mut state = self.lock();
            if let Some(key) = state.pending.pop_front() {
                state.dirty.remove(&key);
                state.processing.insert(key.clone());
                return Some(key);
            }
            if state.shutting_down {
                return None;
            }
        }
    }

    /// Mark an identity's in-flight pass as finished.
    ///
    /// If the identity was re-added while in flight, it is requeued now.
    pub fn done(&self, key: &ObjectRef) {
        let mut state = self.lock();
        state.processing.remove(key);
        if state.dirty.contains(key) && !state.shutting_down {
            state.pending.push_back(key.clone());
            drop(state);
            self.ready.add_permits(1);
        }
    }

    /// Number of identities waiting for a worker.
    pub fn len(&self) -> usize {
        self.lock().pending.len()
    }

    /// Whether nothing is queued or in flight.
    pub fn is_empty(&self) -> bool {
        let state = self.lock();
        state.pending.is_empty() && state.processing.is_empty()
    }

    /// Stop accepting work and wake all waiting workers.
    pub fn shut_down(&self) {
        let mut state = self.lock();
        state.shutting_down = true;
        drop(state);
        self.ready.close();
    }
}

impl Default for WorkQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    fn key(name: &str) -> ObjectRef {
        ObjectRef::new("prod", name)
    }

    #[tokio::test]
    async fn test_add_deduplicates() {
        let queue = WorkQueue::new();
        queue.add(key("orders"));
        queue.add(key("orders"));
        assert_eq!(queue.len(), 1);

        assert_eq!(queue.next().await, Some(key("orders")));
        assert_eq!(queue.len(), 0);
    }

    #[tokio::test]
    async fn test_at_most_one_in_flight() {
        let queue = WorkQueue::new();
        queue.add(key("orders"));

        let in_flight = queue.next().await;
        assert_eq!(in_flight, Some(key("orders")));

        // Re-added while in flight: parked, not delivered.
        queue.add(key("orders"));
        queue.add(key("orders"));
        let second = timeout(Duration::from_millis(50), queue.next()).await;
        assert!(second.is_err(), "parked identity must not be redelivered");

        // Finished: exactly one more pass is scheduled.
        queue.done(&key("orders"));
        assert_eq!(queue.next().await, Some(key("orders")));
        queue.done(&key("orders"));
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_done_without_readd_does_not_requeue() {
        let queue = WorkQueue::new();
        queue.add(key("orders"));
        let _ = queue.next().await;
        queue.done(&key("orders"));
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_distinct_identities_run_in_parallel() {
        let queue = WorkQueue::new();
        queue.add(key("orders"));
        queue.add(key("payments"));

        let first = queue.next().await;
        let second = queue.next().await;
        assert!(first.is_some());
        assert!(second.is_some());
        assert_ne!(first, second);
    }

    #[tokio::test(start_paused = true)]
    async fn test_add_after_delays_delivery() {
        let queue = Arc::new(WorkQueue::new());
        queue.add_after(key("orders"), Duration::from_secs(5));

        tokio::time::advance(Duration::from_secs(4)).await;
        assert_eq!(queue.len(), 0);

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(queue.next().await, Some(key("orders")));
    }

    #[tokio::test]
    async fn test_shutdown_wakes_waiting_workers() {
        let queue = Arc::new(WorkQueue::new());
        let waiter = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.next().await })
        };

        queue.shut_down();
        assert_eq!(waiter.await.ok(), Some(None));

        // Adds after shutdown are dropped.
        queue.add(key("orders"));
        assert_eq!(queue.len(), 0);
    }
}
