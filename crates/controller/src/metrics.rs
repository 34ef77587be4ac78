//! Lightweight controller counters.
//!
//! Exposed as a snapshot struct rather than an exporter endpoint; the
//! embedding process decides how to publish them.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Counters shared across workers.
#[derive(Debug, Default)]
pub struct ControllerMetrics {
    reconcile_success: AtomicU64,
    reconcile_error: AtomicU64,
    requeues: AtomicU64,
    busy_ms: AtomicU64,
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricsSnapshot {
    /// Passes that finished without error.
    pub reconcile_success: u64,
    /// Passes that returned an error.
    pub reconcile_error: u64,
    /// Passes that asked to run again later.
    pub requeues: u64,
    /// Total wall time spent inside reconcile calls, in milliseconds.
    pub busy_ms: u64,
}

impl ControllerMetrics {
    /// Create zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_success(&self) {
        self.reconcile_success.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_error(&self) {
        self.reconcile_error.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_requeue(&self) {
        self.requeues.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_busy(&self, elapsed: Duration) {
        let ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
        self.busy_ms.fetch_add(ms, Ordering::Relaxed);
    }

    /// Read all counters at once.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            reconcile_success: self.reconcile_success.load(Ordering::Relaxed),
            reconcile_error: self.reconcile_error.load(Ordering::Relaxed),
            requeues: self.requeues.load(Ordering::Relaxed),
            busy_ms: self.busy_ms.load(Ordering::Relaxed),
        }
    }
}
