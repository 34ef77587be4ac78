//! Level-triggered reconciliation controller.
//!
//! Watches microservice desired state in a [`steward_store`] backend
//! and converges three dependent resources per microservice: a workload
//! replica set, a network endpoint, and a scaling policy. Changes feed
//! a deduplicating work queue; a pool of workers re-reads full state
//! per pass and applies the minimal writes. Failed passes retry with
//! capped exponential backoff, a periodic resync repairs silent drift,
//! and an orphan sweeper collects dependents whose owner is gone.

#![forbid(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![forbid(clippy::panic)]

pub mod backoff;
pub mod controller;
pub mod error;
pub mod gc;
pub mod metrics;
pub mod notifier;
pub mod queue;
pub mod reconciler;

// Re-export main types
pub use backoff::{BackoffPolicy, RetryTracker};
pub use controller::{Controller, ControllerConfig};
pub use error::{Error, Result};
pub use gc::OrphanSweeper;
pub use metrics::{ControllerMetrics, MetricsSnapshot};
pub use notifier::ChangeNotifier;
pub use queue::WorkQueue;
pub use reconciler::{ReconcileOutcome, Reconciler, ReconcilerConfig, FINALIZER};
