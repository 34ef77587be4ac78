//! The controller runtime: watch tasks feeding a shared queue, a pool
//! of reconcile workers draining it, and a periodic resync that
//! re-enqueues the world.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use steward_store::ResourceStore;

use crate::backoff::{BackoffPolicy, RetryTracker};
use crate::error::{Error, Result};
use crate::gc::OrphanSweeper;
use crate::metrics::{ControllerMetrics, MetricsSnapshot};
use crate::notifier::ChangeNotifier;
use crate::queue::WorkQueue;
use crate::reconciler::{ReconcileOutcome, Reconciler, ReconcilerConfig};

/// Configuration for the controller runtime.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Number of concurrent reconcile workers.
    pub workers: usize,
    /// Interval between full resyncs (and orphan sweeps).
    pub resync_interval: Duration,
    /// Retry backoff for failed passes and watch reconnects.
    pub backoff: BackoffPolicy,
    /// Per-pass reconciler settings.
    pub reconciler: ReconcilerConfig,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            resync_interval: Duration::from_secs(30),
            backoff: BackoffPolicy::default(),
            reconciler: ReconcilerConfig::default(),
        }
    }
}

impl ControllerConfig {
    /// Set the worker count.
    #[must_use]
    pub const fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Set the resync interval.
    #[must_use]
    pub const fn with_resync_interval(mut self, interval: Duration) -> Self {
        self.resync_interval = interval;
        self
    }

    /// Set the retry backoff policy.
    #[must_use]
    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    /// Set the reconciler settings.
    #[must_use]
    pub const fn with_reconciler(mut self, reconciler: ReconcilerConfig) -> Self {
        self.reconciler = reconciler;
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(Error::invalid_config("workers must be >= 1"));
        }
        if self.resync_interval.is_zero() {
            return Err(Error::invalid_config("resync interval must be > 0"));
        }
        Ok(())
    }
}

/// The reconciliation controller.
pub struct Controller {
    store: Arc<dyn ResourceStore>,
    config: ControllerConfig,
    metrics: Arc<ControllerMetrics>,
}

impl Controller {
    /// Create a new controller over the given store.
    pub fn new(store: Arc<dyn ResourceStore>, config: ControllerConfig) -> Self {
        Self {
            store,
            config,
            metrics: Arc::new(ControllerMetrics::new()),
        }
    }

    /// Current counter values.
    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Run until a value is sent on `shutdown`.
    ///
    /// Workers finish their in-flight pass before exiting, so shutdown
    /// never interrupts a half-applied reconciliation.
    pub async fn run(&self, shutdown: broadcast::Sender<()>) -> Result<()> {
        self.config.validate()?;

        let queue = Arc::new(WorkQueue::new());
        let tracker = Arc::new(RetryTracker::new(self.config.backoff.clone()));
        let reconciler = Arc::new(Reconciler::new(
            Arc::clone(&self.store),
            self.config.reconciler.clone(),
        ));
        let notifier = Arc::new(ChangeNotifier::new(
            Arc::clone(&self.store),
            Arc::clone(&queue),
            self.config.backoff.clone(),
        ));

        info!(workers = self.config.workers, "Controller starting");
        let mut tasks = Arc::clone(&notifier).run(&shutdown);
        tasks.push(self.spawn_resync(Arc::clone(&notifier), &shutdown));
        tasks.push(Self::spawn_shutdown_watch(Arc::clone(&queue), &shutdown));

        let mut workers = Vec::with_capacity(self.config.workers);
        for worker_id in 0..self.config.workers {
            workers.push(self.spawn_worker(
                worker_id,
                Arc::clone(&queue),
                Arc::clone(&reconciler),
                Arc::clone(&tracker),
            ));
        }

        for worker in workers {
            worker.await.ok();
        }
        for task in tasks {
            task.await.ok();
        }
        info!("Controller stopped");
        Ok(())
    }

    /// Periodic resync plus orphan sweep. The first tick fires
    /// immediately, covering identities that predate the watch streams.
    fn spawn_resync(
        &self,
        notifier: Arc<ChangeNotifier>,
        shutdown: &broadcast::Sender<()>,
    ) -> JoinHandle<()> {
        let sweeper = OrphanSweeper::new(Arc::clone(&self.store));
        let interval = self.config.resync_interval;
        let mut shutdown = shutdown.subscribe();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = notifier.resync_once().await {
                            warn!(error = %e, "Resync failed");
                        }
                        if let Err(e) = sweeper.sweep().await {
                            warn!(error = %e, "Orphan sweep failed");
                        }
                    }
                    _ = shutdown.recv() => {
                        debug!("Resync task shutting down");
                        return;
                    }
                }
            }
        })
    }

    fn spawn_shutdown_watch(
        queue: Arc<WorkQueue>,
        shutdown: &broadcast::Sender<()>,
    ) -> JoinHandle<()> {
        let mut shutdown = shutdown.subscribe();
        tokio::spawn(async move {
            shutdown.recv().await.ok();
            queue.shut_down();
        })
    }

    fn spawn_worker(
        &self,
        worker_id: usize,
        queue: Arc<WorkQueue>,
        reconciler: Arc<Reconciler>,
        tracker: Arc<RetryTracker>,
    ) -> JoinHandle<()> {
        let metrics = Arc::clone(&self.metrics);
        tokio::spawn(async move {
            while let Some(key) = queue.next().await {
                let started = Instant::now();
                let result = reconciler.reconcile(&key).await;
                metrics.record_busy(started.elapsed());

                match result {
                    Ok(ReconcileOutcome::Done) => {
                        tracker.reset(&key);
                        metrics.record_success();
                    }
                    Ok(ReconcileOutcome::RequeueAfter(delay)) => {
                        // Not a failure: the exact delay is honored and
                        // the retry counter stays untouched.
                        metrics.record_requeue();
                        queue.add_after(key.clone(), delay);
                    }
                    Err(e) => {
                        let delay = tracker.next_delay(&key);
                        let attempt = tracker.attempts(&key);
                        if e.is_transient() {
                            warn!(worker_id, %key, error = %e, attempt, ?delay, "Reconcile failed, retrying");
                        } else {
                            error!(worker_id, %key, error = %e, attempt, ?delay, "Reconcile needs intervention, retrying anyway");
                        }
                        metrics.record_error();
                        queue.add_after(key.clone(), delay);
                    }
                }
                queue.done(&key);
            }
            debug!(worker_id, "Worker exited");
        })
    }
}
