//! Steward controller entrypoint.
//!
//! Runs the reconciliation controller against an in-memory store until
//! interrupted. Useful for demos and as the embedding template for a
//! real store backend.

#![forbid(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![forbid(clippy::panic)]

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::sync::broadcast;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use steward_controller::{BackoffPolicy, Controller, ControllerConfig};
use steward_store::{InMemoryStore, TracingStore};

#[derive(Parser)]
#[command(name = "steward")]
#[command(about = "Level-triggered reconciliation controller for microservices")]
#[command(version)]
struct Cli {
    /// Number of concurrent reconcile workers
    #[arg(long, default_value_t = 4)]
    workers: usize,

    /// Seconds between full resyncs
    #[arg(long, default_value_t = 30)]
    resync_secs: u64,

    /// Base retry delay in milliseconds
    #[arg(long, default_value_t = 200)]
    backoff_base_ms: u64,

    /// Maximum retry delay in seconds
    #[arg(long, default_value_t = 60)]
    backoff_max_secs: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,steward_controller=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = ControllerConfig::default()
        .with_workers(cli.workers)
        .with_resync_interval(Duration::from_secs(cli.resync_secs))
        .with_backoff(
            BackoffPolicy::default()
                .with_base(Duration::from_millis(cli.backoff_base_ms))
                .with_max(Duration::from_secs(cli.backoff_max_secs)),
        );
    config.validate()?;

    let store = Arc::new(TracingStore::new(InMemoryStore::new()));
    let controller = Controller::new(store, config);

    let (shutdown, _) = broadcast::channel(1);
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Interrupt received, shutting down");
                shutdown.send(()).ok();
            }
        });
    }

    controller.run(shutdown).await?;
    Ok(())
}
