//! Message sweeper: ages direct messages out of the store.
//!
//! One cooperative task wakes on a configured interval and deletes
//! every message older than the retention window. Publications,
//! pubkeys, and purge tokens are retained indefinitely.

use std::sync::Arc;
use std::time::Duration;

use emp_core::{DEFAULT_MSG_RETENTION_SECS, DEFAULT_SWEEP_INTERVAL_SECS};
use emp_store::ObjectStore;
use tokio::sync::watch;
use tokio::time::interval;
use tracing::{debug, info, warn};

/// Sweeper configuration.
#[derive(Debug, Clone)]
pub struct SweeperConfig {
    /// Time between sweeps
    pub interval: Duration,
    /// Messages older than this are deleted
    pub retention: Duration,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(DEFAULT_SWEEP_INTERVAL_SECS),
            retention: Duration::from_secs(DEFAULT_MSG_RETENTION_SECS),
        }
    }
}

/// Runs the sweep loop until shutdown is signalled.
pub async fn run(
    store: Arc<ObjectStore>,
    config: SweeperConfig,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = interval(config.interval);
    // The first tick fires immediately; skip it so a fresh node does not
    // sweep before it has synced anything.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match store.sweep_messages(config.retention) {
                    Ok(0) => debug!("Sweep found nothing stale"),
                    Ok(swept) => info!(swept, "Swept stale messages"),
                    Err(e) => warn!(error = %e, "Sweep failed"),
                }
            }
            _ = shutdown.changed() => {
                debug!("Sweeper stopping");
                return;
            }
        }
    }
}
