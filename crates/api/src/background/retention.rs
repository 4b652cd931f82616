//! Periodic eviction of finished jobs.
//!
//! Only spawned when a retention period is configured; without one the
//! job store keeps every entry for the life of the process.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use cloudaudit_core::registry::JobStore;
use tokio_util::sync::CancellationToken;

/// How often the sweep runs.
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Run the retention loop until `cancel` is triggered.
///
/// Each sweep evicts terminal jobs that finished more than `retention` ago.
/// Running jobs are never touched.
pub async fn run(store: Arc<dyn JobStore>, retention: Duration, cancel: CancellationToken) {
    run_every(store, retention, SWEEP_INTERVAL, cancel).await;
}

async fn run_every(
    store: Arc<dyn JobStore>,
    retention: Duration,
    every: Duration,
    cancel: CancellationToken,
) {
    tracing::info!(
        retention_secs = retention.as_secs(),
        interval_secs = every.as_secs(),
        "Job retention task started"
    );

    let retention = match chrono::Duration::from_std(retention) {
        Ok(retention) => retention,
        Err(e) => {
            tracing::error!(error = %e, "Job retention: period out of range, task disabled");
            return;
        }
    };
    let mut interval = tokio::time::interval(every);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Job retention task stopping");
                break;
            }
            _ = interval.tick() => {
                let cutoff = Utc::now() - retention;
                match store.evict_terminal_before(cutoff).await {
                    Ok(evicted) => {
                        if evicted > 0 {
                            tracing::info!(evicted, "Job retention: evicted finished jobs");
                        } else {
                            tracing::debug!("Job retention: nothing to evict");
                        }
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "Job retention: sweep failed");
                    }
                }
            }
        }
    }
}
