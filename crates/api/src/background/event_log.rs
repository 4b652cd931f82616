//! Structured logging of job lifecycle events.

use cloudaudit_events::{JobEvent, JobEventKind};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;

/// Log every event from `rx` until `cancel` fires or the bus closes.
pub async fn run(mut rx: broadcast::Receiver<JobEvent>, cancel: CancellationToken) {
    tracing::info!("Event logger started");

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Event logger stopping");
                break;
            }
            received = rx.recv() => match received {
                Ok(event) => log_event(&event),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Event logger lagged, events dropped");
                }
                Err(RecvError::Closed) => {
                    tracing::info!("Event bus closed, event logger stopping");
                    break;
                }
            },
        }
    }
}

fn log_event(event: &JobEvent) {
    let job_id = event.job_id.as_str();
    match &event.kind {
        JobEventKind::Launched {
            project_id,
            category,
            pid,
        } => tracing::info!(
            job_id,
            project_id = %project_id,
            category = %category,
            pid = ?pid,
            "Job launched"
        ),
        JobEventKind::Progress { percent, step } => {
            tracing::debug!(job_id, percent, step = %step, "Job progress")
        }
        JobEventKind::Completed => tracing::info!(job_id, "Job completed"),
        JobEventKind::Failed { error } => tracing::warn!(job_id, error = %error, "Job failed"),
    }
}
