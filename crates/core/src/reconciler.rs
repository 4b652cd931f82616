//! Completion reconciler: the only writer of terminal job state.
//!
//! Turns a [`WorkerExit`] into the final [`JobPatch`] and applies it. The
//! store's terminal guard makes a second reconciliation for the same job
//! fail instead of overwriting the first.

use crate::error::CoreError;
use crate::job::{Job, JobPatch, JobStatus, STEP_COMPLETED};
use crate::registry::JobStore;
use crate::scripting::worker::WorkerExit;
use crate::types::Timestamp;

/// Build the terminal patch for `exit`, stamped with `now`.
pub fn terminal_patch(exit: &WorkerExit, now: Timestamp) -> JobPatch {
    match exit {
        WorkerExit::Finished {
            code: Some(0),
            stdout,
            ..
        } => JobPatch {
            status: Some(JobStatus::Completed),
            progress: Some(100),
            current_step: Some(STEP_COMPLETED.to_string()),
            completed_at: Some(now),
            stdout: Some(stdout.clone()),
            exit_code: Some(0),
            ..JobPatch::default()
        },
        WorkerExit::Finished {
            code,
            stdout,
            stderr,
            ..
        } => {
            let error = CoreError::ScriptNonZeroExit {
                code: *code,
                stderr: stderr.trim_end().to_string(),
            };
            JobPatch {
                stdout: Some(stdout.clone()),
                stderr: Some(stderr.clone()),
                exit_code: *code,
                ..failure(error.to_string(), now)
            }
        }
        WorkerExit::TimedOut {
            elapsed_ms,
            stdout,
            stderr,
        } => JobPatch {
            stdout: Some(stdout.clone()),
            stderr: Some(stderr.clone()),
            ..failure(
                format!("Script timed out after {}s", elapsed_ms / 1000),
                now,
            )
        },
        WorkerExit::SpawnFailed { reason } => {
            failure(CoreError::SpawnFailure(reason.clone()).to_string(), now)
        }
        WorkerExit::Lost { reason } => failure(format!("Worker lost: {reason}"), now),
    }
}

fn failure(error: String, now: Timestamp) -> JobPatch {
    JobPatch {
        status: Some(JobStatus::Error),
        error: Some(error),
        completed_at: Some(now),
        ..JobPatch::default()
    }
}

/// Write the terminal state for `job_id`.
///
/// Fails with [`CoreError::InvalidTransition`] if the job already reached a
/// terminal state.
pub async fn reconcile(
    store: &dyn JobStore,
    job_id: &str,
    exit: &WorkerExit,
) -> Result<Job, CoreError> {
    let job = store
        .update(job_id, terminal_patch(exit, chrono::Utc::now()))
        .await?;
    tracing::info!(
        job_id,
        status = %job.status,
        exit_code = ?job.exit_code,
        "Job reconciled",
    );
    Ok(job)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
