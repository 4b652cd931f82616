//! Audit job snapshot, status state machine and partial updates.
//!
//! A [`Job`] only ever moves forward along
//! `pending -> running -> {completed | error}`. All mutation goes through
//! [`Job::apply`], which is where that rule (and the "terminal jobs are
//! frozen" rule) is enforced, so every store implementation gets it for free.

use serde::{Deserialize, Serialize};

use crate::types::{JobId, Timestamp};

/// Maximum size kept for each raw output buffer (10 MiB). Older output is
/// dropped first.
pub const MAX_OUTPUT_BYTES: usize = 10 * 1024 * 1024;

/// Step description written when a job is registered.
pub const STEP_STARTING: &str = "Starting audit...";

/// Step description written when a worker exits cleanly.
pub const STEP_COMPLETED: &str = "Audit completed successfully";

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Error,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Error => "error",
        }
    }

    /// `completed` and `error` are terminal: nothing about the job changes afterwards.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Error)
    }

    fn rank(self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Running => 1,
            Self::Completed | Self::Error => 2,
        }
    }

    /// Whether a job currently in `self` may be moved to `next`.
    ///
    /// Staying in the same non-terminal state is allowed (progress updates
    /// re-assert `running`).
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        !self.is_terminal() && next.rank() >= self.rank()
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a patch was refused by [`Job::apply`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransitionError {
    #[error("job is already {status}")]
    Terminal { status: JobStatus },

    #[error("cannot move from {from} back to {to}")]
    Backward { from: JobStatus, to: JobStatus },
}

// ---------------------------------------------------------------------------
// Job snapshot
// ---------------------------------------------------------------------------

/// One tracked invocation of an external audit script.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: JobId,
    pub project_id: String,
    pub category: String,
    pub script: String,
    pub status: JobStatus,
    pub started_at: Timestamp,
    pub completed_at: Option<Timestamp>,
    pub progress: u8,
    pub current_step: String,
    pub stdout: String,
    pub stderr: String,
    pub error: Option<String>,
    pub exit_code: Option<i32>,
    /// File name of the credential artifact handed to the worker.
    pub credentials: Option<String>,
}

impl Job {
    /// A freshly created job in `pending` state.
    pub fn new(
        id: impl Into<JobId>,
        project_id: impl Into<String>,
        category: impl Into<String>,
        script: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            project_id: project_id.into(),
            category: category.into(),
            script: script.into(),
            status: JobStatus::Pending,
            started_at: chrono::Utc::now(),
            completed_at: None,
            progress: 0,
            current_step: String::new(),
            stdout: String::new(),
            stderr: String::new(),
            error: None,
            exit_code: None,
            credentials: None,
        }
    }

    /// Entry created when an update arrives for an id the store has never
    /// seen. It carries no metadata and is assumed to be running.
    pub fn placeholder(id: impl Into<JobId>) -> Self {
        let mut job = Self::new(id, "", "", "");
        job.status = JobStatus::Running;
        job
    }

    /// Merge `patch` into this snapshot.
    ///
    /// Refuses every write once the job is terminal and any status move
    /// backwards. A lower progress value never replaces a higher one.
    pub fn apply(&mut self, patch: JobPatch) -> Result<(), TransitionError> {
        if self.status.is_terminal() {
            return Err(TransitionError::Terminal {
                status: self.status,
            });
        }

        let next_status = patch.status.unwrap_or(self.status);
        if !self.status.can_transition_to(next_status) {
            return Err(TransitionError::Backward {
                from: self.status,
                to: next_status,
            });
        }

        if let Some(progress) = patch.progress {
            self.progress = self.progress.max(progress.min(100));
        }
        if let Some(step) = patch.current_step {
            self.current_step = step;
        }
        if let Some(stdout) = patch.stdout {
            self.stdout = keep_tail(stdout, MAX_OUTPUT_BYTES);
        }
        if let Some(chunk) = patch.append_stdout {
            append_tail(&mut self.stdout, &chunk, MAX_OUTPUT_BYTES);
        }
        if let Some(stderr) = patch.stderr {
            self.stderr = keep_tail(stderr, MAX_OUTPUT_BYTES);
        }
        if patch.exit_code.is_some() {
            self.exit_code = patch.exit_code;
        }
        if patch.completed_at.is_some() {
            self.completed_at = patch.completed_at;
        }
        // `error` is only meaningful on failed jobs.
        if next_status == JobStatus::Error {
            if let Some(error) = patch.error {
                self.error = Some(error);
            }
        }

        self.status = next_status;
        Ok(())
    }
}

/// Keep at most `max_bytes` from the end of `text`, cutting on a char boundary.
fn keep_tail(text: String, max_bytes: usize) -> String {
    if text.len() <= max_bytes {
        return text;
    }
    let mut start = text.len() - max_bytes;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    text[start..].to_string()
}

/// Append `chunk`, trimming back to the last `max_bytes` only once the buffer
/// has doubled. Between trims the buffer holds at most `2 * max_bytes`.
fn append_tail(buffer: &mut String, chunk: &str, max_bytes: usize) {
    buffer.push_str(chunk);
    if buffer.len() <= max_bytes * 2 {
        return;
    }
    let mut start = buffer.len() - max_bytes;
    while !buffer.is_char_boundary(start) {
        start += 1;
    }
    buffer.drain(..start);
}

// ---------------------------------------------------------------------------
// Partial updates
// ---------------------------------------------------------------------------

/// A partial job state. Only `Some` fields are merged.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobPatch {
    pub status: Option<JobStatus>,
    pub progress: Option<u8>,
    pub current_step: Option<String>,
    pub completed_at: Option<Timestamp>,
    /// Replaces the stdout buffer.
    pub stdout: Option<String>,
    /// Appended to the stdout buffer.
    pub append_stdout: Option<String>,
    pub stderr: Option<String>,
    pub error: Option<String>,
    pub exit_code: Option<i32>,
}

impl JobPatch {
    pub fn running(step: impl Into<String>) -> Self {
        Self {
            status: Some(JobStatus::Running),
            progress: Some(0),
            current_step: Some(step.into()),
            ..Self::default()
        }
    }

    pub fn progress(percent: u8, step: impl Into<String>) -> Self {
        Self {
            progress: Some(percent),
            current_step: Some(step.into()),
            ..Self::default()
        }
    }

    /// Append one line of raw worker output.
    pub fn output_line(line: &str) -> Self {
        Self {
            append_stdout: Some(format!("{line}\n")),
            ..Self::default()
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: Some(JobStatus::Error),
            error: Some(error.into()),
            completed_at: Some(chrono::Utc::now()),
            ..Self::default()
        }
    }

    /// Every mutable field of `job`, used when a create hits an existing id.
    pub fn from_snapshot(job: &Job) -> Self {
        Self {
            status: Some(job.status),
            progress: Some(job.progress),
            current_step: Some(job.current_step.clone()),
            completed_at: job.completed_at,
            stdout: Some(job.stdout.clone()),
            append_stdout: None,
            stderr: Some(job.stderr.clone()),
            error: job.error.clone(),
            exit_code: job.exit_code,
        }
    }
}

// ---------------------------------------------------------------------------
// Read models
// ---------------------------------------------------------------------------

/// The minimal view polled by clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatusView {
    pub status: JobStatus,
    pub error: Option<String>,
}

impl From<&Job> for JobStatusView {
    fn from(job: &Job) -> Self {
        Self {
            status: job.status,
            error: job.error.clone(),
        }
    }
}

/// Listing row without the (potentially large) output buffers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSummary {
    pub id: JobId,
    pub project_id: String,
    pub category: String,
    pub status: JobStatus,
    pub progress: u8,
    pub current_step: String,
    pub started_at: Timestamp,
    pub completed_at: Option<Timestamp>,
}

impl From<&Job> for JobSummary {
    fn from(job: &Job) -> Self {
        Self {
            id: job.id.clone(),
            project_id: job.project_id.clone(),
            category: job.category.clone(),
            status: job.status,
            progress: job.progress,
            current_step: job.current_step.clone(),
            started_at: job.started_at,
            completed_at: job.completed_at,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
