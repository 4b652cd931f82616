//! Job registry: the keyed store every component reads and writes job
//! state through.
//!
//! [`JobStore`] is the seam for swapping in a persistent or distributed
//! backend. [`InMemoryJobStore`] is the process-local implementation; it
//! performs each mutation under a single write lock so that the
//! forward-only rules in [`Job::apply`] cannot be raced.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use crate::error::CoreError;
use crate::job::{Job, JobPatch, JobSummary};
use crate::types::Timestamp;

#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert `job` if its id is new; otherwise merge it into the existing
    /// entry under the usual transition rules.
    async fn create(&self, job: Job) -> Result<Job, CoreError>;

    /// Merge `patch` into the entry for `job_id`, creating a running
    /// placeholder first if the id is unknown. Returns the new snapshot.
    async fn update(&self, job_id: &str, patch: JobPatch) -> Result<Job, CoreError>;

    /// Current snapshot, or `None` if the id was never registered.
    async fn get(&self, job_id: &str) -> Result<Option<Job>, CoreError>;

    /// Summaries of all jobs, newest first, optionally for one project.
    async fn list(&self, project_id: Option<&str>) -> Result<Vec<JobSummary>, CoreError>;

    /// Drop terminal jobs that finished before `cutoff`. Returns how many
    /// entries were removed.
    async fn evict_terminal_before(&self, cutoff: Timestamp) -> Result<usize, CoreError>;
}

#[derive(Debug, Default)]
pub struct InMemoryJobStore {
    jobs: RwLock<HashMap<String, Job>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn poisoned() -> CoreError {
        CoreError::Internal("job registry lock poisoned".into())
    }
}

fn rejected(job_id: &str, err: crate::job::TransitionError) -> CoreError {
    CoreError::InvalidTransition {
        job_id: job_id.to_string(),
        reason: err.to_string(),
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn create(&self, job: Job) -> Result<Job, CoreError> {
        let mut jobs = self.jobs.write().map_err(|_| Self::poisoned())?;
        match jobs.get_mut(&job.id) {
            Some(existing) => {
                tracing::warn!(job_id = %job.id, "Job id already registered, merging");
                existing
                    .apply(JobPatch::from_snapshot(&job))
                    .map_err(|e| rejected(&job.id, e))?;
                Ok(existing.clone())
            }
            None => {
                jobs.insert(job.id.clone(), job.clone());
                Ok(job)
            }
        }
    }

    async fn update(&self, job_id: &str, patch: JobPatch) -> Result<Job, CoreError> {
        let mut jobs = self.jobs.write().map_err(|_| Self::poisoned())?;
        let job = jobs
            .entry(job_id.to_string())
            .or_insert_with(|| Job::placeholder(job_id));
        job.apply(patch).map_err(|e| rejected(job_id, e))?;
        Ok(job.clone())
    }

    async fn get(&self, job_id: &str) -> Result<Option<Job>, CoreError> {
        let jobs = self.jobs.read().map_err(|_| Self::poisoned())?;
        Ok(jobs.get(job_id).cloned())
    }

    async fn list(&self, project_id: Option<&str>) -> Result<Vec<JobSummary>, CoreError> {
        let jobs = self.jobs.read().map_err(|_| Self::poisoned())?;
        let mut summaries: Vec<JobSummary> = jobs
            .values()
            .filter(|job| project_id.map_or(true, |p| job.project_id == p))
            .map(JobSummary::from)
            .collect();
        summaries.sort_by(|a, b| b.started_at.cmp(&a.started_at).then(b.id.cmp(&a.id)));
        Ok(summaries)
    }

    async fn evict_terminal_before(&self, cutoff: Timestamp) -> Result<usize, CoreError> {
        let mut jobs = self.jobs.write().map_err(|_| Self::poisoned())?;
        let before = jobs.len();
        jobs.retain(|_, job| {
            let finished_at = job.completed_at.unwrap_or(job.started_at);
            !(job.status.is_terminal() && finished_at < cutoff)
        });
        Ok(before - jobs.len())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
