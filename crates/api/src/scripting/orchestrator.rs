//! Central audit orchestrator service.
//!
//! Coordinates validation, job registration, credential lookup, worker
//! launch and the per-job monitor task, and answers job queries. Held in
//! [`AppState`](crate::state::AppState) as an `Arc<AuditOrchestrator>`.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::mpsc;

use cloudaudit_core::category::{self, AuditCategory, CategoryEntry};
use cloudaudit_core::credentials::{Credential, CredentialLocator};
use cloudaudit_core::error::CoreError;
use cloudaudit_core::job::{Job, JobPatch, JobStatus, JobStatusView, JobSummary, STEP_STARTING};
use cloudaudit_core::job_id::JobIdGenerator;
use cloudaudit_core::launch::{LaunchReceipt, LaunchRequest};
use cloudaudit_core::progress::OutputLine;
use cloudaudit_core::reconciler;
use cloudaudit_core::registry::JobStore;
use cloudaudit_core::report::AuditReport;
use cloudaudit_core::scripting::supervisor::spawn_worker;
use cloudaudit_core::scripting::worker::{
    WorkerCommand, WorkerExit, WorkerSignal, ENV_CREDENTIALS, ENV_EXECUTION_MODE, ENV_PROJECT_ID,
};
use cloudaudit_events::{EventBus, JobEvent, JobEventKind};

use crate::config::AuditConfig;

/// A job snapshot plus the parsed results of a completed run.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditDetail {
    #[serde(flatten)]
    pub job: Job,
    pub report: Option<AuditReport>,
}

/// Launches audit workers and tracks them through the job store.
///
/// A launch goes through these steps:
/// 1. Validate the project identifier.
/// 2. Resolve the category to a script.
/// 3. Allocate the job id and the initial record.
/// 4. Locate the credential artifact (a miss records an `error` job).
/// 5. Register the job as `running`.
/// 6. Spawn the worker and hand its signals to a monitor task.
pub struct AuditOrchestrator {
    config: AuditConfig,
    store: Arc<dyn JobStore>,
    event_bus: Arc<EventBus>,
    ids: JobIdGenerator,
    credentials: CredentialLocator,
}

impl AuditOrchestrator {
    pub fn new(config: AuditConfig, store: Arc<dyn JobStore>, event_bus: Arc<EventBus>) -> Self {
        let credentials = CredentialLocator::new(
            absolute(&config.credentials_dir),
            config.credential_extension.clone(),
        );
        Self {
            config,
            store,
            event_bus,
            ids: JobIdGenerator::new(),
            credentials,
        }
    }

    /// Start an audit and return as soon as the worker has been handed off.
    ///
    /// Validation failures leave no job behind. A missing credential is
    /// recorded as an `error` job whose id travels back in
    /// [`CoreError::MissingCredentials`].
    pub async fn launch(&self, request: &LaunchRequest) -> Result<LaunchReceipt, CoreError> {
        // 1-2. Validate the project and resolve the category.
        let launch = request.validate().inspect_err(|e| {
            tracing::info!(error = %e, "Launch rejected");
        })?;
        let category = launch.category;

        // 3. Allocate the job id and the initial record.
        let job_id = self.ids.next_id(&launch.project_id, category);
        let mut job = Job::new(
            job_id.clone(),
            launch.project_id.clone(),
            category.as_str(),
            category.script_name(),
        );

        // 4. Locate the credential artifact.
        let credential = match self.locate_credential(launch.credentials).await? {
            Ok(credential) => credential,
            Err(reason) => {
                let error = CoreError::MissingCredentials {
                    job_id: job_id.clone(),
                    reason,
                };
                tracing::warn!(job_id = %job_id, error = %error, "No credentials for audit");
                apply(&mut job, JobPatch::failed(error.to_string()))?;
                self.store.create(job).await?;
                self.event_bus.publish(JobEvent::new(
                    job_id,
                    JobEventKind::Failed {
                        error: error.to_string(),
                    },
                ));
                return Err(error);
            }
        };

        // 5. Register the job as running.
        job.credentials = Some(credential.file_name.clone());
        apply(&mut job, JobPatch::running(STEP_STARTING))?;
        let job = self.store.create(job).await?;

        // 6. Spawn the worker.
        let command = self.worker_command(&job, category, &credential);
        match spawn_worker(command) {
            Ok(handle) => {
                tracing::info!(
                    job_id = %job_id,
                    project_id = %job.project_id,
                    category = %category,
                    pid = ?handle.pid,
                    "Audit worker spawned",
                );
                self.event_bus.publish(JobEvent::new(
                    job_id.clone(),
                    JobEventKind::Launched {
                        project_id: job.project_id.clone(),
                        category: job.category.clone(),
                        pid: handle.pid,
                    },
                ));
                tokio::spawn(monitor(
                    Arc::clone(&self.store),
                    Arc::clone(&self.event_bus),
                    job_id.clone(),
                    handle.signals,
                ));
            }
            Err(e) => {
                tracing::error!(job_id = %job_id, error = %e, "Failed to spawn audit worker");
                finish(
                    self.store.as_ref(),
                    &self.event_bus,
                    &job_id,
                    &WorkerExit::SpawnFailed {
                        reason: e.to_string(),
                    },
                )
                .await;
            }
        }

        // A spawn failure has already been reconciled by now.
        let status = self
            .store
            .get(&job_id)
            .await?
            .map_or(JobStatus::Running, |job| job.status);
        let message = if status == JobStatus::Error {
            format!("{category} audit failed to start. See /api/audits/status?id={job_id} for details.")
        } else {
            format!("{category} audit started. Poll /api/audits/status?id={job_id} for results.")
        };

        Ok(LaunchReceipt {
            message,
            job_id,
            status,
        })
    }

    /// Run the credential lookup off the async runtime. The outer error is
    /// an infrastructure failure, the inner one a missing artifact.
    async fn locate_credential(
        &self,
        explicit: Option<String>,
    ) -> Result<Result<Credential, String>, CoreError> {
        let locator = self.credentials.clone();
        let located = tokio::task::spawn_blocking(move || locator.locate(explicit.as_deref()))
            .await
            .map_err(|e| CoreError::Internal(format!("credential lookup task failed: {e}")))?;
        Ok(located.map_err(|e| e.to_string()))
    }

    fn worker_command(
        &self,
        job: &Job,
        category: AuditCategory,
        credential: &Credential,
    ) -> WorkerCommand {
        WorkerCommand {
            interpreter: self.config.interpreter.clone(),
            script: category.script_name().to_string(),
            working_dir: self.config.script_dir.clone(),
            env_vars: vec![
                (
                    ENV_CREDENTIALS.to_string(),
                    credential.path.display().to_string(),
                ),
                (ENV_PROJECT_ID.to_string(), job.project_id.clone()),
                (
                    ENV_EXECUTION_MODE.to_string(),
                    self.config.execution_mode.clone(),
                ),
            ],
            timeout: self.config.job_timeout,
        }
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    pub async fn status(&self, job_id: &str) -> Result<JobStatusView, CoreError> {
        Ok(JobStatusView::from(&self.snapshot(job_id).await?))
    }

    pub async fn snapshot(&self, job_id: &str) -> Result<Job, CoreError> {
        self.store
            .get(job_id)
            .await?
            .ok_or_else(|| CoreError::JobNotFound(job_id.to_string()))
    }

    /// Job summaries, newest first, optionally for one project.
    pub async fn list(&self, project_id: Option<&str>) -> Result<Vec<JobSummary>, CoreError> {
        self.store.list(project_id).await
    }

    /// Snapshot of `job_id` plus its results file once the job completed.
    ///
    /// A results file older than the job belongs to an earlier run and is
    /// not attached. An unreadable file is logged and skipped.
    pub async fn detail(&self, job_id: &str) -> Result<AuditDetail, CoreError> {
        let job = self.snapshot(job_id).await?;
        if job.status != JobStatus::Completed {
            return Ok(AuditDetail { job, report: None });
        }
        let Ok(category) = job.category.parse::<AuditCategory>() else {
            return Ok(AuditDetail { job, report: None });
        };

        let path = self.results_path(category);
        let report = match AuditReport::load(&path).await {
            Ok(report) => report.filter(|r| {
                // Results files carry second precision.
                r.timestamp
                    .map_or(true, |t| t.timestamp() >= job.started_at.timestamp())
            }),
            Err(e) => {
                tracing::warn!(job_id, error = %e, "Unreadable results file");
                None
            }
        };
        Ok(AuditDetail { job, report })
    }

    /// The cached results for `category` if they are recent enough.
    pub async fn latest_results(&self, category: &str) -> Result<Option<AuditReport>, CoreError> {
        let category = category::resolve(Some(category))?;
        let Some(report) = AuditReport::load(&self.results_path(category)).await? else {
            return Ok(None);
        };

        let max_age = chrono::Duration::from_std(self.config.results_max_age)
            .map_err(|e| CoreError::Internal(format!("invalid results max age: {e}")))?;
        Ok(report
            .is_fresh(max_age, chrono::Utc::now())
            .then_some(report))
    }

    pub fn categories(&self) -> Vec<CategoryEntry> {
        AuditCategory::ALL.into_iter().map(CategoryEntry::from).collect()
    }

    fn results_path(&self, category: AuditCategory) -> PathBuf {
        self.config.script_dir.join(category.results_file_name())
    }
}

fn apply(job: &mut Job, patch: JobPatch) -> Result<(), CoreError> {
    job.apply(patch).map_err(|e| CoreError::InvalidTransition {
        job_id: job.id.clone(),
        reason: e.to_string(),
    })
}

/// Workers run in the script directory, so credential paths handed to them
/// must not be relative to ours.
fn absolute(path: &Path) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }
    std::env::current_dir()
        .map(|cwd| cwd.join(path))
        .unwrap_or_else(|_| path.to_path_buf())
}

// ---------------------------------------------------------------------------
// Monitor task
// ---------------------------------------------------------------------------

/// Drain a worker's signals into the store until it exits.
async fn monitor(
    store: Arc<dyn JobStore>,
    event_bus: Arc<EventBus>,
    job_id: String,
    mut signals: mpsc::Receiver<WorkerSignal>,
) {
    while let Some(signal) = signals.recv().await {
        match signal {
            WorkerSignal::Line(OutputLine::Progress { percent, step }) => {
                match store
                    .update(&job_id, JobPatch::progress(percent, step.clone()))
                    .await
                {
                    Ok(job) => {
                        tracing::debug!(job_id = %job_id, progress = job.progress, step = %step, "Audit progress");
                        event_bus.publish(JobEvent::new(
                            job_id.clone(),
                            JobEventKind::Progress {
                                percent: job.progress,
                                step,
                            },
                        ));
                    }
                    Err(e) => {
                        tracing::debug!(job_id = %job_id, error = %e, "Progress update ignored");
                    }
                }
            }
            WorkerSignal::Line(OutputLine::Text(line)) => {
                if let Err(e) = store.update(&job_id, JobPatch::output_line(&line)).await {
                    tracing::debug!(job_id = %job_id, error = %e, "Output line ignored");
                }
            }
            WorkerSignal::Exited(exit) => {
                finish(store.as_ref(), &event_bus, &job_id, &exit).await;
                return;
            }
        }
    }

    tracing::warn!(job_id = %job_id, "Worker signal channel closed without exit");
    let exit = WorkerExit::Lost {
        reason: "Worker supervisor stopped unexpectedly".to_string(),
    };
    finish(store.as_ref(), &event_bus, &job_id, &exit).await;
}

async fn finish(store: &dyn JobStore, event_bus: &EventBus, job_id: &str, exit: &WorkerExit) {
    match reconciler::reconcile(store, job_id, exit).await {
        Ok(job) => {
            let kind = match job.status {
                JobStatus::Completed => JobEventKind::Completed,
                _ => JobEventKind::Failed {
                    error: job.error.clone().unwrap_or_default(),
                },
            };
            event_bus.publish(JobEvent::new(job_id, kind));
        }
        Err(e) => {
            tracing::warn!(job_id, error = %e, "Terminal state not recorded");
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use assert_matches::assert_matches;
    use cloudaudit_core::registry::InMemoryJobStore;

    use super::*;

    struct Fixture {
        dir: tempfile::TempDir,
        orchestrator: AuditOrchestrator,
        bus: Arc<EventBus>,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = AuditConfig {
            script_dir: dir.path().to_path_buf(),
            credentials_dir: dir.path().to_path_buf(),
            interpreter: "bash".to_string(),
            credential_extension: ".json".to_string(),
            execution_mode: "production".to_string(),
            job_timeout: Some(Duration::from_secs(10)),
            retention: None,
            results_max_age: Duration::from_secs(3600),
        };
        let bus = Arc::new(EventBus::default());
        let orchestrator =
            AuditOrchestrator::new(config, Arc::new(InMemoryJobStore::new()), Arc::clone(&bus));
        Fixture {
            dir,
            orchestrator,
            bus,
        }
    }

    fn write(dir: &Path, name: &str, body: &str) {
        std::fs::write(dir.join(name), body).expect("write");
    }

    fn request(project: &str, category: &str) -> LaunchRequest {
        LaunchRequest {
            project_id: Some(project.to_string()),
            category: Some(category.to_string()),
            credentials: None,
        }
    }

    async fn wait_for_terminal(orchestrator: &AuditOrchestrator, job_id: &str) -> Job {
        for _ in 0..200 {
            let job = orchestrator.snapshot(job_id).await.expect("snapshot");
            if job.status.is_terminal() {
                return job;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        panic!("job {job_id} did not finish");
    }

    #[tokio::test]
    async fn invalid_category_creates_no_job() {
        let f = fixture();
        let result = f.orchestrator.launch(&request("proj-1", "nope")).await;

        assert_matches!(result, Err(CoreError::InvalidCategory { .. }));
        assert!(f.orchestrator.list(None).await.expect("list").is_empty());
    }

    #[tokio::test]
    async fn missing_credentials_records_error_job() {
        let f = fixture();
        write(f.dir.path(), "storage-audit.js", "touch ran\n");

        let result = f.orchestrator.launch(&request("proj-1", "storage")).await;
        let job_id = assert_matches!(result, Err(CoreError::MissingCredentials { job_id, .. }) => job_id);

        let status = f.orchestrator.status(&job_id).await.expect("status");
        assert_eq!(status.status, JobStatus::Error);
        assert!(status
            .error
            .as_deref()
            .is_some_and(|e| e.starts_with("No GCP credential files found")));

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(!f.dir.path().join("ran").exists());
    }

    #[tokio::test]
    async fn worker_runs_to_completion() {
        let f = fixture();
        write(f.dir.path(), "sa-key.json", "{}");
        write(
            f.dir.path(),
            "storage-audit.js",
            "echo 'Progress: 40% Listing buckets'\n\
             echo \"key=$GOOGLE_APPLICATION_CREDENTIALS project=$GCP_PROJECT_ID mode=$NODE_ENV\"\n",
        );

        let receipt = f
            .orchestrator
            .launch(&request("proj-1", "storage"))
            .await
            .expect("launch");
        assert_eq!(receipt.status, JobStatus::Running);
        assert!(receipt.job_id.starts_with("job_proj-1_storage_"));

        let job = wait_for_terminal(&f.orchestrator, &receipt.job_id).await;
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.progress, 100);
        assert_eq!(job.credentials.as_deref(), Some("sa-key.json"));
        assert!(job.stdout.contains("project=proj-1 mode=production"));
        assert!(job.stdout.contains("sa-key.json"));
    }

    #[tokio::test]
    async fn missing_script_is_reconciled_to_error() {
        let f = fixture();
        write(f.dir.path(), "sa-key.json", "{}");

        let receipt = f
            .orchestrator
            .launch(&request("proj-1", "compute"))
            .await
            .expect("launch still succeeds");
        assert_eq!(receipt.status, JobStatus::Error);
        assert!(receipt.message.contains("failed to start"));

        let job = f.orchestrator.snapshot(&receipt.job_id).await.expect("snapshot");
        assert_eq!(job.status, JobStatus::Error);
        assert!(job
            .error
            .as_deref()
            .is_some_and(|e| e.starts_with("Failed to start audit script")));
    }

    #[tokio::test]
    async fn publishes_lifecycle_events_in_order() {
        let f = fixture();
        write(f.dir.path(), "sa-key.json", "{}");
        write(
            f.dir.path(),
            "cost-audit.js",
            "echo 'Progress: 10% Start'\necho 'Progress: 90% Almost'\n",
        );
        let mut rx = f.bus.subscribe();

        let receipt = f
            .orchestrator
            .launch(&request("proj-1", "cost"))
            .await
            .expect("launch");

        let mut kinds = Vec::new();
        loop {
            let event = tokio::time::timeout(Duration::from_secs(10), rx.recv())
                .await
                .expect("event in time")
                .expect("bus open");
            assert_eq!(event.job_id, receipt.job_id);
            let terminal = event.is_terminal();
            kinds.push(event.kind);
            if terminal {
                break;
            }
        }

        assert_matches!(kinds.first(), Some(JobEventKind::Launched { .. }));
        assert_eq!(kinds.last(), Some(&JobEventKind::Completed));
        assert_eq!(kinds.len(), 4);
    }

    #[tokio::test]
    async fn closed_channel_marks_job_lost() {
        let store: Arc<dyn JobStore> = Arc::new(InMemoryJobStore::new());
        let mut job = Job::new("j", "proj-1", "security", "security-audit.js");
        job.status = JobStatus::Running;
        store.create(job).await.expect("create");

        let (tx, rx) = mpsc::channel(1);
        drop(tx);
        monitor(Arc::clone(&store), Arc::new(EventBus::default()), "j".into(), rx).await;

        let job = store.get("j").await.expect("get").expect("present");
        assert_eq!(job.status, JobStatus::Error);
        assert_eq!(
            job.error.as_deref(),
            Some("Worker lost: Worker supervisor stopped unexpectedly")
        );
    }

    #[tokio::test]
    async fn latest_results_respects_freshness() {
        let f = fixture();
        assert!(f.orchestrator.latest_results("security").await.expect("load").is_none());

        let fresh = serde_json::json!({ "timestamp": chrono::Utc::now().to_rfc3339(), "findings": [] });
        write(f.dir.path(), "security-audit-results.json", &fresh.to_string());
        assert!(f.orchestrator.latest_results("security").await.expect("load").is_some());

        let stale = serde_json::json!({ "timestamp": "2020-01-01T00:00:00Z", "findings": [] });
        write(f.dir.path(), "security-audit-results.json", &stale.to_string());
        assert!(f.orchestrator.latest_results("security").await.expect("load").is_none());
    }
}
