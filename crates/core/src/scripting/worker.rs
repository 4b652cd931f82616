//! Types shared between the worker supervisor and its consumers.
//!
//! Defines [`WorkerCommand`] (what to run), [`WorkerSignal`] (what the
//! supervised task reports while it runs) and [`WorkerExit`] (how it ended).

use std::path::PathBuf;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::progress::OutputLine;

/// Environment variable carrying the credential artifact path.
pub const ENV_CREDENTIALS: &str = "GOOGLE_APPLICATION_CREDENTIALS";

/// Environment variable carrying the project identifier.
pub const ENV_PROJECT_ID: &str = "GCP_PROJECT_ID";

/// Environment variable carrying the execution-mode flag.
pub const ENV_EXECUTION_MODE: &str = "NODE_ENV";

/// Everything needed to start one worker process.
#[derive(Debug, Clone)]
pub struct WorkerCommand {
    /// Program that runs the script (e.g. `node`).
    pub interpreter: String,
    /// Script file name, resolved against `working_dir`.
    pub script: String,
    /// Working directory of the worker; also where the script lives.
    pub working_dir: PathBuf,
    /// Extra environment variables on top of the inherited environment.
    pub env_vars: Vec<(String, String)>,
    /// Watchdog bound on the worker's runtime. `None` waits forever.
    pub timeout: Option<Duration>,
}

impl WorkerCommand {
    pub fn script_path(&self) -> PathBuf {
        self.working_dir.join(&self.script)
    }
}

/// Progress reported by a supervised worker, in delivery order. The last
/// signal is always a single [`WorkerSignal::Exited`].
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerSignal {
    Line(OutputLine),
    Exited(WorkerExit),
}

/// How a worker ended.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerExit {
    /// The process terminated on its own. `code` is `None` when it was
    /// killed by a signal.
    Finished {
        code: Option<i32>,
        stdout: String,
        stderr: String,
        duration_ms: u64,
    },
    /// The watchdog fired and the process was killed.
    TimedOut {
        elapsed_ms: u64,
        stdout: String,
        stderr: String,
    },
    /// The process never started.
    SpawnFailed { reason: String },
    /// The process started but could no longer be observed.
    Lost { reason: String },
}

/// Errors raised synchronously while starting a worker.
#[derive(Debug, thiserror::Error)]
pub enum SpawnError {
    #[error("script not found: {0}")]
    ScriptNotFound(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Handle to a running worker. Dropping it does not stop the process.
#[derive(Debug)]
pub struct WorkerHandle {
    /// OS process id, if the platform reported one.
    pub pid: Option<u32>,
    /// Signals published by the supervising task.
    pub signals: mpsc::Receiver<WorkerSignal>,
}
