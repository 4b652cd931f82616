use std::path::PathBuf;
use std::time::Duration;

use cloudaudit_core::credentials::DEFAULT_CREDENTIAL_EXTENSION;

/// Server configuration loaded from environment variables.
///
/// All fields have sensible defaults suitable for local development.
/// In production, override via environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (default: `0.0.0.0`).
    pub host: String,
    /// Bind port (default: `3000`).
    pub port: u16,
    /// Allowed CORS origins, parsed from comma-separated `CORS_ORIGINS` env var.
    pub cors_origins: Vec<String>,
    /// HTTP request timeout in seconds (default: `30`).
    pub request_timeout_secs: u64,
    /// How long shutdown waits for each background task (default: `5`).
    pub shutdown_timeout_secs: u64,
    /// Worker launch and job bookkeeping settings.
    pub audit: AuditConfig,
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                | Default                    |
    /// |------------------------|----------------------------|
    /// | `HOST`                 | `0.0.0.0`                  |
    /// | `PORT`                 | `3000`                     |
    /// | `CORS_ORIGINS`         | `http://localhost:3000`    |
    /// | `REQUEST_TIMEOUT_SECS` | `30`                       |
    /// | `SHUTDOWN_TIMEOUT_SECS`| `5`                        |
    ///
    /// See [`AuditConfig::from_env`] for the `AUDIT_*` variables.
    pub fn from_env() -> Self {
        let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into());

        let port: u16 = std::env::var("PORT")
            .unwrap_or_else(|_| "3000".into())
            .parse()
            .expect("PORT must be a valid u16");

        let cors_origins: Vec<String> = std::env::var("CORS_ORIGINS")
            .unwrap_or_else(|_| "http://localhost:3000".into())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let request_timeout_secs: u64 = std::env::var("REQUEST_TIMEOUT_SECS")
            .unwrap_or_else(|_| "30".into())
            .parse()
            .expect("REQUEST_TIMEOUT_SECS must be a valid u64");

        let shutdown_timeout_secs: u64 = std::env::var("SHUTDOWN_TIMEOUT_SECS")
            .unwrap_or_else(|_| "5".into())
            .parse()
            .expect("SHUTDOWN_TIMEOUT_SECS must be a valid u64");

        Self {
            host,
            port,
            cors_origins,
            request_timeout_secs,
            shutdown_timeout_secs,
            audit: AuditConfig::from_env(),
        }
    }
}

/// Settings for launching audit workers.
#[derive(Debug, Clone)]
pub struct AuditConfig {
    /// Where the audit scripts live; also the workers' working directory.
    pub script_dir: PathBuf,
    /// Where credential artifacts are looked up.
    pub credentials_dir: PathBuf,
    /// Program used to run a script.
    pub interpreter: String,
    pub credential_extension: String,
    /// Passed to workers as the execution-mode flag.
    pub execution_mode: String,
    /// Watchdog bound on a worker's runtime. `None` never kills.
    pub job_timeout: Option<Duration>,
    /// Terminal jobs older than this are evicted. `None` keeps them forever.
    pub retention: Option<Duration>,
    /// Cached results files older than this are not served.
    pub results_max_age: Duration,
}

impl AuditConfig {
    /// Load audit settings from environment variables with defaults.
    ///
    /// | Env Var                      | Default                          |
    /// |------------------------------|----------------------------------|
    /// | `AUDIT_SCRIPT_DIR`           | `backend/src/scripts/gcp-audit`  |
    /// | `AUDIT_CREDENTIALS_DIR`      | value of `AUDIT_SCRIPT_DIR`      |
    /// | `AUDIT_INTERPRETER`          | `node`                           |
    /// | `AUDIT_CREDENTIAL_EXTENSION` | `.json`                          |
    /// | `AUDIT_EXECUTION_MODE`       | `production`                     |
    /// | `AUDIT_JOB_TIMEOUT_SECS`     | `3600` (`0` disables)            |
    /// | `AUDIT_JOB_RETENTION_SECS`   | unset (keep forever)             |
    /// | `AUDIT_RESULTS_MAX_AGE_SECS` | `3600`                           |
    pub fn from_env() -> Self {
        let script_dir = PathBuf::from(
            std::env::var("AUDIT_SCRIPT_DIR")
                .unwrap_or_else(|_| "backend/src/scripts/gcp-audit".into()),
        );

        let credentials_dir = std::env::var("AUDIT_CREDENTIALS_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| script_dir.clone());

        let interpreter = std::env::var("AUDIT_INTERPRETER").unwrap_or_else(|_| "node".into());

        let credential_extension = std::env::var("AUDIT_CREDENTIAL_EXTENSION")
            .unwrap_or_else(|_| DEFAULT_CREDENTIAL_EXTENSION.into());

        let execution_mode =
            std::env::var("AUDIT_EXECUTION_MODE").unwrap_or_else(|_| "production".into());

        let job_timeout_secs: u64 = std::env::var("AUDIT_JOB_TIMEOUT_SECS")
            .unwrap_or_else(|_| "3600".into())
            .parse()
            .expect("AUDIT_JOB_TIMEOUT_SECS must be a valid u64");

        let retention = std::env::var("AUDIT_JOB_RETENTION_SECS").ok().map(|v| {
            Duration::from_secs(
                v.parse()
                    .expect("AUDIT_JOB_RETENTION_SECS must be a valid u64"),
            )
        });

        let results_max_age_secs: u64 = std::env::var("AUDIT_RESULTS_MAX_AGE_SECS")
            .unwrap_or_else(|_| "3600".into())
            .parse()
            .expect("AUDIT_RESULTS_MAX_AGE_SECS must be a valid u64");

        Self {
            script_dir,
            credentials_dir,
            interpreter,
            credential_extension,
            execution_mode,
            job_timeout: (job_timeout_secs > 0).then(|| Duration::from_secs(job_timeout_secs)),
            retention,
            results_max_age: Duration::from_secs(results_max_age_secs),
        }
    }
}
