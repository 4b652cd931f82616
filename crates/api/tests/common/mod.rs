#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{header::CONTENT_TYPE, Method, Request};
use axum::response::Response;
use axum::Router;
use http_body_util::BodyExt;
use tempfile::TempDir;
use tower::ServiceExt;

use cloudaudit_api::config::{AuditConfig, ServerConfig};
use cloudaudit_api::router::build_app_router;
use cloudaudit_api::scripting::orchestrator::AuditOrchestrator;
use cloudaudit_api::state::AppState;
use cloudaudit_core::registry::InMemoryJobStore;
use cloudaudit_events::EventBus;

/// A fully wired application over a scratch script directory.
pub struct TestApp {
    pub app: Router,
    pub state: AppState,
    /// Holds the audit scripts, credential files and results files.
    pub dir: TempDir,
}

impl TestApp {
    pub fn script_dir(&self) -> &Path {
        self.dir.path()
    }

    /// Write a worker script. Scripts run through `bash`.
    pub fn write_script(&self, name: &str, body: &str) {
        std::fs::write(self.dir.path().join(name), body).expect("write script");
    }

    /// Drop a service-account key into the credential directory.
    pub fn write_credentials(&self, name: &str) {
        std::fs::write(self.dir.path().join(name), r#"{"type":"service_account"}"#)
            .expect("write credentials");
    }
}

/// Build a test `ServerConfig` with safe defaults.
///
/// Workers are run with `bash` so tests can supply shell scripts under the
/// usual `*-audit.js` names.
pub fn test_config(script_dir: &Path) -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        cors_origins: vec!["http://localhost:3000".to_string()],
        request_timeout_secs: 30,
        shutdown_timeout_secs: 5,
        audit: AuditConfig {
            script_dir: script_dir.to_path_buf(),
            credentials_dir: script_dir.to_path_buf(),
            interpreter: "bash".to_string(),
            credential_extension: ".json".to_string(),
            execution_mode: "production".to_string(),
            job_timeout: Some(Duration::from_secs(30)),
            retention: None,
            results_max_age: Duration::from_secs(3600),
        },
    }
}

/// Build the full application router with all middleware layers over a
/// fresh temporary script directory.
pub fn build_test_app() -> TestApp {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = test_config(dir.path());

    let event_bus = Arc::new(EventBus::default());
    let orchestrator = Arc::new(AuditOrchestrator::new(
        config.audit.clone(),
        Arc::new(InMemoryJobStore::new()),
        Arc::clone(&event_bus),
    ));
    let state = AppState {
        config: Arc::new(config.clone()),
        orchestrator,
        event_bus,
    };

    TestApp {
        app: build_app_router(state.clone(), &config),
        state,
        dir,
    }
}

pub async fn get(app: Router, uri: &str) -> Response {
    app.oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap()
}

pub async fn post_json(app: Router, uri: &str, body: serde_json::Value) -> Response {
    let request = Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header(CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    app.oneshot(request).await.unwrap()
}

pub async fn body_json(response: Response) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

/// Poll the status endpoint until the job leaves `running`.
pub async fn wait_for_terminal(app: &Router, job_id: &str) -> serde_json::Value {
    let uri = format!("/api/audits/status?id={job_id}");
    for _ in 0..400 {
        let json = body_json(get(app.clone(), &uri).await).await;
        if json["status"] == "completed" || json["status"] == "error" {
            return json;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("job {job_id} did not reach a terminal state");
}
