use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cloudaudit_api::background;
use cloudaudit_api::config::ServerConfig;
use cloudaudit_api::router::build_app_router;
use cloudaudit_api::scripting::orchestrator::AuditOrchestrator;
use cloudaudit_api::state::AppState;
use cloudaudit_core::registry::{InMemoryJobStore, JobStore};
use cloudaudit_events::EventBus;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "cloudaudit_api=debug,cloudaudit_core=debug,tower_http=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // --- Configuration ---
    let config = ServerConfig::from_env();
    tracing::info!(host = %config.host, port = %config.port, "Loaded server configuration");
    tracing::info!(
        script_dir = %config.audit.script_dir.display(),
        credentials_dir = %config.audit.credentials_dir.display(),
        interpreter = %config.audit.interpreter,
        job_timeout_secs = ?config.audit.job_timeout.map(|t| t.as_secs()),
        "Loaded audit configuration"
    );

    // --- Job store ---
    let store: Arc<dyn JobStore> = Arc::new(InMemoryJobStore::new());

    // --- Event bus ---
    let event_bus = Arc::new(EventBus::default());
    tracing::info!("Event bus created");

    // --- Background tasks ---
    let cancel = CancellationToken::new();

    let event_log_handle = tokio::spawn(background::event_log::run(
        event_bus.subscribe(),
        cancel.clone(),
    ));

    let retention_handle = config.audit.retention.map(|retention| {
        tokio::spawn(background::retention::run(
            Arc::clone(&store),
            retention,
            cancel.clone(),
        ))
    });
    if retention_handle.is_none() {
        tracing::info!("Job retention disabled, finished jobs are kept");
    }

    // --- Orchestrator ---
    let orchestrator = Arc::new(AuditOrchestrator::new(
        config.audit.clone(),
        Arc::clone(&store),
        Arc::clone(&event_bus),
    ));

    // --- App state ---
    let state = AppState {
        config: Arc::new(config.clone()),
        orchestrator,
        event_bus: Arc::clone(&event_bus),
    };

    let app = build_app_router(state, &config);

    // --- Start server ---
    let addr = SocketAddr::new(
        config.host.parse().expect("Invalid HOST address"),
        config.port,
    );
    tracing::info!(%addr, "Starting server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind to address");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");

    // --- Post-shutdown cleanup ---
    tracing::info!("Server stopped accepting connections, cleaning up");

    let grace = Duration::from_secs(config.shutdown_timeout_secs);
    cancel.cancel();
    if let Some(handle) = retention_handle {
        let _ = tokio::time::timeout(grace, handle).await;
        tracing::info!("Job retention task stopped");
    }
    let _ = tokio::time::timeout(grace, event_log_handle).await;
    tracing::info!("Event logger stopped");

    // Workers run in their own process groups and are left to finish.
    let running = store
        .list(None)
        .await
        .map(|jobs| jobs.iter().filter(|j| !j.status.is_terminal()).count())
        .unwrap_or_default();
    if running > 0 {
        tracing::warn!(running, "Shutting down with audit workers still running");
    }

    tracing::info!("Graceful shutdown complete");
}

/// Wait for a termination signal to initiate graceful shutdown.
///
/// Handles both SIGINT (Ctrl-C) and SIGTERM (on Unix) so the server
/// shuts down cleanly whether stopped interactively or by a process
/// manager (e.g. systemd, Docker, Kubernetes).
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
