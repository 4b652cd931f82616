use std::sync::Arc;

use cloudaudit_events::EventBus;

use crate::config::ServerConfig;
use crate::scripting::orchestrator::AuditOrchestrator;

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// This is cheaply cloneable (inner data is behind `Arc`).
#[derive(Clone)]
pub struct AppState {
    /// Server configuration.
    pub config: Arc<ServerConfig>,
    /// Launches audit workers and answers job queries.
    pub orchestrator: Arc<AuditOrchestrator>,
    /// Job lifecycle events.
    pub event_bus: Arc<EventBus>,
}
