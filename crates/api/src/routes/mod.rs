pub mod audits;
pub mod health;

use axum::Router;

use crate::state::AppState;

/// Build the `/api` route tree.
///
/// Route hierarchy:
///
/// ```text
/// /audits/run                              launch an audit (POST)
/// /audits/status?id=<jobId>                status and error of one job
/// /audits/jobs?projectId=<p>               job summaries, newest first
/// /audits/jobs/{id}                        full job snapshot
/// /audits/categories                       category vocabulary
/// /audits/categories/{category}/latest     cached results if fresh
/// /audits/{id}                             job snapshot plus report
/// ```
pub fn api_routes() -> Router<AppState> {
    Router::new().nest("/audits", audits::router())
}
