//! Route definitions for the `/audits` resource.

use axum::routing::{get, post};
use axum::Router;

use crate::handlers::audits;
use crate::state::AppState;

/// Routes mounted at `/audits`.
///
/// ```text
/// POST   /run                            -> run_audit
/// GET    /status                         -> audit_status
/// GET    /jobs                           -> list_jobs
/// GET    /jobs/{id}                      -> get_job
/// GET    /categories                     -> list_categories
/// GET    /categories/{category}/latest   -> latest_results
/// GET    /{id}                           -> get_audit_detail
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/run", post(audits::run_audit))
        .route("/status", get(audits::audit_status))
        .route("/jobs", get(audits::list_jobs))
        .route("/jobs/{id}", get(audits::get_job))
        .route("/categories", get(audits::list_categories))
        .route(
            "/categories/{category}/latest",
            get(audits::latest_results),
        )
        .route("/{id}", get(audits::get_audit_detail))
}
