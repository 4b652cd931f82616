//! Handlers for the `/audits` resource.
//!
//! Launch returns as soon as the worker is handed off; clients then poll
//! the status endpoint until the job reaches `completed` or `error`.

use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use axum::Json;
use cloudaudit_core::launch::LaunchRequest;
use serde::Deserialize;

use crate::error::{AppError, AppResult};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct StatusQuery {
    pub id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobListQuery {
    pub project_id: Option<String>,
}

// ---------------------------------------------------------------------------
// Launch
// ---------------------------------------------------------------------------

/// POST /api/audits/run
///
/// Start an audit. Responds with `{jobId, status, message}` without waiting
/// for the worker.
pub async fn run_audit(
    State(state): State<AppState>,
    Json(input): Json<LaunchRequest>,
) -> AppResult<impl IntoResponse> {
    let receipt = state.orchestrator.launch(&input).await?;

    tracing::info!(job_id = %receipt.job_id, "Audit launched");

    Ok(Json(receipt))
}

// ---------------------------------------------------------------------------
// Queries
// ---------------------------------------------------------------------------

/// GET /api/audits/status?id=<jobId>
pub async fn audit_status(
    State(state): State<AppState>,
    Query(params): Query<StatusQuery>,
) -> AppResult<impl IntoResponse> {
    let job_id = params
        .id
        .filter(|id| !id.trim().is_empty())
        .ok_or_else(|| AppError::BadRequest("Missing jobId".to_string()))?;

    let status = state.orchestrator.status(&job_id).await?;
    Ok(Json(status))
}

/// GET /api/audits/jobs?projectId=<p>
pub async fn list_jobs(
    State(state): State<AppState>,
    Query(params): Query<JobListQuery>,
) -> AppResult<impl IntoResponse> {
    let jobs = state
        .orchestrator
        .list(params.project_id.as_deref())
        .await?;
    Ok(Json(jobs))
}

/// GET /api/audits/jobs/{id}
pub async fn get_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<impl IntoResponse> {
    let job = state.orchestrator.snapshot(&id).await?;
    Ok(Json(job))
}

/// GET /api/audits/{id}
///
/// The job snapshot with the parsed results file attached once the job
/// has completed.
pub async fn get_audit_detail(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<impl IntoResponse> {
    let detail = state.orchestrator.detail(&id).await?;
    Ok(Json(detail))
}

// ---------------------------------------------------------------------------
// Categories
// ---------------------------------------------------------------------------

/// GET /api/audits/categories
pub async fn list_categories(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.orchestrator.categories())
}

/// GET /api/audits/categories/{category}/latest
///
/// 404 when no results file exists or it is older than the configured
/// maximum age.
pub async fn latest_results(
    State(state): State<AppState>,
    Path(category): Path<String>,
) -> AppResult<impl IntoResponse> {
    let report = state
        .orchestrator
        .latest_results(&category)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("No recent results for {category}")))?;
    Ok(Json(report))
}
