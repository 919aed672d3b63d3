//! Job API Handlers

use axum::{
    Json,
    extract::{Path, State},
};
use sluice_core::domain::job::Job;
use sluice_core::domain::log::LogEntry;
use uuid::Uuid;

use crate::api::error::ApiResult;
use crate::service::{job_service, log_service};
use crate::state::AppState;

/// GET /api/job/{id}
pub async fn get_job(State(state): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<Json<Job>> {
    tracing::debug!("Getting job: {}", id);

    Ok(Json(job_service::get_job(&state, id).await?))
}

/// GET /api/job/{id}/logs
/// Worker log lines of every execution of the job, oldest first
pub async fn get_job_logs(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Vec<LogEntry>>> {
    Ok(Json(log_service::get_job_logs(&state, id).await?))
}
