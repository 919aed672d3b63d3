//! Pipeline API Handlers
//!
//! HTTP endpoints for pipeline definitions and operator controls.

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use sluice_core::domain::job::Job;
use sluice_core::domain::pipeline::Pipeline;
use sluice_core::dto::admin::ResetReport;
use sluice_core::dto::pipeline::{CreatePipeline, PipelineDetails, StartPipelineResponse};
use uuid::Uuid;

use crate::api::error::ApiResult;
use crate::service::pipeline_service;
use crate::state::AppState;

/// POST /api/pipeline/create
/// Create a new pipeline with its jobs
pub async fn create_pipeline(
    State(state): State<AppState>,
    Json(req): Json<CreatePipeline>,
) -> ApiResult<(StatusCode, Json<PipelineDetails>)> {
    tracing::info!("Creating pipeline: {}", req.name);

    let details = pipeline_service::create_pipeline(&state, req).await?;

    Ok((StatusCode::CREATED, Json(details)))
}

/// GET /api/pipeline/list
pub async fn list_pipelines(State(state): State<AppState>) -> ApiResult<Json<Vec<Pipeline>>> {
    tracing::debug!("Listing all pipelines");

    Ok(Json(pipeline_service::list_pipelines(&state).await?))
}

/// GET /api/pipeline/{id}
/// Get a pipeline together with its jobs
pub async fn get_pipeline(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<PipelineDetails>> {
    tracing::debug!("Getting pipeline: {}", id);

    Ok(Json(pipeline_service::get_pipeline_details(&state, id).await?))
}

/// GET /api/pipeline/{id}/jobs
pub async fn list_pipeline_jobs(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Vec<Job>>> {
    Ok(Json(pipeline_service::list_jobs(&state, id).await?))
}

/// POST /api/pipeline/{id}/start
/// 202 with the new run id, or 409 with the current status of an active pipeline
pub async fn start_pipeline(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<(StatusCode, Json<StartPipelineResponse>)> {
    tracing::info!("Start requested for pipeline: {}", id);

    let response = pipeline_service::start_pipeline(&state, id).await?;
    let status = match response {
        StartPipelineResponse::Accepted { .. } => StatusCode::ACCEPTED,
        StartPipelineResponse::Conflict { .. } => StatusCode::CONFLICT,
    };

    Ok((status, Json(response)))
}

/// POST /api/pipeline/{id}/stop
pub async fn stop_pipeline(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Pipeline>> {
    tracing::info!("Stop requested for pipeline: {}", id);

    Ok(Json(pipeline_service::stop_pipeline(&state, id).await?))
}

/// POST /api/pipeline/{id}/reset
pub async fn reset_pipeline(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<ResetReport>> {
    tracing::info!("Reset requested for pipeline: {}", id);

    Ok(Json(pipeline_service::reset_pipeline(&state, id).await?))
}
