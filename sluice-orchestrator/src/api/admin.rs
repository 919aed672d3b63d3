//! Recovery & Introspection API Handlers

use axum::{Json, extract::State};
use sluice_core::dto::admin::{ClearTasksReport, ResetReport, TasksInfo};

use crate::api::error::ApiResult;
use crate::service::recovery_service;
use crate::state::AppState;

/// POST /api/reset/statuses
pub async fn reset_statuses(State(state): State<AppState>) -> ApiResult<Json<ResetReport>> {
    Ok(Json(recovery_service::reset_statuses(&state).await?))
}

/// POST /api/clear_tasks
pub async fn clear_tasks(State(state): State<AppState>) -> ApiResult<Json<ClearTasksReport>> {
    Ok(Json(recovery_service::clear_tasks(&state).await?))
}

/// GET /api/tasks_info
pub async fn tasks_info(State(state): State<AppState>) -> ApiResult<Json<TasksInfo>> {
    Ok(Json(recovery_service::tasks_info(&state).await?))
}
