//! Push Subscriber Handlers
//!
//! Endpoints the delivery pump pushes tasks to. Any 2xx answer acknowledges
//! the task, so a handler only fails when the outcome could not be recorded
//! and the task should be delivered again.

use axum::{
    Json,
    body::Bytes,
    extract::{Query, State},
};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use sluice_core::domain::task::{PushEnvelope, StartPipelinesMessage, TaskMessage};

use crate::api::error::{ApiError, ApiResult};
use crate::service::{runner_service, schedule_service};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct PushQuery {
    token: Option<String>,
}

/// Whether a delivery carries the configured verification token
pub fn verify_token(expected: &str, provided: Option<&str>) -> bool {
    match provided {
        Some(token) if !expected.is_empty() && token.len() == expected.len() => token
            .bytes()
            .zip(expected.bytes())
            .fold(0u8, |diff, (a, b)| diff | (a ^ b))
            == 0,
        _ => false,
    }
}

fn authorize(state: &AppState, query: &PushQuery) -> ApiResult<()> {
    if verify_token(&state.push_token, query.token.as_deref()) {
        Ok(())
    } else {
        tracing::warn!("Rejected push delivery with a missing or invalid token");
        Err(ApiError::Forbidden("invalid push token".to_string()))
    }
}

/// Decodes an envelope and its payload
///
/// An undecodable delivery can never succeed, so it is logged and dropped
/// rather than redelivered.
fn decode<T: DeserializeOwned>(body: &[u8]) -> Option<(PushEnvelope, T)> {
    let envelope: PushEnvelope = match serde_json::from_slice(body) {
        Ok(envelope) => envelope,
        Err(e) => {
            tracing::error!("Dropping undecodable push delivery: {}", e);
            return None;
        }
    };

    match serde_json::from_value(envelope.payload.clone()) {
        Ok(payload) => Some((envelope, payload)),
        Err(e) => {
            tracing::error!(
                task_id = %envelope.task_id,
                "Dropping task with an undecodable payload: {}",
                e
            );
            None
        }
    }
}

/// POST /push/start-task?token=
pub async fn start_task(
    State(state): State<AppState>,
    Query(query): Query<PushQuery>,
    body: Bytes,
) -> ApiResult<Json<Value>> {
    authorize(&state, &query)?;

    let Some((envelope, message)) = decode::<TaskMessage>(&body) else {
        return Ok(Json(json!({ "disposition": "dropped" })));
    };

    tracing::debug!(
        task_id = %envelope.task_id,
        job_id = %message.job_id,
        attempt = envelope.delivery_attempt,
        "Task delivered"
    );

    let disposition = runner_service::run_task(&state, message).await?;

    Ok(Json(json!({ "disposition": disposition.as_str() })))
}

/// POST /push/start-pipeline?token=
pub async fn start_pipeline(
    State(state): State<AppState>,
    Query(query): Query<PushQuery>,
    body: Bytes,
) -> ApiResult<Json<Value>> {
    authorize(&state, &query)?;

    let Some((envelope, message)) = decode::<StartPipelinesMessage>(&body) else {
        return Ok(Json(json!({ "started": [] })));
    };

    let started = schedule_service::start_pipelines(&state, &message, envelope.enqueued_at).await?;

    Ok(Json(json!({ "started": started })))
}
