//! Generic REST asynchronous job
//!
//! `POST submit_url` with `body` starts the remote job and answers
//! `{"id": ...}`. `GET status_url` (with `{id}` substituted) answers
//! `{"status": "pending" | "running" | "succeeded" | "failed", "error": ...}`.

use anyhow::{Context as _, anyhow};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value as JsonValue;

use crate::context::WorkerContext;
use crate::external::{ExternalOperation, OperationState};
use crate::worker::WorkerError;

#[derive(Debug, Clone, Deserialize)]
pub struct HttpJobParams {
    pub submit_url: String,
    /// URL template; `{id}` is replaced with the submitted job's id
    pub status_url: String,
    #[serde(default)]
    pub body: JsonValue,
}

#[derive(Deserialize)]
struct Submitted {
    id: String,
}

#[derive(Deserialize)]
struct StatusReport {
    status: String,
    #[serde(default)]
    error: Option<String>,
}

pub struct HttpOperation {
    client: reqwest::Client,
    params: HttpJobParams,
}

impl HttpOperation {
    pub fn new(client: reqwest::Client, params: HttpJobParams) -> Self {
        Self { client, params }
    }

    /// Builds the operation from a job's parameters; malformed ones are fatal
    pub fn from_params(client: reqwest::Client, params: &JsonValue) -> Result<Self, WorkerError> {
        let params = serde_json::from_value(params.clone())
            .map_err(|e| WorkerError::fatal(format!("invalid HttpJob params: {}", e)))?;
        Ok(Self::new(client, params))
    }
}

/// 4xx means the remote rejected the request for good, except for timeouts
/// and rate limiting; anything else may pass
async fn check_response(response: reqwest::Response) -> Result<reqwest::Response, WorkerError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let retryable = matches!(
        status,
        reqwest::StatusCode::REQUEST_TIMEOUT | reqwest::StatusCode::TOO_MANY_REQUESTS
    );
    if status.is_client_error() && !retryable {
        Err(WorkerError::Fatal(format!("remote rejected request ({}): {}", status, body)))
    } else {
        Err(anyhow!("remote error ({}): {}", status, body).into())
    }
}

#[async_trait]
impl ExternalOperation for HttpOperation {
    async fn submit(&self, ctx: &WorkerContext) -> Result<String, WorkerError> {
        let response = self
            .client
            .post(&self.params.submit_url)
            .header("Idempotency-Key", ctx.idempotency_key())
            .json(&self.params.body)
            .send()
            .await
            .context("submit request failed")?;

        let submitted: Submitted = check_response(response)
            .await?
            .json()
            .await
            .map_err(|e| WorkerError::fatal(format!("unexpected submit response: {}", e)))?;
        Ok(submitted.id)
    }

    async fn status(&self, _ctx: &WorkerContext, handle: &str) -> Result<OperationState, WorkerError> {
        let url = self.params.status_url.replace("{id}", handle);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .context("status request failed")?;

        let report: StatusReport = check_response(response)
            .await?
            .json()
            .await
            .context("unreadable status response")?;

        match report.status.as_str() {
            "pending" | "running" => Ok(OperationState::Pending),
            "succeeded" => Ok(OperationState::Succeeded),
            "failed" => Ok(OperationState::Failed(
                report.error.unwrap_or_else(|| "remote job failed".to_string()),
            )),
            other => Err(WorkerError::fatal(format!("unknown remote status '{}'", other))),
        }
    }
}
