//! Log Service
//!
//! Read access to the worker log lines persisted by the job runner.

use sluice_core::domain::log::LogEntry;
use uuid::Uuid;

use crate::service::job::{JobError, get_job};
use crate::state::AppState;

/// Get all log entries for a job, oldest first
pub async fn get_job_logs(state: &AppState, job_id: Uuid) -> Result<Vec<LogEntry>, JobError> {
    get_job(state, job_id).await?;

    let logs = state.repos.logs.find_by_job(job_id).await?;

    tracing::debug!("Fetched {} log entries for job {}", logs.len(), job_id);

    Ok(logs)
}
