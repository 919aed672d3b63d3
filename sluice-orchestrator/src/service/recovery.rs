//! Recovery & Introspection
//!
//! Administrative operations for getting the system consistent again after
//! a crash or a runaway respawn loop. None of them touch queued tasks beyond
//! what is asked: stale tasks left behind discard themselves when delivered.

use sluice_core::dto::admin::{ClearTasksReport, ResetReport, TasksInfo};
use tracing::{info, warn};

use crate::dispatcher::QueueError;
use crate::repository::RepositoryError;
use crate::state::AppState;

#[derive(Debug, thiserror::Error)]
pub enum RecoveryError {
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error(transparent)]
    Queue(#[from] QueueError),
}

/// Forces every waiting or running pipeline and job back to idle
///
/// Jobs of a pipeline that is reset are idled with it. Calling this again
/// once nothing is stuck changes nothing.
pub async fn reset_statuses(state: &AppState) -> Result<ResetReport, RecoveryError> {
    let report = state.repos.pipelines.reset_active().await?;

    if report.is_noop() {
        info!("Reset statuses: nothing was stuck");
    } else {
        warn!(
            "Reset statuses: {} pipeline(s) and {} job(s) forced to idle",
            report.pipelines, report.jobs
        );
    }

    Ok(report)
}

/// Discards every pending task on every topic
pub async fn clear_tasks(state: &AppState) -> Result<ClearTasksReport, RecoveryError> {
    let purged = state.dispatcher.purge_all().await?;
    warn!("Cleared {} pending task(s)", purged);
    Ok(ClearTasksReport { purged })
}

/// Queue health, read straight from the task store
pub async fn tasks_info(state: &AppState) -> Result<TasksInfo, RecoveryError> {
    let health = state.dispatcher.health().await?;
    Ok(TasksInfo {
        oldest_pending_task_timestamp: health.oldest_pending_enqueued_at,
        in_flight_count: health.in_flight_count,
    })
}
