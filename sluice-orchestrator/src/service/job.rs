//! Job Service
//!
//! Job lookups and the error type shared with the job runner.

use sluice_core::domain::job::Job;
use uuid::Uuid;

use crate::dispatcher::QueueError;
use crate::repository::RepositoryError;
use crate::service::pipeline::PipelineError;
use crate::state::AppState;

/// Service error type
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("job {0} not found")]
    NotFound(Uuid),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error(transparent)]
    Queue(#[from] QueueError),
    #[error(transparent)]
    Engine(#[from] PipelineError),
}

/// Get a job by ID
pub async fn get_job(state: &AppState, id: Uuid) -> Result<Job, JobError> {
    let job = state
        .repos
        .jobs
        .find_by_id(id)
        .await?
        .ok_or(JobError::NotFound(id))?;

    Ok(job)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{TestHarness, job};

    #[tokio::test]
    async fn test_get_job() {
        let harness = TestHarness::new();
        let details = harness.create(vec![job("a")]).await;

        let found = get_job(&harness.state, details.jobs[0].id).await.unwrap();
        assert_eq!(found.name, "a");
        assert!(matches!(
            get_job(&harness.state, Uuid::new_v4()).await,
            Err(JobError::NotFound(_))
        ));
    }
}
