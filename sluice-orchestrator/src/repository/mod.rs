//! Repository Module
//!
//! Data access layer for the orchestrator. Every status change goes through
//! a conditional update that names the statuses it may leave from, so
//! duplicate or racing deliveries turn into no-ops instead of errors.
//!
//! All repositories are trait-based with a Postgres and an in-memory
//! implementation; the latter backs the volatile dev mode and the engine
//! tests.

pub mod job;
pub mod log;
pub mod memory;
pub mod pipeline;

use async_trait::async_trait;
use sluice_core::domain::job::{Job, JobStatus};
use sluice_core::domain::log::LogEntry;
use sluice_core::domain::pipeline::{Pipeline, PipelineStatus};
use sluice_core::dto::admin::ResetReport;
use sqlx::PgPool;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("corrupt record: {0}")]
    Corrupt(String),
}

pub type RepoResult<T> = Result<T, RepositoryError>;

#[async_trait]
pub trait PipelineRepository: Send + Sync {
    /// Stores a new pipeline together with its jobs
    async fn create(&self, pipeline: &Pipeline, jobs: &[Job]) -> RepoResult<()>;

    async fn find_by_id(&self, id: Uuid) -> RepoResult<Option<Pipeline>>;

    async fn list_all(&self) -> RepoResult<Vec<Pipeline>>;

    /// Pipelines carrying a cron schedule
    async fn list_scheduled(&self) -> RepoResult<Vec<Pipeline>>;

    /// Moves the pipeline to `to` if its status is one of `from`
    async fn transition(&self, id: Uuid, from: &[PipelineStatus], to: PipelineStatus) -> RepoResult<bool>;

    /// Opens a new run: an inactive pipeline becomes `waiting` under `run_id`
    /// and every job is re-armed as `waiting` with its retry budget restored
    async fn begin_run(&self, id: Uuid, run_id: Uuid) -> RepoResult<bool>;

    /// Terminal transition recording the failing job and error
    async fn finish(
        &self,
        id: Uuid,
        from: &[PipelineStatus],
        to: PipelineStatus,
        failed_job_id: Option<Uuid>,
        error: Option<String>,
    ) -> RepoResult<bool>;

    /// Forces one pipeline and all of its jobs to `idle`
    async fn reset(&self, id: Uuid) -> RepoResult<ResetReport>;

    /// Forces every active pipeline, its jobs, and any other active job to `idle`
    async fn reset_active(&self) -> RepoResult<ResetReport>;
}

#[async_trait]
pub trait JobRepository: Send + Sync {
    async fn find_by_id(&self, id: Uuid) -> RepoResult<Option<Job>>;

    /// Jobs of a pipeline in definition order
    async fn find_by_pipeline(&self, pipeline_id: Uuid) -> RepoResult<Vec<Job>>;

    /// Claims the next dispatch sequence number
    ///
    /// Succeeds only if the job is in one of `from` and still at
    /// `expected_seq`; the job becomes `running`. Returns the new sequence.
    async fn claim_dispatch(&self, id: Uuid, from: &[JobStatus], expected_seq: i64) -> RepoResult<Option<i64>>;

    /// Terminal transition fenced on `running` and the task's sequence
    async fn complete(&self, id: Uuid, expected_seq: i64, status: JobStatus, error: Option<String>) -> RepoResult<bool>;

    /// Unfenced conditional transition used by the engine and operators
    async fn transition(
        &self,
        id: Uuid,
        from: &[JobStatus],
        to: JobStatus,
        error: Option<String>,
    ) -> RepoResult<bool>;

    /// Spends one retry; returns the remaining budget, or `None` when exhausted
    async fn consume_retry(&self, id: Uuid, expected_seq: i64) -> RepoResult<Option<u32>>;
}

#[async_trait]
pub trait LogRepository: Send + Sync {
    async fn append(&self, job_id: Uuid, entries: Vec<LogEntry>) -> RepoResult<()>;

    async fn find_by_job(&self, job_id: Uuid) -> RepoResult<Vec<LogEntry>>;
}

/// The set of repositories the services work against
#[derive(Clone)]
pub struct Repositories {
    pub pipelines: Arc<dyn PipelineRepository>,
    pub jobs: Arc<dyn JobRepository>,
    pub logs: Arc<dyn LogRepository>,
}

impl Repositories {
    pub fn postgres(pool: PgPool) -> Self {
        Self {
            pipelines: Arc::new(pipeline::PgPipelineRepository::new(pool.clone())),
            jobs: Arc::new(job::PgJobRepository::new(pool.clone())),
            logs: Arc::new(log::PgLogRepository::new(pool)),
        }
    }

    pub fn in_memory() -> Self {
        let store = memory::MemoryStore::new();
        Self {
            pipelines: Arc::new(memory::MemoryPipelineRepository::new(store.clone())),
            jobs: Arc::new(memory::MemoryJobRepository::new(store.clone())),
            logs: Arc::new(memory::MemoryLogRepository::new(store)),
        }
    }
}

pub(crate) fn status_strings<S: ToString>(statuses: &[S]) -> Vec<String> {
    statuses.iter().map(ToString::to_string).collect()
}
