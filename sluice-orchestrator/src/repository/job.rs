//! Job Repository
//!
//! Handles all database operations related to jobs.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sluice_core::domain::job::{Job, JobStatus, StartCondition};
use sqlx::PgPool;
use uuid::Uuid;

use super::{JobRepository, RepoResult, RepositoryError, status_strings};

const JOB_COLUMNS: &str = "id, pipeline_id, name, position, status, worker_class, params, \
                           start_conditions, max_retries, retries_left, dispatch_seq, \
                           last_error, updated_at, started_at, finished_at";

pub struct PgJobRepository {
    pool: PgPool,
}

impl PgJobRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl JobRepository for PgJobRepository {
    async fn find_by_id(&self, id: Uuid) -> RepoResult<Option<Job>> {
        let row = sqlx::query_as::<_, JobRow>(&format!("SELECT {} FROM jobs WHERE id = $1", JOB_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(Job::try_from).transpose()
    }

    async fn find_by_pipeline(&self, pipeline_id: Uuid) -> RepoResult<Vec<Job>> {
        let rows = sqlx::query_as::<_, JobRow>(&format!(
            "SELECT {} FROM jobs WHERE pipeline_id = $1 ORDER BY position ASC",
            JOB_COLUMNS
        ))
        .bind(pipeline_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Job::try_from).collect()
    }

    async fn claim_dispatch(&self, id: Uuid, from: &[JobStatus], expected_seq: i64) -> RepoResult<Option<i64>> {
        let now = Utc::now();
        let row: Option<(i64,)> = sqlx::query_as(
            r#"
            UPDATE jobs
            SET dispatch_seq = dispatch_seq + 1, status = $1,
                started_at = COALESCE(started_at, $2), updated_at = $2
            WHERE id = $3 AND status = ANY($4) AND dispatch_seq = $5
            RETURNING dispatch_seq
            "#,
        )
        .bind(JobStatus::Running.as_str())
        .bind(now)
        .bind(id)
        .bind(status_strings(from))
        .bind(expected_seq)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(seq,)| seq))
    }

    async fn complete(&self, id: Uuid, expected_seq: i64, status: JobStatus, error: Option<String>) -> RepoResult<bool> {
        let now = Utc::now();
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET status = $1, last_error = $2, finished_at = $3, updated_at = $3
            WHERE id = $4 AND status = $5 AND dispatch_seq = $6
            "#,
        )
        .bind(status.as_str())
        .bind(error)
        .bind(now)
        .bind(id)
        .bind(JobStatus::Running.as_str())
        .bind(expected_seq)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn transition(
        &self,
        id: Uuid,
        from: &[JobStatus],
        to: JobStatus,
        error: Option<String>,
    ) -> RepoResult<bool> {
        let now = Utc::now();
        let finished_at = to.is_terminal().then_some(now);
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET status = $1, last_error = COALESCE($2, last_error),
                finished_at = COALESCE($3, finished_at), updated_at = $4
            WHERE id = $5 AND status = ANY($6)
            "#,
        )
        .bind(to.as_str())
        .bind(error)
        .bind(finished_at)
        .bind(now)
        .bind(id)
        .bind(status_strings(from))
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn consume_retry(&self, id: Uuid, expected_seq: i64) -> RepoResult<Option<u32>> {
        let row: Option<(i32,)> = sqlx::query_as(
            r#"
            UPDATE jobs
            SET retries_left = retries_left - 1, updated_at = $1
            WHERE id = $2 AND status = $3 AND dispatch_seq = $4 AND retries_left > 0
            RETURNING retries_left
            "#,
        )
        .bind(Utc::now())
        .bind(id)
        .bind(JobStatus::Running.as_str())
        .bind(expected_seq)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(left,)| left.max(0) as u32))
    }
}

// =============================================================================
// Database Row Types
// =============================================================================

#[derive(sqlx::FromRow)]
struct JobRow {
    id: Uuid,
    pipeline_id: Uuid,
    name: String,
    position: i32,
    status: String,
    worker_class: String,
    params: serde_json::Value,
    start_conditions: serde_json::Value,
    max_retries: i32,
    retries_left: i32,
    dispatch_seq: i64,
    last_error: Option<String>,
    updated_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
}

impl TryFrom<JobRow> for Job {
    type Error = RepositoryError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        let status = row
            .status
            .parse()
            .map_err(|e| RepositoryError::Corrupt(format!("job {}: {}", row.id, e)))?;
        let start_conditions: Vec<StartCondition> = serde_json::from_value(row.start_conditions)
            .map_err(|e| RepositoryError::Corrupt(format!("job {} start conditions: {}", row.id, e)))?;

        Ok(Job {
            id: row.id,
            pipeline_id: row.pipeline_id,
            name: row.name,
            position: row.position,
            status,
            worker_class: row.worker_class,
            params: row.params,
            start_conditions,
            max_retries: row.max_retries.max(0) as u32,
            retries_left: row.retries_left.max(0) as u32,
            dispatch_seq: row.dispatch_seq,
            last_error: row.last_error,
            updated_at: row.updated_at,
            started_at: row.started_at,
            finished_at: row.finished_at,
        })
    }
}
