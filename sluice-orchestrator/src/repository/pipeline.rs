//! Pipeline Repository
//!
//! Handles all database operations related to pipelines. Operations that
//! touch a pipeline and its jobs together run in one transaction.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sluice_core::domain::job::{Job, JobStatus};
use sluice_core::domain::pipeline::{Pipeline, PipelineStatus};
use sluice_core::dto::admin::ResetReport;
use sqlx::PgPool;
use uuid::Uuid;

use super::{PipelineRepository, RepoResult, RepositoryError, status_strings};

const PIPELINE_COLUMNS: &str = "id, name, status, schedule, run_id, failed_job_id, last_error, \
                                created_at, updated_at, started_at, finished_at";

pub struct PgPipelineRepository {
    pool: PgPool,
}

impl PgPipelineRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PipelineRepository for PgPipelineRepository {
    async fn create(&self, pipeline: &Pipeline, jobs: &[Job]) -> RepoResult<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO pipelines (id, name, status, schedule, run_id, failed_job_id, last_error,
                                   created_at, updated_at, started_at, finished_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(pipeline.id)
        .bind(&pipeline.name)
        .bind(pipeline.status.as_str())
        .bind(&pipeline.schedule)
        .bind(pipeline.run_id)
        .bind(pipeline.failed_job_id)
        .bind(&pipeline.last_error)
        .bind(pipeline.created_at)
        .bind(pipeline.updated_at)
        .bind(pipeline.started_at)
        .bind(pipeline.finished_at)
        .execute(&mut *tx)
        .await?;

        for job in jobs {
            let conditions = serde_json::to_value(&job.start_conditions)
                .map_err(|e| RepositoryError::Corrupt(e.to_string()))?;

            sqlx::query(
                r#"
                INSERT INTO jobs (id, pipeline_id, name, position, status, worker_class, params,
                                  start_conditions, max_retries, retries_left, dispatch_seq,
                                  last_error, updated_at, started_at, finished_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
                "#,
            )
            .bind(job.id)
            .bind(job.pipeline_id)
            .bind(&job.name)
            .bind(job.position)
            .bind(job.status.as_str())
            .bind(&job.worker_class)
            .bind(&job.params)
            .bind(conditions)
            .bind(job.max_retries as i32)
            .bind(job.retries_left as i32)
            .bind(job.dispatch_seq)
            .bind(&job.last_error)
            .bind(job.updated_at)
            .bind(job.started_at)
            .bind(job.finished_at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn find_by_id(&self, id: Uuid) -> RepoResult<Option<Pipeline>> {
        let row = sqlx::query_as::<_, PipelineRow>(&format!(
            "SELECT {} FROM pipelines WHERE id = $1",
            PIPELINE_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Pipeline::try_from).transpose()
    }

    async fn list_all(&self) -> RepoResult<Vec<Pipeline>> {
        let rows = sqlx::query_as::<_, PipelineRow>(&format!(
            "SELECT {} FROM pipelines ORDER BY created_at DESC",
            PIPELINE_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Pipeline::try_from).collect()
    }

    async fn list_scheduled(&self) -> RepoResult<Vec<Pipeline>> {
        let rows = sqlx::query_as::<_, PipelineRow>(&format!(
            "SELECT {} FROM pipelines WHERE schedule IS NOT NULL ORDER BY created_at ASC",
            PIPELINE_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Pipeline::try_from).collect()
    }

    async fn transition(&self, id: Uuid, from: &[PipelineStatus], to: PipelineStatus) -> RepoResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE pipelines
            SET status = $1, updated_at = $2
            WHERE id = $3 AND status = ANY($4)
            "#,
        )
        .bind(to.as_str())
        .bind(Utc::now())
        .bind(id)
        .bind(status_strings(from))
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn begin_run(&self, id: Uuid, run_id: Uuid) -> RepoResult<bool> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        let opened = sqlx::query(
            r#"
            UPDATE pipelines
            SET status = $1, run_id = $2, failed_job_id = NULL, last_error = NULL,
                started_at = $3, finished_at = NULL, updated_at = $3
            WHERE id = $4 AND status <> ALL($5)
            "#,
        )
        .bind(PipelineStatus::Waiting.as_str())
        .bind(run_id)
        .bind(now)
        .bind(id)
        .bind(status_strings(&PipelineStatus::ACTIVE))
        .execute(&mut *tx)
        .await?;

        if opened.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        sqlx::query(
            r#"
            UPDATE jobs
            SET status = $1, retries_left = max_retries, last_error = NULL,
                started_at = NULL, finished_at = NULL, updated_at = $2
            WHERE pipeline_id = $3
            "#,
        )
        .bind(JobStatus::Waiting.as_str())
        .bind(now)
        .bind(id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(true)
    }

    async fn finish(
        &self,
        id: Uuid,
        from: &[PipelineStatus],
        to: PipelineStatus,
        failed_job_id: Option<Uuid>,
        error: Option<String>,
    ) -> RepoResult<bool> {
        let now = Utc::now();
        let result = sqlx::query(
            r#"
            UPDATE pipelines
            SET status = $1, failed_job_id = $2, last_error = $3, finished_at = $4, updated_at = $4
            WHERE id = $5 AND status = ANY($6)
            "#,
        )
        .bind(to.as_str())
        .bind(failed_job_id)
        .bind(error)
        .bind(now)
        .bind(id)
        .bind(status_strings(from))
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn reset(&self, id: Uuid) -> RepoResult<ResetReport> {
        let now = Utc::now();
        let idle = PipelineStatus::Idle.as_str();
        let mut tx = self.pool.begin().await?;

        let pipelines = sqlx::query(
            "UPDATE pipelines SET status = $1, updated_at = $2 WHERE id = $3 AND status <> $1",
        )
        .bind(idle)
        .bind(now)
        .bind(id)
        .execute(&mut *tx)
        .await?;

        let jobs = sqlx::query(
            "UPDATE jobs SET status = $1, updated_at = $2 WHERE pipeline_id = $3 AND status <> $1",
        )
        .bind(JobStatus::Idle.as_str())
        .bind(now)
        .bind(id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(ResetReport {
            pipelines: pipelines.rows_affected(),
            jobs: jobs.rows_affected(),
        })
    }

    async fn reset_active(&self) -> RepoResult<ResetReport> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        let reset_ids: Vec<(Uuid,)> = sqlx::query_as(
            r#"
            UPDATE pipelines
            SET status = $1, updated_at = $2
            WHERE status = ANY($3)
            RETURNING id
            "#,
        )
        .bind(PipelineStatus::Idle.as_str())
        .bind(now)
        .bind(status_strings(&PipelineStatus::ACTIVE))
        .fetch_all(&mut *tx)
        .await?;
        let reset_ids: Vec<Uuid> = reset_ids.into_iter().map(|(id,)| id).collect();

        let jobs = sqlx::query(
            r#"
            UPDATE jobs
            SET status = $1, updated_at = $2
            WHERE status <> $1 AND (status = ANY($3) OR pipeline_id = ANY($4))
            "#,
        )
        .bind(JobStatus::Idle.as_str())
        .bind(now)
        .bind(status_strings(&JobStatus::ACTIVE))
        .bind(&reset_ids)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(ResetReport {
            pipelines: reset_ids.len() as u64,
            jobs: jobs.rows_affected(),
        })
    }
}

// =============================================================================
// Database Row Types
// =============================================================================

#[derive(sqlx::FromRow)]
struct PipelineRow {
    id: Uuid,
    name: String,
    status: String,
    schedule: Option<String>,
    run_id: Option<Uuid>,
    failed_job_id: Option<Uuid>,
    last_error: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
}

impl TryFrom<PipelineRow> for Pipeline {
    type Error = RepositoryError;

    fn try_from(row: PipelineRow) -> Result<Self, Self::Error> {
        let status = row
            .status
            .parse()
            .map_err(|e| RepositoryError::Corrupt(format!("pipeline {}: {}", row.id, e)))?;

        Ok(Pipeline {
            id: row.id,
            name: row.name,
            status,
            schedule: row.schedule,
            run_id: row.run_id,
            failed_job_id: row.failed_job_id,
            last_error: row.last_error,
            created_at: row.created_at,
            updated_at: row.updated_at,
            started_at: row.started_at,
            finished_at: row.finished_at,
        })
    }
}
