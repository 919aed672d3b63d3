//! Log Repository
//!
//! Persists the log entries workers buffer in their context.

use async_trait::async_trait;
use sluice_core::domain::log::{LogEntry, LogLevel};
use sqlx::PgPool;
use uuid::Uuid;

use super::{LogRepository, RepoResult};

pub struct PgLogRepository {
    pool: PgPool,
}

impl PgLogRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LogRepository for PgLogRepository {
    async fn append(&self, job_id: Uuid, entries: Vec<LogEntry>) -> RepoResult<()> {
        if entries.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;
        for entry in entries {
            sqlx::query(
                r#"
                INSERT INTO job_logs (job_id, timestamp, level, message)
                VALUES ($1, $2, $3, $4)
                "#,
            )
            .bind(job_id)
            .bind(entry.timestamp)
            .bind(entry.level.as_str())
            .bind(&entry.message)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        Ok(())
    }

    async fn find_by_job(&self, job_id: Uuid) -> RepoResult<Vec<LogEntry>> {
        let rows = sqlx::query_as::<_, LogRow>(
            r#"
            SELECT timestamp, level, message
            FROM job_logs
            WHERE job_id = $1
            ORDER BY timestamp ASC, id ASC
            "#,
        )
        .bind(job_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|r| r.into()).collect())
    }
}

fn string_to_level(s: &str) -> LogLevel {
    match s {
        "Debug" => LogLevel::Debug,
        "Warning" => LogLevel::Warning,
        "Error" => LogLevel::Error,
        _ => LogLevel::Info,
    }
}

#[derive(sqlx::FromRow)]
struct LogRow {
    timestamp: chrono::DateTime<chrono::Utc>,
    level: String,
    message: String,
}

impl From<LogRow> for LogEntry {
    fn from(row: LogRow) -> Self {
        LogEntry {
            timestamp: row.timestamp,
            level: string_to_level(&row.level),
            message: row.message,
        }
    }
}
