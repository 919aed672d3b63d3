//! Postgres-backed task queue
//!
//! Leasing uses `FOR UPDATE SKIP LOCKED` so several orchestrator instances
//! can pump the same table without handing out a task twice.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::PgPool;
use std::time::Duration;
use uuid::Uuid;

use super::{LeasedTask, QueueError, QueueHealth, TaskQueue};

pub struct PgTaskQueue {
    pool: PgPool,
}

impl PgTaskQueue {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn later(now: DateTime<Utc>, by: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(by)
        .ok()
        .and_then(|d| now.checked_add_signed(d))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

#[async_trait]
impl TaskQueue for PgTaskQueue {
    async fn enqueue(&self, topic: &str, payload: JsonValue, delay: Duration) -> Result<Uuid, QueueError> {
        let id = Uuid::new_v4();
        let now = Utc::now();

        sqlx::query(
            r#"
            INSERT INTO tasks (id, topic, payload, enqueued_at, visible_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(id)
        .bind(topic)
        .bind(payload)
        .bind(now)
        .bind(later(now, delay))
        .execute(&self.pool)
        .await?;

        Ok(id)
    }

    async fn lease(&self, topic: &str, limit: usize, ack_deadline: Duration) -> Result<Vec<LeasedTask>, QueueError> {
        let now = Utc::now();
        let rows = sqlx::query_as::<_, LeasedRow>(
            r#"
            UPDATE tasks
            SET leased_until = $1, delivery_attempt = delivery_attempt + 1
            WHERE id IN (
                SELECT id FROM tasks
                WHERE topic = $2
                  AND visible_at <= $3
                  AND (leased_until IS NULL OR leased_until <= $3)
                ORDER BY visible_at ASC
                LIMIT $4
                FOR UPDATE SKIP LOCKED
            )
            RETURNING id, topic, payload, enqueued_at, delivery_attempt
            "#,
        )
        .bind(later(now, ack_deadline))
        .bind(topic)
        .bind(now)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|r| r.into()).collect())
    }

    async fn ack(&self, id: Uuid) -> Result<(), QueueError> {
        sqlx::query("DELETE FROM tasks WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn nack(&self, id: Uuid, retry_after: Duration) -> Result<(), QueueError> {
        sqlx::query("UPDATE tasks SET leased_until = NULL, visible_at = $1 WHERE id = $2")
            .bind(later(Utc::now(), retry_after))
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn purge(&self, topic: Option<&str>) -> Result<u64, QueueError> {
        let result = sqlx::query(
            r#"
            DELETE FROM tasks
            WHERE (leased_until IS NULL OR leased_until <= $1)
              AND ($2::text IS NULL OR topic = $2)
            "#,
        )
        .bind(Utc::now())
        .bind(topic)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn health(&self) -> Result<QueueHealth, QueueError> {
        let (oldest, in_flight): (Option<DateTime<Utc>>, i64) = sqlx::query_as(
            r#"
            SELECT MIN(enqueued_at) FILTER (WHERE leased_until IS NULL OR leased_until <= $1),
                   COUNT(*) FILTER (WHERE leased_until > $1)
            FROM tasks
            "#,
        )
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await?;

        Ok(QueueHealth {
            oldest_pending_enqueued_at: oldest,
            in_flight_count: in_flight.max(0) as u64,
        })
    }
}

#[derive(sqlx::FromRow)]
struct LeasedRow {
    id: Uuid,
    topic: String,
    payload: JsonValue,
    enqueued_at: DateTime<Utc>,
    delivery_attempt: i32,
}

impl From<LeasedRow> for LeasedTask {
    fn from(row: LeasedRow) -> Self {
        LeasedTask {
            id: row.id,
            topic: row.topic,
            payload: row.payload,
            enqueued_at: row.enqueued_at,
            delivery_attempt: row.delivery_attempt.max(0) as u32,
        }
    }
}
