//! Task Queue Dispatcher
//!
//! At-least-once delivery of task messages to the orchestrator's push
//! endpoints. The `TaskQueue` holds the messages; the delivery pump leases
//! due ones and pushes them; the push handlers acknowledge by answering 2xx.

pub mod delivery;
pub mod memory;
pub mod postgres;
pub mod topic;

pub use topic::{ALL_TOPICS, START_PIPELINE, START_TASK, Topic};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use sluice_core::domain::task::{StartPipelinesMessage, TaskMessage};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("queue database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("unserializable payload: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// A task handed out for delivery
#[derive(Debug, Clone, PartialEq)]
pub struct LeasedTask {
    pub id: Uuid,
    pub topic: String,
    pub payload: JsonValue,
    pub enqueued_at: DateTime<Utc>,
    /// 1 on the first delivery
    pub delivery_attempt: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueHealth {
    /// Enqueue time of the oldest task not currently leased
    pub oldest_pending_enqueued_at: Option<DateTime<Utc>>,
    /// Tasks with a live lease
    pub in_flight_count: u64,
}

/// Storage and leasing of queued tasks
///
/// A task is pending while it has no live lease, and in flight while it
/// does. A lease that expires without an ack makes the task pending again.
#[async_trait]
pub trait TaskQueue: Send + Sync {
    async fn enqueue(&self, topic: &str, payload: JsonValue, delay: Duration) -> Result<Uuid, QueueError>;

    /// Leases up to `limit` due tasks of `topic` for `ack_deadline`
    async fn lease(&self, topic: &str, limit: usize, ack_deadline: Duration) -> Result<Vec<LeasedTask>, QueueError>;

    /// Deletes a delivered task
    async fn ack(&self, id: Uuid) -> Result<(), QueueError>;

    /// Releases a lease; the task becomes due again after `retry_after`
    async fn nack(&self, id: Uuid, retry_after: Duration) -> Result<(), QueueError>;

    /// Deletes pending tasks of one topic, or of every topic; in-flight tasks are kept
    async fn purge(&self, topic: Option<&str>) -> Result<u64, QueueError>;

    async fn health(&self) -> Result<QueueHealth, QueueError>;
}

/// Typed front of the task queue used by the services
#[derive(Clone)]
pub struct Dispatcher {
    queue: Arc<dyn TaskQueue>,
}

impl Dispatcher {
    pub fn new(queue: Arc<dyn TaskQueue>) -> Self {
        Self { queue }
    }

    pub fn queue(&self) -> Arc<dyn TaskQueue> {
        Arc::clone(&self.queue)
    }

    /// Enqueues one job step
    pub async fn dispatch_task(&self, message: &TaskMessage, delay: Duration) -> Result<Uuid, QueueError> {
        let payload = serde_json::to_value(message)?;
        let id = self.queue.enqueue(START_TASK.name, payload, delay).await?;
        tracing::debug!(
            task_id = %id,
            job_id = %message.job_id,
            sequence = message.sequence,
            worker = %message.worker_class,
            delay_secs = delay.as_secs(),
            "Task enqueued"
        );
        Ok(id)
    }

    pub async fn request_start(&self, message: &StartPipelinesMessage) -> Result<Uuid, QueueError> {
        let payload = serde_json::to_value(message)?;
        self.queue.enqueue(START_PIPELINE.name, payload, Duration::ZERO).await
    }

    /// Asks for every pipeline due this minute to be started
    pub async fn request_scheduled_start(&self) -> Result<Uuid, QueueError> {
        self.request_start(&StartPipelinesMessage {
            scheduled: true,
            pipeline_ids: Vec::new(),
        })
        .await
    }

    pub async fn purge_all(&self) -> Result<u64, QueueError> {
        self.queue.purge(None).await
    }

    pub async fn health(&self) -> Result<QueueHealth, QueueError> {
        self.queue.health().await
    }
}
