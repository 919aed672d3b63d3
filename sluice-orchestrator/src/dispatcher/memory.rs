//! In-memory task queue

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use uuid::Uuid;

use super::{LeasedTask, QueueError, QueueHealth, TaskQueue};

/// A task as stored, leased or not
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedTask {
    pub id: Uuid,
    pub topic: String,
    pub payload: JsonValue,
    pub enqueued_at: DateTime<Utc>,
    pub visible_at: DateTime<Utc>,
    pub leased_until: Option<DateTime<Utc>>,
    pub delivery_attempt: u32,
}

impl QueuedTask {
    fn is_in_flight(&self, now: DateTime<Utc>) -> bool {
        self.leased_until.is_some_and(|until| until > now)
    }
}

#[derive(Default)]
pub struct InMemoryTaskQueue {
    tasks: Mutex<Vec<QueuedTask>>,
}

fn later(now: DateTime<Utc>, by: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(by)
        .ok()
        .and_then(|d| now.checked_add_signed(d))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

impl InMemoryTaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<QueuedTask>> {
        self.tasks.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Every stored task in enqueue order
    pub fn snapshot(&self) -> Vec<QueuedTask> {
        self.lock().clone()
    }
}

#[async_trait]
impl TaskQueue for InMemoryTaskQueue {
    async fn enqueue(&self, topic: &str, payload: JsonValue, delay: Duration) -> Result<Uuid, QueueError> {
        let now = Utc::now();
        let task = QueuedTask {
            id: Uuid::new_v4(),
            topic: topic.to_string(),
            payload,
            enqueued_at: now,
            visible_at: later(now, delay),
            leased_until: None,
            delivery_attempt: 0,
        };
        let id = task.id;
        self.lock().push(task);
        Ok(id)
    }

    async fn lease(&self, topic: &str, limit: usize, ack_deadline: Duration) -> Result<Vec<LeasedTask>, QueueError> {
        let now = Utc::now();
        let mut tasks = self.lock();
        let mut due: Vec<&mut QueuedTask> = tasks
            .iter_mut()
            .filter(|t| t.topic == topic && t.visible_at <= now && !t.is_in_flight(now))
            .collect();
        due.sort_by_key(|t| t.visible_at);

        Ok(due
            .into_iter()
            .take(limit)
            .map(|task| {
                task.leased_until = Some(later(now, ack_deadline));
                task.delivery_attempt += 1;
                LeasedTask {
                    id: task.id,
                    topic: task.topic.clone(),
                    payload: task.payload.clone(),
                    enqueued_at: task.enqueued_at,
                    delivery_attempt: task.delivery_attempt,
                }
            })
            .collect())
    }

    async fn ack(&self, id: Uuid) -> Result<(), QueueError> {
        self.lock().retain(|t| t.id != id);
        Ok(())
    }

    async fn nack(&self, id: Uuid, retry_after: Duration) -> Result<(), QueueError> {
        let now = Utc::now();
        if let Some(task) = self.lock().iter_mut().find(|t| t.id == id) {
            task.leased_until = None;
            task.visible_at = later(now, retry_after);
        }
        Ok(())
    }

    async fn purge(&self, topic: Option<&str>) -> Result<u64, QueueError> {
        let now = Utc::now();
        let mut tasks = self.lock();
        let before = tasks.len();
        tasks.retain(|t| t.is_in_flight(now) || topic.is_some_and(|name| t.topic != name));
        Ok((before - tasks.len()) as u64)
    }

    async fn health(&self) -> Result<QueueHealth, QueueError> {
        let now = Utc::now();
        let tasks = self.lock();
        Ok(QueueHealth {
            oldest_pending_enqueued_at: tasks
                .iter()
                .filter(|t| !t.is_in_flight(now))
                .map(|t| t.enqueued_at)
                .min(),
            in_flight_count: tasks.iter().filter(|t| t.is_in_flight(now)).count() as u64,
        })
    }
}
