//! Delivery pump
//!
//! Leases due tasks topic by topic and pushes each one to its subscriber
//! endpoint. A 2xx answer acknowledges the task; anything else, including a
//! timeout at the topic's ack deadline, schedules a redelivery with backoff.

use sluice_core::domain::task::PushEnvelope;
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::{self, Duration};
use tracing::{debug, error, info, warn};

use super::{ALL_TOPICS, LeasedTask, QueueError, TaskQueue, Topic};
use crate::config::Config;

pub struct DeliveryPump {
    queue: Arc<dyn TaskQueue>,
    http: reqwest::Client,
    push_base_url: String,
    push_token: String,
    poll_interval: Duration,
    semaphore: Arc<Semaphore>,
}

impl DeliveryPump {
    pub fn new(queue: Arc<dyn TaskQueue>, config: &Config) -> Self {
        Self {
            queue,
            http: reqwest::Client::new(),
            push_base_url: config.push_base_url.trim_end_matches('/').to_string(),
            push_token: config.push_token.clone(),
            poll_interval: config.delivery_poll_interval,
            semaphore: Arc::new(Semaphore::new(config.max_concurrent_deliveries)),
        }
    }

    /// Starts one delivery loop per topic
    pub fn spawn(self: Arc<Self>) -> Vec<JoinHandle<()>> {
        ALL_TOPICS
            .into_iter()
            .map(|topic| {
                let pump = Arc::clone(&self);
                tokio::spawn(async move { pump.run(topic).await })
            })
            .collect()
    }

    async fn run(&self, topic: Topic) {
        info!(
            topic = topic.name,
            "Starting delivery loop (interval: {:?})", self.poll_interval
        );

        let mut interval = time::interval(self.poll_interval);
        interval.set_missed_tick_behavior(time::MissedTickBehavior::Skip);

        loop {
            interval.tick().await;

            match self.deliver_due(topic).await {
                Ok(handles) if !handles.is_empty() => {
                    debug!(topic = topic.name, "Pushing {} task(s)", handles.len());
                }
                Ok(_) => {}
                Err(e) => error!(topic = topic.name, "Failed to lease tasks: {}", e),
            }
        }
    }

    /// Leases as many due tasks as there are free delivery slots and starts
    /// pushing them; the returned handles finish once each push is settled
    pub async fn deliver_due(&self, topic: Topic) -> Result<Vec<JoinHandle<()>>, QueueError> {
        let mut permits = Vec::new();
        while let Ok(permit) = Arc::clone(&self.semaphore).try_acquire_owned() {
            permits.push(permit);
        }
        if permits.is_empty() {
            debug!(topic = topic.name, "All delivery slots busy");
            return Ok(Vec::new());
        }

        let leased = self.queue.lease(topic.name, permits.len(), topic.ack_deadline).await?;

        // unused permits are released when `permits` drops
        Ok(leased
            .into_iter()
            .zip(permits.drain(..))
            .map(|(task, permit)| self.spawn_push(topic, task, permit))
            .collect())
    }

    fn spawn_push(&self, topic: Topic, task: LeasedTask, permit: OwnedSemaphorePermit) -> JoinHandle<()> {
        let queue = Arc::clone(&self.queue);
        let http = self.http.clone();
        let url = format!("{}{}", self.push_base_url, topic.push_path);
        let token = self.push_token.clone();

        tokio::spawn(async move {
            let _permit = permit;
            let task_id = task.id;
            let attempt = task.delivery_attempt;

            let settled = match push(&http, &url, &token, topic, task).await {
                Ok(()) => queue.ack(task_id).await,
                Err(reason) => {
                    let retry_after = topic.backoff(attempt);
                    warn!(
                        topic = topic.name,
                        task_id = %task_id,
                        attempt,
                        "Delivery failed ({}), retrying in {:?}",
                        reason,
                        retry_after
                    );
                    queue.nack(task_id, retry_after).await
                }
            };

            if let Err(e) = settled {
                // the lease expires on its own and the task is redelivered
                error!(task_id = %task_id, "Failed to settle delivery: {}", e);
            }
        })
    }
}

async fn push(http: &reqwest::Client, url: &str, token: &str, topic: Topic, task: LeasedTask) -> Result<(), String> {
    let envelope = PushEnvelope {
        task_id: task.id,
        topic: task.topic,
        delivery_attempt: task.delivery_attempt,
        enqueued_at: task.enqueued_at,
        payload: task.payload,
    };

    let response = http
        .post(url)
        .query(&[("token", token)])
        .timeout(topic.ack_deadline)
        .json(&envelope)
        .send()
        .await
        .map_err(|e| e.to_string())?;

    if response.status().is_success() {
        Ok(())
    } else {
        Err(format!("subscriber answered {}", response.status()))
    }
}
