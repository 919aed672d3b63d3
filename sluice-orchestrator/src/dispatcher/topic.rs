//! Queue topics
//!
//! Each topic has exactly one push subscriber: an orchestrator endpoint.

use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Topic {
    pub name: &'static str,
    pub push_path: &'static str,
    /// Lease length of a delivery; an unacknowledged task is redelivered after it
    pub ack_deadline: Duration,
    pub min_backoff: Duration,
    pub max_backoff: Duration,
}

/// Job steps
pub const START_TASK: Topic = Topic {
    name: "start-task",
    push_path: "/push/start-task",
    ack_deadline: Duration::from_secs(600),
    min_backoff: Duration::from_secs(60),
    max_backoff: Duration::from_secs(600),
};

/// Manual and scheduled pipeline starts
pub const START_PIPELINE: Topic = Topic {
    name: "start-pipeline",
    push_path: "/push/start-pipeline",
    ack_deadline: Duration::from_secs(60),
    min_backoff: Duration::from_secs(10),
    max_backoff: Duration::from_secs(600),
};

pub const ALL_TOPICS: [Topic; 2] = [START_TASK, START_PIPELINE];

impl Topic {
    /// Redelivery delay after the `attempt`-th failed delivery (1-based)
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.min_backoff
            .saturating_mul(1u32 << exponent)
            .min(self.max_backoff)
    }
}
