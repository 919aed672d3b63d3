//! Bounded local wait loop for long-running external operations
//!
//! A worker wrapping a slow external job polls it locally for at most
//! `safety_threshold`. If the operation is still pending after that, the
//! loop hands back a checkpoint and the worker respawns itself as a
//! continuation task instead of blocking its execution context any longer.

use sluice_core::domain::task::Checkpoint;
use std::future::Future;
use std::time::Duration;

use crate::worker::WorkerError;

/// Poll spacing and respawn limits
#[derive(Debug, Clone, PartialEq)]
pub struct PollSchedule {
    /// Sleep before the first poll of an execution
    pub initial_delay: Duration,
    /// Poll spacing, indexed by elapsed local minutes and capped at the last entry
    pub steps: Vec<Duration>,
    /// Local wait after which the loop stops and asks for a respawn
    pub safety_threshold: Duration,
    /// Delay of the continuation task
    pub repoll_interval: Duration,
    /// Give up on the operation once this much time has passed across respawns
    pub max_total_wait: Option<Duration>,
}

impl Default for PollSchedule {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(5),
            steps: [5, 10, 15, 20, 30].into_iter().map(Duration::from_secs).collect(),
            safety_threshold: Duration::from_secs(300),
            repoll_interval: Duration::from_secs(300),
            max_total_wait: None,
        }
    }
}

impl PollSchedule {
    /// Spacing for the next poll and the cursor it corresponds to
    fn next_delay(&self, cursor: usize, local_elapsed: Duration) -> (Duration, usize) {
        if self.steps.is_empty() {
            return (self.initial_delay, 0);
        }
        let by_elapsed = (local_elapsed.as_secs() / 60) as usize;
        let index = cursor.max(by_elapsed).min(self.steps.len() - 1);
        (self.steps[index], index)
    }
}

/// Result of a bounded wait
#[derive(Debug, Clone, PartialEq)]
pub enum PollResult<T> {
    Ready(T),
    /// Still pending at the safety threshold; resume from this checkpoint
    Pending(Checkpoint),
}

/// Polls until `poll` yields a value or the safety threshold is exceeded
///
/// `poll` returns `Ok(None)` while the operation is still pending. Errors from
/// `poll` abort the loop unchanged, so their fatal/transient classification
/// is preserved.
pub async fn wait_until_done<T, F, Fut>(
    schedule: &PollSchedule,
    mut checkpoint: Checkpoint,
    mut poll: F,
) -> Result<PollResult<T>, WorkerError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>, WorkerError>>,
{
    tokio::time::sleep(schedule.initial_delay).await;
    let mut local = schedule.initial_delay;

    loop {
        if let Some(limit) = schedule.max_total_wait {
            let total = Duration::from_secs(checkpoint.total_wait_secs) + local;
            if total > limit {
                return Err(WorkerError::fatal(format!(
                    "operation {} still pending after {}s",
                    checkpoint.resource,
                    total.as_secs()
                )));
            }
        }

        if let Some(value) = poll().await? {
            return Ok(PollResult::Ready(value));
        }

        if local > schedule.safety_threshold {
            tracing::debug!(
                resource = %checkpoint.resource,
                waited = local.as_secs(),
                "Safety threshold exceeded, handing off to continuation"
            );
            checkpoint.total_wait_secs += (local + schedule.repoll_interval).as_secs();
            return Ok(PollResult::Pending(checkpoint));
        }

        let (delay, cursor) = schedule.next_delay(checkpoint.backoff_cursor, local);
        checkpoint.backoff_cursor = cursor;
        tokio::time::sleep(delay).await;
        local += delay;
    }
}
