//! Shared application state
//!
//! Cloned into every request handler; everything inside is reference counted.

use sluice_worker::WorkerRegistry;
use std::sync::Arc;
use std::time::Duration;

use crate::dispatcher::Dispatcher;
use crate::repository::Repositories;

/// Job Runner tuning
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub retry_base_delay: Duration,
    pub retry_max_delay: Duration,
    /// Bound on one worker execution
    pub execution_timeout: Duration,
}

impl EngineSettings {
    /// Delay before the retry following `attempt` earlier transient failures
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(16);
        self.retry_base_delay
            .saturating_mul(1u32 << exponent)
            .min(self.retry_max_delay)
    }
}

#[derive(Clone)]
pub struct AppState {
    pub repos: Repositories,
    pub dispatcher: Dispatcher,
    pub workers: Arc<WorkerRegistry>,
    pub settings: Arc<EngineSettings>,
    /// Verification token expected on every push delivery
    pub push_token: Arc<str>,
}

impl AppState {
    pub fn new(
        repos: Repositories,
        dispatcher: Dispatcher,
        workers: WorkerRegistry,
        settings: EngineSettings,
        push_token: impl Into<Arc<str>>,
    ) -> Self {
        Self {
            repos,
            dispatcher,
            workers: Arc::new(workers),
            settings: Arc::new(settings),
            push_token: push_token.into(),
        }
    }
}
