//! Execution context for one worker step
//!
//! Carries the identity of the task being executed, the job's parameters,
//! the checkpoint of a resumed long-running operation and a log buffer the
//! job runner drains after execution.

use serde_json::Value as JsonValue;
use sluice_core::domain::log::{LogEntry, LogLevel};
use sluice_core::domain::task::{Checkpoint, TaskMessage};
use std::sync::Mutex;
use uuid::Uuid;

use crate::worker::WorkerError;

/// Error of a failed predecessor handed to a dependent job
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamFailure {
    pub job_id: Uuid,
    pub job_name: String,
    pub error: Option<String>,
}

/// Execution context shared with a worker
pub struct WorkerContext {
    pub pipeline_id: Uuid,
    pub job_id: Uuid,
    pub run_id: Uuid,
    pub sequence: i64,
    pub params: JsonValue,
    checkpoint: Option<Checkpoint>,
    upstream_failures: Vec<UpstreamFailure>,
    log_buffer: Mutex<Vec<LogEntry>>,
}

impl WorkerContext {
    pub fn new(task: &TaskMessage, upstream_failures: Vec<UpstreamFailure>) -> Self {
        Self {
            pipeline_id: task.pipeline_id,
            job_id: task.job_id,
            run_id: task.run_id,
            sequence: task.sequence,
            params: task.params.clone(),
            checkpoint: task.checkpoint.clone(),
            upstream_failures,
            log_buffer: Mutex::new(Vec::new()),
        }
    }

    pub fn checkpoint(&self) -> Option<&Checkpoint> {
        self.checkpoint.as_ref()
    }

    /// Failed predecessors whose start condition asked for their error
    pub fn upstream_failures(&self) -> &[UpstreamFailure] {
        &self.upstream_failures
    }

    /// Required string parameter; missing or mistyped values are fatal
    pub fn param_str(&self, key: &str) -> Result<&str, WorkerError> {
        self.params
            .get(key)
            .and_then(JsonValue::as_str)
            .ok_or_else(|| WorkerError::fatal(format!("missing string parameter '{}'", key)))
    }

    /// Key identifying this job step across redeliveries of the same run
    pub fn idempotency_key(&self) -> String {
        format!("{}:{}", self.run_id, self.job_id)
    }

    pub fn add_log(&self, entry: LogEntry) {
        match entry.level {
            LogLevel::Debug => tracing::debug!(job_id = %self.job_id, "{}", entry.message),
            LogLevel::Info => tracing::info!(job_id = %self.job_id, "{}", entry.message),
            LogLevel::Warning => tracing::warn!(job_id = %self.job_id, "{}", entry.message),
            LogLevel::Error => tracing::error!(job_id = %self.job_id, "{}", entry.message),
        }
        let mut buffer = self.log_buffer.lock().unwrap_or_else(|e| e.into_inner());
        buffer.push(entry);
    }

    pub fn log_debug(&self, message: impl Into<String>) {
        self.add_log(LogEntry::new(LogLevel::Debug, message));
    }

    pub fn log_info(&self, message: impl Into<String>) {
        self.add_log(LogEntry::new(LogLevel::Info, message));
    }

    pub fn log_warning(&self, message: impl Into<String>) {
        self.add_log(LogEntry::new(LogLevel::Warning, message));
    }

    pub fn log_error(&self, message: impl Into<String>) {
        self.add_log(LogEntry::new(LogLevel::Error, message));
    }

    /// Returns all buffered entries and clears the buffer
    pub fn drain_logs(&self) -> Vec<LogEntry> {
        let mut buffer = self.log_buffer.lock().unwrap_or_else(|e| e.into_inner());
        buffer.drain(..).collect()
    }

    #[cfg(test)]
    pub(crate) fn for_test() -> Self {
        Self::with_params(JsonValue::Null, None)
    }

    #[cfg(test)]
    pub(crate) fn with_params(params: JsonValue, checkpoint: Option<Checkpoint>) -> Self {
        let task = TaskMessage {
            pipeline_id: Uuid::new_v4(),
            job_id: Uuid::new_v4(),
            run_id: Uuid::new_v4(),
            sequence: 1,
            worker_class: "Test".to_string(),
            params,
            checkpoint,
            attempt: 0,
        };
        Self::new(&task, Vec::new())
    }
}
