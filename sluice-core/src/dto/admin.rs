//! Administrative DTOs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Queue health as reported to operators
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TasksInfo {
    pub oldest_pending_task_timestamp: Option<DateTime<Utc>>,
    pub in_flight_count: u64,
}

/// Records forced back to idle by a status reset
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResetReport {
    pub pipelines: u64,
    pub jobs: u64,
}

impl ResetReport {
    pub fn is_noop(&self) -> bool {
        self.pipelines == 0 && self.jobs == 0
    }
}

/// Pending tasks discarded by a purge
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClearTasksReport {
    pub purged: u64,
}
