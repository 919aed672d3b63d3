//! Core domain types
//!
//! This module contains the domain structures shared by the orchestrator
//! (which persists them and drives their state machines) and the worker
//! crate (which only ever sees them through a task message).

pub mod job;
pub mod log;
pub mod pipeline;
pub mod task;

/// A status string read back from storage did not match any known variant.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown status '{0}'")]
pub struct UnknownStatus(pub String);
