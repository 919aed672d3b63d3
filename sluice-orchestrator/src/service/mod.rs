//! Service Module
//!
//! Business logic layer for the orchestrator.
//! Services orchestrate between repositories and the dispatcher and own every
//! pipeline and job status transition.

pub mod job;
pub mod log;
pub mod pipeline;
pub mod recovery;
pub mod runner;
pub mod schedule;

#[cfg(test)]
mod properties;

// Re-export for convenience
pub use job as job_service;
pub use log as log_service;
pub use pipeline as pipeline_service;
pub use recovery as recovery_service;
pub use runner as runner_service;
pub use schedule as schedule_service;
