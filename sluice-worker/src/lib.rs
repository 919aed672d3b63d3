//! Sluice Worker
//!
//! The contract between the orchestrator's job runner and the code that
//! actually performs a job's work.
//!
//! This crate contains:
//! - `Worker`: one step of work, classified into done/continue/fatal/transient
//! - `WorkerContext`: identity of the step being executed plus a log sink
//! - `WorkerRegistry`: name to factory lookup for job configurations
//! - Long-poll helpers: the bounded local wait loop and the respawn protocol
//!   for workers wrapping slow external operations
//! - Built-in workers

pub mod context;
pub mod external;
pub mod long_poll;
pub mod registry;
pub mod worker;
pub mod workers;

pub use context::WorkerContext;
pub use external::{ExternalOperation, LongRunningWorker, OperationState, WaiterWorker};
pub use long_poll::{PollResult, PollSchedule, wait_until_done};
pub use registry::WorkerRegistry;
pub use worker::{Continuation, Outcome, Step, Worker, WorkerError};
