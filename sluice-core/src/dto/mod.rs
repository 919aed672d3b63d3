//! Data Transfer Objects
//!
//! Request and response bodies of the orchestrator HTTP API, shared by
//! the orchestrator and the client crate.

pub mod admin;
pub mod pipeline;
