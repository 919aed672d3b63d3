//! Sluice orchestrator
//!
//! Stores pipeline definitions, drives their job graphs and dispatches job
//! steps through a push-delivered task queue.

pub mod api;
pub mod config;
pub mod db;
pub mod dispatcher;
pub mod repository;
pub mod service;
pub mod state;

#[cfg(test)]
pub(crate) mod testing;
