//! Sluice Core
//!
//! Core types and abstractions for the Sluice pipeline orchestrator.
//!
//! This crate contains:
//! - Domain types: Pipelines, jobs, task messages and log entries
//! - DTOs: Data transfer objects for the orchestrator HTTP surface
//! - Graph: start-condition evaluation and pipeline status aggregation
//! - Schedule: cron evaluation for scheduled pipeline starts

pub mod domain;
pub mod dto;
pub mod graph;
pub mod schedule;
