//! Shared domain types for Stratum.
//!
//! This crate contains the data model shared by the engine, the infrastructure
//! adapters and the CLI: workflow definitions, execution state, failure
//! analysis, recovery plans, events and configuration.
//!
//! Zero infrastructure dependencies -- only serde, serde_json, uuid, chrono.

pub mod config;
pub mod event;
pub mod healing;
pub mod workflow;
