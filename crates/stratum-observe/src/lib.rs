//! Observability setup for Stratum binaries.

pub mod tracing_setup;
