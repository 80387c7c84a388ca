//! Scheduling and self-healing logic for Stratum.
//!
//! Depends only on `stratum-types`. Step bodies arrive as `StepWork`
//! implementations; this crate never performs I/O on their behalf beyond
//! reading workflow files.

pub mod event;
pub mod healing;
pub mod workflow;
