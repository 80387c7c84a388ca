//! Workflow orchestration: definitions, scheduling, step execution.
//!
//! - `definition` -- YAML parsing, validation, filesystem load
//! - `dag` -- level computation by stratification, cycle reporting
//! - `work` -- step work-unit trait and its type-erased wrapper
//! - `step_executor` -- timeout, retry with backoff, result validation
//! - `engine` -- registries, level-by-level execution, recovery routing

pub mod dag;
pub mod definition;
pub mod engine;
pub mod step_executor;
pub mod work;
