//! Failure classification and recovery planning.

pub mod analyzer;
pub mod recovery;
