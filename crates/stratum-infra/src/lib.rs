//! Infrastructure layer for Stratum.
//!
//! Implements the pieces that touch the outside world: the TOML engine config
//! file and simulated step bodies used by drills and the CLI.

pub mod config;
pub mod simulated;
