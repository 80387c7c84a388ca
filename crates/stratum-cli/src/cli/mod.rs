//! CLI command definitions for the `stratum` binary.

pub mod classify;
pub mod plan;
pub mod run;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use clap_complete::Shell;

/// Run dependency-ordered workflows with self-healing recovery.
#[derive(Parser)]
#[command(name = "stratum", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output machine-readable JSON instead of styled text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress all output except errors.
    #[arg(long, global = true)]
    pub quiet: bool,

    /// Detailed output (-v for verbose, -vv for debug/trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Export tracing spans through OpenTelemetry (stdout exporter).
    #[arg(long, global = true)]
    pub otel: bool,

    /// Engine config file (defaults to ~/.stratum/config.toml).
    #[arg(long, global = true, env = "STRATUM_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show the level-by-level execution plan of a workflow file.
    Plan {
        /// Path to a workflow YAML file.
        file: PathBuf,
    },

    /// Run a workflow file with simulated step bodies.
    Run {
        /// Path to a workflow YAML file.
        file: PathBuf,

        /// Start at the level containing this step.
        #[arg(long)]
        resume_from: Option<String>,

        /// Make a step fail with a message (STEP=MESSAGE, repeatable).
        #[arg(long, value_name = "STEP=MESSAGE")]
        fail: Vec<String>,

        /// Simulated work time per step attempt, in milliseconds.
        #[arg(long, default_value_t = 100)]
        delay_ms: u64,
    },

    /// Classify an error message and show the recovery plan it would get.
    Classify {
        /// The failure message to classify.
        message: String,

        /// Step name used in the plan's action descriptions.
        #[arg(long)]
        step: Option<String>,
    },

    /// Generate shell completions.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
}
