//! Stratum command-line entry point.
//!
//! Binary name: `stratum`
//!
//! Parses CLI arguments, sets up tracing and the engine configuration, then
//! dispatches to the command handler.

mod cli;

use clap::Parser;
use clap_complete::generate;
use stratum_infra::config::load_engine_config_or_default;
use stratum_observe::tracing_setup::{TracingOptions, init_tracing, shutdown_tracing};

use cli::{Cli, Commands};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Shell completions don't need tracing or config
    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = <Cli as clap::CommandFactory>::command();
        generate(*shell, &mut cmd, "stratum", &mut std::io::stdout());
        return Ok(());
    }

    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "warn",
        1 => "info,stratum_core=debug",
        _ => "trace",
    };
    init_tracing(&TracingOptions {
        default_filter: filter.to_string(),
        json: cli.json,
        enable_otel: cli.otel,
    })
    .map_err(|e| anyhow::anyhow!("failed to initialize tracing: {e}"))?;

    let config = load_engine_config_or_default(cli.config.as_deref()).await;

    let result = match cli.command {
        Commands::Plan { file } => cli::plan::plan(&config, &file, cli.json),
        Commands::Run {
            file,
            resume_from,
            fail,
            delay_ms,
        } => {
            let args = cli::run::RunArgs {
                file,
                resume_from,
                fail,
                delay_ms,
            };
            cli::run::run(&config, args, cli.json, cli.quiet).await
        }
        Commands::Classify { message, step } => {
            cli::classify::classify(&config, &message, step.as_deref(), cli.json)
        }
        Commands::Completions { .. } => unreachable!("handled above"),
    };

    shutdown_tracing();
    result
}
