//! `stratum run` -- execute a workflow file with simulated step bodies.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;
use stratum_core::workflow::definition::load_workflow_file;
use stratum_core::workflow::engine::WorkflowEngine;
use stratum_infra::simulated::register_simulated_steps;
use stratum_types::config::EngineConfig;
use stratum_types::event::WorkflowEvent;
use stratum_types::workflow::{ExecutionState, ExecutionStatus, StepStatus, WorkflowDefinition};
use tokio::sync::broadcast;

pub struct RunArgs {
    pub file: PathBuf,
    pub resume_from: Option<String>,
    pub fail: Vec<String>,
    pub delay_ms: u64,
}

pub async fn run(config: &EngineConfig, args: RunArgs, json: bool, quiet: bool) -> Result<()> {
    let definition = load_workflow_file(&args.file)
        .with_context(|| format!("Failed to load workflow from {}", args.file.display()))?;
    let failures = parse_failures(&args.fail, &definition)?;
    tracing::debug!(
        workflow = %definition.name,
        steps = definition.steps.len(),
        simulated_failures = failures.len(),
        "loaded workflow file"
    );

    let engine = WorkflowEngine::new(config);
    register_simulated_steps(
        &engine,
        &definition,
        Duration::from_millis(args.delay_ms),
        &failures,
    );
    engine.register_workflow(definition.clone());

    let printer = (!json && !quiet).then(|| {
        let rx = engine.event_bus().subscribe();
        tokio::spawn(print_events(rx))
    });

    let outcome = engine
        .execute_registered(&definition.name, args.resume_from.as_deref())
        .await;
    let state = match outcome {
        Ok(state) => {
            if let Some(handle) = printer {
                let _ = handle.await;
            }
            state
        }
        Err(e) => {
            if let Some(handle) = printer {
                handle.abort();
            }
            return Err(e).with_context(|| format!("Workflow '{}' could not start", definition.name));
        }
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&state)?);
    } else if !quiet {
        print_summary(&definition, &state);
    }

    if state.status == ExecutionStatus::Failed {
        bail!(
            "Workflow '{}' failed: {}",
            definition.name,
            state.error.as_deref().unwrap_or("unknown error")
        );
    }
    Ok(())
}

/// Parse repeated `STEP=MESSAGE` flags. Every step must exist in `definition`.
fn parse_failures(
    specs: &[String],
    definition: &WorkflowDefinition,
) -> Result<HashMap<String, String>> {
    let mut failures = HashMap::new();
    for spec in specs {
        let Some((step, message)) = spec.split_once('=') else {
            bail!("Invalid --fail value '{spec}': expected STEP=MESSAGE");
        };
        let step = step.trim();
        if definition.step(step).is_none() {
            bail!("Invalid --fail value '{spec}': no step named '{step}'");
        }
        if message.is_empty() {
            bail!("Invalid --fail value '{spec}': message must not be empty");
        }
        failures.insert(step.to_string(), message.to_string());
    }
    Ok(failures)
}

/// Render live events until the run reports a terminal status.
async fn print_events(mut rx: broadcast::Receiver<WorkflowEvent>) {
    loop {
        let event = match rx.recv().await {
            Ok(event) => event,
            Err(broadcast::error::RecvError::Lagged(_)) => continue,
            Err(broadcast::error::RecvError::Closed) => break,
        };

        match &event {
            WorkflowEvent::RunStarted {
                workflow_name,
                levels,
                ..
            } => {
                println!();
                println!(
                    "  {} Running '{}' ({} levels)",
                    style("▶").bold(),
                    style(workflow_name).cyan(),
                    levels
                );
            }
            WorkflowEvent::LevelStarted { level, steps, .. } => {
                println!(
                    "  {}",
                    style(format!("── Level {level}: {} ──", steps.join(", "))).dim()
                );
            }
            WorkflowEvent::StepStarted { .. } => {}
            WorkflowEvent::StepCompleted {
                step_name,
                duration_ms,
                has_result,
                ..
            } => {
                let note = if *has_result { "" } else { " (no result)" };
                println!(
                    "    {} {step_name} {}{note}",
                    style("✓").green(),
                    style(format!("{duration_ms}ms")).dim()
                );
            }
            WorkflowEvent::StepFailed {
                step_name,
                error,
                category,
                ..
            } => {
                println!(
                    "    {} {step_name}: {} [{}]",
                    style("✗").red(),
                    error,
                    style(category).yellow()
                );
            }
            WorkflowEvent::RecoveryPlanned {
                strategy,
                max_attempts,
                ..
            } => {
                println!(
                    "      {} recovery: {} (max attempts {max_attempts})",
                    style("↻").yellow(),
                    style(strategy).bold()
                );
            }
            WorkflowEvent::RunCompleted { .. } | WorkflowEvent::RunFailed { .. } => {}
        }

        if event.terminal_status().is_some() {
            break;
        }
    }
}

fn print_summary(definition: &WorkflowDefinition, state: &ExecutionState) {
    println!();
    let status = match state.status {
        ExecutionStatus::Completed => style(state.status).green(),
        ExecutionStatus::Failed => style(state.status).red(),
        ExecutionStatus::Running => style(state.status).yellow(),
    };
    println!(
        "  Execution {} {}",
        style(&state.execution_id).dim(),
        status.bold()
    );
    if let Some(step) = &state.resumed_from {
        println!("  Resumed from: {}", style(step).cyan());
    }
    if let Some(completed_at) = state.completed_at {
        let elapsed = completed_at - state.started_at;
        println!("  Duration: {}ms", elapsed.num_milliseconds());
    }
    println!();

    let mut table = Table::new();
    table.load_preset(presets::UTF8_FULL_CONDENSED);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec![
        Cell::new("Step").fg(Color::White),
        Cell::new("Status").fg(Color::White),
        Cell::new("Attempts").fg(Color::White),
        Cell::new("Recovery").fg(Color::White),
        Cell::new("Detail").fg(Color::White),
    ]);

    for step in &definition.steps {
        let Some(record) = state.step(&step.name) else {
            table.add_row(vec![
                Cell::new(&step.name).fg(Color::DarkGrey),
                Cell::new("not run").fg(Color::DarkGrey),
                Cell::new("-"),
                Cell::new("-"),
                Cell::new(""),
            ]);
            continue;
        };

        let color = match record.status {
            StepStatus::Completed => Color::Green,
            StepStatus::Skipped => Color::Yellow,
            StepStatus::Failed => Color::Red,
        };
        let mut status = record.status.to_string();
        if record.carried_over {
            status.push_str(" (carried)");
        }
        let detail = match (&record.error, &record.result) {
            (Some(error), _) if !record.status.is_complete() || record.result.is_none() => {
                error.clone()
            }
            (_, Some(result)) => preview(result),
            _ => String::new(),
        };
        table.add_row(vec![
            Cell::new(&step.name).fg(Color::Cyan),
            Cell::new(status).fg(color),
            Cell::new(record.attempts),
            Cell::new(
                record
                    .recovery
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| "-".to_string()),
            ),
            Cell::new(detail).fg(Color::DarkGrey),
        ]);
    }

    println!("{table}");
    if let Some(error) = &state.error {
        println!();
        println!("  {} {}", style("Error:").red().bold(), error);
    }
    println!();
}

fn preview(value: &serde_json::Value) -> String {
    let text = value.to_string();
    if text.chars().count() > 60 {
        let cut: String = text.chars().take(57).collect();
        format!("{cut}...")
    } else {
        text
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stratum_types::workflow::StepDefinition;

    fn pipeline() -> WorkflowDefinition {
        WorkflowDefinition::new(
            "data_pipeline",
            vec![
                StepDefinition::new("extract"),
                StepDefinition::new("transform").depends_on(["extract"]),
            ],
        )
    }

    #[test]
    fn parse_failures_accepts_step_message_pairs() {
        let specs = vec![
            "transform=Invalid data".to_string(),
            "extract=Connection refused: host=db".to_string(),
        ];
        let failures = parse_failures(&specs, &pipeline()).unwrap();
        assert_eq!(failures["transform"], "Invalid data");
        // Only the first '=' separates step from message.
        assert_eq!(failures["extract"], "Connection refused: host=db");
    }

    #[test]
    fn parse_failures_rejects_unknown_step() {
        let err = parse_failures(&["load=boom".to_string()], &pipeline()).unwrap_err();
        assert!(err.to_string().contains("no step named 'load'"));
    }

    #[test]
    fn parse_failures_rejects_missing_separator() {
        assert!(parse_failures(&["transform".to_string()], &pipeline()).is_err());
        assert!(parse_failures(&["transform=".to_string()], &pipeline()).is_err());
    }

    #[test]
    fn preview_truncates_long_values() {
        let long = serde_json::json!({ "data": "x".repeat(100) });
        let text = preview(&long);
        assert!(text.ends_with("..."));
        assert_eq!(text.chars().count(), 60);
        assert_eq!(preview(&serde_json::json!(1)), "1");
    }
}
