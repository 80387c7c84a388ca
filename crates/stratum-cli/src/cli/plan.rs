//! `stratum plan` -- show the execution levels of a workflow file.

use std::path::Path;

use anyhow::{Context, Result};
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;
use stratum_core::workflow::definition::load_workflow_file;
use stratum_core::workflow::engine::WorkflowEngine;
use stratum_types::config::EngineConfig;

pub fn plan(config: &EngineConfig, file: &Path, json: bool) -> Result<()> {
    let definition = load_workflow_file(file)
        .with_context(|| format!("Failed to load workflow from {}", file.display()))?;
    let engine = WorkflowEngine::new(config);
    let levels = engine
        .execution_order(&definition)
        .with_context(|| format!("Workflow '{}' has no valid execution order", definition.name))?;

    if json {
        let result = serde_json::json!({
            "workflow": definition.name,
            "version": definition.version,
            "levels": levels,
        });
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(());
    }

    println!();
    println!(
        "  Plan for '{}' ({} steps, {} levels)",
        style(&definition.name).cyan(),
        definition.steps.len(),
        levels.len(),
    );
    if let Some(description) = &definition.description {
        println!("  {}", style(description).dim());
    }
    println!();

    let mut table = Table::new();
    table.load_preset(presets::UTF8_FULL_CONDENSED);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec![
        Cell::new("Level").fg(Color::White),
        Cell::new("Step").fg(Color::White),
        Cell::new("Depends on").fg(Color::White),
        Cell::new("Timeout").fg(Color::White),
        Cell::new("Retries").fg(Color::White),
    ]);

    let defaults = &config.executor;
    for (index, level) in levels.iter().enumerate() {
        for name in level {
            let Some(step) = definition.step(name) else {
                continue;
            };
            let deps = if step.depends_on.is_empty() {
                "-".to_string()
            } else {
                step.depends_on.join(", ")
            };
            let timeout = step.timeout_secs.unwrap_or(defaults.base_timeout_secs);
            let retries = step.retries.unwrap_or(defaults.max_retries);
            table.add_row(vec![
                Cell::new(index),
                Cell::new(name).fg(Color::Cyan),
                Cell::new(deps).fg(Color::DarkGrey),
                Cell::new(format!("{timeout}s")),
                Cell::new(retries),
            ]);
        }
    }

    println!("{table}");
    println!();
    Ok(())
}
