//! `stratum classify` -- show how a failure message would be handled.

use anyhow::Result;
use console::style;
use stratum_core::healing::analyzer::ErrorAnalyzer;
use stratum_core::healing::recovery::RecoveryPlanner;
use stratum_types::config::EngineConfig;
use stratum_types::healing::RecoveryStrategy;

pub fn classify(config: &EngineConfig, message: &str, step: Option<&str>, json: bool) -> Result<()> {
    let analyzer = ErrorAnalyzer::from_config(&config.analyzer);
    let planner = RecoveryPlanner::with_policy(config.recovery.clone());

    let step_name = step.unwrap_or("step");
    let analysis = analyzer.analyze(message, None);
    let plan = planner.plan_recovery(step_name, analysis.category, None);

    if json {
        let result = serde_json::json!({
            "analysis": analysis,
            "plan": plan,
        });
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(());
    }

    println!();
    println!("  {}", style("── Analysis ──").dim());
    println!("  Category:   {}", style(analysis.category).bold());
    println!("  Confidence: {:.1}", analysis.confidence);
    println!("  Root cause: {}", style(&analysis.root_cause).dim());
    for recommendation in &analysis.recommendations {
        println!("    - {recommendation}");
    }
    println!();

    let strategy = match plan.strategy {
        RecoveryStrategy::Retry | RecoveryStrategy::Fallback => style(plan.strategy).yellow(),
        RecoveryStrategy::Skip => style(plan.strategy).cyan(),
        RecoveryStrategy::Escalate => style(plan.strategy).red(),
    };
    println!("  {}", style("── Recovery ──").dim());
    println!("  Strategy:     {}", strategy.bold());
    println!("  Max attempts: {}", plan.max_attempts);
    println!(
        "  Escalation:   {}",
        if plan.escalation_enabled { "enabled" } else { "disabled" }
    );
    for (i, action) in plan.steps.iter().enumerate() {
        println!("    {}. {action}", i + 1);
    }
    println!();
    Ok(())
}
