//! Recovery planning and per-step fallbacks.
//!
//! A plan is derived from the failure category alone through the configured
//! `RecoveryPolicy`; the step name only shapes the action descriptions.

use std::sync::Arc;

use dashmap::DashMap;
use serde_json::Value;
use stratum_types::config::RecoveryPolicy;
use stratum_types::healing::{ErrorCategory, FailureContext, RecoveryPlan, RecoveryStrategy};

use crate::workflow::work::{BoxStepWork, StepError, StepWork};

/// Chooses recovery strategies and holds registered fallbacks.
#[derive(Debug, Default)]
pub struct RecoveryPlanner {
    policy: RecoveryPolicy,
    fallbacks: DashMap<String, Arc<BoxStepWork>>,
}

impl RecoveryPlanner {
    /// Planner with the built-in policy table.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_policy(policy: RecoveryPolicy) -> Self {
        Self {
            policy,
            fallbacks: DashMap::new(),
        }
    }

    pub fn policy(&self) -> &RecoveryPolicy {
        &self.policy
    }

    pub fn plan_recovery(
        &self,
        step_name: &str,
        category: ErrorCategory,
        context: Option<&FailureContext>,
    ) -> RecoveryPlan {
        let rule = self.policy.rule_for(category);
        let plan = RecoveryPlan {
            strategy: rule.strategy,
            steps: action_steps(step_name, category, rule.strategy),
            max_attempts: rule.max_attempts,
            escalation_enabled: rule.escalation_enabled,
        };

        tracing::debug!(
            step = step_name,
            execution_id = context.map(|c| c.execution_id.as_str()),
            category = %category,
            strategy = %plan.strategy,
            max_attempts = plan.max_attempts,
            "planned recovery"
        );
        plan
    }

    /// Register (or replace) the fallback for `step_name`.
    pub fn register_fallback<W: StepWork + 'static>(&self, step_name: impl Into<String>, work: W) {
        self.fallbacks
            .insert(step_name.into(), Arc::new(BoxStepWork::new(work)));
    }

    pub fn has_fallback(&self, step_name: &str) -> bool {
        self.fallbacks.contains_key(step_name)
    }

    /// Run the fallback for `step_name`. `Ok(None)` when none is registered.
    pub async fn execute_fallback(&self, step_name: &str) -> Result<Option<Value>, StepError> {
        let work = self
            .fallbacks
            .get(step_name)
            .map(|entry| Arc::clone(entry.value()));

        match work {
            Some(work) => {
                tracing::info!(step = step_name, "running fallback");
                work.run().await.map(Some)
            }
            None => {
                tracing::debug!(step = step_name, "no fallback registered");
                Ok(None)
            }
        }
    }
}

/// Human-readable actions for a plan.
fn action_steps(step_name: &str, category: ErrorCategory, strategy: RecoveryStrategy) -> Vec<String> {
    match (strategy, category) {
        (RecoveryStrategy::Retry, ErrorCategory::Timeout) => vec![
            format!("Increase timeout for {step_name}"),
            format!("Retry {step_name} with backoff"),
        ],
        (RecoveryStrategy::Retry, ErrorCategory::ResourceExhausted) => vec![
            "Wait for resource availability".to_string(),
            format!("Retry {step_name}"),
        ],
        (RecoveryStrategy::Retry, _) => vec![format!("Retry {step_name} with backoff")],
        (RecoveryStrategy::Skip, ErrorCategory::InvalidInput) => vec![
            format!("Validate input for {step_name}"),
            format!("Skip {step_name} or use default"),
        ],
        (RecoveryStrategy::Skip, _) => vec![format!("Skip {step_name} or use default")],
        (RecoveryStrategy::Fallback, _) => vec![format!("Run registered fallback for {step_name}")],
        (RecoveryStrategy::Escalate, _) => vec!["Notify administrator".to_string()],
    }
}
