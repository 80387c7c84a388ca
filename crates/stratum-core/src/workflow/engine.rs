//! Workflow engine: level-by-level execution with self-healing.
//!
//! The `WorkflowEngine` owns the workflow registry, the step work-unit
//! registry and every execution state it has produced.
//!
//! # Execution flow
//!
//! 1. Compute the level plan via `execution_order` (errors leave no state).
//! 2. Store a `running` `ExecutionState`; carry over earlier records on resume.
//! 3. For each level, spawn every dispatchable step onto a `JoinSet` and join
//!    all of them before the next level starts.
//! 4. Inside each task: run the step through the `StepExecutor`; on failure,
//!    classify with the `ErrorAnalyzer`, plan with the `RecoveryPlanner`, and
//!    apply the plan (retry, fallback, skip, escalate).
//! 5. After the barrier, fold the step outcomes into the state. An escalation
//!    stops the run once the current level has been recorded.

use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use serde_json::Value;
use stratum_types::config::EngineConfig;
use stratum_types::event::WorkflowEvent;
use stratum_types::healing::{FailureContext, RecoveryStrategy};
use stratum_types::workflow::{
    ExecutionId, ExecutionState, ExecutionStatus, StepDefinition, StepRecord, StepStatus,
    WorkflowDefinition,
};
use thiserror::Error;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::Instrument;

use crate::event::bus::EventBus;
use crate::healing::analyzer::ErrorAnalyzer;
use crate::healing::recovery::RecoveryPlanner;

use super::dag::{execution_order, level_of};
use super::definition::WorkflowError;
use super::step_executor::StepExecutor;
use super::work::{BoxStepWork, StepError, StepWork, Validator};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors that prevent a run from starting.
///
/// Failures during a run are recorded in its `ExecutionState` instead.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Workflow(#[from] WorkflowError),
}

// ---------------------------------------------------------------------------
// WorkflowEngine
// ---------------------------------------------------------------------------

/// Orchestrates workflow runs.
pub struct WorkflowEngine {
    workflows: DashMap<String, Arc<WorkflowDefinition>>,
    executions: DashMap<ExecutionId, ExecutionState>,
    steps: DashMap<String, Arc<BoxStepWork>>,
    /// Work units bound to one workflow; consulted before `steps`.
    scoped_steps: DashMap<(String, String), Arc<BoxStepWork>>,
    validators: DashMap<String, Validator>,
    executor: Arc<StepExecutor>,
    analyzer: Arc<ErrorAnalyzer>,
    planner: Arc<RecoveryPlanner>,
    event_bus: EventBus,
}

impl WorkflowEngine {
    pub fn new(config: &EngineConfig) -> Self {
        Self::from_parts(
            StepExecutor::new(config.executor.clone()),
            ErrorAnalyzer::from_config(&config.analyzer),
            RecoveryPlanner::with_policy(config.recovery.clone()),
            EventBus::new(config.events.capacity),
        )
    }

    /// Build an engine from pre-configured components.
    pub fn from_parts(
        executor: StepExecutor,
        analyzer: ErrorAnalyzer,
        planner: RecoveryPlanner,
        event_bus: EventBus,
    ) -> Self {
        Self {
            workflows: DashMap::new(),
            executions: DashMap::new(),
            steps: DashMap::new(),
            scoped_steps: DashMap::new(),
            validators: DashMap::new(),
            executor: Arc::new(executor),
            analyzer: Arc::new(analyzer),
            planner: Arc::new(planner),
            event_bus,
        }
    }

    // -- registries ---------------------------------------------------------

    /// Register a workflow definition, replacing any previous one of the same name.
    pub fn register_workflow(&self, definition: WorkflowDefinition) {
        tracing::info!(
            workflow = %definition.name,
            steps = definition.steps.len(),
            "registered workflow"
        );
        self.workflows
            .insert(definition.name.clone(), Arc::new(definition));
    }

    pub fn get_workflow(&self, name: &str) -> Option<Arc<WorkflowDefinition>> {
        self.workflows.get(name).map(|d| Arc::clone(d.value()))
    }

    /// Register the work unit run for every step named `step_name`, in any workflow.
    ///
    /// Step names are only unique within a workflow. Use
    /// `register_workflow_step` when two workflows share a step name but need
    /// different bodies.
    pub fn register_step<W: StepWork + 'static>(&self, step_name: impl Into<String>, work: W) {
        self.steps
            .insert(step_name.into(), Arc::new(BoxStepWork::new(work)));
    }

    /// Register the work unit for `step_name` in `workflow_name` only.
    ///
    /// Takes precedence over a `register_step` entry of the same step name.
    pub fn register_workflow_step<W: StepWork + 'static>(
        &self,
        workflow_name: impl Into<String>,
        step_name: impl Into<String>,
        work: W,
    ) {
        self.scoped_steps.insert(
            (workflow_name.into(), step_name.into()),
            Arc::new(BoxStepWork::new(work)),
        );
    }

    /// Work unit for `step_name` when run as part of `workflow_name`.
    fn work_for(&self, workflow_name: &str, step_name: &str) -> Option<Arc<BoxStepWork>> {
        self.scoped_steps
            .get(&(workflow_name.to_string(), step_name.to_string()))
            .map(|w| Arc::clone(w.value()))
            .or_else(|| self.steps.get(step_name).map(|w| Arc::clone(w.value())))
    }

    /// Register a result validator for `step_name`.
    pub fn register_validator<F>(&self, step_name: impl Into<String>, validator: F)
    where
        F: Fn(&Value) -> bool + Send + Sync + 'static,
    {
        self.validators
            .insert(step_name.into(), Arc::new(validator));
    }

    pub fn executor(&self) -> &StepExecutor {
        &self.executor
    }

    pub fn analyzer(&self) -> &ErrorAnalyzer {
        &self.analyzer
    }

    /// The planner; fallbacks are registered through it.
    pub fn planner(&self) -> &RecoveryPlanner {
        &self.planner
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    // -- queries ------------------------------------------------------------

    /// Level plan for `definition`, as step names.
    pub fn execution_order(
        &self,
        definition: &WorkflowDefinition,
    ) -> Result<Vec<Vec<String>>, EngineError> {
        let levels = execution_order(&definition.steps)?;
        Ok(levels
            .into_iter()
            .map(|level| level.into_iter().map(|s| s.name.clone()).collect())
            .collect())
    }

    /// Snapshot of an execution, or `None` for an unknown id.
    pub fn get_execution_status(&self, execution_id: &ExecutionId) -> Option<ExecutionState> {
        self.executions
            .get(execution_id)
            .map(|state| state.value().clone())
    }

    /// Most recently started execution of `workflow_name`.
    pub fn latest_execution(&self, workflow_name: &str) -> Option<ExecutionState> {
        self.executions
            .iter()
            .filter(|entry| entry.workflow_name == workflow_name)
            .max_by(|a, b| {
                (a.started_at, &a.execution_id).cmp(&(b.started_at, &b.execution_id))
            })
            .map(|entry| entry.value().clone())
    }

    // -- execution ----------------------------------------------------------

    /// Execute `definition`, optionally resuming from `resume_from`.
    pub async fn execute(
        &self,
        definition: &WorkflowDefinition,
        resume_from: Option<&str>,
    ) -> Result<ExecutionState, EngineError> {
        let span = tracing::info_span!("workflow_run", workflow = %definition.name);
        self.run(definition, resume_from).instrument(span).await
    }

    /// Execute a previously registered workflow by name.
    pub async fn execute_registered(
        &self,
        workflow_name: &str,
        resume_from: Option<&str>,
    ) -> Result<ExecutionState, EngineError> {
        let definition = self
            .get_workflow(workflow_name)
            .ok_or_else(|| WorkflowError::UnknownWorkflow(workflow_name.to_string()))?;
        self.execute(&definition, resume_from).await
    }

    async fn run(
        &self,
        definition: &WorkflowDefinition,
        resume_from: Option<&str>,
    ) -> Result<ExecutionState, EngineError> {
        let levels = execution_order(&definition.steps)?;
        let start_level = match resume_from {
            Some(step) => level_of(&levels, step).ok_or_else(|| WorkflowError::UnknownStep {
                workflow: definition.name.clone(),
                step: step.to_string(),
            })?,
            None => 0,
        };

        let execution_id = ExecutionId::generate(&definition.name);
        let mut state = ExecutionState::start(execution_id.clone(), &definition.name);
        state.resumed_from = resume_from.map(str::to_string);

        if start_level > 0 {
            if let Some(prior) = self.latest_execution(&definition.name) {
                for step in levels[..start_level].iter().flatten() {
                    if let Some(record) = prior.steps.get(&step.name) {
                        let mut record = record.clone();
                        record.carried_over = true;
                        state.steps.insert(step.name.clone(), record);
                    }
                }
                tracing::debug!(
                    execution_id = %execution_id,
                    prior = %prior.execution_id,
                    carried = state.steps.len(),
                    "carried over records from prior execution"
                );
            }
        }

        self.executions.insert(execution_id.clone(), state.clone());

        tracing::info!(
            execution_id = %execution_id,
            workflow = %definition.name,
            levels = levels.len(),
            resume_from = resume_from,
            "workflow run started"
        );
        self.event_bus.publish(WorkflowEvent::RunStarted {
            execution_id: execution_id.clone(),
            workflow_name: definition.name.clone(),
            levels: levels.len(),
        });

        let run_started = Instant::now();
        let mut escalation: Option<String> = None;

        for (level_idx, level) in levels.iter().enumerate().skip(start_level) {
            tracing::debug!(
                execution_id = %execution_id,
                level = level_idx,
                steps = level.len(),
                "processing level"
            );
            self.event_bus.publish(WorkflowEvent::LevelStarted {
                execution_id: execution_id.clone(),
                level: level_idx,
                steps: level.iter().map(|s| s.name.clone()).collect(),
            });

            let mut join_set = JoinSet::new();
            let mut dispatched: Vec<String> = Vec::with_capacity(level.len());

            for (position, step) in level.iter().enumerate() {
                if let Some(dep) = failed_dependency(&state, step) {
                    tracing::warn!(
                        execution_id = %execution_id,
                        step = %step.name,
                        dependency = dep,
                        "dependency failed, not dispatching step"
                    );
                    state.steps.insert(
                        step.name.clone(),
                        StepRecord::skipped(format!("dependency '{dep}' did not complete"), 0),
                    );
                    continue;
                }

                let task = StepTask {
                    position,
                    execution_id: execution_id.clone(),
                    workflow_name: definition.name.clone(),
                    step: StepDefinition::clone(step),
                    work: self.work_for(&definition.name, &step.name),
                    validator: self.validators.get(&step.name).map(|v| Arc::clone(v.value())),
                    executor: Arc::clone(&self.executor),
                    analyzer: Arc::clone(&self.analyzer),
                    planner: Arc::clone(&self.planner),
                    event_bus: self.event_bus.clone(),
                };
                let span = tracing::info_span!("step", step = %step.name, level = level_idx);
                dispatched.push(step.name.clone());
                join_set.spawn(task.run().instrument(span));
            }

            // Barrier: every task of the level is joined before moving on.
            let mut outcomes: Vec<StepOutcome> = Vec::with_capacity(dispatched.len());
            let mut join_errors: Vec<String> = Vec::new();
            while let Some(joined) = join_set.join_next().await {
                match joined {
                    Ok(outcome) => outcomes.push(outcome),
                    Err(e) => join_errors.push(e.to_string()),
                }
            }

            for name in &dispatched {
                if outcomes.iter().all(|o| &o.step_name != name) {
                    let err = StepError::Join(
                        join_errors
                            .first()
                            .cloned()
                            .unwrap_or_else(|| "task ended without an outcome".to_string()),
                    );
                    tracing::error!(
                        execution_id = %execution_id,
                        step = %name,
                        error = %err,
                        "step task did not complete"
                    );
                    outcomes.push(StepOutcome {
                        position: usize::MAX,
                        step_name: name.clone(),
                        record: StepRecord::failed(err.to_string(), 0),
                        escalation: Some(err.to_string()),
                    });
                }
            }

            outcomes.sort_by_key(|o| o.position);
            for outcome in outcomes {
                if escalation.is_none() {
                    escalation = outcome.escalation;
                }
                state.steps.insert(outcome.step_name, outcome.record);
            }
            self.executions.insert(execution_id.clone(), state.clone());

            if let Some(error) = &escalation {
                tracing::error!(
                    execution_id = %execution_id,
                    level = level_idx,
                    error = %error,
                    "run escalated, not starting further levels"
                );
                break;
            }
        }

        state.completed_at = Some(Utc::now());
        match escalation {
            Some(error) => {
                state.status = ExecutionStatus::Failed;
                state.error = Some(error.clone());
                self.event_bus.publish(WorkflowEvent::RunFailed {
                    execution_id: execution_id.clone(),
                    error,
                });
            }
            None => {
                state.status = ExecutionStatus::Completed;
                let steps_completed = state
                    .steps
                    .values()
                    .filter(|r| r.status.is_complete())
                    .count();
                let duration_ms = run_started.elapsed().as_millis() as u64;
                tracing::info!(
                    execution_id = %execution_id,
                    workflow = %definition.name,
                    duration_ms,
                    steps_completed,
                    "workflow run completed"
                );
                self.event_bus.publish(WorkflowEvent::RunCompleted {
                    execution_id: execution_id.clone(),
                    duration_ms,
                    steps_completed,
                });
            }
        }

        self.executions.insert(execution_id, state.clone());
        Ok(state)
    }
}

impl Default for WorkflowEngine {
    fn default() -> Self {
        Self::new(&EngineConfig::default())
    }
}

impl std::fmt::Debug for WorkflowEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowEngine")
            .field("workflows", &self.workflows.len())
            .field("executions", &self.executions.len())
            .field("steps", &(self.steps.len() + self.scoped_steps.len()))
            .finish_non_exhaustive()
    }
}

/// First dependency of `step` recorded as failed in `state`.
///
/// Dependencies without a record (levels skipped by a resume with no prior
/// execution) do not block.
fn failed_dependency<'a>(state: &ExecutionState, step: &'a StepDefinition) -> Option<&'a str> {
    step.depends_on
        .iter()
        .find(|dep| {
            state
                .steps
                .get(dep.as_str())
                .is_some_and(|r| r.status == StepStatus::Failed)
        })
        .map(String::as_str)
}

// ---------------------------------------------------------------------------
// Per-step task
// ---------------------------------------------------------------------------

/// Everything one spawned step needs, owned so the task is `'static`.
struct StepTask {
    position: usize,
    execution_id: ExecutionId,
    workflow_name: String,
    step: StepDefinition,
    work: Option<Arc<BoxStepWork>>,
    validator: Option<Validator>,
    executor: Arc<StepExecutor>,
    analyzer: Arc<ErrorAnalyzer>,
    planner: Arc<RecoveryPlanner>,
    event_bus: EventBus,
}

/// What a step task hands back across the barrier.
struct StepOutcome {
    position: usize,
    step_name: String,
    record: StepRecord,
    /// Set when this step's failure must fail the run.
    escalation: Option<String>,
}

impl StepTask {
    async fn run(self) -> StepOutcome {
        let started = Instant::now();
        self.event_bus.publish(WorkflowEvent::StepStarted {
            execution_id: self.execution_id.clone(),
            step_name: self.step.name.clone(),
        });

        let (first, mut attempts) = self.invoke().await;
        let error = match first {
            Ok(result) => return self.finish(StepRecord::completed(result, attempts), None, started),
            Err(e) => e.to_string(),
        };

        let context = FailureContext {
            workflow_name: self.workflow_name.clone(),
            execution_id: self.execution_id.clone(),
            step_name: self.step.name.clone(),
            attempts,
        };
        let analysis = self.analyzer.analyze(&error, Some(&context));
        tracing::warn!(
            execution_id = %self.execution_id,
            step = %self.step.name,
            category = %analysis.category,
            error = %error,
            "step failed"
        );
        self.event_bus.publish(WorkflowEvent::StepFailed {
            execution_id: self.execution_id.clone(),
            step_name: self.step.name.clone(),
            error: error.clone(),
            category: analysis.category,
        });

        let plan = self
            .planner
            .plan_recovery(&self.step.name, analysis.category, Some(&context));
        tracing::warn!(
            execution_id = %self.execution_id,
            step = %self.step.name,
            strategy = %plan.strategy,
            max_attempts = plan.max_attempts,
            "applying recovery plan"
        );
        self.event_bus.publish(WorkflowEvent::RecoveryPlanned {
            execution_id: self.execution_id.clone(),
            step_name: self.step.name.clone(),
            strategy: plan.strategy,
            max_attempts: plan.max_attempts,
        });

        match plan.strategy {
            RecoveryStrategy::Retry => {
                let mut last_error = error;
                for retry in 0..plan.max_attempts {
                    tracing::debug!(
                        execution_id = %self.execution_id,
                        step = %self.step.name,
                        retry,
                        "re-invoking step"
                    );
                    let (outcome, made) = self.invoke().await;
                    attempts += made;
                    match outcome {
                        Ok(result) => {
                            let mut record = StepRecord::completed(result, attempts)
                                .with_recovery(RecoveryStrategy::Retry);
                            record.error = Some(last_error);
                            return self.finish(record, None, started);
                        }
                        Err(e) => last_error = e.to_string(),
                    }
                }
                let escalation = plan.escalation_enabled.then(|| last_error.clone());
                let record = StepRecord::failed(last_error, attempts)
                    .with_recovery(RecoveryStrategy::Retry);
                self.finish(record, escalation, started)
            }
            RecoveryStrategy::Fallback => {
                let fallback = self.planner.execute_fallback(&self.step.name).await;
                match fallback {
                    Ok(result) => {
                        let mut record = StepRecord::completed(result, attempts)
                            .with_recovery(RecoveryStrategy::Fallback);
                        record.error = Some(error);
                        self.finish(record, None, started)
                    }
                    Err(e) => {
                        let message = e.to_string();
                        let escalation = plan.escalation_enabled.then(|| message.clone());
                        let record = StepRecord::failed(message, attempts)
                            .with_recovery(RecoveryStrategy::Fallback);
                        self.finish(record, escalation, started)
                    }
                }
            }
            RecoveryStrategy::Skip => {
                let record =
                    StepRecord::skipped(error, attempts).with_recovery(RecoveryStrategy::Skip);
                self.finish(record, None, started)
            }
            RecoveryStrategy::Escalate => {
                let record = StepRecord::failed(error.clone(), attempts)
                    .with_recovery(RecoveryStrategy::Escalate);
                self.finish(record, Some(error), started)
            }
        }
    }

    /// One executor invocation. Returns the outcome and the attempts it made.
    async fn invoke(&self) -> (Result<Option<Value>, StepError>, u32) {
        let Some(work) = &self.work else {
            return (Err(StepError::NoWorkUnit(self.step.name.clone())), 0);
        };

        let limits = self.executor.limits_for(&self.step);
        let invocation = self
            .executor
            .invoke(&self.step.name, limits, &**work, self.validator.as_ref())
            .await;
        (invocation.outcome, invocation.attempts)
    }

    fn finish(self, record: StepRecord, escalation: Option<String>, started: Instant) -> StepOutcome {
        if record.status.is_complete() {
            if record.status == StepStatus::Completed && record.result.is_none() {
                tracing::warn!(
                    execution_id = %self.execution_id,
                    step = %self.step.name,
                    "step completed without a result"
                );
            }
            self.event_bus.publish(WorkflowEvent::StepCompleted {
                execution_id: self.execution_id.clone(),
                step_name: self.step.name.clone(),
                duration_ms: started.elapsed().as_millis() as u64,
                has_result: record.result.is_some(),
            });
        }

        StepOutcome {
            position: self.position,
            step_name: self.step.name,
            record,
            escalation,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
