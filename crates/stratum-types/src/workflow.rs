//! Workflow domain types for Stratum.
//!
//! Defines the workflow definition model (`WorkflowDefinition`,
//! `StepDefinition`) consumed by the engine, and the execution tracking types
//! (`ExecutionState`, `StepRecord`, `ExecutionMetrics`) it produces.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::healing::RecoveryStrategy;

// ---------------------------------------------------------------------------
// Workflow Definition
// ---------------------------------------------------------------------------

/// A complete workflow: a named, ordered set of steps forming a DAG.
///
/// Immutable once registered with an engine; callers wanting a different shape
/// register a new definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    /// Workflow name. Unique across the workflows registered with one engine.
    pub name: String,
    /// Ordered list of steps. Order is preserved within each execution level.
    pub steps: Vec<StepDefinition>,
    /// Optional longer description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Semantic version string (e.g. "1.0.0").
    #[serde(default = "default_version")]
    pub version: String,
}

fn default_version() -> String {
    "1.0.0".to_string()
}

impl WorkflowDefinition {
    /// Create a definition with the default version and no description.
    pub fn new(name: impl Into<String>, steps: Vec<StepDefinition>) -> Self {
        Self {
            name: name.into(),
            steps,
            description: None,
            version: default_version(),
        }
    }

    /// Look up a step by name.
    pub fn step(&self, name: &str) -> Option<&StepDefinition> {
        self.steps.iter().find(|s| s.name == name)
    }
}

// ---------------------------------------------------------------------------
// Step Definition
// ---------------------------------------------------------------------------

/// A single step in the workflow DAG.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepDefinition {
    /// Step name. Unique within a workflow; also the key for its work unit.
    pub name: String,
    /// Names of the steps this step depends on (DAG edges).
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Per-attempt timeout in seconds. Falls back to the executor default.
    #[serde(default, alias = "timeout", skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
    /// Attempt budget for one executor invocation. Falls back to the executor default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retries: Option<u32>,
    /// Optional human-readable description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl StepDefinition {
    /// Create a step with no dependencies and executor-default limits.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            depends_on: Vec::new(),
            timeout_secs: None,
            retries: None,
            description: None,
        }
    }

    /// Builder: set the dependency list.
    pub fn depends_on<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.depends_on = deps.into_iter().map(Into::into).collect();
        self
    }

    /// Builder: set the per-attempt timeout.
    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }

    /// Builder: set the per-invocation attempt budget.
    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = Some(retries);
        self
    }
}

// ---------------------------------------------------------------------------
// Execution identifier
// ---------------------------------------------------------------------------

/// Unique handle for one run of a workflow.
///
/// Formatted as `<workflow>-<uuid v7>`; the v7 UUID embeds the millisecond
/// timestamp, so ids sort by start time and never collide within a process.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExecutionId(String);

impl ExecutionId {
    /// Generate a fresh execution id for the named workflow.
    pub fn generate(workflow_name: &str) -> Self {
        Self(format!("{workflow_name}-{}", Uuid::now_v7()))
    }

    /// Wrap an existing id string (e.g. one typed on the command line).
    pub fn from_string(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ExecutionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// Execution state
// ---------------------------------------------------------------------------

/// Overall status of a workflow execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Running,
    Completed,
    Failed,
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionStatus::Running => write!(f, "running"),
            ExecutionStatus::Completed => write!(f, "completed"),
            ExecutionStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Terminal status of one step within an execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    /// The step produced a result (possibly none, see `StepRecord::result`).
    Completed,
    /// The step was marked complete without running to success.
    Skipped,
    /// The step failed and no recovery succeeded.
    Failed,
}

impl StepStatus {
    /// Whether dependents of a step in this status may proceed.
    pub fn is_complete(self) -> bool {
        matches!(self, StepStatus::Completed | StepStatus::Skipped)
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepStatus::Completed => write!(f, "completed"),
            StepStatus::Skipped => write!(f, "skipped"),
            StepStatus::Failed => write!(f, "failed"),
        }
    }
}

/// The recorded outcome of one step in one execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    pub status: StepStatus,
    /// Result value, when the step (or its fallback) produced one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    /// The most recent failure message, kept even when recovery succeeded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Recovery strategy applied after the first failure, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recovery: Option<RecoveryStrategy>,
    /// Total work-unit attempts across every executor invocation for this step.
    #[serde(default)]
    pub attempts: u32,
    /// True when the record was carried over from an earlier execution on resume.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub carried_over: bool,
}

impl StepRecord {
    pub fn completed(result: Option<serde_json::Value>, attempts: u32) -> Self {
        Self {
            status: StepStatus::Completed,
            result,
            error: None,
            recovery: None,
            attempts,
            carried_over: false,
        }
    }

    pub fn failed(error: impl Into<String>, attempts: u32) -> Self {
        Self {
            status: StepStatus::Failed,
            result: None,
            error: Some(error.into()),
            recovery: None,
            attempts,
            carried_over: false,
        }
    }

    pub fn skipped(error: impl Into<String>, attempts: u32) -> Self {
        Self {
            status: StepStatus::Skipped,
            result: None,
            error: Some(error.into()),
            recovery: None,
            attempts,
            carried_over: false,
        }
    }

    /// Builder: tag the record with the recovery strategy that produced it.
    pub fn with_recovery(mut self, strategy: RecoveryStrategy) -> Self {
        self.recovery = Some(strategy);
        self
    }
}

/// Snapshot of one workflow execution.
///
/// Created when a run starts, mutated by the owning engine after every level,
/// and retained for status queries after the run finishes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionState {
    pub execution_id: ExecutionId,
    pub workflow_name: String,
    pub status: ExecutionStatus,
    /// Per-step records keyed by step name.
    #[serde(default)]
    pub steps: HashMap<String, StepRecord>,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// The error that caused the run to fail.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Step the run was resumed from, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resumed_from: Option<String>,
}

impl ExecutionState {
    /// Create a new `running` state stamped with the current time.
    pub fn start(execution_id: ExecutionId, workflow_name: impl Into<String>) -> Self {
        Self {
            execution_id,
            workflow_name: workflow_name.into(),
            status: ExecutionStatus::Running,
            steps: HashMap::new(),
            started_at: Utc::now(),
            completed_at: None,
            error: None,
            resumed_from: None,
        }
    }

    /// Results of every step that produced one, keyed by step name.
    pub fn results(&self) -> HashMap<&str, &serde_json::Value> {
        self.steps
            .iter()
            .filter_map(|(name, record)| record.result.as_ref().map(|r| (name.as_str(), r)))
            .collect()
    }

    /// Errors recorded for any step, keyed by step name.
    pub fn errors(&self) -> HashMap<&str, &str> {
        self.steps
            .iter()
            .filter_map(|(name, record)| record.error.as_deref().map(|e| (name.as_str(), e)))
            .collect()
    }

    pub fn step(&self, name: &str) -> Option<&StepRecord> {
        self.steps.get(name)
    }

    pub fn is_finished(&self) -> bool {
        self.status != ExecutionStatus::Running
    }
}

// ---------------------------------------------------------------------------
// Execution metrics
// ---------------------------------------------------------------------------

/// Per-step metrics kept by a step executor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionMetrics {
    /// Attempts made in the most recent invocation.
    pub attempts: u32,
    pub started_at: DateTime<Utc>,
    /// True once an attempt succeeded and passed validation.
    pub success: bool,
    /// Time from invocation start to the successful attempt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<Duration>,
}

impl ExecutionMetrics {
    pub fn new() -> Self {
        Self {
            attempts: 0,
            started_at: Utc::now(),
            success: false,
            duration: None,
        }
    }
}

impl Default for ExecutionMetrics {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
