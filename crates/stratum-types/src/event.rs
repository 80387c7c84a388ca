//! Event types for the Stratum workflow event bus.
//!
//! `WorkflowEvent` is broadcast by the engine while a run progresses. All
//! variants are Clone + Send + Sync for use with tokio broadcast channels.

use serde::{Deserialize, Serialize};

use crate::healing::{ErrorCategory, RecoveryStrategy};
use crate::workflow::{ExecutionId, ExecutionStatus};

/// Events emitted during workflow execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkflowEvent {
    /// A run has started.
    RunStarted {
        execution_id: ExecutionId,
        workflow_name: String,
        levels: usize,
    },

    /// A level is about to be dispatched.
    LevelStarted {
        execution_id: ExecutionId,
        level: usize,
        steps: Vec<String>,
    },

    /// A step's work unit is being invoked.
    StepStarted {
        execution_id: ExecutionId,
        step_name: String,
    },

    /// A step reached a complete outcome (completed or skipped).
    StepCompleted {
        execution_id: ExecutionId,
        step_name: String,
        duration_ms: u64,
        has_result: bool,
    },

    /// A step invocation failed and was handed to the analyzer.
    StepFailed {
        execution_id: ExecutionId,
        step_name: String,
        error: String,
        category: ErrorCategory,
    },

    /// A recovery plan was chosen for a failed step.
    RecoveryPlanned {
        execution_id: ExecutionId,
        step_name: String,
        strategy: RecoveryStrategy,
        max_attempts: u32,
    },

    /// The run finished without escalation.
    RunCompleted {
        execution_id: ExecutionId,
        duration_ms: u64,
        steps_completed: usize,
    },

    /// The run was escalated and stopped.
    RunFailed {
        execution_id: ExecutionId,
        error: String,
    },
}

impl WorkflowEvent {
    /// The execution this event belongs to.
    pub fn execution_id(&self) -> &ExecutionId {
        match self {
            WorkflowEvent::RunStarted { execution_id, .. }
            | WorkflowEvent::LevelStarted { execution_id, .. }
            | WorkflowEvent::StepStarted { execution_id, .. }
            | WorkflowEvent::StepCompleted { execution_id, .. }
            | WorkflowEvent::StepFailed { execution_id, .. }
            | WorkflowEvent::RecoveryPlanned { execution_id, .. }
            | WorkflowEvent::RunCompleted { execution_id, .. }
            | WorkflowEvent::RunFailed { execution_id, .. } => execution_id,
        }
    }

    /// Final status carried by terminal events.
    pub fn terminal_status(&self) -> Option<ExecutionStatus> {
        match self {
            WorkflowEvent::RunCompleted { .. } => Some(ExecutionStatus::Completed),
            WorkflowEvent::RunFailed { .. } => Some(ExecutionStatus::Failed),
            _ => None,
        }
    }
}
