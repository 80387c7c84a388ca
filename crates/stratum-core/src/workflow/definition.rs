//! Workflow definition parsing, validation, and filesystem loading.
//!
//! Converts YAML files into `WorkflowDefinition` values and validates the
//! structural constraints the engine relies on (unique step names, known
//! dependencies). The engine itself trusts its input; these helpers are for
//! callers that read definitions from outside the process.

use std::collections::HashSet;
use std::path::Path;

use stratum_types::workflow::WorkflowDefinition;
use thiserror::Error;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors that can occur during workflow operations.
#[derive(Debug, Error)]
pub enum WorkflowError {
    /// YAML parse failure.
    #[error("parse error: {0}")]
    ParseError(String),

    /// Structural validation failure.
    #[error("validation error: {0}")]
    ValidationError(String),

    /// Filesystem I/O failure.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Stratification could not place every step.
    #[error("circular dependency detected among steps: {}", steps.join(", "))]
    CircularDependency { steps: Vec<String> },

    /// Two steps of one workflow share a name.
    #[error("duplicate step name: '{0}'")]
    DuplicateStep(String),

    /// A step references a dependency that is not part of the workflow.
    #[error("unknown dependency: step '{step}' depends on unknown step '{dependency}'")]
    UnknownDependency { step: String, dependency: String },

    /// A step name (e.g. a resume point) is not part of the workflow.
    #[error("unknown step '{step}' in workflow '{workflow}'")]
    UnknownStep { workflow: String, step: String },

    /// No workflow with this name is registered.
    #[error("workflow '{0}' is not registered")]
    UnknownWorkflow(String),
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Parse a YAML string into a validated `WorkflowDefinition`.
pub fn parse_workflow_yaml(yaml: &str) -> Result<WorkflowDefinition, WorkflowError> {
    let def: WorkflowDefinition =
        serde_yaml_ng::from_str(yaml).map_err(|e| WorkflowError::ParseError(e.to_string()))?;
    validate_definition(&def)?;
    Ok(def)
}

/// Serialize a `WorkflowDefinition` to a YAML string.
pub fn serialize_workflow_yaml(def: &WorkflowDefinition) -> Result<String, WorkflowError> {
    serde_yaml_ng::to_string(def).map_err(|e| WorkflowError::ParseError(e.to_string()))
}

/// Load and validate a workflow definition from a YAML file.
pub fn load_workflow_file(path: &Path) -> Result<WorkflowDefinition, WorkflowError> {
    let content = std::fs::read_to_string(path)?;
    parse_workflow_yaml(&content)
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Validate structural constraints on a `WorkflowDefinition`.
///
/// Checks:
/// - Name is non-empty
/// - At least one step exists
/// - Step names are non-empty and unique
/// - All `depends_on` references point to steps of the same workflow
///
/// Cycles are reported by the engine when it computes the execution order.
pub fn validate_definition(def: &WorkflowDefinition) -> Result<(), WorkflowError> {
    if def.name.trim().is_empty() {
        return Err(WorkflowError::ValidationError(
            "workflow name must not be empty".to_string(),
        ));
    }

    if def.steps.is_empty() {
        return Err(WorkflowError::ValidationError(
            "workflow must have at least one step".to_string(),
        ));
    }

    let mut seen = HashSet::new();
    for step in &def.steps {
        if step.name.trim().is_empty() {
            return Err(WorkflowError::ValidationError(
                "step name must not be empty".to_string(),
            ));
        }
        if !seen.insert(step.name.as_str()) {
            return Err(WorkflowError::DuplicateStep(step.name.clone()));
        }
    }

    for step in &def.steps {
        for dep in &step.depends_on {
            if !seen.contains(dep.as_str()) {
                return Err(WorkflowError::UnknownDependency {
                    step: step.name.clone(),
                    dependency: dep.clone(),
                });
            }
        }
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
