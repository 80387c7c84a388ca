//! Failure analysis and recovery planning types.
//!
//! `ErrorAnalysis` is produced fresh for every step failure by the analyzer;
//! `RecoveryPlan` is produced fresh from its category by the planner and
//! consumed immediately by the engine. Neither is persisted.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::workflow::ExecutionId;

// ---------------------------------------------------------------------------
// Error categories
// ---------------------------------------------------------------------------

/// Closed set of failure categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Timeout,
    ResourceExhausted,
    InvalidInput,
    ExternalService,
    Unknown,
}

impl ErrorCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCategory::Timeout => "timeout",
            ErrorCategory::ResourceExhausted => "resource_exhausted",
            ErrorCategory::InvalidInput => "invalid_input",
            ErrorCategory::ExternalService => "external_service",
            ErrorCategory::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ErrorCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "timeout" => Ok(ErrorCategory::Timeout),
            "resource_exhausted" => Ok(ErrorCategory::ResourceExhausted),
            "invalid_input" => Ok(ErrorCategory::InvalidInput),
            "external_service" => Ok(ErrorCategory::ExternalService),
            "unknown" => Ok(ErrorCategory::Unknown),
            other => Err(format!("invalid error category: '{other}'")),
        }
    }
}

/// Result of analyzing one failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorAnalysis {
    pub category: ErrorCategory,
    /// The failure text the category was derived from.
    pub root_cause: String,
    /// Confidence in the classification, in `[0, 1]`.
    pub confidence: f64,
    /// Ordered remediation suggestions.
    pub recommendations: Vec<String>,
}

// ---------------------------------------------------------------------------
// Recovery
// ---------------------------------------------------------------------------

/// What the engine should do about a failed step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryStrategy {
    /// Re-invoke the step executor up to `max_attempts` times.
    Retry,
    /// Run the fallback registered for the step.
    Fallback,
    /// Mark the step complete without a result.
    Skip,
    /// Fail the whole run.
    Escalate,
}

impl fmt::Display for RecoveryStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecoveryStrategy::Retry => write!(f, "retry"),
            RecoveryStrategy::Fallback => write!(f, "fallback"),
            RecoveryStrategy::Skip => write!(f, "skip"),
            RecoveryStrategy::Escalate => write!(f, "escalate"),
        }
    }
}

impl FromStr for RecoveryStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "retry" => Ok(RecoveryStrategy::Retry),
            "fallback" => Ok(RecoveryStrategy::Fallback),
            "skip" => Ok(RecoveryStrategy::Skip),
            "escalate" => Ok(RecoveryStrategy::Escalate),
            other => Err(format!("invalid recovery strategy: '{other}'")),
        }
    }
}

/// A recovery plan for one failed step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryPlan {
    pub strategy: RecoveryStrategy,
    /// Ordered, human-readable action descriptions.
    pub steps: Vec<String>,
    pub max_attempts: u32,
    pub escalation_enabled: bool,
}

/// Where a failure happened. Optional context for the analyzer and planner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureContext {
    pub workflow_name: String,
    pub execution_id: ExecutionId,
    pub step_name: String,
    /// Work-unit attempts made for the step so far.
    pub attempts: u32,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_round_trips_through_str() {
        for category in [
            ErrorCategory::Timeout,
            ErrorCategory::ResourceExhausted,
            ErrorCategory::InvalidInput,
            ErrorCategory::ExternalService,
            ErrorCategory::Unknown,
        ] {
            assert_eq!(category.as_str().parse::<ErrorCategory>().unwrap(), category);
        }
    }

    #[test]
    fn category_parse_rejects_garbage() {
        let err = "disk_full".parse::<ErrorCategory>().unwrap_err();
        assert!(err.contains("disk_full"));
    }

    #[test]
    fn strategy_parse_is_case_insensitive() {
        assert_eq!("SKIP".parse::<RecoveryStrategy>().unwrap(), RecoveryStrategy::Skip);
        assert!("reboot".parse::<RecoveryStrategy>().is_err());
    }

    #[test]
    fn category_serializes_snake_case() {
        let json = serde_json::to_string(&ErrorCategory::ResourceExhausted).unwrap();
        assert_eq!(json, "\"resource_exhausted\"");
    }
}
