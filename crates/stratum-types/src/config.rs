//! Engine configuration types for Stratum.
//!
//! `EngineConfig` represents the `config.toml` that tunes the step executor,
//! the error pattern table and the recovery policy. Every field has a default
//! matching the built-in behavior, so an empty file is a valid config.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::healing::{ErrorCategory, RecoveryStrategy};

/// Top-level engine configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub executor: ExecutorConfig,
    #[serde(default)]
    pub analyzer: AnalyzerConfig,
    #[serde(default)]
    pub recovery: RecoveryPolicy,
    #[serde(default)]
    pub events: EventConfig,
}

// ---------------------------------------------------------------------------
// Executor
// ---------------------------------------------------------------------------

/// Step executor defaults, used when a step does not set its own limits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Attempts per invocation.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Per-attempt timeout in seconds.
    #[serde(default = "default_base_timeout_secs")]
    pub base_timeout_secs: u64,
    /// Length of one backoff unit in milliseconds. Attempt `i` waits `2^i` units.
    #[serde(default = "default_backoff_unit_ms")]
    pub backoff_unit_ms: u64,
}

fn default_max_retries() -> u32 {
    3
}

fn default_base_timeout_secs() -> u64 {
    30
}

fn default_backoff_unit_ms() -> u64 {
    1000
}

impl ExecutorConfig {
    pub fn base_timeout(&self) -> Duration {
        Duration::from_secs(self.base_timeout_secs)
    }

    pub fn backoff_unit(&self) -> Duration {
        Duration::from_millis(self.backoff_unit_ms)
    }
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_timeout_secs: default_base_timeout_secs(),
            backoff_unit_ms: default_backoff_unit_ms(),
        }
    }
}

// ---------------------------------------------------------------------------
// Analyzer
// ---------------------------------------------------------------------------

/// One row of the error pattern table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPattern {
    /// Case-sensitive substring searched for in the failure message.
    pub pattern: String,
    pub category: ErrorCategory,
}

impl ErrorPattern {
    pub fn new(pattern: impl Into<String>, category: ErrorCategory) -> Self {
        Self {
            pattern: pattern.into(),
            category,
        }
    }
}

/// Ordered error pattern table. First match wins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalyzerConfig {
    #[serde(default = "default_patterns")]
    pub patterns: Vec<ErrorPattern>,
}

fn default_patterns() -> Vec<ErrorPattern> {
    vec![
        ErrorPattern::new("timeout", ErrorCategory::Timeout),
        ErrorPattern::new("Resource", ErrorCategory::ResourceExhausted),
        ErrorPattern::new("Invalid", ErrorCategory::InvalidInput),
        ErrorPattern::new("Connection", ErrorCategory::ExternalService),
    ]
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            patterns: default_patterns(),
        }
    }
}

// ---------------------------------------------------------------------------
// Recovery policy
// ---------------------------------------------------------------------------

/// Strategy, attempt budget and escalation flag for one category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyRule {
    pub strategy: RecoveryStrategy,
    #[serde(default)]
    pub max_attempts: u32,
    #[serde(default = "default_true")]
    pub escalation_enabled: bool,
}

fn default_true() -> bool {
    true
}

/// A policy rule bound to the category it applies to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryRule {
    pub category: ErrorCategory,
    #[serde(flatten)]
    pub rule: PolicyRule,
}

/// Category-to-plan mapping used by the recovery planner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryPolicy {
    /// Per-category rules. The first rule for a category wins.
    #[serde(default = "default_rules")]
    pub rules: Vec<CategoryRule>,
    /// Rule for categories without an entry in `rules`.
    #[serde(default = "default_fallback_rule")]
    pub fallback_rule: PolicyRule,
}

fn default_rules() -> Vec<CategoryRule> {
    vec![
        CategoryRule {
            category: ErrorCategory::Timeout,
            rule: PolicyRule {
                strategy: RecoveryStrategy::Retry,
                max_attempts: 3,
                escalation_enabled: true,
            },
        },
        CategoryRule {
            category: ErrorCategory::ResourceExhausted,
            rule: PolicyRule {
                strategy: RecoveryStrategy::Retry,
                max_attempts: 5,
                escalation_enabled: false,
            },
        },
        CategoryRule {
            category: ErrorCategory::InvalidInput,
            rule: PolicyRule {
                strategy: RecoveryStrategy::Skip,
                max_attempts: 1,
                escalation_enabled: true,
            },
        },
    ]
}

fn default_fallback_rule() -> PolicyRule {
    PolicyRule {
        strategy: RecoveryStrategy::Escalate,
        max_attempts: 0,
        escalation_enabled: true,
    }
}

impl RecoveryPolicy {
    /// The rule that applies to `category`.
    pub fn rule_for(&self, category: ErrorCategory) -> &PolicyRule {
        self.rules
            .iter()
            .find(|r| r.category == category)
            .map(|r| &r.rule)
            .unwrap_or(&self.fallback_rule)
    }
}

impl Default for RecoveryPolicy {
    fn default() -> Self {
        Self {
            rules: default_rules(),
            fallback_rule: default_fallback_rule(),
        }
    }
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// Event bus settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventConfig {
    /// Broadcast channel capacity.
    #[serde(default = "default_event_capacity")]
    pub capacity: usize,
}

fn default_event_capacity() -> usize {
    1024
}

impl Default for EventConfig {
    fn default() -> Self {
        Self {
            capacity: default_event_capacity(),
        }
    }
}
