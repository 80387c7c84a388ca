//! Failure classification by substring pattern matching.
//!
//! The analyzer walks an ordered `(pattern, category)` table and picks the
//! first pattern contained in the failure message. Matching is
//! case-sensitive: `"timeout"` matches "Read timeout" but not "Timeout".

use stratum_types::config::{AnalyzerConfig, ErrorPattern};
use stratum_types::healing::{ErrorAnalysis, ErrorCategory, FailureContext};

/// Classifies step failures and proposes remediations.
#[derive(Debug, Clone)]
pub struct ErrorAnalyzer {
    patterns: Vec<ErrorPattern>,
}

impl ErrorAnalyzer {
    /// Analyzer with the built-in pattern table.
    pub fn new() -> Self {
        Self::from_config(&AnalyzerConfig::default())
    }

    pub fn from_config(config: &AnalyzerConfig) -> Self {
        Self {
            patterns: config.patterns.clone(),
        }
    }

    /// Append a pattern. It is consulted after every existing pattern.
    pub fn add_pattern(&mut self, pattern: impl Into<String>, category: ErrorCategory) {
        self.patterns.push(ErrorPattern::new(pattern, category));
    }

    pub fn patterns(&self) -> &[ErrorPattern] {
        &self.patterns
    }

    /// Category of the first pattern found in `message`, or `Unknown`.
    pub fn categorize(&self, message: &str) -> ErrorCategory {
        self.patterns
            .iter()
            .find(|p| message.contains(p.pattern.as_str()))
            .map(|p| p.category)
            .unwrap_or(ErrorCategory::Unknown)
    }

    pub fn analyze(&self, error: &str, context: Option<&FailureContext>) -> ErrorAnalysis {
        let category = self.categorize(error);
        let confidence = confidence(error);

        match context {
            Some(ctx) => tracing::debug!(
                workflow = %ctx.workflow_name,
                execution_id = %ctx.execution_id,
                step = %ctx.step_name,
                attempts = ctx.attempts,
                category = %category,
                confidence,
                "classified step failure"
            ),
            None => tracing::debug!(category = %category, confidence, "classified failure"),
        }

        ErrorAnalysis {
            category,
            root_cause: error.to_string(),
            confidence,
            recommendations: recommendations(category),
        }
    }
}

impl Default for ErrorAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

/// Classification confidence from message length: above 50 chars 0.9, above 20 chars 0.7, else 0.5.
pub fn confidence(message: &str) -> f64 {
    match message.chars().count() {
        n if n > 50 => 0.9,
        n if n > 20 => 0.7,
        _ => 0.5,
    }
}

/// Fixed remediation suggestions for a category.
pub fn recommendations(category: ErrorCategory) -> Vec<String> {
    let items: &[&str] = match category {
        ErrorCategory::Timeout => &[
            "Increase timeout threshold",
            "Optimize step performance",
            "Split into smaller steps",
        ],
        ErrorCategory::ResourceExhausted => &[
            "Increase resource allocation",
            "Implement rate limiting",
            "Add step batching",
        ],
        ErrorCategory::InvalidInput => &[
            "Validate input data",
            "Add data transformation",
            "Check upstream step output",
        ],
        ErrorCategory::ExternalService => &[
            "Check service status",
            "Implement circuit breaker",
            "Add exponential backoff",
        ],
        ErrorCategory::Unknown => &["Retry with backoff"],
    };
    items.iter().map(|s| s.to_string()).collect()
}
