//! Per-step execution: timeout, retry with exponential backoff, validation.
//!
//! Each invocation makes up to `max_retries` attempts. An attempt fails when
//! the work unit errors, exceeds its timeout, or produces a result the
//! validator rejects. Between attempts the executor sleeps `2^attempt`
//! backoff units (1, 2, 4, ...), with no jitter and no cap.
//!
//! The final attempt is asymmetric: a timeout there yields `Ok(None)` while
//! any other failure is returned as `Err`.

use std::time::Duration;

use dashmap::DashMap;
use serde_json::Value;
use stratum_types::config::ExecutorConfig;
use stratum_types::workflow::{ExecutionMetrics, StepDefinition};
use tokio::time::Instant;

use super::work::{StepError, StepWork, Validator};

/// Attempt budget and per-attempt timeout for one invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepLimits {
    pub max_retries: u32,
    pub timeout: Duration,
}

/// Sleep before the attempt following zero-based `attempt`.
pub fn backoff_delay(attempt: u32, unit: Duration) -> Duration {
    unit.saturating_mul(2u32.saturating_pow(attempt))
}

/// Result of one executor invocation.
#[derive(Debug)]
pub struct Invocation {
    pub outcome: Result<Option<Value>, StepError>,
    /// Attempts made by this invocation alone.
    pub attempts: u32,
}

/// Runs step work units and records per-step metrics.
///
/// Metrics are keyed by step name and reset at the start of every invocation.
#[derive(Debug)]
pub struct StepExecutor {
    config: ExecutorConfig,
    metrics: DashMap<String, ExecutionMetrics>,
}

impl StepExecutor {
    pub fn new(config: ExecutorConfig) -> Self {
        Self {
            config,
            metrics: DashMap::new(),
        }
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Limits taken from the executor configuration.
    pub fn default_limits(&self) -> StepLimits {
        StepLimits {
            max_retries: self.config.max_retries,
            timeout: self.config.base_timeout(),
        }
    }

    /// Limits for `step`, with its own `retries`/`timeout_secs` taking precedence.
    pub fn limits_for(&self, step: &StepDefinition) -> StepLimits {
        let defaults = self.default_limits();
        StepLimits {
            max_retries: step.retries.unwrap_or(defaults.max_retries),
            timeout: step
                .timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.timeout),
        }
    }

    /// Run `work` with the configured default limits.
    pub async fn execute<W: StepWork>(
        &self,
        step_name: &str,
        work: &W,
        validator: Option<&Validator>,
    ) -> Result<Option<Value>, StepError> {
        self.execute_with_limits(step_name, self.default_limits(), work, validator)
            .await
    }

    /// Run `work` with explicit limits.
    pub async fn execute_with_limits<W: StepWork>(
        &self,
        step_name: &str,
        limits: StepLimits,
        work: &W,
        validator: Option<&Validator>,
    ) -> Result<Option<Value>, StepError> {
        self.invoke(step_name, limits, work, validator).await.outcome
    }

    /// Run `work` with explicit limits and report the attempts this call made.
    ///
    /// The count is local to the invocation, so overlapping invocations for
    /// the same step name each see their own. The shared metrics entry only
    /// reflects whichever invocation touched it last.
    pub async fn invoke<W: StepWork>(
        &self,
        step_name: &str,
        limits: StepLimits,
        work: &W,
        validator: Option<&Validator>,
    ) -> Invocation {
        let started = Instant::now();
        let mut attempts = 0u32;
        self.metrics
            .insert(step_name.to_string(), ExecutionMetrics::new());

        for attempt in 0..limits.max_retries {
            attempts += 1;
            if let Some(mut metrics) = self.metrics.get_mut(step_name) {
                metrics.attempts += 1;
            }

            let outcome = match tokio::time::timeout(limits.timeout, work.run()).await {
                Ok(Ok(value)) => match validator {
                    Some(validate) if !validate(&value) => Err(StepError::ValidationFailed),
                    _ => Ok(value),
                },
                Ok(Err(e)) => Err(e),
                Err(_elapsed) => Err(StepError::Timeout {
                    after: limits.timeout,
                }),
            };

            let err = match outcome {
                Ok(value) => {
                    if let Some(mut metrics) = self.metrics.get_mut(step_name) {
                        metrics.success = true;
                        metrics.duration = Some(started.elapsed());
                    }
                    tracing::debug!(step = step_name, attempt, "step attempt succeeded");
                    return Invocation {
                        outcome: Ok(Some(value)),
                        attempts,
                    };
                }
                Err(e) => e,
            };

            if attempt + 1 == limits.max_retries {
                if err.is_timeout() {
                    tracing::warn!(
                        step = step_name,
                        attempts,
                        "step timed out on final attempt, returning no result"
                    );
                    return Invocation {
                        outcome: Ok(None),
                        attempts,
                    };
                }
                tracing::warn!(
                    step = step_name,
                    attempts,
                    error = %err,
                    "step failed on final attempt"
                );
                return Invocation {
                    outcome: Err(err),
                    attempts,
                };
            }

            let delay = backoff_delay(attempt, self.config.backoff_unit());
            tracing::debug!(
                step = step_name,
                attempt,
                error = %err,
                delay_ms = delay.as_millis() as u64,
                "step attempt failed, backing off"
            );
            tokio::time::sleep(delay).await;
        }

        Invocation {
            outcome: Ok(None),
            attempts,
        }
    }

    /// Metrics from the most recent invocation for `step_name`.
    pub fn get_metrics(&self, step_name: &str) -> Option<ExecutionMetrics> {
        self.metrics.get(step_name).map(|m| m.value().clone())
    }
}

impl Default for StepExecutor {
    fn default() -> Self {
        Self::new(ExecutorConfig::default())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::work::fn_step;
    use serde_json::json;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn executor(max_retries: u32, timeout_secs: u64) -> StepExecutor {
        StepExecutor::new(ExecutorConfig {
            max_retries,
            base_timeout_secs: timeout_secs,
            backoff_unit_ms: 1000,
        })
    }

    /// Work that fails with `message` for the first `failures` calls, then succeeds.
    fn flaky(
        calls: Arc<AtomicU32>,
        failures: u32,
        message: &'static str,
    ) -> impl StepWork {
        fn_step(move || {
            let calls = Arc::clone(&calls);
            async move {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                if n < failures {
                    Err(StepError::failed(message))
                } else {
                    Ok(json!({ "call": n + 1 }))
                }
            }
        })
    }

    #[test]
    fn backoff_doubles_per_attempt() {
        let unit = Duration::from_millis(100);
        assert_eq!(backoff_delay(0, unit), Duration::from_millis(100));
        assert_eq!(backoff_delay(1, unit), Duration::from_millis(200));
        assert_eq!(backoff_delay(2, unit), Duration::from_millis(400));
        assert_eq!(backoff_delay(3, Duration::from_secs(1)), Duration::from_secs(8));
    }

    #[test]
    fn step_limits_override_defaults() {
        let exec = executor(3, 30);
        let plain = StepDefinition::new("a");
        assert_eq!(exec.limits_for(&plain), exec.default_limits());

        let tuned = StepDefinition::new("b").with_retries(5).with_timeout_secs(2);
        let limits = exec.limits_for(&tuned);
        assert_eq!(limits.max_retries, 5);
        assert_eq!(limits.timeout, Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn success_on_first_attempt() {
        let exec = executor(3, 30);
        let calls = Arc::new(AtomicU32::new(0));
        let result = exec
            .execute("extract", &flaky(Arc::clone(&calls), 0, ""), None)
            .await
            .unwrap();

        assert_eq!(result, Some(json!({ "call": 1 })));
        let metrics = exec.get_metrics("extract").unwrap();
        assert_eq!(metrics.attempts, 1);
        assert!(metrics.success);
        assert!(metrics.duration.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn retries_then_succeeds_with_backoff() {
        let exec = executor(3, 30);
        let calls = Arc::new(AtomicU32::new(0));
        let start = Instant::now();

        let result = exec
            .execute("load", &flaky(Arc::clone(&calls), 2, "Connection reset"), None)
            .await
            .unwrap();

        assert_eq!(result, Some(json!({ "call": 3 })));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // 1s + 2s of backoff between three attempts.
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(3), "elapsed {elapsed:?}");
        assert!(elapsed < Duration::from_secs(4), "elapsed {elapsed:?}");
        assert_eq!(exec.get_metrics("load").unwrap().attempts, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn final_failure_is_returned_as_error() {
        let exec = executor(2, 30);
        let calls = Arc::new(AtomicU32::new(0));

        let err = exec
            .execute("transform", &flaky(Arc::clone(&calls), 10, "Invalid data"), None)
            .await
            .unwrap_err();

        assert_eq!(err, StepError::failed("Invalid data"));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        let metrics = exec.get_metrics("transform").unwrap();
        assert_eq!(metrics.attempts, 2);
        assert!(!metrics.success);
        assert!(metrics.duration.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn final_timeout_returns_none() {
        let exec = executor(3, 1);
        let slow = fn_step(|| async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok(json!("late"))
        });
        let start = Instant::now();

        let result = exec.execute("aggregate", &slow, None).await.unwrap();

        assert_eq!(result, None);
        // Three 1s timeouts plus 1s + 2s of backoff.
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(6), "elapsed {elapsed:?}");
        assert!(elapsed < Duration::from_secs(7), "elapsed {elapsed:?}");
        let metrics = exec.get_metrics("aggregate").unwrap();
        assert_eq!(metrics.attempts, 3);
        assert!(!metrics.success);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_then_error_on_final_attempt_is_error() {
        let exec = executor(2, 1);
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let work = fn_step(move || {
            let counter = Arc::clone(&counter);
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                }
                Err(StepError::failed("Resource temporarily unavailable"))
            }
        });

        let err = exec.execute("validate", &work, None).await.unwrap_err();
        assert_eq!(err.to_string(), "Resource temporarily unavailable");
    }

    #[tokio::test(start_paused = true)]
    async fn validator_rejection_fails_attempts() {
        let exec = executor(2, 30);
        let calls = Arc::new(AtomicU32::new(0));
        let validator: Validator = Arc::new(|value: &Value| value["call"] == json!(2));

        let result = exec
            .execute("validate", &flaky(Arc::clone(&calls), 0, ""), Some(&validator))
            .await
            .unwrap();
        assert_eq!(result, Some(json!({ "call": 2 })));

        let never: Validator = Arc::new(|_: &Value| false);
        let err = exec
            .execute("validate", &flaky(Arc::new(AtomicU32::new(0)), 0, ""), Some(&never))
            .await
            .unwrap_err();
        assert_eq!(err, StepError::ValidationFailed);
        assert_eq!(err.to_string(), "Result validation failed");
    }

    #[tokio::test(start_paused = true)]
    async fn zero_retries_makes_no_attempt() {
        let exec = executor(0, 30);
        let calls = Arc::new(AtomicU32::new(0));
        let result = exec
            .execute("noop", &flaky(Arc::clone(&calls), 0, ""), None)
            .await
            .unwrap();

        assert_eq!(result, None);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(exec.get_metrics("noop").unwrap().attempts, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn metrics_reset_between_invocations() {
        let exec = executor(3, 30);
        let calls = Arc::new(AtomicU32::new(0));
        let work = flaky(Arc::clone(&calls), 2, "Connection refused");

        exec.execute("load", &work, None).await.unwrap();
        assert_eq!(exec.get_metrics("load").unwrap().attempts, 3);

        // Later calls succeed immediately; the attempt count starts over.
        exec.execute("load", &work, None).await.unwrap();
        assert_eq!(exec.get_metrics("load").unwrap().attempts, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn overlapping_invocations_count_their_own_attempts() {
        let exec = Arc::new(executor(3, 30));
        let calls = Arc::new(AtomicU32::new(0));
        let work = Arc::new(flaky(Arc::clone(&calls), 2, "Connection reset"));

        let first = {
            let (exec, work) = (Arc::clone(&exec), Arc::clone(&work));
            tokio::spawn(async move {
                exec.invoke("fetch", exec.default_limits(), &*work, None).await
            })
        };
        // Lands while the first invocation is backing off after its first failure.
        tokio::time::sleep(Duration::from_millis(500)).await;
        let second = exec
            .invoke("fetch", exec.default_limits(), &*work, None)
            .await;
        let first = first.await.unwrap();

        // t=0 first fails, t=0.5 second fails, t=1 first succeeds, t=1.5 second succeeds.
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(second.attempts, 2);
        assert_eq!(first.attempts, 2);
        assert!(first.outcome.unwrap().is_some());
        assert!(second.outcome.unwrap().is_some());
    }

    #[test]
    fn metrics_absent_for_unknown_step() {
        assert!(StepExecutor::default().get_metrics("ghost").is_none());
    }
}
