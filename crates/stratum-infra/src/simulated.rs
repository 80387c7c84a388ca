//! Simulated step bodies.
//!
//! A `SimulatedStep` sleeps for a configured delay and then either succeeds
//! with `{"step": <name>, "status": "success"}` or fails with a configured
//! message. Failures can be limited to the first N calls to exercise the
//! engine's retry paths.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use serde_json::{Value, json};
use stratum_core::workflow::engine::WorkflowEngine;
use stratum_core::workflow::work::{StepError, StepWork};
use stratum_types::workflow::WorkflowDefinition;

/// A stand-in step body with scripted behavior.
#[derive(Debug)]
pub struct SimulatedStep {
    name: String,
    delay: Duration,
    failure: Option<String>,
    /// Fail only while fewer than this many calls have been made.
    fail_times: Option<u32>,
    calls: AtomicU32,
}

impl SimulatedStep {
    /// A step that always succeeds immediately.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            delay: Duration::ZERO,
            failure: None,
            fail_times: None,
            calls: AtomicU32::new(0),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Fail every call with `message`.
    pub fn failing(mut self, message: impl Into<String>) -> Self {
        self.failure = Some(message.into());
        self.fail_times = None;
        self
    }

    /// Fail the first `times` calls with `message`, then succeed.
    pub fn failing_first(mut self, message: impl Into<String>, times: u32) -> Self {
        self.failure = Some(message.into());
        self.fail_times = Some(times);
        self
    }

    /// Calls made so far.
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    fn success_value(&self) -> Value {
        json!({ "step": self.name, "status": "success" })
    }
}

impl StepWork for SimulatedStep {
    async fn run(&self) -> Result<Value, StepError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        match (&self.failure, self.fail_times) {
            (Some(message), Some(times)) if call < times => Err(StepError::failed(message.clone())),
            (Some(message), None) => Err(StepError::failed(message.clone())),
            _ => Ok(self.success_value()),
        }
    }
}

/// Register a simulated body for every step of `definition`.
///
/// Steps named in `failures` fail every call with the mapped message.
pub fn register_simulated_steps(
    engine: &WorkflowEngine,
    definition: &WorkflowDefinition,
    delay: Duration,
    failures: &HashMap<String, String>,
) {
    for step in &definition.steps {
        let mut work = SimulatedStep::new(&step.name).with_delay(delay);
        if let Some(message) = failures.get(&step.name) {
            tracing::debug!(step = %step.name, message = %message, "simulating failure");
            work = work.failing(message.clone());
        }
        engine.register_step(step.name.clone(), work);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stratum_types::workflow::{ExecutionStatus, StepDefinition, StepStatus};
    use tokio::time::Instant;

    #[tokio::test(start_paused = true)]
    async fn succeeds_after_delay() {
        let step = SimulatedStep::new("extract").with_delay(Duration::from_millis(250));
        let start = Instant::now();

        let value = step.run().await.unwrap();

        assert_eq!(value, json!({ "step": "extract", "status": "success" }));
        assert!(start.elapsed() >= Duration::from_millis(250));
        assert_eq!(step.calls(), 1);
    }

    #[tokio::test]
    async fn always_failing() {
        let step = SimulatedStep::new("validate").failing("Connection refused");
        for _ in 0..3 {
            assert_eq!(step.run().await.unwrap_err().to_string(), "Connection refused");
        }
        assert_eq!(step.calls(), 3);
    }

    #[tokio::test]
    async fn fails_first_n_calls_only() {
        let step = SimulatedStep::new("load").failing_first("Resource busy", 2);
        assert!(step.run().await.is_err());
        assert!(step.run().await.is_err());
        assert!(step.run().await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn registered_simulation_drives_engine() {
        let engine = WorkflowEngine::default();
        let definition = WorkflowDefinition::new(
            "data_pipeline",
            vec![
                StepDefinition::new("extract"),
                StepDefinition::new("validate").depends_on(["extract"]),
                StepDefinition::new("transform").depends_on(["validate"]),
            ],
        );
        let failures = HashMap::from([("transform".to_string(), "Invalid data".to_string())]);

        register_simulated_steps(&engine, &definition, Duration::from_millis(10), &failures);
        let state = engine.execute(&definition, None).await.unwrap();

        assert_eq!(state.status, ExecutionStatus::Completed);
        assert_eq!(state.results()["validate"]["status"], "success");
        assert_eq!(state.step("transform").unwrap().status, StepStatus::Skipped);
    }
}
