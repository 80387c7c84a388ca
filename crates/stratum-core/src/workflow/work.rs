//! Step work units: the opaque bodies the engine runs for each step.
//!
//! `StepWork` uses RPITIT and cannot be a trait object, so the engine and the
//! recovery planner store work units as [`BoxStepWork`]:
//! 1. `StepWorkDyn` is the object-safe mirror with a boxed future
//! 2. every `StepWork` gets `StepWorkDyn` through a blanket impl
//! 3. `BoxStepWork` wraps `Box<dyn StepWorkDyn>` and delegates

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use thiserror::Error;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Failure of a single step invocation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StepError {
    /// The work unit reported a failure.
    #[error("{0}")]
    Failed(String),

    /// An attempt did not finish within its timeout.
    #[error("step timeout after {}ms", after.as_millis())]
    Timeout { after: Duration },

    /// The work unit succeeded but its result was rejected by the validator.
    #[error("Result validation failed")]
    ValidationFailed,

    /// No work unit is registered under the step's name.
    #[error("no work unit registered for step '{0}'")]
    NoWorkUnit(String),

    /// The task running the step panicked or was aborted.
    #[error("step task failed: {0}")]
    Join(String),
}

impl StepError {
    /// Convenience constructor for work units reporting a plain message.
    pub fn failed(message: impl Into<String>) -> Self {
        StepError::Failed(message.into())
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, StepError::Timeout { .. })
    }
}

/// Predicate applied to a successful result. Returning `false` fails the attempt.
pub type Validator = Arc<dyn Fn(&Value) -> bool + Send + Sync>;

// ---------------------------------------------------------------------------
// StepWork
// ---------------------------------------------------------------------------

/// A step body. Invoked once per attempt; must be safe to call repeatedly.
pub trait StepWork: Send + Sync {
    fn run(&self) -> impl Future<Output = Result<Value, StepError>> + Send;
}

/// Object-safe version of [`StepWork`] with a boxed future.
pub trait StepWorkDyn: Send + Sync {
    fn run_boxed(&self) -> Pin<Box<dyn Future<Output = Result<Value, StepError>> + Send + '_>>;
}

impl<T: StepWork> StepWorkDyn for T {
    fn run_boxed(&self) -> Pin<Box<dyn Future<Output = Result<Value, StepError>> + Send + '_>> {
        Box::pin(self.run())
    }
}

/// Type-erased work unit, stored in the engine's step registry.
pub struct BoxStepWork {
    inner: Box<dyn StepWorkDyn + Send + Sync>,
}

impl BoxStepWork {
    pub fn new<T: StepWork + 'static>(work: T) -> Self {
        Self {
            inner: Box::new(work),
        }
    }
}

impl StepWork for BoxStepWork {
    fn run(&self) -> impl Future<Output = Result<Value, StepError>> + Send {
        self.inner.run_boxed()
    }
}

impl std::fmt::Debug for BoxStepWork {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoxStepWork").finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Closure adapter
// ---------------------------------------------------------------------------

/// Adapts an async closure into a [`StepWork`].
pub struct FnStep<F>(F);

impl<F, Fut> StepWork for FnStep<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, StepError>> + Send,
{
    fn run(&self) -> impl Future<Output = Result<Value, StepError>> + Send {
        (self.0)()
    }
}

/// Wrap `f` as a work unit. `f` is called once per attempt.
pub fn fn_step<F, Fut>(f: F) -> FnStep<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, StepError>> + Send,
{
    FnStep(f)
}
