//! The step handler seam: where step semantics live.

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;

use crate::request::Request;

/// What a handler reports after executing a step.
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    /// Forward this value to the step source.
    Return(Value),
    /// The current level ended.
    Finished,
    /// Every level ended.
    Completed,
}

impl StepOutcome {
    /// A `Return` carrying `null`.
    pub fn none() -> Self {
        StepOutcome::Return(Value::Null)
    }

    /// Interpret a loosely typed handler result.
    ///
    /// `{"finished": true}` and `{"completed": true}` are the lifecycle
    /// signals; any other shape is an opaque return value.
    pub fn from_json(value: Value) -> Self {
        let flag = |name: &str| value.get(name).and_then(Value::as_bool).unwrap_or(false);
        if flag("finished") {
            StepOutcome::Finished
        } else if flag("completed") {
            StepOutcome::Completed
        } else {
            StepOutcome::Return(value)
        }
    }
}

impl From<Value> for StepOutcome {
    fn from(value: Value) -> Self {
        StepOutcome::from_json(value)
    }
}

/// Executes steps on behalf of the engine.
///
/// `back` is the direction; `replay` is true when the step was already
/// executed once and is being replayed from history. Fresh steps are always
/// forward. Errors are genuine faults: the engine logs them with the step's
/// id and method and stops.
///
/// # Example
///
/// ```ignore
/// struct Counter(AtomicI64);
///
/// #[async_trait]
/// impl StepHandler for Counter {
///     async fn manage(&self, request: &Request, back: bool, _replay: bool) -> Result<StepOutcome> {
///         let delta = if back { -1 } else { 1 };
///         let n = self.0.fetch_add(delta, Ordering::SeqCst) + delta;
///         Ok(if n == 3 { StepOutcome::Finished } else { StepOutcome::Return(json!(n)) })
///     }
/// }
/// ```
#[async_trait]
pub trait StepHandler: Send + Sync + 'static {
    async fn manage(&self, request: &Request, back: bool, replay: bool) -> Result<StepOutcome>;
}

/// Plain functions and closures are synchronous handlers.
#[async_trait]
impl<F> StepHandler for F
where
    F: Fn(&Request, bool, bool) -> Result<StepOutcome> + Send + Sync + 'static,
{
    async fn manage(&self, request: &Request, back: bool, replay: bool) -> Result<StepOutcome> {
        self(request, back, replay)
    }
}
