//! Step taps: observe every step the coordinator forwards to the game,
//! without deciding anything or mutating state.
//!
//! The typical tap highlights the step's id in whatever displays the
//! program. Taps run inline, before the game sees the step, in the order
//! they were registered.
//!
//! # Example
//!
//! ```ignore
//! use gamepad::{StepTap, TapContext, Request};
//!
//! struct Highlight;
//!
//! impl StepTap for Highlight {
//!     fn on_step(&self, request: &Request, ctx: &TapContext) -> anyhow::Result<()> {
//!         println!("{} {}", if ctx.back { "<-" } else { "->" }, request.id());
//!         Ok(())
//!     }
//! }
//! ```

use std::time::Instant;

use anyhow::Result;
use tracing::warn;

use crate::request::Request;

/// Context provided to step taps.
#[derive(Debug, Clone, Copy)]
pub struct TapContext {
    /// The step runs backward.
    pub back: bool,
    /// The step is replayed from history.
    pub replay: bool,
    /// When the coordinator received the step.
    pub timestamp: Instant,
}

impl TapContext {
    pub fn new(back: bool, replay: bool) -> Self {
        Self {
            back,
            replay,
            timestamp: Instant::now(),
        }
    }
}

/// Observes steps.
///
/// Errors are logged but never affect the flow.
pub trait StepTap: Send + Sync + 'static {
    fn on_step(&self, request: &Request, ctx: &TapContext) -> Result<()>;
}

impl<F> StepTap for F
where
    F: Fn(&Request, &TapContext) -> Result<()> + Send + Sync + 'static,
{
    fn on_step(&self, request: &Request, ctx: &TapContext) -> Result<()> {
        self(request, ctx)
    }
}

struct NamedTap {
    name: &'static str,
    tap: Box<dyn StepTap>,
}

/// Ordered set of step taps.
#[derive(Default)]
pub struct TapRegistry {
    taps: Vec<NamedTap>,
}

impl TapRegistry {
    pub fn new() -> Self {
        Self { taps: Vec::new() }
    }

    /// Register a tap under a name used in failure logs.
    pub fn register<T: StepTap>(&mut self, tap: T, name: &'static str) {
        self.taps.push(NamedTap {
            name,
            tap: Box::new(tap),
        });
    }

    /// Run every tap for one step.
    pub fn run_all(&self, request: &Request, ctx: &TapContext) {
        for entry in &self.taps {
            if let Err(e) = entry.tap.on_step(request, ctx) {
                warn!(
                    tap = entry.name,
                    id = request.id(),
                    error = %e,
                    "tap failed"
                );
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.taps.is_empty()
    }

    pub fn len(&self) -> usize {
        self.taps.len()
    }
}

impl std::fmt::Debug for TapRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TapRegistry")
            .field("taps", &self.taps.iter().map(|t| t.name).collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_taps_run_in_order_and_failures_are_contained() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut registry = TapRegistry::new();

        registry.register(
            |_: &Request, _: &TapContext| -> Result<()> { anyhow::bail!("display gone") },
            "broken",
        );
        registry.register(
            {
                let seen = seen.clone();
                move |request: &Request, ctx: &TapContext| -> Result<()> {
                    seen.lock().unwrap().push((request.id().to_string(), ctx.back));
                    Ok(())
                }
            },
            "recorder",
        );

        registry.run_all(&Request::new("MOVE", vec![], "b1"), &TapContext::new(false, false));
        registry.run_all(&Request::new("MOVE", vec![], "b1"), &TapContext::new(true, true));

        assert_eq!(registry.len(), 2);
        assert_eq!(
            *seen.lock().unwrap(),
            vec![("b1".to_string(), false), ("b1".to_string(), true)]
        );
    }

    #[test]
    fn test_context_timestamp() {
        let ctx = TapContext::new(false, true);
        assert!(ctx.replay);
        assert!(ctx.timestamp.elapsed().as_secs() < 1);
    }
}
