//! Testing utilities for gamepad handlers and step sources.
//!
//! # Feature Flag
//!
//! This module is only available with the `testing` feature:
//!
//! ```toml
//! [dev-dependencies]
//! gamepad = { version = "0.1", features = ["testing"] }
//! ```
//!
//! # Quick Start
//!
//! ```ignore
//! use gamepad::testing::{RecordingHandler, StepLatch};
//!
//! let latch = StepLatch::shared(3);
//! let handler = RecordingHandler::new()
//!     .finish_on("END")
//!     .with_latch(latch.clone())
//!     .shared();
//!
//! let worker = Worker::builder().with_shared_handler(handler.clone()).build()?;
//! worker.reset();
//! worker.start(false);
//!
//! latch.await_zero().await;  // Wait for 3 handler calls
//! assert_eq!(handler.ids(), vec!["STARTED", "a", "b"]);
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Notify;

use crate::handler::{StepHandler, StepOutcome};
use crate::lock;
use crate::request::Request;

/// One handler invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    pub request: Request,
    pub back: bool,
    pub replay: bool,
}

/// A step handler that records every call and answers from a script.
///
/// Unscripted methods return their request id as a JSON string.
#[derive(Default)]
pub struct RecordingHandler {
    calls: Mutex<Vec<RecordedCall>>,
    outcomes: HashMap<String, StepOutcome>,
    faults: HashMap<String, String>,
    latch: Option<Arc<StepLatch>>,
}

impl RecordingHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer fresh `method` steps with `outcome`.
    pub fn respond(mut self, method: impl Into<String>, outcome: StepOutcome) -> Self {
        self.outcomes.insert(method.into(), outcome);
        self
    }

    /// Shorthand for ending the level on `method`.
    pub fn finish_on(self, method: impl Into<String>) -> Self {
        self.respond(method, StepOutcome::Finished)
    }

    /// Shorthand for ending the program on `method`.
    pub fn complete_on(self, method: impl Into<String>) -> Self {
        self.respond(method, StepOutcome::Completed)
    }

    /// Fail every `method` step with `message`.
    pub fn fail_on(mut self, method: impl Into<String>, message: impl Into<String>) -> Self {
        self.faults.insert(method.into(), message.into());
        self
    }

    /// Count every call down on `latch`.
    pub fn with_latch(mut self, latch: Arc<StepLatch>) -> Self {
        self.latch = Some(latch);
        self
    }

    /// Wrap in an `Arc` for sharing with a worker.
    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        lock(&self.calls).clone()
    }

    /// Ids of every call, in order.
    pub fn ids(&self) -> Vec<String> {
        lock(&self.calls)
            .iter()
            .map(|call| call.request.id().to_string())
            .collect()
    }

    pub fn call_count(&self) -> usize {
        lock(&self.calls).len()
    }
}

#[async_trait]
impl StepHandler for RecordingHandler {
    async fn manage(&self, request: &Request, back: bool, replay: bool) -> Result<StepOutcome> {
        lock(&self.calls).push(RecordedCall {
            request: request.clone(),
            back,
            replay,
        });
        if let Some(latch) = &self.latch {
            latch.dec();
        }

        if let Some(message) = self.faults.get(request.method()) {
            anyhow::bail!("{message}");
        }
        if replay {
            return Ok(StepOutcome::none());
        }
        Ok(self
            .outcomes
            .get(request.method())
            .cloned()
            .unwrap_or_else(|| StepOutcome::Return(Value::String(request.id().to_string()))))
    }
}

/// A countdown latch for waiting on an exact number of handler calls.
///
/// Tests should wait for meaning, not time.
///
/// # Timeout Safety
///
/// For tests that might hang, use `tokio::time::timeout`:
///
/// ```ignore
/// timeout(Duration::from_secs(5), latch.await_zero())
///     .await
///     .expect("latch timed out");
/// ```
#[derive(Debug)]
pub struct StepLatch {
    remaining: AtomicUsize,
    notify: Notify,
}

impl StepLatch {
    /// Create a new latch expecting `expected` calls.
    pub fn new(expected: usize) -> Self {
        Self {
            remaining: AtomicUsize::new(expected),
            notify: Notify::new(),
        }
    }

    /// Create a shared latch.
    pub fn shared(expected: usize) -> Arc<Self> {
        Arc::new(Self::new(expected))
    }

    /// Decrement the remaining count. Calls past zero are ignored.
    pub fn dec(&self) {
        let prev = self
            .remaining
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
        if prev == Ok(1) {
            self.notify.notify_waiters();
        }
    }

    /// Wait for the count to reach zero.
    pub async fn await_zero(&self) {
        loop {
            // Register for notification BEFORE checking count
            let notified = self.notify.notified();

            if self.remaining.load(Ordering::Acquire) == 0 {
                return;
            }

            notified.await;
        }
    }

    pub fn remaining(&self) -> usize {
        self.remaining.load(Ordering::Acquire)
    }

    pub fn is_complete(&self) -> bool {
        self.remaining() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::{FINISHED, STARTED};
    use crate::worker::Worker;
    use serde_json::json;
    use std::time::Duration;

    #[tokio::test]
    async fn test_recording_handler_scripts_outcomes() {
        let handler = RecordingHandler::new()
            .respond("ASK", StepOutcome::Return(json!(42)))
            .finish_on("LAST")
            .fail_on("BAD", "nope");

        let ask = Request::new("ASK", vec![], "q");
        assert_eq!(handler.manage(&ask, false, false).await.unwrap(), StepOutcome::Return(json!(42)));
        assert_eq!(handler.manage(&ask, true, true).await.unwrap(), StepOutcome::none());

        let last = Request::new("LAST", vec![], "l");
        assert_eq!(handler.manage(&last, false, false).await.unwrap(), StepOutcome::Finished);

        let bad = Request::new("BAD", vec![], "b");
        assert_eq!(handler.manage(&bad, false, false).await.unwrap_err().to_string(), "nope");

        let other = Request::new("MOVE", vec![], "m");
        assert_eq!(handler.manage(&other, false, false).await.unwrap(), StepOutcome::Return(json!("m")));

        assert_eq!(handler.ids(), vec!["q", "q", "l", "b", "m"]);
        assert!(handler.calls()[1].back);
    }

    #[tokio::test]
    async fn test_latch_waits_for_worker_steps() {
        let latch = StepLatch::shared(2);
        let handler = RecordingHandler::new()
            .finish_on("MOVE")
            .with_latch(latch.clone())
            .shared();
        let worker = Worker::builder()
            .with_shared_handler(handler.clone())
            .build()
            .unwrap();
        worker.reset();
        let source = worker.instance().unwrap();

        tokio::spawn({
            let source = source.clone();
            async move {
                let _ = source.submit(Request::new("MOVE", vec![], "a")).await;
                let _ = source.submit(Request::lifecycle(FINISHED)).await;
                let _ = source.submit(Request::lifecycle(STARTED)).await;
            }
        });
        worker.start(false);

        tokio::time::timeout(Duration::from_secs(5), latch.await_zero())
            .await
            .expect("latch timed out");
        // The stale FINISHED never reaches the handler
        assert_eq!(handler.ids(), vec!["a", STARTED]);
    }

    #[test]
    fn test_latch_saturates_at_zero() {
        let latch = StepLatch::new(1);
        latch.dec();
        latch.dec();
        assert!(latch.is_complete());
    }
}
