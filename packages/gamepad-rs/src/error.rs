//! Structured error types and cancellation signals for gamepad.
//!
//! Two very different kinds of failure travel through the engine:
//!
//! - [`Cancelled`] is **control flow**, not failure. The worker raises it to
//!   the step source that is awaiting a step to say "stop what you are
//!   doing": the engine was reset (`Closed`), the level ended (`Finished`),
//!   or every level ended (`Completed`). Callers swallow it.
//! - Everything else is a genuine fault. User code (step handlers, games)
//!   reports faults as `anyhow::Error`; the worker logs them with the
//!   offending step's id and method and hands them back as
//!   [`StepError::Fault`].
//!
//! # The Swallow Rule
//!
//! > **A cancellation never escapes the scope that expects it.**
//!
//! ```ignore
//! match source.submit(Request::new("MOVE", vec![json!(1)], "b1")).await {
//!     Ok(value) => { /* the handler's return value */ }
//!     Err(StepError::Cancelled(c)) if c.is_expected_by(Scope::Level) => return Ok(()),
//!     Err(e) => return Err(e.into()),
//! }
//! ```

use std::fmt;

use thiserror::Error;

// =============================================================================
// Cancellation
// =============================================================================

/// Control-flow signals raised from the engine to the step source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum Cancelled {
    /// The engine was reset while the call was in flight. The caller must
    /// abandon its remaining work silently.
    #[error("CLOSED")]
    Closed,

    /// The current level ended. The caller must abandon the remaining steps
    /// of this level only.
    #[error("FINISHED")]
    Finished,

    /// Every level ended. The caller must abandon everything; the engine
    /// will not accept further steps.
    #[error("COMPLETED")]
    Completed,
}

/// How far up a step source a cancellation is allowed to travel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    /// The body of a single level.
    Level,
    /// The whole program (every level).
    Program,
}

impl Cancelled {
    /// Returns true when a caller at `scope` must swallow this signal.
    ///
    /// `Closed` is expected everywhere. `Finished` ends a level, so only the
    /// level scope handles it. `Completed` ends the program.
    pub fn is_expected_by(&self, scope: Scope) -> bool {
        match (self, scope) {
            (Cancelled::Closed, _) => true,
            (Cancelled::Finished, Scope::Level) => true,
            (Cancelled::Completed, Scope::Program) => true,
            _ => false,
        }
    }
}

// =============================================================================
// Step Errors
// =============================================================================

/// What a step submission resolves to when it does not produce a value.
#[derive(Debug, Error)]
pub enum StepError {
    /// Expected control flow: see [`Cancelled`].
    #[error(transparent)]
    Cancelled(#[from] Cancelled),

    /// The step handler failed while executing this step.
    #[error("step {id} ({method}) failed: {message}")]
    Fault {
        /// Id of the offending step.
        id: String,
        /// Method of the offending step.
        method: String,
        /// Rendered error chain of the handler failure.
        message: String,
    },
}

impl StepError {
    /// Returns the cancellation signal, if this is one.
    pub fn cancelled(&self) -> Option<Cancelled> {
        match self {
            StepError::Cancelled(c) => Some(*c),
            StepError::Fault { .. } => None,
        }
    }

    /// Returns true when a caller at `scope` must swallow this error.
    pub fn is_expected_by(&self, scope: Scope) -> bool {
        self.cancelled()
            .map(|c| c.is_expected_by(scope))
            .unwrap_or(false)
    }
}

// =============================================================================
// Tree Errors
// =============================================================================

/// Errors from the tracked state tree.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TreeError {
    /// The handle points at a container that was replaced or removed.
    #[error("tracked handle has been revoked")]
    Revoked,

    /// Only objects and arrays can be observed.
    #[error("observable may only be created from an object or an array, found {found}")]
    NotObservable {
        /// JSON type name of the rejected value.
        found: &'static str,
    },

    /// The operation needs an array.
    #[error("operation requires an array")]
    NotAnArray,

    /// The key kind does not fit the container (field on an array, index on an object).
    #[error("key {key} does not address a {container}")]
    KeyMismatch {
        /// Rendered key.
        key: String,
        /// "object" or "array".
        container: &'static str,
    },

    /// An array index past the end.
    #[error("index {index} out of bounds for length {len}")]
    IndexOutOfBounds {
        /// Requested index.
        index: usize,
        /// Array length at the time of the call.
        len: usize,
    },

    /// A path segment does not resolve to a container.
    #[error("path {path} does not resolve to a container")]
    InvalidPath {
        /// Rendered path.
        path: String,
    },
}

// =============================================================================
// Gamepad Errors
// =============================================================================

/// Errors surfaced immediately to a caller that misused the public API.
#[derive(Debug, Error)]
pub enum GamepadError {
    /// A required argument is missing or has the wrong shape.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The call hit a reset or a level boundary.
    #[error(transparent)]
    Cancelled(#[from] Cancelled),

    /// The tracked tree rejected the operation.
    #[error(transparent)]
    Tree(#[from] TreeError),
}

impl GamepadError {
    pub(crate) fn invalid(message: impl fmt::Display) -> Self {
        GamepadError::InvalidArgument(message.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancellation_display_matches_signal_names() {
        assert_eq!(Cancelled::Closed.to_string(), "CLOSED");
        assert_eq!(Cancelled::Finished.to_string(), "FINISHED");
        assert_eq!(Cancelled::Completed.to_string(), "COMPLETED");
    }

    #[test]
    fn test_scopes_swallow_their_own_signals() {
        assert!(Cancelled::Closed.is_expected_by(Scope::Level));
        assert!(Cancelled::Closed.is_expected_by(Scope::Program));
        assert!(Cancelled::Finished.is_expected_by(Scope::Level));
        assert!(!Cancelled::Finished.is_expected_by(Scope::Program));
        assert!(Cancelled::Completed.is_expected_by(Scope::Program));
        assert!(!Cancelled::Completed.is_expected_by(Scope::Level));
    }

    #[test]
    fn test_faults_are_never_expected() {
        let err = StepError::Fault {
            id: "b1".into(),
            method: "MOVE".into(),
            message: "boom".into(),
        };
        assert!(!err.is_expected_by(Scope::Level));
        assert!(!err.is_expected_by(Scope::Program));
        assert_eq!(err.to_string(), "step b1 (MOVE) failed: boom");
    }

    #[test]
    fn test_step_error_from_cancellation() {
        let err: StepError = Cancelled::Finished.into();
        assert_eq!(err.cancelled(), Some(Cancelled::Finished));
        assert!(err.is_expected_by(Scope::Level));
    }
}
