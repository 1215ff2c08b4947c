//! # Gamepad
//!
//! A stepwise execution engine with exact replay: a program submits atomic
//! steps, the engine executes them one at a time, records them, and can walk
//! back and forth over the recorded history while a change-tracked state
//! tree follows along.
//!
//! ## Core Concepts
//!
//! Gamepad separates **who produces steps** from **who decides when they
//! run**:
//! - [`StepSource`] = the program (submits steps and waits for each one)
//! - [`Worker`] = the engine (decides direction, pacing and replay)
//! - [`StepHandler`] = the game (gives each step its meaning)
//!
//! The key principle: **Every step runs exactly once fresh; everything
//! after that is replay.**
//!
//! ## Architecture
//!
//! ```text
//! Step source (program)
//!     │
//!     ▼ submit()
//! requests mailbox ─────────────────────────────┐
//!                                               │
//! forward() / backward() / play() / debug()     │
//!     │                                         │
//!     ▼                                         ▼
//! navigation mailbox ──► Worker loop ──► History (cursor)
//!                             │
//!                             ▼ manage(request, back, replay)
//!                        Coordinator
//!                             │
//!          ┌──────────────────┼──────────────────┐
//!          ▼                  ▼                  ▼
//!     Step taps        Level stores            Game
//!                   (commit / undo / redo)
//!                             │
//!                             ▼
//!                      ChangeFeed (batches)
//! ```
//!
//! ## Key Invariants
//!
//! 1. **One step in flight** - The handler never sees two steps at once
//! 2. **History is linear** - Adding after stepping back drops the redo branch
//! 3. **Replay is exact** - N steps forward then N back restores the tree bit for bit
//! 4. **Resets are total** - Every waiter of a reset epoch resolves, nothing hangs
//! 5. **Cancellations are not faults** - `Closed`, `Finished` and `Completed` are swallowed by the scope that expects them
//!
//! ## Example
//!
//! ```ignore
//! use gamepad::{program, Gamepad, Levels, Request, StepHandler, StepOutcome};
//! use serde_json::json;
//!
//! // 1. Levels are JSON trees, one store each
//! let levels = Levels::new(json!([{ "n": 0 }, { "n": 0 }]))?;
//!
//! // 2. The game gives steps their meaning
//! struct Counter { levels: Levels }
//!
//! #[async_trait::async_trait]
//! impl StepHandler for Counter {
//!     async fn manage(&self, request: &Request, _back: bool, replay: bool) -> anyhow::Result<StepOutcome> {
//!         if !replay && request.is("ADD") {
//!             self.levels.with_store(|store| {
//!                 let tree = store.tree_mut();
//!                 let n = tree.get(tree.root(), "n")?.and_then(|v| v.as_i64()).unwrap_or(0);
//!                 tree.set(tree.root(), "n", json!(n + 1))
//!             });
//!         }
//!         Ok(StepOutcome::none())
//!     }
//! }
//!
//! // 3. Wire together
//! let gamepad = Gamepad::builder()
//!     .with_levels(levels.clone())
//!     .with_game(Counter { levels })
//!     .build()?;
//!
//! // 4. Load the program and drive it
//! let source = gamepad.load(2)?;
//! tokio::spawn(async move {
//!     program::run(&source.clone(), 2, |_| {
//!         let source = source.clone();
//!         async move {
//!             source.submit(Request::new("ADD", vec![], "b1")).await?;
//!             Ok(())
//!         }
//!     })
//!     .await
//! });
//!
//! gamepad.forward().await;   // STARTED
//! gamepad.forward().await;   // ADD
//! gamepad.backward().await;  // undo ADD
//! ```
//!
//! ## What This Is Not
//!
//! Gamepad is **not**:
//! - A code generator (steps come from any step source)
//! - A renderer (consumers subscribe to change feeds)
//! - Persistent (history lives in memory)

use std::sync::{Mutex, MutexGuard};

use tracing::warn;

// Primitives
mod breakpoint;
mod deferred;
mod epoch;
mod error;
mod history;
mod mailbox;

// State tree
mod change;
mod manager;
mod store;
mod tree;

// Engine
mod config;
mod gamepad;
mod handler;
mod request;
mod tap;
mod worker;

// Program driver
pub mod program;

// Testing utilities (feature-gated)
#[cfg(feature = "testing")]
pub mod testing;


// Re-export primitives
pub use breakpoint::{Breakpoint, BreakpointHit};
pub use deferred::Deferred;
pub use epoch::{EpochGuard, Phase, Scoped};
pub use history::History;
pub use mailbox::Mailbox;

// Re-export error types
pub use error::{Cancelled, GamepadError, Scope, StepError, TreeError};

// Re-export state tree types
pub use change::{render_path, BatchKind, Change, ChangeBatch, ChangeKind, Key};
pub use manager::{Levels, StoreManager};
pub use store::{ChangeFeed, Store};
pub use tree::{compare_values, NodeId, TrackedTree};

// Re-export request types
pub use request::{is_lifecycle, Request, COMPLETED, FINISHED, STARTED};

// Re-export handler and tap types
pub use handler::{StepHandler, StepOutcome};
pub use tap::{StepTap, TapContext, TapRegistry};

// Re-export engine types (primary entry point)
pub use config::GamepadConfig;
pub use gamepad::{Gamepad, GamepadBuilder, Lifecycle};
pub use worker::{StepSource, Worker, WorkerBuilder};

// Re-export commonly used external types
pub use async_trait::async_trait;

/// Lock a mutex, recovering the guard if a panicking holder poisoned it.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            warn!("mutex was poisoned, recovering");
            poisoned.into_inner()
        }
    }
}
