//! Generation guard around a live execution context.
//!
//! Every [`run`](EpochGuard::run) builds a fresh context and stamps it with
//! the current generation. A [`reset`](EpochGuard::reset) bumps the
//! generation, so every [`Scoped`] handle issued for the old context starts
//! failing with [`Cancelled::Closed`] instead of reaching stale state.
//!
//! ```text
//!            reset()                run()
//!  Settled ──────────► Pending ──────────────► Settled
//!     ▲   gen += 1        │   build ctx, init      │
//!     │   on_reset(old)   │                        │
//!     └───────────────────┴────────────────────────┘
//!        reset() while Pending is a no-op
//!        run() while Settled is a no-op
//! ```

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tracing::debug;

use crate::error::Cancelled;
use crate::lock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// The last run completed; a reset is allowed.
    Settled,
    /// A reset happened and the next run has not completed yet.
    Pending,
}

struct Inner<C> {
    phase: Phase,
    context: Option<Arc<C>>,
}

/// Owns the live context and the generation counter.
pub struct EpochGuard<C> {
    generation: Arc<AtomicU64>,
    inner: Mutex<Inner<C>>,
}

/// A context handle bound to the generation it was issued for.
pub struct Scoped<C> {
    context: Arc<C>,
    generation: u64,
    live: Arc<AtomicU64>,
}

impl<C> Scoped<C> {
    /// Access the context, or fail if it has been superseded by a reset.
    pub fn get(&self) -> Result<&C, Cancelled> {
        if self.is_live() {
            Ok(&self.context)
        } else {
            Err(Cancelled::Closed)
        }
    }

    /// Returns true while no reset has happened since this handle's run.
    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::Acquire) == self.generation
    }

    /// The generation this handle belongs to.
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

impl<C> Clone for Scoped<C> {
    fn clone(&self) -> Self {
        Self {
            context: self.context.clone(),
            generation: self.generation,
            live: self.live.clone(),
        }
    }
}

impl<C> std::fmt::Debug for Scoped<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scoped")
            .field("generation", &self.generation)
            .field("live", &self.is_live())
            .finish()
    }
}

impl<C> EpochGuard<C> {
    /// Create a settled guard with no context. The first
    /// [`reset`](Self::reset) arms it for a run.
    pub fn new() -> Self {
        Self {
            generation: Arc::new(AtomicU64::new(0)),
            inner: Mutex::new(Inner {
                phase: Phase::Settled,
                context: None,
            }),
        }
    }

    /// Invalidate the live context and call `on_reset` with it.
    ///
    /// No-op returning false if a reset is already pending.
    pub fn reset<F>(&self, on_reset: F) -> bool
    where
        F: FnOnce(Option<&C>),
    {
        let previous = {
            let mut inner = lock(&self.inner);
            if inner.phase == Phase::Pending {
                return false;
            }
            inner.phase = Phase::Pending;
            self.generation.fetch_add(1, Ordering::AcqRel);
            inner.context.clone()
        };

        debug!(generation = self.generation(), "epoch reset");
        on_reset(previous.as_deref());
        true
    }

    /// Build a fresh live context and hand `init` a handle bound to it.
    ///
    /// No-op returning `None` if the guard is already settled.
    pub fn run<B, I, R>(&self, build: B, init: I) -> Option<R>
    where
        B: FnOnce() -> C,
        I: FnOnce(Scoped<C>) -> R,
    {
        let scoped = self.install(build)?;
        let result = init(scoped);
        self.settle();
        Some(result)
    }

    /// Like [`run`](Self::run) with an asynchronous `init`; the guard
    /// settles once `init` completes.
    pub async fn run_async<B, I, Fut>(&self, build: B, init: I) -> Option<Fut::Output>
    where
        B: FnOnce() -> C,
        I: FnOnce(Scoped<C>) -> Fut,
        Fut: Future,
    {
        let scoped = self.install(build)?;
        let result = init(scoped).await;
        self.settle();
        Some(result)
    }

    /// A handle to the current context, if one has been built.
    ///
    /// After a reset the handle exists but fails on access until the next
    /// run replaces the context.
    pub fn current(&self) -> Option<Scoped<C>> {
        let inner = lock(&self.inner);
        inner.context.clone().map(|context| Scoped {
            context,
            generation: self.generation(),
            live: self.generation.clone(),
        })
    }

    /// The live generation.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    pub fn phase(&self) -> Phase {
        lock(&self.inner).phase
    }

    fn install<B>(&self, build: B) -> Option<Scoped<C>>
    where
        B: FnOnce() -> C,
    {
        let mut inner = lock(&self.inner);
        if inner.phase == Phase::Settled {
            return None;
        }

        let context = Arc::new(build());
        inner.context = Some(context.clone());
        Some(Scoped {
            context,
            generation: self.generation(),
            live: self.generation.clone(),
        })
    }

    fn settle(&self) {
        lock(&self.inner).phase = Phase::Settled;
    }
}

impl<C> Default for EpochGuard<C> {
    fn default() -> Self {
        Self::new()
    }
}
