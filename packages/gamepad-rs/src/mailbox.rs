//! Asynchronous single-slot handoff between producers and one consuming loop.
//!
//! # Guarantees
//!
//! - **FIFO**: items set while nobody waits queue up and come out in order
//! - **Broadcast wake, exclusive item**: every suspended [`get`](Mailbox::get)
//!   wakes on the next event, but each item is handed to exactly one caller
//! - **Close is sticky**: while closed, every `get` resolves to `None` at once
//! - **Reset cancels**: a `get` suspended across [`reset`](Mailbox::reset)
//!   fails with [`Cancelled::Closed`] instead of resolving to `None`

use std::collections::VecDeque;
use std::sync::Mutex;

use tracing::debug;

use crate::deferred::Deferred;
use crate::error::Cancelled;
use crate::lock;

/// Event a suspended getter wakes up on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Wake {
    Item,
    Closed,
    Reset,
}

struct State<T> {
    items: VecDeque<T>,
    closed: bool,
    listener: Deferred<Wake>,
}

impl<T> State<T> {
    /// Wake every current getter with `wake` and arm a fresh listener for
    /// later callers.
    fn wake(&mut self, wake: Wake) {
        let listener = std::mem::take(&mut self.listener);
        listener.resolve(wake);
    }
}

/// An asynchronous queue drained by a single logical consumer.
///
/// # Example
///
/// ```ignore
/// let mailbox = Mailbox::new();
/// mailbox.set(1);
/// mailbox.set(2);
///
/// assert_eq!(mailbox.get().await?, Some(1));
/// mailbox.close();
/// assert_eq!(mailbox.get().await?, None);
/// ```
pub struct Mailbox<T> {
    state: Mutex<State<T>>,
}

impl<T> Mailbox<T> {
    /// Create an open, empty mailbox.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                items: VecDeque::new(),
                closed: false,
                listener: Deferred::new(),
            }),
        }
    }

    /// Enqueue an item and wake the waiting getters.
    pub fn set(&self, item: T) {
        let mut state = lock(&self.state);
        state.items.push_back(item);
        state.wake(Wake::Item);
    }

    /// Take the next item, suspending until one is available.
    ///
    /// Resolves to `None` while the mailbox is closed (including a close
    /// that happens during the wait). Fails with [`Cancelled::Closed`] if
    /// the mailbox is reset during the wait.
    pub async fn get(&self) -> Result<Option<T>, Cancelled> {
        loop {
            let listener = {
                let mut state = lock(&self.state);
                if state.closed {
                    return Ok(None);
                }
                if let Some(item) = state.items.pop_front() {
                    return Ok(Some(item));
                }
                state.listener.clone()
            };

            match listener.wait().await {
                Wake::Item => continue,
                Wake::Closed => return Ok(None),
                Wake::Reset => return Err(Cancelled::Closed),
            }
        }
    }

    /// Make every current and future `get` resolve to `None`.
    pub fn close(&self) {
        let mut state = lock(&self.state);
        state.closed = true;
        state.wake(Wake::Closed);
    }

    /// Re-enable normal `get` behaviour after [`close`](Self::close).
    pub fn open(&self) {
        lock(&self.state).closed = false;
    }

    /// Returns true while the mailbox is closed.
    pub fn is_closed(&self) -> bool {
        lock(&self.state).closed
    }

    /// Discard every queued item and cancel the suspended getters.
    ///
    /// The mailbox is open and empty afterwards.
    pub fn reset(&self) {
        let mut state = lock(&self.state);
        let dropped = state.items.len();
        state.items.clear();
        state.closed = false;
        state.wake(Wake::Reset);
        if dropped > 0 {
            debug!(dropped, "mailbox reset discarded queued items");
        }
    }

    /// Release the suspended getters with `None` and hand back every
    /// queued item.
    ///
    /// The mailbox is open and empty afterwards.
    pub fn drain(&self) -> Vec<T> {
        let mut state = lock(&self.state);
        state.wake(Wake::Closed);
        state.closed = false;
        state.items.drain(..).collect()
    }

    /// Number of queued items.
    pub fn len(&self) -> usize {
        lock(&self.state).items.len()
    }

    /// Returns true when no item is queued.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> Default for Mailbox<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for Mailbox<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = lock(&self.state);
        f.debug_struct("Mailbox")
            .field("queued", &state.items.len())
            .field("closed", &state.closed)
            .finish()
    }
}
