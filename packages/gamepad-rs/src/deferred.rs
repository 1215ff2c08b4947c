//! One-shot settable values that can be awaited from many places.
//!
//! A [`Deferred`] starts pending, is resolved at most once, and then stays
//! resolved: every current and future [`wait`](Deferred::wait) observes the
//! same value. Clones share the same slot.

use std::sync::{Arc, Mutex};

use tokio::sync::Notify;

use crate::lock;

struct Slot<T> {
    value: Mutex<Option<T>>,
    notify: Notify,
}

/// A shared, resolve-once value.
pub struct Deferred<T> {
    slot: Arc<Slot<T>>,
}

impl<T: Clone> Deferred<T> {
    /// Create a pending deferred.
    pub fn new() -> Self {
        Self {
            slot: Arc::new(Slot {
                value: Mutex::new(None),
                notify: Notify::new(),
            }),
        }
    }

    /// Create a deferred that is already resolved with `value`.
    pub fn resolved(value: T) -> Self {
        let deferred = Self::new();
        deferred.resolve(value);
        deferred
    }

    /// Resolve with `value` and wake every waiter.
    ///
    /// Only the first resolution wins. Returns false if the deferred was
    /// already resolved.
    pub fn resolve(&self, value: T) -> bool {
        {
            let mut guard = lock(&self.slot.value);
            if guard.is_some() {
                return false;
            }
            *guard = Some(value);
        }
        self.slot.notify.notify_waiters();
        true
    }

    /// Returns the resolved value, if any, without waiting.
    pub fn peek(&self) -> Option<T> {
        lock(&self.slot.value).clone()
    }

    /// Returns true until the first resolution.
    pub fn is_pending(&self) -> bool {
        self.peek().is_none()
    }

    /// Wait for the resolution.
    ///
    /// Returns immediately if the deferred is already resolved.
    pub async fn wait(&self) -> T {
        loop {
            // Register before checking so a resolve in between is not lost
            let notified = self.slot.notify.notified();

            if let Some(value) = self.peek() {
                return value;
            }

            notified.await;
        }
    }

    /// Returns true when both handles share the same slot.
    pub fn same_as(&self, other: &Deferred<T>) -> bool {
        Arc::ptr_eq(&self.slot, &other.slot)
    }
}

impl<T: Clone> Default for Deferred<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for Deferred<T> {
    fn clone(&self) -> Self {
        Self {
            slot: self.slot.clone(),
        }
    }
}

impl<T: Clone + std::fmt::Debug> std::fmt::Debug for Deferred<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Deferred")
            .field("value", &self.peek())
            .finish()
    }
}
