//! A tracked tree plus its commit log.
//!
//! The store's invariant: the live tree always equals the initial tree plus
//! the forward replay of `commits[0..=cursor]`, plus whatever uncommitted
//! changes are pending in the tree's journal.
//!
//! # Guarantees of the change feed
//!
//! - **At-most-once delivery**: slow subscribers may miss batches
//! - **In-memory only**: batches are not persisted
//! - **No replay**: lagged subscribers get `RecvError::Lagged`

use serde_json::Value;
use tokio::sync::broadcast;
use tracing::debug;

use crate::change::{BatchKind, Change, ChangeBatch};
use crate::error::TreeError;
use crate::tree::TrackedTree;

/// Default channel capacity for a change feed.
const DEFAULT_CAPACITY: usize = 1024;

/// Broadcast of [`ChangeBatch`]es for one store.
#[derive(Clone)]
pub struct ChangeFeed {
    sender: broadcast::Sender<ChangeBatch>,
}

impl ChangeFeed {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Create a feed that buffers `capacity` batches before slow
    /// subscribers start lagging.
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Deliver a batch to every subscriber. Returns the number of receivers.
    pub fn publish(&self, batch: ChangeBatch) -> usize {
        self.sender.send(batch).unwrap_or(0)
    }

    /// Batches published after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<ChangeBatch> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for ChangeFeed {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ChangeFeed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeFeed")
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

/// One tracked tree with an undo/redo log of changesets.
#[derive(Debug)]
pub struct Store {
    tree: TrackedTree,
    commits: Vec<Vec<Change>>,
    cursor: isize,
    feed: ChangeFeed,
}

impl Store {
    /// Start tracking `value`, which must be an object or an array.
    pub fn new(value: Value) -> Result<Self, TreeError> {
        Ok(Self {
            tree: TrackedTree::observe(value)?,
            commits: Vec::new(),
            cursor: -1,
            feed: ChangeFeed::new(),
        })
    }

    /// Read access to the live tree.
    pub fn tree(&self) -> &TrackedTree {
        &self.tree
    }

    /// Write access to the live tree. Every mutation is journaled until
    /// the next [`commit`](Self::commit).
    pub fn tree_mut(&mut self) -> &mut TrackedTree {
        &mut self.tree
    }

    /// Close the open changeset and append it to the log, discarding any
    /// changesets after the cursor.
    ///
    /// Empty changesets are committed too, so the log stays in lockstep
    /// with the steps that produced it.
    pub fn commit(&mut self) {
        let changes = self.tree.take_changes();
        self.commits.truncate((self.cursor + 1) as usize);
        self.commits.push(changes.clone());
        self.cursor = self.commits.len() as isize - 1;

        debug!(cursor = self.cursor, changes = changes.len(), "store commit");
        self.publish(BatchKind::Commit, changes);
    }

    /// Reverse-apply and drop every uncommitted change.
    pub fn restore(&mut self) -> Result<(), TreeError> {
        let pending = self.tree.take_changes();
        for change in pending.iter().rev() {
            self.tree.revert_untracked(change)?;
        }
        self.publish(BatchKind::Restore, pending);
        Ok(())
    }

    /// Redo: restore, then forward-apply the next changeset, if any.
    ///
    /// Returns false when the cursor was already at the tail.
    pub fn load_changes(&mut self) -> Result<bool, TreeError> {
        self.restore()?;

        if self.cursor >= self.commits.len() as isize - 1 {
            return Ok(false);
        }
        self.cursor += 1;

        let index = self.cursor as usize;
        for change in &self.commits[index] {
            self.tree.apply_untracked(change)?;
        }

        debug!(cursor = self.cursor, "store redo");
        self.publish(BatchKind::Redo, self.commits[index].clone());
        Ok(true)
    }

    /// Undo: restore, then reverse-apply the current changeset in reverse
    /// order, if any.
    ///
    /// Returns false when the cursor was already before the first commit.
    pub fn unload_changes(&mut self) -> Result<bool, TreeError> {
        self.restore()?;

        let Ok(index) = usize::try_from(self.cursor) else {
            return Ok(false);
        };
        for change in self.commits[index].iter().rev() {
            self.tree.revert_untracked(change)?;
        }
        self.cursor -= 1;

        debug!(cursor = self.cursor, "store undo");
        self.publish(BatchKind::Undo, self.commits[index].clone());
        Ok(true)
    }

    /// Index of the current changeset, `-1` before the first.
    pub fn cursor(&self) -> isize {
        self.cursor
    }

    /// The committed changesets in order.
    pub fn commits(&self) -> &[Vec<Change>] {
        &self.commits
    }

    /// Batches delivered after each commit, undo, redo or restore that
    /// touched the tree.
    pub fn subscribe(&self) -> broadcast::Receiver<ChangeBatch> {
        self.feed.subscribe()
    }

    pub fn feed(&self) -> &ChangeFeed {
        &self.feed
    }

    fn publish(&self, kind: BatchKind, changes: Vec<Change>) {
        if !changes.is_empty() {
            self.feed.publish(ChangeBatch { kind, changes });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn set(store: &mut Store, field: &str, value: Value) {
        let tree = store.tree_mut();
        tree.set(tree.root(), field, value).unwrap();
    }

    #[test]
    fn test_commit_undo_redo_round_trip() {
        let mut store = Store::new(json!({"x": 0})).unwrap();
        set(&mut store, "x", json!(1));
        set(&mut store, "y", json!([1, 2]));
        store.commit();
        let committed = store.tree().snapshot();

        assert!(store.unload_changes().unwrap());
        assert_eq!(store.tree().snapshot(), json!({"x": 0}));
        assert!(store.load_changes().unwrap());
        assert_eq!(store.tree().snapshot(), committed);
    }

    #[test]
    fn test_two_undos_one_redo_lands_on_second_commit() {
        let mut store = Store::new(json!({"n": 0})).unwrap();
        let mut states = Vec::new();
        for n in 1..=3 {
            set(&mut store, "n", json!(n));
            store.commit();
            states.push(store.tree().snapshot());
        }

        store.unload_changes().unwrap();
        store.unload_changes().unwrap();
        store.load_changes().unwrap();

        assert_eq!(store.tree().snapshot(), states[1]);
        assert_eq!(store.cursor(), 1);
    }

    #[test]
    fn test_uncommitted_changes_are_restored_before_replay() {
        let mut store = Store::new(json!({"n": 0})).unwrap();
        set(&mut store, "n", json!(1));
        store.commit();

        set(&mut store, "n", json!(99));
        set(&mut store, "junk", json!(true));
        assert!(!store.load_changes().unwrap());
        assert_eq!(store.tree().snapshot(), json!({"n": 1}));
        assert!(store.tree().pending_changes().is_empty());
    }

    #[test]
    fn test_cursor_bounds() {
        let mut store = Store::new(json!([])).unwrap();
        assert!(!store.unload_changes().unwrap());
        assert_eq!(store.cursor(), -1);
        assert!(!store.load_changes().unwrap());
    }

    #[test]
    fn test_commit_after_undo_truncates_redo_log() {
        let mut store = Store::new(json!({"n": 0})).unwrap();
        for n in 1..=3 {
            set(&mut store, "n", json!(n));
            store.commit();
        }
        store.unload_changes().unwrap();
        store.unload_changes().unwrap();

        set(&mut store, "n", json!(10));
        store.commit();

        assert_eq!(store.commits().len(), 2);
        assert!(!store.load_changes().unwrap());
        assert_eq!(store.tree().snapshot(), json!({"n": 10}));
    }

    #[test]
    fn test_empty_changesets_are_committed() {
        let mut store = Store::new(json!({})).unwrap();
        store.commit();
        store.commit();
        assert_eq!(store.commits().len(), 2);
        assert_eq!(store.cursor(), 1);
    }

    #[tokio::test]
    async fn test_feed_delivers_batches() {
        let mut store = Store::new(json!({"n": 0})).unwrap();
        let mut rx = store.subscribe();

        set(&mut store, "n", json!(1));
        store.commit();
        store.commit();
        store.unload_changes().unwrap();
        store.unload_changes().unwrap();

        let commit = rx.recv().await.unwrap();
        assert_eq!(commit.kind, BatchKind::Commit);
        assert_eq!(commit.changes.len(), 1);

        // The empty commit and its undo publish nothing
        let undo = rx.recv().await.unwrap();
        assert_eq!(undo.kind, BatchKind::Undo);
        assert_eq!(undo.changes[0].old_value, Some(json!(0)));
        assert!(rx.try_recv().is_err());
    }
}
