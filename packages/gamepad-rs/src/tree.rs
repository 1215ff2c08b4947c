//! Change-tracking JSON tree.
//!
//! [`TrackedTree::observe`] takes ownership of a JSON object or array and
//! splits it into an arena of containers. Every object and array reachable
//! from the root becomes its own node with a stable [`NodeId`]; scalars are
//! stored inline. Mutations go through the tree's methods, which record one
//! or more [`Change`]s in a journal that the owning store drains on commit.
//!
//! # Handles
//!
//! A `NodeId` is a handle to a live container. When a container is replaced
//! or removed, it and its whole subtree are **revoked**: the nodes leave the
//! arena, their final value is captured as the change's `old_value`, and
//! every later call with a revoked handle fails with [`TreeError::Revoked`].
//! Ids are never reused.
//!
//! # Paths
//!
//! Nodes store only their parent and their own key. A change's path is
//! computed by walking parent links when the change is recorded, so a
//! container that moved (for example after an `unshift`) always reports
//! its current position.
//!
//! # Replay
//!
//! [`apply_untracked`](TrackedTree::apply_untracked) and
//! [`revert_untracked`](TrackedTree::revert_untracked) write structure
//! directly and never touch the journal.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::change::{render_path, Change, ChangeKind, Key};
use crate::error::TreeError;

/// Handle to a container inside a [`TrackedTree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(u64);

impl NodeId {
    /// The root container. The root is never revoked.
    pub const ROOT: NodeId = NodeId(0);
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone)]
enum Slot {
    Value(Value),
    Node(NodeId),
}

#[derive(Debug, Clone)]
enum Container {
    Object(BTreeMap<String, Slot>),
    Array(Vec<Slot>),
}

impl Container {
    fn kind(&self) -> &'static str {
        match self {
            Container::Object(_) => "object",
            Container::Array(_) => "array",
        }
    }

    fn child_ids(&self) -> Vec<NodeId> {
        let slots: Box<dyn Iterator<Item = &Slot>> = match self {
            Container::Object(fields) => Box::new(fields.values()),
            Container::Array(items) => Box::new(items.iter()),
        };
        slots
            .filter_map(|slot| match slot {
                Slot::Node(id) => Some(*id),
                Slot::Value(_) => None,
            })
            .collect()
    }
}

#[derive(Debug, Clone)]
struct Node {
    parent: Option<NodeId>,
    own_key: Option<Key>,
    container: Container,
}

/// JSON type name used in error messages.
fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

/// Total order over JSON values: by type first (null, boolean, number,
/// string, array, object), then by value.
pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Number(x), Value::Number(y)) => {
            let x = x.as_f64().unwrap_or(f64::NAN);
            let y = y.as_f64().unwrap_or(f64::NAN);
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Array(x), Value::Array(y)) => x
            .iter()
            .zip(y.iter())
            .map(|(a, b)| compare_values(a, b))
            .find(|ord| *ord != Ordering::Equal)
            .unwrap_or_else(|| x.len().cmp(&y.len())),
        (Value::Object(_), Value::Object(_)) => a.to_string().cmp(&b.to_string()),
        _ => type_rank(a).cmp(&type_rank(b)),
    }
}

/// A JSON tree that records every mutation as a [`Change`].
#[derive(Debug, Clone)]
pub struct TrackedTree {
    nodes: HashMap<NodeId, Node>,
    next_id: u64,
    journal: Vec<Change>,
}

impl TrackedTree {
    /// Start tracking `value`, which must be an object or an array.
    pub fn observe(value: Value) -> Result<Self, TreeError> {
        let mut tree = Self {
            nodes: HashMap::new(),
            next_id: NodeId::ROOT.0 + 1,
            journal: Vec::new(),
        };
        let container = tree.containerize(NodeId::ROOT, value)?;
        tree.nodes.insert(
            NodeId::ROOT,
            Node {
                parent: None,
                own_key: None,
                container,
            },
        );
        Ok(tree)
    }

    // =========================================================================
    // Reading
    // =========================================================================

    pub fn root(&self) -> NodeId {
        NodeId::ROOT
    }

    /// Returns true while `id` is a live (not revoked) container.
    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    pub fn is_array(&self, id: NodeId) -> Result<bool, TreeError> {
        Ok(matches!(self.node(id)?.container, Container::Array(_)))
    }

    /// Number of fields or items in the container.
    pub fn len(&self, id: NodeId) -> Result<usize, TreeError> {
        Ok(match &self.node(id)?.container {
            Container::Object(fields) => fields.len(),
            Container::Array(items) => items.len(),
        })
    }

    pub fn keys(&self, id: NodeId) -> Result<Vec<Key>, TreeError> {
        Ok(match &self.node(id)?.container {
            Container::Object(fields) => fields.keys().cloned().map(Key::Field).collect(),
            Container::Array(items) => (0..items.len()).map(Key::Index).collect(),
        })
    }

    /// A detached copy of the value under `key`, if present.
    pub fn get(&self, id: NodeId, key: impl Into<Key>) -> Result<Option<Value>, TreeError> {
        let key = key.into();
        Ok(self.slot(id, &key)?.map(|slot| self.slot_value(slot)))
    }

    /// Handle of the container stored under `key`.
    pub fn child(&self, id: NodeId, key: impl Into<Key>) -> Result<NodeId, TreeError> {
        let key = key.into();
        match self.slot(id, &key)? {
            Some(Slot::Node(child)) => Ok(*child),
            _ => {
                let mut path = self.path(id)?;
                path.push(key);
                Err(TreeError::InvalidPath {
                    path: render_path(&path),
                })
            }
        }
    }

    /// Handle of the container at `path` from the root.
    pub fn resolve(&self, path: &[Key]) -> Result<NodeId, TreeError> {
        path.iter()
            .try_fold(NodeId::ROOT, |id, key| self.child(id, key.clone()))
    }

    /// A detached copy of the value at `path` from the root.
    pub fn get_path(&self, path: &[Key]) -> Result<Option<Value>, TreeError> {
        match path.split_last() {
            None => Ok(Some(self.snapshot())),
            Some((key, parent)) => {
                let parent = self.resolve(parent)?;
                self.get(parent, key.clone())
            }
        }
    }

    /// A detached copy of the container.
    pub fn value(&self, id: NodeId) -> Result<Value, TreeError> {
        self.node(id)?;
        Ok(self.materialize(id))
    }

    /// A detached copy of the whole tree.
    pub fn snapshot(&self) -> Value {
        self.materialize(NodeId::ROOT)
    }

    /// Absolute path of a container, computed from parent links.
    pub fn path(&self, id: NodeId) -> Result<Vec<Key>, TreeError> {
        let mut keys = Vec::new();
        let mut node = self.node(id)?;
        while let Some(parent) = node.parent {
            if let Some(key) = &node.own_key {
                keys.push(key.clone());
            }
            node = self.node(parent)?;
        }
        keys.reverse();
        Ok(keys)
    }

    // =========================================================================
    // Journal
    // =========================================================================

    /// Changes recorded since the last [`take_changes`](Self::take_changes).
    pub fn pending_changes(&self) -> &[Change] {
        &self.journal
    }

    /// Drain the recorded changes.
    pub fn take_changes(&mut self) -> Vec<Change> {
        std::mem::take(&mut self.journal)
    }

    fn record(&mut self, change: Change) {
        self.journal.push(change);
    }

    // =========================================================================
    // Tracked mutations
    // =========================================================================

    /// Set `key` to `value`. Records `insert` for a new key and `update` for
    /// an existing one. On arrays, `key` may address one past the end.
    ///
    /// Returns the previous value.
    pub fn set(
        &mut self,
        id: NodeId,
        key: impl Into<Key>,
        value: Value,
    ) -> Result<Option<Value>, TreeError> {
        let key = key.into();
        let mut path = self.path(id)?;
        let old = self.raw_set(id, &key, value)?;
        let new = self.get(id, key.clone())?.unwrap_or(Value::Null);
        path.push(key);

        let change = match &old {
            None => Change::new(ChangeKind::Insert, path, id).with_value(new),
            Some(old) => Change::new(ChangeKind::Update, path, id)
                .with_value(new)
                .with_old_value(old.clone()),
        };
        self.record(change);
        Ok(old)
    }

    /// Remove `key`. On arrays the following items shift down.
    ///
    /// Returns the removed value; removing an absent field is a no-op.
    pub fn delete(&mut self, id: NodeId, key: impl Into<Key>) -> Result<Option<Value>, TreeError> {
        let key = key.into();
        let mut path = self.path(id)?;
        let old = self.raw_remove(id, &key)?;
        if let Some(old) = &old {
            path.push(key);
            self.record(Change::new(ChangeKind::Delete, path, id).with_old_value(old.clone()));
        }
        Ok(old)
    }

    /// Append items. Returns the new length.
    pub fn push(&mut self, id: NodeId, items: Vec<Value>) -> Result<usize, TreeError> {
        let path = self.path(id)?;
        self.raw_push(id, items.clone())?;
        if !items.is_empty() {
            self.record(Change::new(ChangeKind::Push, path, id).with_value(Value::Array(items)));
        }
        self.len(id)
    }

    /// Remove and return the last item.
    pub fn pop(&mut self, id: NodeId) -> Result<Option<Value>, TreeError> {
        let path = self.path(id)?;
        let old = self.raw_pop(id)?;
        if let Some(old) = &old {
            self.record(Change::new(ChangeKind::Pop, path, id).with_old_value(old.clone()));
        }
        Ok(old)
    }

    /// Remove and return the first item.
    pub fn shift(&mut self, id: NodeId) -> Result<Option<Value>, TreeError> {
        let path = self.path(id)?;
        let old = self.raw_shift(id)?;
        if let Some(old) = &old {
            self.record(Change::new(ChangeKind::Shift, path, id).with_old_value(old.clone()));
        }
        Ok(old)
    }

    /// Prepend items, keeping their order. Returns the new length.
    pub fn unshift(&mut self, id: NodeId, items: Vec<Value>) -> Result<usize, TreeError> {
        let path = self.path(id)?;
        self.raw_unshift(id, items.clone())?;
        if !items.is_empty() {
            self.record(Change::new(ChangeKind::Unshift, path, id).with_value(Value::Array(items)));
        }
        self.len(id)
    }

    /// Reverse the array in place.
    pub fn reverse(&mut self, id: NodeId) -> Result<(), TreeError> {
        let path = self.path(id)?;
        let old = self.value(id)?;
        self.raw_reverse(id)?;
        let new = self.value(id)?;
        self.record(
            Change::new(ChangeKind::Reverse, path, id)
                .with_value(new)
                .with_old_value(old),
        );
        Ok(())
    }

    /// Sort the array in place with [`compare_values`].
    pub fn sort(&mut self, id: NodeId) -> Result<(), TreeError> {
        self.sort_by(id, compare_values)
    }

    /// Sort the array in place. Recorded as an `update` of the whole array
    /// carrying full before and after snapshots.
    pub fn sort_by<F>(&mut self, id: NodeId, mut compare: F) -> Result<(), TreeError>
    where
        F: FnMut(&Value, &Value) -> Ordering,
    {
        let path = self.path(id)?;
        let old = self.value(id)?;

        let slots = std::mem::take(self.array_mut(id)?);
        let mut keyed: Vec<(Value, Slot)> = slots
            .into_iter()
            .map(|slot| (self.slot_value(&slot), slot))
            .collect();
        keyed.sort_by(|(a, _), (b, _)| compare(a, b));
        *self.array_mut(id)? = keyed.into_iter().map(|(_, slot)| slot).collect();
        self.rekey(id);

        let new = self.value(id)?;
        self.record(
            Change::new(ChangeKind::Update, path, id)
                .with_value(new)
                .with_old_value(old),
        );
        Ok(())
    }

    /// Remove `delete_count` items at `start` and insert `items` there.
    ///
    /// `start` and `delete_count` are clamped to the array. Records an
    /// `update` for every overwritten index, then a `delete` for each extra
    /// removed item or an `insert` for each extra added item, in an order
    /// that replays exactly. Returns the removed items.
    pub fn splice(
        &mut self,
        id: NodeId,
        start: usize,
        delete_count: usize,
        items: Vec<Value>,
    ) -> Result<Vec<Value>, TreeError> {
        let path = self.path(id)?;
        let len = self.len(id)?;
        if !self.is_array(id)? {
            return Err(TreeError::NotAnArray);
        }
        let start = start.min(len);
        let delete_count = delete_count.min(len - start);
        let inserted = items.len();

        let fresh: Vec<Slot> = items
            .into_iter()
            .enumerate()
            .map(|(i, item)| self.import(item, id, Key::Index(start + i)))
            .collect();
        let removed_slots: Vec<Slot> = self
            .array_mut(id)?
            .splice(start..start + delete_count, fresh)
            .collect();
        let removed: Vec<Value> = removed_slots
            .into_iter()
            .map(|slot| self.revoke(slot))
            .collect();
        self.rekey(id);

        let at = |index: usize| {
            let mut p = path.clone();
            p.push(Key::Index(index));
            p
        };
        let overwritten = delete_count.min(inserted);
        let mut changes = Vec::new();
        for (i, old) in removed.iter().enumerate().take(overwritten) {
            let new = self.get(id, start + i)?.unwrap_or(Value::Null);
            changes.push(
                Change::new(ChangeKind::Update, at(start + i), id)
                    .with_value(new)
                    .with_old_value(old.clone()),
            );
        }
        for old in removed.iter().skip(overwritten) {
            changes.push(
                Change::new(ChangeKind::Delete, at(start + overwritten), id)
                    .with_old_value(old.clone()),
            );
        }
        for i in overwritten..inserted {
            let new = self.get(id, start + i)?.unwrap_or(Value::Null);
            changes.push(Change::new(ChangeKind::Insert, at(start + i), id).with_value(new));
        }
        self.journal.extend(changes);

        Ok(removed)
    }

    /// Overwrite indexes `start..end` (clamped) with `value`. Records one
    /// `update` per index.
    pub fn fill(&mut self, id: NodeId, value: Value, start: usize, end: usize) -> Result<(), TreeError> {
        if !self.is_array(id)? {
            return Err(TreeError::NotAnArray);
        }
        let len = self.len(id)?;
        for index in start.min(len)..end.min(len) {
            self.set(id, index, value.clone())?;
        }
        Ok(())
    }

    /// [`set`](Self::set) addressed by a path from the root.
    pub fn set_path(&mut self, path: &[Key], value: Value) -> Result<Option<Value>, TreeError> {
        let (parent, key) = self.split(path)?;
        self.set(parent, key, value)
    }

    /// [`delete`](Self::delete) addressed by a path from the root.
    pub fn delete_path(&mut self, path: &[Key]) -> Result<Option<Value>, TreeError> {
        let (parent, key) = self.split(path)?;
        self.delete(parent, key)
    }

    // =========================================================================
    // Untracked replay
    // =========================================================================

    /// Forward-apply a recorded change without journaling it.
    pub fn apply_untracked(&mut self, change: &Change) -> Result<(), TreeError> {
        let value = || change.value.clone().unwrap_or(Value::Null);
        match change.kind {
            ChangeKind::Insert => {
                let (parent, key) = self.split(&change.path)?;
                match key {
                    Key::Index(index) => self.raw_insert_at(parent, index, value()),
                    Key::Field(_) => self.raw_set(parent, &key, value()).map(|_| ()),
                }
            }
            ChangeKind::Update => self.replace_at(&change.path, value()),
            ChangeKind::Delete => {
                let (parent, key) = self.split(&change.path)?;
                self.raw_remove(parent, &key).map(|_| ())
            }
            ChangeKind::Push => {
                let array = self.resolve(&change.path)?;
                self.raw_push(array, items_of(change.value.as_ref()))
            }
            ChangeKind::Pop => {
                let array = self.resolve(&change.path)?;
                self.raw_pop(array).map(|_| ())
            }
            ChangeKind::Shift => {
                let array = self.resolve(&change.path)?;
                self.raw_shift(array).map(|_| ())
            }
            ChangeKind::Unshift => {
                let array = self.resolve(&change.path)?;
                self.raw_unshift(array, items_of(change.value.as_ref()))
            }
            ChangeKind::Reverse => {
                let array = self.resolve(&change.path)?;
                self.raw_reverse(array)
            }
        }
    }

    /// Reverse-apply a recorded change without journaling it.
    pub fn revert_untracked(&mut self, change: &Change) -> Result<(), TreeError> {
        let old = || change.old_value.clone().unwrap_or(Value::Null);
        match change.kind {
            ChangeKind::Insert => {
                let (parent, key) = self.split(&change.path)?;
                self.raw_remove(parent, &key).map(|_| ())
            }
            ChangeKind::Update => self.replace_at(&change.path, old()),
            ChangeKind::Delete => {
                let (parent, key) = self.split(&change.path)?;
                match key {
                    Key::Index(index) => self.raw_insert_at(parent, index, old()),
                    Key::Field(_) => self.raw_set(parent, &key, old()).map(|_| ()),
                }
            }
            ChangeKind::Push => {
                let array = self.resolve(&change.path)?;
                for _ in 0..items_of(change.value.as_ref()).len() {
                    self.raw_pop(array)?;
                }
                Ok(())
            }
            ChangeKind::Pop => {
                let array = self.resolve(&change.path)?;
                self.raw_push(array, vec![old()])
            }
            ChangeKind::Shift => {
                let array = self.resolve(&change.path)?;
                self.raw_unshift(array, vec![old()])
            }
            ChangeKind::Unshift => {
                let array = self.resolve(&change.path)?;
                for _ in 0..items_of(change.value.as_ref()).len() {
                    self.raw_shift(array)?;
                }
                Ok(())
            }
            ChangeKind::Reverse => {
                let array = self.resolve(&change.path)?;
                self.raw_reverse(array)
            }
        }
    }

    // =========================================================================
    // Raw structure
    // =========================================================================

    fn node(&self, id: NodeId) -> Result<&Node, TreeError> {
        self.nodes.get(&id).ok_or(TreeError::Revoked)
    }

    fn node_mut(&mut self, id: NodeId) -> Result<&mut Node, TreeError> {
        self.nodes.get_mut(&id).ok_or(TreeError::Revoked)
    }

    fn array_mut(&mut self, id: NodeId) -> Result<&mut Vec<Slot>, TreeError> {
        match &mut self.node_mut(id)?.container {
            Container::Array(items) => Ok(items),
            Container::Object(_) => Err(TreeError::NotAnArray),
        }
    }

    fn slot(&self, id: NodeId, key: &Key) -> Result<Option<&Slot>, TreeError> {
        match (&self.node(id)?.container, key) {
            (Container::Object(fields), Key::Field(field)) => Ok(fields.get(field)),
            (Container::Array(items), Key::Index(index)) => Ok(items.get(*index)),
            (container, key) => Err(mismatch(key, container)),
        }
    }

    fn split(&self, path: &[Key]) -> Result<(NodeId, Key), TreeError> {
        let (key, parent) = path.split_last().ok_or_else(|| TreeError::InvalidPath {
            path: render_path(path),
        })?;
        Ok((self.resolve(parent)?, key.clone()))
    }

    fn alloc(&mut self) -> NodeId {
        let id = NodeId(self.next_id);
        self.next_id += 1;
        id
    }

    /// Turn a JSON value into a slot owned by `parent`, creating nodes for
    /// every nested container.
    fn import(&mut self, value: Value, parent: NodeId, key: Key) -> Slot {
        let (id, container) = match value {
            Value::Array(items) => {
                let id = self.alloc();
                (id, self.array_of(id, items))
            }
            Value::Object(fields) => {
                let id = self.alloc();
                (id, self.object_of(id, fields))
            }
            scalar => return Slot::Value(scalar),
        };
        self.nodes.insert(
            id,
            Node {
                parent: Some(parent),
                own_key: Some(key),
                container,
            },
        );
        Slot::Node(id)
    }

    fn containerize(&mut self, id: NodeId, value: Value) -> Result<Container, TreeError> {
        match value {
            Value::Array(items) => Ok(self.array_of(id, items)),
            Value::Object(fields) => Ok(self.object_of(id, fields)),
            other => Err(TreeError::NotObservable {
                found: type_name(&other),
            }),
        }
    }

    fn array_of(&mut self, id: NodeId, items: Vec<Value>) -> Container {
        Container::Array(
            items
                .into_iter()
                .enumerate()
                .map(|(i, item)| self.import(item, id, Key::Index(i)))
                .collect(),
        )
    }

    fn object_of(&mut self, id: NodeId, fields: Map<String, Value>) -> Container {
        Container::Object(
            fields
                .into_iter()
                .map(|(field, item)| {
                    let slot = self.import(item, id, Key::Field(field.clone()));
                    (field, slot)
                })
                .collect(),
        )
    }

    fn materialize(&self, id: NodeId) -> Value {
        match self.nodes.get(&id).map(|node| &node.container) {
            Some(Container::Object(fields)) => Value::Object(
                fields
                    .iter()
                    .map(|(field, slot)| (field.clone(), self.slot_value(slot)))
                    .collect(),
            ),
            Some(Container::Array(items)) => {
                Value::Array(items.iter().map(|slot| self.slot_value(slot)).collect())
            }
            None => Value::Null,
        }
    }

    fn slot_value(&self, slot: &Slot) -> Value {
        match slot {
            Slot::Value(value) => value.clone(),
            Slot::Node(id) => self.materialize(*id),
        }
    }

    /// Detach a slot: capture its final value and drop its subtree.
    fn revoke(&mut self, slot: Slot) -> Value {
        match slot {
            Slot::Value(value) => value,
            Slot::Node(id) => {
                let value = self.materialize(id);
                self.drop_subtree(id);
                value
            }
        }
    }

    fn drop_subtree(&mut self, id: NodeId) {
        let mut stack = vec![id];
        while let Some(id) = stack.pop() {
            if let Some(node) = self.nodes.remove(&id) {
                stack.extend(node.container.child_ids());
            }
        }
    }

    /// Refresh the own key of every container item after a reorder.
    fn rekey(&mut self, id: NodeId) {
        let children: Vec<(usize, NodeId)> = match self.nodes.get(&id).map(|n| &n.container) {
            Some(Container::Array(items)) => items
                .iter()
                .enumerate()
                .filter_map(|(i, slot)| match slot {
                    Slot::Node(child) => Some((i, *child)),
                    Slot::Value(_) => None,
                })
                .collect(),
            _ => return,
        };
        for (index, child) in children {
            if let Some(node) = self.nodes.get_mut(&child) {
                node.own_key = Some(Key::Index(index));
            }
        }
    }

    fn raw_set(&mut self, id: NodeId, key: &Key, value: Value) -> Result<Option<Value>, TreeError> {
        match (&self.node(id)?.container, key) {
            (Container::Object(_), Key::Field(_)) => {}
            (Container::Array(items), Key::Index(index)) => {
                if *index > items.len() {
                    return Err(TreeError::IndexOutOfBounds {
                        index: *index,
                        len: items.len(),
                    });
                }
            }
            (container, key) => return Err(mismatch(key, container)),
        }

        let slot = self.import(value, id, key.clone());
        let old = match (&mut self.node_mut(id)?.container, key) {
            (Container::Object(fields), Key::Field(field)) => fields.insert(field.clone(), slot),
            (Container::Array(items), Key::Index(index)) if *index == items.len() => {
                items.push(slot);
                None
            }
            (Container::Array(items), Key::Index(index)) => {
                Some(std::mem::replace(&mut items[*index], slot))
            }
            _ => None,
        };
        Ok(old.map(|slot| self.revoke(slot)))
    }

    fn raw_remove(&mut self, id: NodeId, key: &Key) -> Result<Option<Value>, TreeError> {
        let removed = match (&mut self.node_mut(id)?.container, key) {
            (Container::Object(fields), Key::Field(field)) => fields.remove(field),
            (Container::Array(items), Key::Index(index)) => {
                if *index >= items.len() {
                    return Err(TreeError::IndexOutOfBounds {
                        index: *index,
                        len: items.len(),
                    });
                }
                Some(items.remove(*index))
            }
            (container, key) => return Err(mismatch(key, container)),
        };
        self.rekey(id);
        Ok(removed.map(|slot| self.revoke(slot)))
    }

    fn raw_insert_at(&mut self, id: NodeId, index: usize, value: Value) -> Result<(), TreeError> {
        let len = self.len(id)?;
        self.array_mut(id)?;
        if index > len {
            return Err(TreeError::IndexOutOfBounds { index, len });
        }
        let slot = self.import(value, id, Key::Index(index));
        self.array_mut(id)?.insert(index, slot);
        self.rekey(id);
        Ok(())
    }

    fn raw_push(&mut self, id: NodeId, items: Vec<Value>) -> Result<(), TreeError> {
        let len = self.array_mut(id)?.len();
        let slots: Vec<Slot> = items
            .into_iter()
            .enumerate()
            .map(|(i, item)| self.import(item, id, Key::Index(len + i)))
            .collect();
        self.array_mut(id)?.extend(slots);
        Ok(())
    }

    fn raw_pop(&mut self, id: NodeId) -> Result<Option<Value>, TreeError> {
        let popped = self.array_mut(id)?.pop();
        Ok(popped.map(|slot| self.revoke(slot)))
    }

    fn raw_shift(&mut self, id: NodeId) -> Result<Option<Value>, TreeError> {
        let items = self.array_mut(id)?;
        if items.is_empty() {
            return Ok(None);
        }
        let shifted = items.remove(0);
        self.rekey(id);
        Ok(Some(self.revoke(shifted)))
    }

    fn raw_unshift(&mut self, id: NodeId, items: Vec<Value>) -> Result<(), TreeError> {
        self.array_mut(id)?;
        let slots: Vec<Slot> = items
            .into_iter()
            .enumerate()
            .map(|(i, item)| self.import(item, id, Key::Index(i)))
            .collect();
        self.array_mut(id)?.splice(0..0, slots);
        self.rekey(id);
        Ok(())
    }

    fn raw_reverse(&mut self, id: NodeId) -> Result<(), TreeError> {
        self.array_mut(id)?.reverse();
        self.rekey(id);
        Ok(())
    }

    /// Write `value` at `path`; an empty path replaces the root contents in
    /// place so the root handle stays valid.
    fn replace_at(&mut self, path: &[Key], value: Value) -> Result<(), TreeError> {
        if path.is_empty() {
            let container = self.containerize(NodeId::ROOT, value)?;
            let old = std::mem::replace(&mut self.node_mut(NodeId::ROOT)?.container, container);
            for child in old.child_ids() {
                self.drop_subtree(child);
            }
            return Ok(());
        }
        let (parent, key) = self.split(path)?;
        self.raw_set(parent, &key, value).map(|_| ())
    }
}

fn mismatch(key: &Key, container: &Container) -> TreeError {
    TreeError::KeyMismatch {
        key: key.to_string(),
        container: container.kind(),
    }
}

fn items_of(value: Option<&Value>) -> Vec<Value> {
    match value {
        Some(Value::Array(items)) => items.clone(),
        Some(other) => vec![other.clone()],
        None => Vec::new(),
    }
}
