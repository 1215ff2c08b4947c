//! Structured mutation records produced by the tracked tree.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::tree::NodeId;

/// One segment of a path from the tree root.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Key {
    /// Object field.
    Field(String),
    /// Array position.
    Index(usize),
}

impl Key {
    /// Interpret a JSON value as a key: strings are fields, non-negative
    /// integers are indexes.
    pub fn from_value(value: &Value) -> Option<Key> {
        match value {
            Value::String(field) => Some(Key::Field(field.clone())),
            Value::Number(n) => n
                .as_u64()
                .and_then(|i| usize::try_from(i).ok())
                .map(Key::Index),
            _ => None,
        }
    }

    pub fn as_index(&self) -> Option<usize> {
        match self {
            Key::Index(i) => Some(*i),
            Key::Field(_) => None,
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Field(field) => write!(f, "{field}"),
            Key::Index(i) => write!(f, "[{i}]"),
        }
    }
}

impl From<&str> for Key {
    fn from(field: &str) -> Self {
        Key::Field(field.to_string())
    }
}

impl From<String> for Key {
    fn from(field: String) -> Self {
        Key::Field(field)
    }
}

impl From<usize> for Key {
    fn from(index: usize) -> Self {
        Key::Index(index)
    }
}

/// Render a path as `a.b[0].c`.
pub fn render_path(path: &[Key]) -> String {
    let mut out = String::new();
    for key in path {
        match key {
            Key::Field(field) => {
                if !out.is_empty() {
                    out.push('.');
                }
                out.push_str(field);
            }
            Key::Index(i) => out.push_str(&format!("[{i}]")),
        }
    }
    if out.is_empty() {
        out.push_str("<root>");
    }
    out
}

/// The kind of structural mutation a [`Change`] describes.
///
/// `sort` is recorded as an `update` of the whole array with full
/// before/after snapshots. `fill` and `splice` are recorded as a run of
/// `update`, `insert` and `delete` records on the affected indexes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
    Push,
    Pop,
    Shift,
    Unshift,
    Reverse,
}

/// One structural mutation, addressed from the tree root.
///
/// For `insert`, `update` and `delete` the path ends at the mutated key.
/// For the array operations (`push`, `pop`, `shift`, `unshift`, `reverse`)
/// the path addresses the array itself; `push`/`unshift` carry the added
/// items as a JSON array in `value`, `pop`/`shift` the removed item in
/// `old_value`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Change {
    #[serde(rename = "type")]
    pub kind: ChangeKind,
    pub path: Vec<Key>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(
        default,
        rename = "oldValue",
        skip_serializing_if = "Option::is_none"
    )]
    pub old_value: Option<Value>,
    /// The container the mutation happened on.
    pub object: NodeId,
}

impl Change {
    pub(crate) fn new(kind: ChangeKind, path: Vec<Key>, object: NodeId) -> Self {
        Self {
            kind,
            path,
            value: None,
            old_value: None,
            object,
        }
    }

    pub(crate) fn with_value(mut self, value: Value) -> Self {
        self.value = Some(value);
        self
    }

    pub(crate) fn with_old_value(mut self, old_value: Value) -> Self {
        self.old_value = Some(old_value);
        self
    }
}

impl fmt::Display for Change {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = serde_json::to_value(self.kind)
            .ok()
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_default();
        write!(f, "{kind} {}", render_path(&self.path))?;
        if let Some(old) = &self.old_value {
            write!(f, " {old}")?;
            if self.value.is_some() {
                write!(f, " ->")?;
            }
        }
        if let Some(value) = &self.value {
            write!(f, " {value}")?;
        }
        Ok(())
    }
}

/// Why a batch of changes was delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchKind {
    /// A changeset was closed and appended to the commit log.
    Commit,
    /// A committed changeset was reverse-applied.
    Undo,
    /// A committed changeset was forward-applied.
    Redo,
    /// Uncommitted changes were discarded.
    Restore,
}

/// Changes delivered to store subscribers after each commit, undo, redo
/// or restore that touched the tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeBatch {
    pub kind: BatchKind,
    pub changes: Vec<Change>,
}
