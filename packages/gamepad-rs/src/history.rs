//! Linear undo/redo log of executed steps.

/// Append-only list of entries with a cursor.
///
/// The cursor points at the "current" entry, or is `-1` before the first.
/// Adding while the cursor is not at the tail discards the redo branch.
#[derive(Debug, Clone)]
pub struct History<T> {
    entries: Vec<T>,
    cursor: isize,
}

impl<T: Clone> History<T> {
    /// Create an empty history with the cursor before the first entry.
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            cursor: -1,
        }
    }

    /// Truncate everything after the cursor, append `entry` and, when
    /// `advance` is set, move the cursor onto it.
    pub fn add(&mut self, entry: T, advance: bool) {
        self.entries.truncate(self.tail_after_cursor());
        self.entries.push(entry);
        if advance {
            self.cursor = self.entries.len() as isize - 1;
        }
    }

    /// Advance the cursor and return the newly current entry.
    ///
    /// Returns `None` and leaves the cursor alone when already at the tail.
    pub fn next(&mut self) -> Option<T> {
        if self.cursor < self.entries.len() as isize - 1 {
            self.cursor += 1;
            self.current()
        } else {
            None
        }
    }

    /// Retreat the cursor and return the newly current entry.
    ///
    /// From the first entry this moves to `-1` and returns `None`; at `-1`
    /// it stays put.
    pub fn prior(&mut self) -> Option<T> {
        if self.cursor > -1 {
            self.cursor -= 1;
            self.current()
        } else {
            None
        }
    }

    /// The entry at the cursor.
    pub fn current(&self) -> Option<T> {
        self.index().and_then(|i| self.entries.get(i)).cloned()
    }

    /// Returns true when [`next`](Self::next) would move the cursor.
    pub fn has_next(&self) -> bool {
        self.cursor < self.entries.len() as isize - 1
    }

    /// The last recorded entry, regardless of the cursor.
    pub fn last(&self) -> Option<&T> {
        self.entries.last()
    }

    /// Clear every entry and move the cursor before the first.
    pub fn reset(&mut self) {
        self.entries.clear();
        self.cursor = -1;
    }

    /// The cursor position, `-1` before the first entry.
    pub fn cursor(&self) -> isize {
        self.cursor
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Every recorded entry in order.
    pub fn entries(&self) -> &[T] {
        &self.entries
    }

    fn index(&self) -> Option<usize> {
        usize::try_from(self.cursor).ok()
    }

    fn tail_after_cursor(&self) -> usize {
        (self.cursor + 1) as usize
    }
}

impl<T: Clone> Default for History<T> {
    fn default() -> Self {
        Self::new()
    }
}
