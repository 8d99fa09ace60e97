//! MessageBatch - ordered group of shared log entries
//!
//! The batch is the unit every store handles. Entries are held as
//! `Arc<LogEntry>`, so cloning a batch or splitting it by category only
//! bumps reference counts.
//!
//! # Ownership
//!
//! A store handed `&mut MessageBatch` either consumes all of it (returns
//! success) or leaves the batch holding exactly the entries it did not
//! handle, in their original relative order.

use std::ops::Index;
use std::slice;
use std::sync::Arc;

use crate::LogEntry;

/// Ordered sequence of shared log entries
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageBatch {
    entries: Vec<Arc<LogEntry>>,
}

impl MessageBatch {
    /// Create an empty batch
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty batch with room for `capacity` entries
    #[inline]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
        }
    }

    /// Append a new entry
    #[inline]
    pub fn push(&mut self, entry: LogEntry) {
        self.entries.push(Arc::new(entry));
    }

    /// Append an already-shared entry
    #[inline]
    pub fn push_shared(&mut self, entry: Arc<LogEntry>) {
        self.entries.push(entry);
    }

    /// Number of entries
    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if batch is empty
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entry at `index`, if any
    #[inline]
    pub fn get(&self, index: usize) -> Option<&Arc<LogEntry>> {
        self.entries.get(index)
    }

    /// Entries as a slice
    #[inline]
    pub fn as_slice(&self) -> &[Arc<LogEntry>] {
        &self.entries
    }

    /// Iterate over entries in order
    #[inline]
    pub fn iter(&self) -> slice::Iter<'_, Arc<LogEntry>> {
        self.entries.iter()
    }

    /// Remove every entry
    #[inline]
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Remove the first `count` entries (clamped to the batch length)
    ///
    /// Used after a partial write: the handled prefix is dropped and the
    /// unhandled suffix stays in place.
    pub fn drain_front(&mut self, count: usize) {
        let count = count.min(self.entries.len());
        self.entries.drain(..count);
    }

    /// Move all entries out, leaving this batch empty
    #[inline]
    pub fn take(&mut self) -> MessageBatch {
        std::mem::take(self)
    }

    /// Append every entry of `other`, leaving `other` empty
    #[inline]
    pub fn append(&mut self, other: &mut MessageBatch) {
        self.entries.append(&mut other.entries);
    }

}

impl From<Vec<Arc<LogEntry>>> for MessageBatch {
    fn from(entries: Vec<Arc<LogEntry>>) -> Self {
        Self { entries }
    }
}

impl From<Vec<LogEntry>> for MessageBatch {
    fn from(entries: Vec<LogEntry>) -> Self {
        entries.into_iter().collect()
    }
}

impl FromIterator<LogEntry> for MessageBatch {
    fn from_iter<I: IntoIterator<Item = LogEntry>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().map(Arc::new).collect(),
        }
    }
}

impl FromIterator<Arc<LogEntry>> for MessageBatch {
    fn from_iter<I: IntoIterator<Item = Arc<LogEntry>>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

impl Extend<Arc<LogEntry>> for MessageBatch {
    fn extend<I: IntoIterator<Item = Arc<LogEntry>>>(&mut self, iter: I) {
        self.entries.extend(iter);
    }
}

impl Index<usize> for MessageBatch {
    type Output = Arc<LogEntry>;

    #[inline]
    fn index(&self, index: usize) -> &Self::Output {
        &self.entries[index]
    }
}

impl IntoIterator for MessageBatch {
    type Item = Arc<LogEntry>;
    type IntoIter = std::vec::IntoIter<Arc<LogEntry>>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

impl<'a> IntoIterator for &'a MessageBatch {
    type Item = &'a Arc<LogEntry>;
    type IntoIter = slice::Iter<'a, Arc<LogEntry>>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}
