//! Log entry type
//!
//! A `LogEntry` is immutable once built. It is shared by reference through
//! the store tree; whichever store currently holds the batch logically owns it.

use std::fmt;

use bytes::Bytes;

/// A single (category, message) pair
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LogEntry {
    category: String,
    message: Bytes,
}

impl LogEntry {
    /// Create a new entry
    #[inline]
    pub fn new(category: impl Into<String>, message: impl Into<Bytes>) -> Self {
        Self {
            category: category.into(),
            message: message.into(),
        }
    }

    /// Category this entry belongs to
    #[inline]
    pub fn category(&self) -> &str {
        &self.category
    }

    /// Raw message payload
    #[inline]
    pub fn message(&self) -> &[u8] {
        &self.message
    }

    /// Message payload as a cheap clone of the underlying buffer
    #[inline]
    pub fn message_bytes(&self) -> Bytes {
        self.message.clone()
    }

    /// Build a new entry with the same category and a different payload
    #[inline]
    pub fn with_message(&self, message: impl Into<Bytes>) -> Self {
        Self {
            category: self.category.clone(),
            message: message.into(),
        }
    }

    /// Payload length in bytes
    #[inline]
    pub fn len(&self) -> usize {
        self.message.len()
    }

    /// Check whether the payload is empty
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.message.is_empty()
    }
}

impl fmt::Display for LogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {}",
            self.category,
            String::from_utf8_lossy(&self.message)
        )
    }
}
