//! Protocol error types
//!
//! Errors that can occur when framing or unframing message batches.

use thiserror::Error;

/// Errors that can occur during protocol operations
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Frame is too short to contain required fields
    #[error("frame too short: expected at least {expected} bytes, got {actual}")]
    FrameTooShort { expected: usize, actual: usize },

    /// Frame exceeds maximum size
    #[error("frame overflow: size {size} exceeds maximum {max}")]
    FrameOverflow { size: usize, max: usize },

    /// Category name too long to encode
    #[error("category too long: {len} bytes (max {max})")]
    CategoryTooLong { len: usize, max: usize },

    /// Category name is not valid UTF-8
    #[error("category is not valid utf-8")]
    InvalidCategory,

    /// Unknown result code byte
    #[error("invalid result code: {0}")]
    InvalidResultCode(u8),

    /// Bytes left over after the declared entries
    #[error("trailing data: {0} bytes after last entry")]
    TrailingData(usize),
}

impl ProtocolError {
    /// Create a frame too short error
    #[inline]
    pub fn too_short(expected: usize, actual: usize) -> Self {
        Self::FrameTooShort { expected, actual }
    }

    /// Create a frame overflow error
    #[inline]
    pub fn overflow(size: usize) -> Self {
        Self::FrameOverflow {
            size,
            max: crate::MAX_FRAME_SIZE,
        }
    }

    /// Create a category too long error
    #[inline]
    pub fn category_too_long(len: usize) -> Self {
        Self::CategoryTooLong {
            len,
            max: crate::MAX_CATEGORY_LENGTH,
        }
    }
}
