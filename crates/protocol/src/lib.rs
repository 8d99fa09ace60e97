//! Sluice Protocol - Core types that flow through the store tree
//!
//! This crate provides the foundational types shared by every store:
//! - `LogEntry` - a single (category, message) pair
//! - `MessageBatch` - ordered group of entries, the unit of transfer
//! - `ResultCode` - a remote peer's answer to a batch
//! - `wire` - length-prefixed batch framing used by the network transport
//!
//! # Design Principles
//!
//! - **Shared entries**: entries are `Arc<LogEntry>`, so partitioning or
//!   fanning out a batch never copies payloads
//! - **Zero-copy payloads**: messages are `bytes::Bytes`
//! - **Ownership by batch**: a store that fails part-way leaves exactly the
//!   unhandled entries in the batch it was given

mod batch;
mod entry;
mod error;
mod result;
pub mod wire;

pub use batch::MessageBatch;
pub use entry::LogEntry;
pub use error::ProtocolError;
pub use result::ResultCode;

// Re-export bytes for convenience
pub use bytes::{Bytes, BytesMut};

/// Result type for protocol operations
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Largest frame the codec will encode or accept (256MB)
pub const MAX_FRAME_SIZE: usize = 256 * 1024 * 1024;

/// Longest category name the codec can carry
pub const MAX_CATEGORY_LENGTH: usize = u16::MAX as usize;
