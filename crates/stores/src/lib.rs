//! Sluice - Stores
//!
//! The store tree that every entry flows through. A tree is built once from
//! the `[store]` config block and then driven by two callers: whoever hands
//! in batches (`handle_messages`) and a scheduler ticking `periodic_check`.
//!
//! ```text
//! [source] --MessageBatch--> [root store] --> ... --> [file | network | null]
//!                                 ^
//!                        periodic_check (1s)
//! ```
//!
//! # Store types
//!
//! | Type | Purpose | Children |
//! |------|---------|----------|
//! | `file` | Rotating local files, readable as a buffer | - |
//! | `thriftfile` | Framed record files with buffered writes | - |
//! | `network` | Deliver to a remote peer, pooled or private | - |
//! | `null` | Discard (counted) | - |
//! | `buffer` | Primary with durable secondary and replay | 2 |
//! | `bucket` | Partition by key across N+1 children | N+1 |
//! | `multi` | Offer every batch to every child | N |
//! | `category` | One child per category, cloned from a model | dynamic |
//! | `multifile` / `thriftmultifile` | `category` with a file model | dynamic |
//!
//! # Failure contract
//!
//! `handle_messages` returns `true` when every entry was accepted. On
//! `false` the batch holds exactly the entries that were not accepted, so the
//! caller can retry or buffer them.

// =============================================================================
// Store contract and shared plumbing
// =============================================================================

mod stats;
mod store;

pub use stats::{StoreStats, counter};
pub use store::{Store, StoreContext, StoreCore, StoreType, build_store, create_store};

// =============================================================================
// Store implementations (each in its own module)
// =============================================================================

/// Buffer store - primary/secondary failover with replay
pub mod buffer;

/// Bucket store - key-partitioned fan-out
pub mod bucket;

/// Category store - per-category children cloned from a model
pub mod category;

/// File stores and the local file abstraction
pub mod file;

/// Multi store - fan a batch out to every child
pub mod multi;

/// Network store, connection pool, transport and discovery
pub mod network;

/// Null store - discards everything
pub mod null;

#[cfg(test)]
pub(crate) mod testing;

pub use sluice_config::StoreConf;
pub use sluice_protocol::{LogEntry, MessageBatch};
