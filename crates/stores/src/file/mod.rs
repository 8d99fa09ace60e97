//! File stores
//!
//! - [`LocalFile`] - open/read/write/list over the local file system, with
//!   optional length framing and LZ4 compression
//! - [`FileSettings`] - naming, rotation and directory rules shared by both
//!   file stores
//! - [`FileStore`] - batched writes to rotating files; doubles as a buffer
//!   secondary when created readable
//! - [`ThriftFileStore`] - framed records through an in-memory write buffer

mod base;
mod fs;
mod store;
mod thrift;

pub use base::{FileSettings, RollState, RotatePeriod, bytes_to_pad, file_suffix};
pub use fs::{LocalFile, create_dir, create_symlink, list};
pub use store::FileStore;
pub use thrift::ThriftFileStore;

/// Trailer written into a file when rotation moves on to its successor
pub const META_LOGFILE_PREFIX: &str = "scribe_meta<new_logfile>: ";

/// Name of the per-directory rotation log
pub const STATS_FILENAME: &str = "scribe_stats";
