//! Store contract, shared state and factory
//!
//! Every node in the tree implements [`Store`]. Runtime operations take
//! `&self` and use interior locking, so one tree can be driven from several
//! threads at once; `configure` takes `&mut self` and only runs while the
//! tree is being built.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Local};
use parking_lot::Mutex;
use sluice_config::{ServicesConfig, StoreConf};
use sluice_protocol::MessageBatch;

use crate::StoreStats;
use crate::bucket::BucketStore;
use crate::buffer::BufferStore;
use crate::category::CategoryStore;
use crate::file::{FileStore, ThriftFileStore};
use crate::multi::MultiStore;
use crate::network::{
    ConnectionPool, Connector, NetworkStore, ServiceDiscovery, StaticDiscovery, TcpConnector,
};
use crate::null::NullStore;

/// A node in the store tree
pub trait Store: Send + Sync {
    /// Shared identity and status
    fn core(&self) -> &StoreCore;

    /// New, unopened store with the same configuration bound to `category`
    fn copy(&self, category: &str) -> Box<dyn Store>;

    /// Apply a config block. Problems are recorded in the status and leave
    /// the store in a state where later calls fail safely.
    fn configure(&mut self, conf: &StoreConf);

    /// Acquire resources. Idempotent.
    fn open(&self) -> bool;

    fn is_open(&self) -> bool;

    fn close(&self);

    /// Best-effort push of anything buffered in memory
    fn flush(&self);

    /// Accept every entry in `batch`, or leave the unaccepted ones in it
    /// and return `false`
    fn handle_messages(&self, batch: &mut MessageBatch) -> bool;

    /// Rotation, reconnects and replay. Called on a fixed cadence.
    fn periodic_check(&self) {}

    /// Read the oldest stored group of entries into `batch`. Only stores
    /// that can act as a buffer secondary implement the read path.
    fn read_oldest(&self, _batch: &mut MessageBatch, _now: DateTime<Local>) -> bool {
        write_only(self.core());
        false
    }

    /// Drop the group last returned by `read_oldest`
    fn delete_oldest(&self, _now: DateTime<Local>) -> bool {
        write_only(self.core());
        false
    }

    /// Overwrite the oldest group with `batch`
    fn replace_oldest(&self, _batch: &mut MessageBatch, _now: DateTime<Local>) -> bool {
        write_only(self.core());
        false
    }

    /// Check whether nothing is left to read
    fn empty(&self, _now: DateTime<Local>) -> bool {
        write_only(self.core());
        true
    }

    fn status(&self) -> String {
        self.core().status()
    }

    fn category(&self) -> &str {
        self.core().category()
    }

    fn store_type(&self) -> StoreType {
        self.core().store_type()
    }
}

fn write_only(core: &StoreCore) {
    tracing::error!(
        category = %core.category(),
        store_type = %core.store_type(),
        "attempting to read from a write-only store"
    );
}

// =============================================================================
// Store type tags
// =============================================================================

/// Closed set of buildable store types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreType {
    File,
    Buffer,
    Network,
    Bucket,
    ThriftFile,
    Null,
    Multi,
    Category,
    MultiFile,
    ThriftMultiFile,
}

impl StoreType {
    /// Config tag for this type
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::File => "file",
            Self::Buffer => "buffer",
            Self::Network => "network",
            Self::Bucket => "bucket",
            Self::ThriftFile => "thriftfile",
            Self::Null => "null",
            Self::Multi => "multi",
            Self::Category => "category",
            Self::MultiFile => "multifile",
            Self::ThriftMultiFile => "thriftmultifile",
        }
    }
}

impl FromStr for StoreType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "file" => Ok(Self::File),
            "buffer" => Ok(Self::Buffer),
            "network" => Ok(Self::Network),
            "bucket" => Ok(Self::Bucket),
            "thriftfile" => Ok(Self::ThriftFile),
            "null" => Ok(Self::Null),
            "multi" => Ok(Self::Multi),
            "category" => Ok(Self::Category),
            "multifile" => Ok(Self::MultiFile),
            "thriftmultifile" => Ok(Self::ThriftMultiFile),
            other => Err(format!("unknown store type '{}'", other)),
        }
    }
}

impl fmt::Display for StoreType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Context shared by the whole tree
// =============================================================================

/// Process-wide collaborators injected into every store
#[derive(Clone)]
pub struct StoreContext {
    stats: Arc<StoreStats>,
    pool: Arc<ConnectionPool>,
    discovery: Arc<dyn ServiceDiscovery>,
    connector: Arc<dyn Connector>,
}

impl StoreContext {
    pub fn new(discovery: Arc<dyn ServiceDiscovery>, connector: Arc<dyn Connector>) -> Self {
        let stats = Arc::new(StoreStats::new());
        let pool = Arc::new(ConnectionPool::new(connector.clone(), stats.clone()));
        Self {
            stats,
            pool,
            discovery,
            connector,
        }
    }

    /// TCP transport with a static `[services]` table
    pub fn from_services(services: &ServicesConfig) -> Self {
        Self::new(
            Arc::new(StaticDiscovery::from_config(services)),
            Arc::new(TcpConnector),
        )
    }

    #[inline]
    pub fn stats(&self) -> &Arc<StoreStats> {
        &self.stats
    }

    #[inline]
    pub fn pool(&self) -> &Arc<ConnectionPool> {
        &self.pool
    }

    #[inline]
    pub fn discovery(&self) -> &Arc<dyn ServiceDiscovery> {
        &self.discovery
    }

    #[inline]
    pub fn connector(&self) -> &Arc<dyn Connector> {
        &self.connector
    }
}

impl Default for StoreContext {
    fn default() -> Self {
        Self::from_services(&ServicesConfig::default())
    }
}

impl fmt::Debug for StoreContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreContext").finish_non_exhaustive()
    }
}

// =============================================================================
// Identity and status every store carries
// =============================================================================

/// Category binding, type tag and status of one store
#[derive(Debug)]
pub struct StoreCore {
    category: String,
    store_type: StoreType,
    multi_category: bool,
    status: Mutex<String>,
    ctx: StoreContext,
}

impl StoreCore {
    pub fn new(
        ctx: StoreContext,
        store_type: StoreType,
        category: impl Into<String>,
        multi_category: bool,
    ) -> Self {
        Self {
            category: category.into(),
            store_type,
            multi_category,
            status: Mutex::new(String::new()),
            ctx,
        }
    }

    /// Same type and context, different category
    pub fn rebind(&self, category: &str) -> Self {
        Self::new(self.ctx.clone(), self.store_type, category, self.multi_category)
    }

    #[inline]
    pub fn category(&self) -> &str {
        &self.category
    }

    #[inline]
    pub fn store_type(&self) -> StoreType {
        self.store_type
    }

    /// Whether this store receives entries from more than one category
    #[inline]
    pub fn multi_category(&self) -> bool {
        self.multi_category
    }

    #[inline]
    pub fn ctx(&self) -> &StoreContext {
        &self.ctx
    }

    #[inline]
    pub fn stats(&self) -> &StoreStats {
        &self.ctx.stats
    }

    /// Current status, empty when healthy
    pub fn status(&self) -> String {
        self.status.lock().clone()
    }

    pub fn set_status(&self, status: impl Into<String>) {
        *self.status.lock() = status.into();
    }

    pub fn clear_status(&self) {
        self.status.lock().clear();
    }
}

// =============================================================================
// Factory
// =============================================================================

/// Build an unconfigured store for a type tag
///
/// `readable` asks for a store that can serve as a buffer secondary; only
/// `file` changes behavior for it. Returns `None` for unknown tags.
pub fn create_store(
    ctx: &StoreContext,
    type_name: &str,
    category: &str,
    readable: bool,
    multi_category: bool,
) -> Option<Box<dyn Store>> {
    let store_type = match type_name.parse::<StoreType>() {
        Ok(t) => t,
        Err(e) => {
            tracing::warn!(category = %category, "{}", e);
            return None;
        }
    };

    let ctx = ctx.clone();
    let store: Box<dyn Store> = match store_type {
        StoreType::File => Box::new(FileStore::new(ctx, category, multi_category, readable)),
        StoreType::ThriftFile => Box::new(ThriftFileStore::new(ctx, category, multi_category)),
        StoreType::Network => Box::new(NetworkStore::new(ctx, category, multi_category)),
        StoreType::Null => Box::new(NullStore::new(ctx, category, multi_category)),
        StoreType::Buffer => Box::new(BufferStore::new(ctx, category, multi_category)),
        StoreType::Bucket => Box::new(BucketStore::new(ctx, category, multi_category)),
        StoreType::Multi => Box::new(MultiStore::new(ctx, category, multi_category)),
        StoreType::Category | StoreType::MultiFile | StoreType::ThriftMultiFile => Box::new(
            CategoryStore::with_type(ctx, store_type, category, multi_category),
        ),
    };
    Some(store)
}

/// Build and configure a store from a block carrying a `type` key
pub fn build_store(
    ctx: &StoreContext,
    conf: &StoreConf,
    category: &str,
    readable: bool,
    multi_category: bool,
) -> Option<Box<dyn Store>> {
    let type_name = conf.store_type()?;
    let mut store = create_store(ctx, &type_name, category, readable, multi_category)?;
    store.configure(conf);
    Some(store)
}

#[cfg(test)]
#[path = "store_test.rs"]
mod store_test;
