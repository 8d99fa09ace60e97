//! Entry point into the store tree
//!
//! Sources hand batches to the [`Handler`]; it drops entries without a
//! category, passes the rest to the root store and keeps the `received` and
//! `lost` counters.

use std::sync::Arc;

use anyhow::{Result, bail};
use sluice_config::Config;
use sluice_protocol::{MessageBatch, ResultCode};
use sluice_stores::{Store, StoreContext, StoreStats, build_store, counter};

/// Category of the root store
pub const ROOT_CATEGORY: &str = "default";

/// Shared owner of the root store
pub struct Handler {
    ctx: StoreContext,
    root: Arc<dyn Store>,
}

impl Handler {
    pub fn new(ctx: StoreContext, root: Box<dyn Store>) -> Self {
        Self {
            ctx,
            root: Arc::from(root),
        }
    }

    /// Build and configure the tree described by `[store]`
    pub fn from_config(config: &Config) -> Result<Self> {
        let ctx = StoreContext::from_services(&config.services);
        let type_name = config.store.store_type().unwrap_or_default();
        let Some(root) = build_store(&ctx, &config.store, ROOT_CATEGORY, false, true) else {
            bail!("cannot build root store of type '{}'", type_name);
        };

        let status = root.status();
        if !status.is_empty() {
            tracing::warn!(store_type = %type_name, status = %status, "root store configured with errors");
        }
        Ok(Self::new(ctx, root))
    }

    pub fn root(&self) -> &Arc<dyn Store> {
        &self.root
    }

    pub fn stats(&self) -> &StoreStats {
        self.ctx.stats()
    }

    /// Open the tree. A store that stays closed is retried from its own
    /// `periodic_check`, so this never fails the daemon.
    pub fn open(&self) -> bool {
        let opened = self.root.open();
        if !opened {
            tracing::warn!(status = %self.root.status(), "root store did not fully open");
        }
        opened
    }

    /// Hand a batch to the root store
    ///
    /// Entries the tree refuses are dropped and counted as lost; the caller
    /// gets `TryLater` so it can slow down.
    pub fn log(&self, batch: MessageBatch) -> ResultCode {
        let stats = self.stats();
        let mut valid = MessageBatch::with_capacity(batch.len());
        for entry in batch {
            if entry.category().is_empty() {
                stats.incr(ROOT_CATEGORY, counter::RECEIVED_BAD);
                continue;
            }
            stats.incr(entry.category(), counter::RECEIVED_GOOD);
            valid.push_shared(entry);
        }
        if valid.is_empty() || self.root.handle_messages(&mut valid) {
            return ResultCode::Ok;
        }

        tracing::error!(
            count = valid.len(),
            status = %self.root.status(),
            "store tree refused messages, dropping them"
        );
        for entry in &valid {
            stats.incr(entry.category(), counter::LOST);
        }
        ResultCode::TryLater
    }

    pub fn periodic_check(&self) {
        self.root.periodic_check();
    }

    /// Write every counter and the tree status to the log
    pub fn log_stats(&self) {
        for (category, name, value) in self.stats().snapshot() {
            tracing::info!(category = %category, counter = %name, value, "stats");
        }
        let status = self.root.status();
        if !status.is_empty() {
            tracing::warn!(status = %status, "store status");
        }
    }

    /// Flush and close the whole tree
    pub fn shutdown(&self) {
        self.root.flush();
        self.root.close();
        tracing::info!("store tree closed");
    }
}

#[cfg(test)]
#[path = "handler_test.rs"]
mod handler_test;
