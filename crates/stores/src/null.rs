//! Null store - discards all entries
//!
//! Accepts everything, counts it under `ignored`, and keeps nothing. Also
//! usable as a buffer secondary that is always empty.

use chrono::{DateTime, Local};
use sluice_config::StoreConf;
use sluice_protocol::MessageBatch;

use crate::stats::counter;
use crate::{Store, StoreContext, StoreCore, StoreType};

/// Store that accepts and drops every batch
#[derive(Debug)]
pub struct NullStore {
    core: StoreCore,
}

impl NullStore {
    pub fn new(ctx: StoreContext, category: &str, multi_category: bool) -> Self {
        Self {
            core: StoreCore::new(ctx, StoreType::Null, category, multi_category),
        }
    }
}

impl Store for NullStore {
    fn core(&self) -> &StoreCore {
        &self.core
    }

    fn copy(&self, category: &str) -> Box<dyn Store> {
        Box::new(Self {
            core: self.core.rebind(category),
        })
    }

    fn configure(&mut self, _conf: &StoreConf) {}

    fn open(&self) -> bool {
        true
    }

    fn is_open(&self) -> bool {
        true
    }

    fn close(&self) {}

    fn flush(&self) {}

    fn handle_messages(&self, batch: &mut MessageBatch) -> bool {
        self.core
            .stats()
            .incr_by(self.core.category(), counter::IGNORED, batch.len() as u64);
        tracing::trace!(category = %self.core.category(), count = batch.len(), "discarded batch");
        true
    }

    fn read_oldest(&self, _batch: &mut MessageBatch, _now: DateTime<Local>) -> bool {
        true
    }

    fn delete_oldest(&self, _now: DateTime<Local>) -> bool {
        true
    }

    fn replace_oldest(&self, _batch: &mut MessageBatch, _now: DateTime<Local>) -> bool {
        true
    }

    fn empty(&self, _now: DateTime<Local>) -> bool {
        true
    }
}

#[cfg(test)]
#[path = "null_test.rs"]
mod null_test;
