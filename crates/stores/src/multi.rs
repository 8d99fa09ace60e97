//! Multi store - offer every batch to every child
//!
//! Children come from `store0..storeN` blocks (numbering may start at 0 or
//! 1). `report_success = "all"` (default) succeeds only if every child
//! accepted the batch; `"any"` succeeds if at least one did.
//!
//! Each child gets its own copy of the batch. On failure the batch keeps
//! every entry that at least one child left unhandled, so a retry can
//! duplicate entries into children that already took them.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use sluice_config::StoreConf;
use sluice_protocol::{LogEntry, MessageBatch};

use crate::{Store, StoreContext, StoreCore, StoreType, create_store};

/// How child results combine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReportSuccess {
    #[default]
    All,
    Any,
}

impl ReportSuccess {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "all" => Some(Self::All),
            "any" => Some(Self::Any),
            _ => None,
        }
    }

    fn combine(&self, results: impl IntoIterator<Item = bool>) -> bool {
        let (mut all, mut any) = (true, false);
        for ok in results {
            all &= ok;
            any |= ok;
        }
        match self {
            Self::All => all,
            Self::Any => any,
        }
    }
}

/// Store that duplicates batches across a fixed list of children
pub struct MultiStore {
    core: StoreCore,
    report_success: ReportSuccess,
    stores: Vec<Box<dyn Store>>,
}

impl MultiStore {
    pub fn new(ctx: StoreContext, category: &str, multi_category: bool) -> Self {
        Self {
            core: StoreCore::new(ctx, StoreType::Multi, category, multi_category),
            report_success: ReportSuccess::default(),
            stores: Vec::new(),
        }
    }

    /// Store over already built children
    pub fn with_stores(
        ctx: StoreContext,
        category: &str,
        report_success: ReportSuccess,
        stores: Vec<Box<dyn Store>>,
    ) -> Self {
        let mut store = Self::new(ctx, category, false);
        store.report_success = report_success;
        store.stores = stores;
        store
    }

    pub fn report_success(&self) -> ReportSuccess {
        self.report_success
    }

    pub fn stores(&self) -> &[Box<dyn Store>] {
        &self.stores
    }

    fn configure_stores(&mut self, conf: &StoreConf) -> Result<(), String> {
        if let Some(value) = conf.get_string("report_success") {
            self.report_success = ReportSuccess::parse(&value).ok_or_else(|| {
                tracing::error!(
                    category = %self.core.category(),
                    report_success = %value,
                    "MULTI: invalid value for report_success"
                );
                "MULTI: Invalid report_success value.".to_string()
            })?;
        }

        // store0 is optional so numbering can start at 1
        let first = if conf.get_store("store0").is_some() { 0 } else { 1 };
        for i in first.. {
            let Some(child_conf) = conf.get_store(&format!("store{}", i)) else {
                break;
            };
            let type_name = child_conf.store_type().ok_or_else(|| {
                tracing::error!(category = %self.core.category(), index = i, "MULTI: store is missing type");
                "MULTI: Store is missing type.".to_string()
            })?;
            let mut child = create_store(
                self.core.ctx(),
                &type_name,
                self.core.category(),
                false,
                self.core.multi_category(),
            )
            .ok_or_else(|| format!("MULTI: Unknown store type {}.", type_name))?;
            child.configure(&child_conf);
            tracing::info!(
                category = %self.core.category(),
                store_type = %type_name,
                "MULTI: configured store"
            );
            self.stores.push(child);
        }

        if self.stores.is_empty() {
            return Err("MULTI: No stores found, invalid store.".to_string());
        }
        Ok(())
    }
}

impl Store for MultiStore {
    fn core(&self) -> &StoreCore {
        &self.core
    }

    fn copy(&self, category: &str) -> Box<dyn Store> {
        Box::new(Self {
            core: self.core.rebind(category),
            report_success: self.report_success,
            stores: self.stores.iter().map(|s| s.copy(category)).collect(),
        })
    }

    fn configure(&mut self, conf: &StoreConf) {
        if let Err(msg) = self.configure_stores(conf) {
            tracing::error!(category = %self.core.category(), "{}", msg);
            self.core.set_status(msg);
        }
    }

    fn open(&self) -> bool {
        // open every child even after one fails
        let results: Vec<bool> = self.stores.iter().map(|s| s.open()).collect();
        self.report_success.combine(results)
    }

    fn is_open(&self) -> bool {
        self.report_success.combine(self.stores.iter().map(|s| s.is_open()))
    }

    fn close(&self) {
        for store in &self.stores {
            store.close();
        }
    }

    fn flush(&self) {
        for store in &self.stores {
            store.flush();
        }
    }

    fn handle_messages(&self, batch: &mut MessageBatch) -> bool {
        if self.stores.is_empty() {
            self.core.set_status("MULTI: No stores found, invalid store.");
            return false;
        }

        let mut results = Vec::with_capacity(self.stores.len());
        let mut unhandled: HashSet<*const LogEntry> = HashSet::new();
        for store in &self.stores {
            let mut copy = batch.clone();
            let ok = store.handle_messages(&mut copy);
            if !ok {
                unhandled.extend(copy.iter().map(Arc::as_ptr));
            }
            results.push(ok);
        }

        if self.report_success.combine(results) {
            return true;
        }
        let remaining: MessageBatch = batch
            .iter()
            .filter(|e| unhandled.contains(&Arc::as_ptr(*e)))
            .cloned()
            .collect();
        // a child that rebuilt its entries cannot be matched; keep them all
        if !remaining.is_empty() {
            *batch = remaining;
        }
        false
    }

    fn periodic_check(&self) {
        for store in &self.stores {
            store.periodic_check();
        }
    }

    fn status(&self) -> String {
        let status = self.core.status();
        if !status.is_empty() {
            return status;
        }
        self.stores
            .iter()
            .map(|s| s.status())
            .find(|s| !s.is_empty())
            .unwrap_or_default()
    }
}

impl fmt::Debug for MultiStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MultiStore")
            .field("category", &self.core.category())
            .field("report_success", &self.report_success)
            .field("stores", &self.stores.len())
            .finish()
    }
}

#[cfg(test)]
#[path = "multi_test.rs"]
mod multi_test;
