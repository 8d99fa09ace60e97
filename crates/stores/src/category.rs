//! Category store - one child per category, cloned from a model
//!
//! ```toml
//! [store]
//! type = "category"
//!
//! [store.model]
//! type = "file"
//! file_path = "/var/log/sluice"
//! ```
//!
//! The first entry of a category clones the model with `copy(category)`,
//! opens it, and caches it for the life of the store. `multifile` and
//! `thriftmultifile` are the same store with the model built from the
//! block itself as a `file` / `thriftfile` store.
//!
//! Entries are delivered one at a time so a failing category never holds
//! up the others.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;
use sluice_config::StoreConf;
use sluice_protocol::MessageBatch;

use crate::{Store, StoreContext, StoreCore, StoreType, create_store};

const NO_MODEL: &str = "CATEGORYSTORE: NO stores found, invalid store.";
const MISSING_TYPE: &str = "CATEGORYSTORE: Store is missing type.";

/// Store that lazily builds a child per category
pub struct CategoryStore {
    core: StoreCore,
    model: Option<Box<dyn Store>>,
    stores: Mutex<BTreeMap<String, Arc<dyn Store>>>,
}

impl CategoryStore {
    pub fn new(ctx: StoreContext, category: &str, multi_category: bool) -> Self {
        Self::with_type(ctx, StoreType::Category, category, multi_category)
    }

    /// `category`, `multifile` or `thriftmultifile`
    pub fn with_type(
        ctx: StoreContext,
        store_type: StoreType,
        category: &str,
        multi_category: bool,
    ) -> Self {
        Self {
            core: StoreCore::new(ctx, store_type, category, multi_category),
            model: None,
            stores: Mutex::new(BTreeMap::new()),
        }
    }

    /// Store over an already built model
    pub fn with_model(ctx: StoreContext, category: &str, model: Box<dyn Store>) -> Self {
        let mut store = Self::new(ctx, category, false);
        store.model = Some(model);
        store
    }

    /// Categories seen so far, sorted
    pub fn categories(&self) -> Vec<String> {
        self.stores.lock().keys().cloned().collect()
    }

    fn configure_model(&mut self, conf: &StoreConf, type_name: &str) {
        match create_store(self.core.ctx(), type_name, self.core.category(), false, false) {
            Some(mut model) => {
                model.configure(conf);
                tracing::info!(
                    category = %self.core.category(),
                    store_type = %self.core.store_type(),
                    model_type = %type_name,
                    "configured model store"
                );
                self.model = Some(model);
            }
            None => {
                self.core
                    .set_status(format!("CATEGORYSTORE: Unknown store type {}.", type_name));
            }
        }
    }

    /// Cached child for `category`, built and opened on first sight
    ///
    /// `None` when no model is configured or the child will not open. New
    /// children are opened without holding the map lock; if another caller
    /// cached one for the same category meanwhile, theirs wins.
    fn store_for(&self, category: &str) -> Option<Arc<dyn Store>> {
        let cached = self.stores.lock().get(category).cloned();
        let store = match cached {
            Some(store) => store,
            None => {
                let built: Arc<dyn Store> = Arc::from(self.model.as_ref()?.copy(category));
                built.open();

                let mut stores = self.stores.lock();
                match stores.get(category).cloned() {
                    Some(existing) => {
                        drop(stores);
                        built.close();
                        existing
                    }
                    None => {
                        stores.insert(category.to_string(), built.clone());
                        return built.is_open().then_some(built);
                    }
                }
            }
        };

        // a child that lost its file or socket gets another chance
        if !store.is_open() && !store.open() {
            return None;
        }
        Some(store)
    }

    fn children(&self) -> Vec<Arc<dyn Store>> {
        self.stores.lock().values().cloned().collect()
    }
}

impl Store for CategoryStore {
    fn core(&self) -> &StoreCore {
        &self.core
    }

    fn copy(&self, category: &str) -> Box<dyn Store> {
        Box::new(Self {
            core: self.core.rebind(category),
            model: self.model.as_ref().map(|m| m.copy(category)),
            stores: Mutex::new(BTreeMap::new()),
        })
    }

    fn configure(&mut self, conf: &StoreConf) {
        match self.core.store_type() {
            StoreType::MultiFile => self.configure_model(conf, StoreType::File.as_str()),
            StoreType::ThriftMultiFile => self.configure_model(conf, StoreType::ThriftFile.as_str()),
            _ => {
                let Some(model_conf) = conf.get_store("model") else {
                    tracing::error!(category = %self.core.category(), "{}", NO_MODEL);
                    self.core.set_status(NO_MODEL);
                    return;
                };
                let Some(type_name) = model_conf.store_type() else {
                    tracing::error!(category = %self.core.category(), "{}", MISSING_TYPE);
                    self.core.set_status(MISSING_TYPE);
                    return;
                };
                self.configure_model(&model_conf, &type_name);
            }
        }
    }

    fn open(&self) -> bool {
        self.children()
            .iter()
            .fold(true, |ok, store| store.open() && ok)
    }

    fn is_open(&self) -> bool {
        self.children().iter().all(|s| s.is_open())
    }

    fn close(&self) {
        for store in self.children() {
            store.close();
        }
    }

    fn flush(&self) {
        for store in self.children() {
            store.flush();
        }
    }

    fn handle_messages(&self, batch: &mut MessageBatch) -> bool {
        let mut failed = MessageBatch::new();
        for entry in batch.iter() {
            let Some(store) = self.store_for(entry.category()) else {
                tracing::warn!(
                    category = %self.core.category(),
                    entry_category = %entry.category(),
                    "failed to open store for category"
                );
                failed.push_shared(entry.clone());
                continue;
            };

            let mut single = MessageBatch::with_capacity(1);
            single.push_shared(entry.clone());
            if !store.handle_messages(&mut single) {
                tracing::warn!(
                    category = %self.core.category(),
                    entry_category = %entry.category(),
                    "failed to handle message for category"
                );
                failed.push_shared(entry.clone());
            }
        }

        if failed.is_empty() {
            true
        } else {
            *batch = failed;
            false
        }
    }

    fn periodic_check(&self) {
        for store in self.children() {
            store.periodic_check();
        }
    }

    fn status(&self) -> String {
        let status = self.core.status();
        if !status.is_empty() {
            return status;
        }
        self.children()
            .iter()
            .map(|s| s.status())
            .find(|s| !s.is_empty())
            .unwrap_or_default()
    }
}

impl std::fmt::Debug for CategoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CategoryStore")
            .field("category", &self.core.category())
            .field("store_type", &self.core.store_type())
            .field("categories", &self.categories())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[path = "category_test.rs"]
mod category_test;
