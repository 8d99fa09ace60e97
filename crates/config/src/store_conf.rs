//! Store configuration accessor
//!
//! Each store block in the `[store]` tree is handed to its store as a
//! `StoreConf`. Values are looked up by key and coerced to the requested
//! type, so `max_size = 1000` and `max_size = "1000"` read the same, and
//! booleans read as `"yes"` / `"no"`.
//!
//! ```toml
//! [store]
//! type = "buffer"
//! retry_interval = 30
//!
//! [store.primary]
//! type = "network"
//! remote_host = "agg1"
//! remote_port = 1463
//!
//! [store.secondary]
//! type = "file"
//! file_path = "/var/spool/sluice"
//! ```

use std::str::FromStr;

use serde::Deserialize;
use toml::{Table, Value};

use crate::{ConfigError, Result};

/// Read-mostly view of one store block
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(transparent)]
pub struct StoreConf {
    table: Table,
}

impl StoreConf {
    /// Empty block
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap an already parsed table
    pub fn from_table(table: Table) -> Self {
        Self { table }
    }

    /// String value; integers, floats and booleans are rendered
    pub fn get_string(&self, key: &str) -> Option<String> {
        match self.table.get(key)? {
            Value::String(s) => Some(s.clone()),
            Value::Integer(i) => Some(i.to_string()),
            Value::Float(f) => Some(f.to_string()),
            Value::Boolean(b) => Some(if *b { "yes" } else { "no" }.to_string()),
            _ => None,
        }
    }

    /// Non-negative integer value
    pub fn get_unsigned(&self, key: &str) -> Option<u64> {
        match self.table.get(key)? {
            Value::Integer(i) => u64::try_from(*i).ok(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Signed integer value
    pub fn get_int(&self, key: &str) -> Option<i64> {
        match self.table.get(key)? {
            Value::Integer(i) => Some(*i),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Nested store block
    pub fn get_store(&self, name: &str) -> Option<StoreConf> {
        match self.table.get(name)? {
            Value::Table(table) => Some(StoreConf::from_table(table.clone())),
            _ => None,
        }
    }

    /// Check whether `key` is present at all
    pub fn has_key(&self, key: &str) -> bool {
        self.table.contains_key(key)
    }

    /// Overwrite a value with a string
    pub fn set_string(&mut self, key: &str, value: impl Into<String>) {
        self.table
            .insert(key.to_string(), Value::String(value.into()));
    }

    /// Keys in this block
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.table.keys().map(String::as_str)
    }

    /// The block's `type` tag
    pub fn store_type(&self) -> Option<String> {
        self.get_string("type")
    }
}

impl FromStr for StoreConf {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self> {
        let table: Table = toml::from_str(s)?;
        Ok(Self::from_table(table))
    }
}
