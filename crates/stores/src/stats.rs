//! Per-category counters
//!
//! Stores report events (`retries`, `lost`, `sent`, ...) here instead of
//! keeping private atomics, so one snapshot covers the whole tree.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;

/// Counter names used across the tree
pub mod counter {
    pub const RETRIES: &str = "retries";
    pub const LOST: &str = "lost";
    pub const IGNORED: &str = "ignored";
    pub const SENT: &str = "sent";
    pub const RECONNECTS: &str = "reconnects";
    pub const RECEIVED_GOOD: &str = "received good";
    pub const RECEIVED_BAD: &str = "received bad";
    pub const TAIL_GOOD: &str = "tail good";
    pub const TAIL_BAD: &str = "tail bad";
}

/// Process-wide counters keyed by `(category, name)`
#[derive(Debug, Default)]
pub struct StoreStats {
    counters: DashMap<(String, String), AtomicU64>,
}

impl StoreStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one to a counter
    #[inline]
    pub fn incr(&self, category: &str, name: &str) {
        self.incr_by(category, name, 1);
    }

    /// Add `amount` to a counter
    pub fn incr_by(&self, category: &str, name: &str, amount: u64) {
        if amount == 0 {
            return;
        }
        self.counters
            .entry((category.to_string(), name.to_string()))
            .or_default()
            .fetch_add(amount, Ordering::Relaxed);
    }

    /// Current value, zero if never touched
    pub fn get(&self, category: &str, name: &str) -> u64 {
        self.counters
            .get(&(category.to_string(), name.to_string()))
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// All counters sorted by category then name
    pub fn snapshot(&self) -> Vec<(String, String, u64)> {
        let mut out: Vec<_> = self
            .counters
            .iter()
            .map(|e| {
                let (category, name) = e.key();
                (category.clone(), name.clone(), e.value().load(Ordering::Relaxed))
            })
            .collect();
        out.sort();
        out
    }
}

#[cfg(test)]
#[path = "stats_test.rs"]
mod stats_test;
