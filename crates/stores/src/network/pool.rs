//! Connection pool
//!
//! Network stores that set `use_conn_pool` share one [`Connection`] per
//! peer key. The pool map lock guards entries and their reference counts;
//! each connection has its own lock, taken after the map lock is released,
//! which spans the whole request/reply exchange.
//!
//! Connections can be told to reconnect after a number of sent entries
//! (`max_msg_before_reconnect`), jittered by up to `msg_threshold_delta`
//! either way so a fleet does not reconnect in lockstep.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rand::Rng;
use sluice_protocol::{LogEntry, MAX_FRAME_SIZE, MessageBatch, ResultCode, wire};

use super::{Connector, Peer, Transport, TransportError};
use crate::StoreStats;
use crate::stats::counter;

/// How often per-category send counts are logged
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(60);

/// Outcome of a send through a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendResult {
    /// Peer accepted the batch
    Ok,
    /// Peer is busy; connection still open
    TryLater,
    /// Connection is broken and has been closed
    Fatal,
}

/// Reconnect policy
///
/// Ordered so the strictest setting is the smallest: when several stores
/// share a peer, the merged threshold is the minimum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum Threshold {
    /// Never reconnect on volume
    Never,
    /// Reconnect after this many entries
    After(u64),
    /// Not configured
    #[default]
    Unset,
}

impl Threshold {
    /// `max_msg_before_reconnect` value: absent is unset, zero is never
    pub fn from_config(value: Option<u64>) -> Self {
        match value {
            None => Self::Unset,
            Some(0) => Self::Never,
            Some(n) => Self::After(n),
        }
    }

    fn merge(&mut self, other: Threshold) {
        *self = (*self).min(other);
    }
}

// =============================================================================
// Connection
// =============================================================================

/// One transport to one peer, with reconnect accounting
pub struct Connection {
    peer: Peer,
    transport: Box<dyn Transport>,
    threshold: Threshold,
    delta: u64,
    /// Jittered threshold for the current connection, `None` for no limit
    current_threshold: Option<u64>,
    sent_since_reconnect: u64,
    send_counts: BTreeMap<String, u64>,
    last_heartbeat: Instant,
    stats: Arc<StoreStats>,
}

impl Connection {
    pub fn new(
        peer: Peer,
        transport: Box<dyn Transport>,
        threshold: Threshold,
        delta: u64,
        stats: Arc<StoreStats>,
    ) -> Self {
        let current_threshold = match threshold {
            Threshold::After(n) => Some(n),
            _ => None,
        };
        Self {
            peer,
            transport,
            threshold,
            delta,
            current_threshold,
            sent_since_reconnect: 0,
            send_counts: BTreeMap::new(),
            last_heartbeat: Instant::now(),
            stats,
        }
    }

    #[inline]
    pub fn peer(&self) -> &Peer {
        &self.peer
    }

    /// Threshold in effect for the current connection
    #[inline]
    pub fn current_threshold(&self) -> Option<u64> {
        self.current_threshold
    }

    #[inline]
    pub fn sent_since_reconnect(&self) -> u64 {
        self.sent_since_reconnect
    }

    pub fn is_open(&self) -> bool {
        self.transport.is_open()
    }

    /// Connect, picking a fresh jittered threshold
    pub fn open(&mut self) -> bool {
        if let Threshold::After(threshold) = self.threshold {
            if self.delta > threshold {
                self.delta = threshold.saturating_sub(1);
            }
            self.current_threshold = Some(jitter(threshold, self.delta));
            tracing::debug!(
                peer = %self.peer,
                threshold = ?self.current_threshold,
                "message threshold before reconnect"
            );
        }

        match self.transport.open() {
            Ok(()) => {
                tracing::info!(peer = %self.peer, "opened connection to remote server");
                true
            }
            Err(e) => {
                tracing::warn!(peer = %self.peer, error = %e, "failed to open connection to remote server");
                false
            }
        }
    }

    pub fn close(&mut self) {
        tracing::info!(peer = %self.peer, "closing connection to remote server");
        self.transport.close();
    }

    /// Deliver `batch`, opening the transport first if needed
    ///
    /// Entries that can never be framed are dropped and counted as lost.
    /// The rest go out in frames of at most `MAX_FRAME_SIZE`. Unless the
    /// result is `Ok`, `batch` is left holding the entries the peer has not
    /// accepted.
    pub fn send(&mut self, batch: &mut MessageBatch) -> SendResult {
        self.drop_unencodable(batch);
        if batch.is_empty() {
            tracing::debug!(peer = %self.peer, "send called with no messages");
            return SendResult::Ok;
        }
        if !self.is_open() && !self.open() {
            return SendResult::Fatal;
        }

        let mut accepted = 0;
        for frame in wire::split_batch(batch, MAX_FRAME_SIZE) {
            let result = self.send_frame(&frame);
            if result != SendResult::Ok {
                batch.drain_front(accepted);
                return result;
            }
            accepted += frame.len();
        }
        batch.clear();
        SendResult::Ok
    }

    fn send_frame(&mut self, frame: &MessageBatch) -> SendResult {
        let size = frame.len();
        let fatal = match self.transport.send(frame) {
            Ok(ResultCode::Ok) => {
                self.record_sent(frame);
                self.reopen_if_needed();
                return SendResult::Ok;
            }
            Ok(code) => {
                tracing::warn!(
                    peer = %self.peer,
                    count = size,
                    result = %code,
                    "remote server did not accept messages"
                );
                false
            }
            Err(TransportError::Encode(e)) => {
                // nothing reached the socket, so the connection stays up
                tracing::error!(peer = %self.peer, count = size, error = %e, "dropping messages that cannot be encoded");
                self.count_lost(frame.as_slice());
                return SendResult::Ok;
            }
            Err(e) => {
                tracing::warn!(
                    peer = %self.peer,
                    count = size,
                    error = %e,
                    "failed to send messages to remote server"
                );
                true
            }
        };

        // a service peer may resolve to a healthier server on reopen
        if self.peer.is_service() || fatal {
            self.close();
            SendResult::Fatal
        } else {
            SendResult::TryLater
        }
    }

    fn drop_unencodable(&self, batch: &mut MessageBatch) {
        if batch.iter().all(|e| wire::check_entry(e).is_ok()) {
            return;
        }

        let mut dropped = Vec::new();
        let mut kept = MessageBatch::with_capacity(batch.len());
        for entry in batch.take() {
            match wire::check_entry(&entry) {
                Ok(()) => kept.push_shared(entry),
                Err(e) => {
                    tracing::error!(
                        peer = %self.peer,
                        category_len = entry.category().len(),
                        bytes = entry.len(),
                        error = %e,
                        "dropping message that cannot be sent"
                    );
                    dropped.push(entry);
                }
            }
        }
        self.count_lost(&dropped);
        *batch = kept;
    }

    fn count_lost(&self, entries: &[Arc<LogEntry>]) {
        for entry in entries {
            self.stats.incr(entry.category(), counter::LOST);
        }
    }

    fn record_sent(&mut self, batch: &MessageBatch) {
        self.sent_since_reconnect += batch.len() as u64;

        let mut per_category: BTreeMap<&str, u64> = BTreeMap::new();
        for entry in batch {
            *per_category.entry(entry.category()).or_default() += 1;
        }
        for (category, count) in per_category {
            self.stats.incr_by(category, counter::SENT, count);
            *self
                .send_counts
                .entry(format!("{}:{}", category, ResultCode::Ok))
                .or_default() += count;
        }

        if self.last_heartbeat.elapsed() > HEARTBEAT_INTERVAL {
            for (key, count) in &self.send_counts {
                tracing::info!(peer = %self.peer, counts = %key, sent = count, "send counts");
            }
            self.send_counts.clear();
            self.last_heartbeat = Instant::now();
        }

        tracing::debug!(
            peer = %self.peer,
            count = batch.len(),
            since_reconnect = self.sent_since_reconnect,
            "sent messages to remote server"
        );
    }

    fn reopen_if_needed(&mut self) {
        let Some(threshold) = self.current_threshold else {
            return;
        };
        if threshold == 0 || self.sent_since_reconnect <= threshold {
            return;
        }

        tracing::info!(
            peer = %self.peer,
            sent = self.sent_since_reconnect,
            threshold,
            "message threshold reached, reopening connection"
        );
        if self.is_open() {
            self.close();
        }
        self.open();
        self.sent_since_reconnect = 0;
        self.stats.incr(&self.peer.key(), counter::RECONNECTS);
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("peer", &self.peer)
            .field("open", &self.is_open())
            .field("threshold", &self.current_threshold)
            .field("sent_since_reconnect", &self.sent_since_reconnect)
            .finish()
    }
}

/// `threshold` moved by a uniform amount in `[-delta, delta)`
fn jitter(threshold: u64, delta: u64) -> u64 {
    if delta == 0 {
        return threshold;
    }
    let offset = rand::rng().random_range(0..delta);
    threshold - delta + 2 * offset
}

// =============================================================================
// Pool
// =============================================================================

struct PoolEntry {
    refs: usize,
    conn: Arc<Mutex<Connection>>,
}

#[derive(Debug, Default)]
struct Thresholds {
    default: Threshold,
    delta: u64,
    per_key: HashMap<String, Threshold>,
}

/// Shared, reference-counted connections keyed by peer
pub struct ConnectionPool {
    connector: Arc<dyn Connector>,
    stats: Arc<StoreStats>,
    entries: Mutex<HashMap<String, PoolEntry>>,
    thresholds: Mutex<Thresholds>,
}

impl ConnectionPool {
    pub fn new(connector: Arc<dyn Connector>, stats: Arc<StoreStats>) -> Self {
        Self {
            connector,
            stats,
            entries: Mutex::new(HashMap::new()),
            thresholds: Mutex::new(Thresholds::default()),
        }
    }

    /// Fold a store's reconnect settings into the pool's
    pub fn merge_reconnect_thresholds(
        &self,
        per_key: &HashMap<String, Threshold>,
        default: Threshold,
        delta: u64,
    ) {
        let mut thresholds = self.thresholds.lock();
        thresholds.default.merge(default);
        thresholds.delta = thresholds.delta.max(delta);
        for (key, threshold) in per_key {
            let current = thresholds.per_key.entry(key.clone()).or_default();
            let merged = (*current).min(*threshold);
            if merged != *current && *current != Threshold::Unset {
                tracing::info!(key = %key, was = ?current, new = ?merged, "merging reconnect thresholds");
            }
            *current = merged;
        }
    }

    /// Reconnect threshold and delta a new connection to `key` gets
    pub fn threshold_for(&self, key: &str) -> (Threshold, u64) {
        let thresholds = self.thresholds.lock();
        let threshold = thresholds
            .per_key
            .get(key)
            .copied()
            .unwrap_or(thresholds.default);
        (threshold, thresholds.delta)
    }

    fn connection(&self, peer: &Peer, timeout: Duration) -> Connection {
        let (threshold, delta) = self.threshold_for(&peer.key());
        Connection::new(
            peer.clone(),
            self.connector.transport(peer, timeout),
            threshold,
            delta,
            self.stats.clone(),
        )
    }

    /// Take a reference on the connection to `peer`, connecting if needed
    pub fn open(&self, peer: &Peer, timeout: Duration) -> bool {
        let key = peer.key();
        let mut entries = self.entries.lock();

        if let Some(entry) = entries.get_mut(&key) {
            if entry.conn.lock().is_open() {
                entry.refs += 1;
                return true;
            }

            let mut conn = self.connection(peer, timeout);
            if conn.open() {
                tracing::info!(key = %key, "pool switching to a new connection");
                entry.conn = Arc::new(Mutex::new(conn));
                entry.refs += 1;
                return true;
            }
            return false;
        }

        let mut conn = self.connection(peer, timeout);
        if !conn.open() {
            return false;
        }
        entries.insert(
            key,
            PoolEntry {
                refs: 1,
                conn: Arc::new(Mutex::new(conn)),
            },
        );
        true
    }

    /// Drop a reference; the last one closes the connection
    pub fn close(&self, key: &str) {
        let mut entries = self.entries.lock();
        let Some(entry) = entries.get_mut(key) else {
            tracing::error!(
                key = %key,
                "LOGIC ERROR: attempting to close connection the pool has no entry for"
            );
            return;
        };

        entry.refs = entry.refs.saturating_sub(1);
        if entry.refs == 0 {
            entry.conn.lock().close();
            entries.remove(key);
        }
    }

    /// Send through the pooled connection for `key`
    pub fn send(&self, key: &str, batch: &mut MessageBatch) -> SendResult {
        let conn = self.entries.lock().get(key).map(|e| e.conn.clone());
        match conn {
            Some(conn) => conn.lock().send(batch),
            None => {
                tracing::error!(key = %key, "send failed, no connection pool entry");
                SendResult::Fatal
            }
        }
    }

    /// References held on `key`
    pub fn ref_count(&self, key: &str) -> Option<usize> {
        self.entries.lock().get(key).map(|e| e.refs)
    }

    /// Whether the pooled connection for `key` exists and is open
    pub fn is_open(&self, key: &str) -> bool {
        let conn = self.entries.lock().get(key).map(|e| e.conn.clone());
        conn.is_some_and(|c| c.lock().is_open())
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("entries", &self.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[path = "pool_test.rs"]
mod pool_test;
