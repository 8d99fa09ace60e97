//! Test doubles for stores and transports

use std::collections::HashSet;
use std::sync::{Arc, mpsc};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use sluice_config::StoreConf;
use sluice_protocol::{LogEntry, MessageBatch, ProtocolError, ResultCode};

use crate::network::{Connector, Peer, Transport, TransportError};
use crate::{Store, StoreContext, StoreCore, StoreType};

// =============================================================================
// MockStore
// =============================================================================

/// Behavior and observations shared by a mock and all of its copies
#[derive(Debug, Default)]
pub struct MockControl {
    /// Number of upcoming `open` calls that fail
    pub open_failures: AtomicUsize,
    /// Reject every batch untouched
    pub fail_all: AtomicBool,
    /// Reject entries of these categories
    pub fail_categories: Mutex<HashSet<String>>,
    /// Accept at most this many entries per call
    pub accept_limit: Mutex<Option<usize>>,
    /// Every accepted entry, in order
    pub accepted: Mutex<Vec<Arc<LogEntry>>>,
    pub opens: AtomicUsize,
    pub closes: AtomicUsize,
    pub flushes: AtomicUsize,
    pub checks: AtomicUsize,
    pub status: Mutex<String>,
    /// `open` for this category waits for a message on the receiver
    pub hold_open: Mutex<Option<(String, mpsc::Receiver<()>)>>,
}

impl MockControl {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn accepted_messages(&self) -> Vec<String> {
        self.accepted
            .lock()
            .iter()
            .map(|e| String::from_utf8_lossy(e.message()).into_owned())
            .collect()
    }

    pub fn fail_category(&self, category: &str) {
        self.fail_categories.lock().insert(category.to_string());
    }
}

pub struct MockStore {
    core: StoreCore,
    control: Arc<MockControl>,
    open: AtomicBool,
}

impl MockStore {
    pub fn new(category: &str, control: Arc<MockControl>) -> Self {
        Self::with_type(category, StoreType::Null, control)
    }

    pub fn with_type(category: &str, store_type: StoreType, control: Arc<MockControl>) -> Self {
        Self {
            core: StoreCore::new(StoreContext::default(), store_type, category, false),
            control,
            open: AtomicBool::new(false),
        }
    }

    pub fn boxed(category: &str, control: &Arc<MockControl>) -> Box<dyn Store> {
        Box::new(Self::new(category, control.clone()))
    }
}

impl Store for MockStore {
    fn core(&self) -> &StoreCore {
        &self.core
    }

    fn copy(&self, category: &str) -> Box<dyn Store> {
        Box::new(Self::with_type(
            category,
            self.core.store_type(),
            self.control.clone(),
        ))
    }

    fn configure(&mut self, _conf: &StoreConf) {}

    fn open(&self) -> bool {
        self.control.opens.fetch_add(1, Ordering::SeqCst);
        let gate = {
            let mut hold = self.control.hold_open.lock();
            let held = hold
                .as_ref()
                .is_some_and(|(category, _)| category == self.core.category());
            if held { hold.take() } else { None }
        };
        if let Some((_, gate)) = gate {
            let _ = gate.recv();
        }
        let failing = self
            .control
            .open_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        self.open.store(!failing, Ordering::SeqCst);
        !failing
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    fn close(&self) {
        self.control.closes.fetch_add(1, Ordering::SeqCst);
        self.open.store(false, Ordering::SeqCst);
    }

    fn flush(&self) {
        self.control.flushes.fetch_add(1, Ordering::SeqCst);
    }

    fn handle_messages(&self, batch: &mut MessageBatch) -> bool {
        if !self.is_open() || self.control.fail_all.load(Ordering::SeqCst) {
            return false;
        }

        let failing = self.control.fail_categories.lock().clone();
        let limit = *self.control.accept_limit.lock();
        let mut accepted = self.control.accepted.lock();
        let mut taken = 0usize;
        let mut failed = MessageBatch::new();
        for entry in batch.iter() {
            let over_limit = limit.is_some_and(|l| taken >= l);
            if failing.contains(entry.category()) || over_limit {
                failed.push_shared(entry.clone());
            } else {
                accepted.push(entry.clone());
                taken += 1;
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
        self.control.checks.fetch_add(1, Ordering::SeqCst);
    }

    fn status(&self) -> String {
        self.control.status.lock().clone()
    }
}

// =============================================================================
// MockConnector / MockTransport
// =============================================================================

/// What a mock transport answers to `send`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MockReply {
    #[default]
    Ok,
    TryLater,
    Broken,
    /// Fails to frame the batch without touching the connection
    Unencodable,
}

/// Observations shared by every transport a `MockConnector` hands out
#[derive(Debug, Default)]
pub struct MockNet {
    pub created: AtomicUsize,
    pub opens: AtomicUsize,
    pub closes: AtomicUsize,
    pub refuse_connect: AtomicBool,
    pub reply: Mutex<MockReply>,
    pub sent: Mutex<Vec<MessageBatch>>,
    pub peers: Mutex<Vec<Peer>>,
}

impl MockNet {
    pub fn sent_entries(&self) -> usize {
        self.sent.lock().iter().map(MessageBatch::len).sum()
    }
}

#[derive(Debug, Default, Clone)]
pub struct MockConnector {
    pub net: Arc<MockNet>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store context whose transports are all mocks on this connector
    pub fn context(&self) -> StoreContext {
        use crate::network::StaticDiscovery;

        let discovery = StaticDiscovery::from_pairs([(
            "aggregators".to_string(),
            vec!["agg1:1463".to_string(), "agg2:1463".to_string()],
        )]);
        StoreContext::new(Arc::new(discovery), Arc::new(self.clone()))
    }
}

impl Connector for MockConnector {
    fn transport(&self, peer: &Peer, _timeout: Duration) -> Box<dyn Transport> {
        self.net.created.fetch_add(1, Ordering::SeqCst);
        self.net.peers.lock().push(peer.clone());
        Box::new(MockTransport {
            net: self.net.clone(),
            open: false,
        })
    }
}

#[derive(Debug)]
pub struct MockTransport {
    net: Arc<MockNet>,
    open: bool,
}

impl Transport for MockTransport {
    fn open(&mut self) -> Result<(), TransportError> {
        self.net.opens.fetch_add(1, Ordering::SeqCst);
        if self.net.refuse_connect.load(Ordering::SeqCst) {
            return Err(TransportError::NoServers("refused".into()));
        }
        self.open = true;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn close(&mut self) {
        if self.open {
            self.net.closes.fetch_add(1, Ordering::SeqCst);
        }
        self.open = false;
    }

    fn send(&mut self, batch: &MessageBatch) -> Result<ResultCode, TransportError> {
        if !self.open {
            return Err(TransportError::NotConnected);
        }
        match *self.net.reply.lock() {
            MockReply::Ok => {
                self.net.sent.lock().push(batch.clone());
                Ok(ResultCode::Ok)
            }
            MockReply::TryLater => Ok(ResultCode::TryLater),
            MockReply::Broken => Err(TransportError::NotConnected),
            MockReply::Unencodable => Err(TransportError::Encode(ProtocolError::overflow(batch.len()))),
        }
    }
}

// =============================================================================
// Helpers
// =============================================================================

pub fn batch(category: &str, messages: &[&str]) -> MessageBatch {
    messages
        .iter()
        .map(|m| LogEntry::new(category, m.to_string()))
        .collect()
}

pub fn messages_of(batch: &MessageBatch) -> Vec<String> {
    batch
        .iter()
        .map(|e| String::from_utf8_lossy(e.message()).into_owned())
        .collect()
}

pub fn conf(toml: &str) -> StoreConf {
    toml.parse().expect("valid store conf")
}
