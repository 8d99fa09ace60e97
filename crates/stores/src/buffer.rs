//! Buffer store - primary with a durable secondary and replay
//!
//! ```text
//!                 primary open fails / write fails / queue too long
//!   STREAMING  ------------------------------------------------>  DISCONNECTED
//!       ^                                                              |
//!       | secondary empty                    retry interval elapsed,   |
//!       |                                    primary opens             |
//!   SENDING_BUFFER  <--------------------------------------------------+
//! ```
//!
//! While disconnected every batch goes to the secondary. Once the primary
//! reopens, `periodic_check` replays the secondary's oldest files into it,
//! `buffer_send_rate` files per tick, and switches back to streaming when
//! nothing is left. With `replay_buffer` off the secondary is write-only
//! and the store goes straight back to streaming.
//!
//! A `multi` primary is rejected: it can half-accept a batch without saying
//! which entries, so replay could not avoid duplicates.

use std::fmt;
use std::time::{Duration, Instant};

use chrono::Local;
use parking_lot::Mutex;
use rand::Rng;
use sluice_config::StoreConf;
use sluice_protocol::MessageBatch;

use crate::file::FileStore;
use crate::stats::counter;
use crate::{Store, StoreContext, StoreCore, StoreType, create_store};

pub const DEFAULT_MAX_QUEUE_LENGTH: u64 = 2_000_000;
pub const DEFAULT_BUFFER_SEND_RATE: u64 = 1;
pub const DEFAULT_RETRY_INTERVAL_SECS: u64 = 300;
pub const DEFAULT_RETRY_INTERVAL_RANGE_SECS: u64 = 60;

/// Failover state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferState {
    Streaming,
    Disconnected,
    SendingBuffer,
}

impl BufferState {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Streaming => "STREAMING",
            Self::Disconnected => "DISCONNECTED",
            Self::SendingBuffer => "SENDING_BUFFER",
        }
    }
}

impl fmt::Display for BufferState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
struct BufferSettings {
    max_queue_length: u64,
    buffer_send_rate: u64,
    avg_retry_interval: u64,
    retry_interval_range: u64,
    replay_buffer: bool,
}

impl Default for BufferSettings {
    fn default() -> Self {
        Self {
            max_queue_length: DEFAULT_MAX_QUEUE_LENGTH,
            buffer_send_rate: DEFAULT_BUFFER_SEND_RATE,
            avg_retry_interval: DEFAULT_RETRY_INTERVAL_SECS,
            retry_interval_range: DEFAULT_RETRY_INTERVAL_RANGE_SECS,
            replay_buffer: true,
        }
    }
}

impl BufferSettings {
    /// `avg - range/2 + uniform(0, range)` seconds
    fn new_retry_interval(&self) -> Duration {
        let base = self.avg_retry_interval - self.retry_interval_range / 2;
        let spread = if self.retry_interval_range > 0 {
            rand::rng().random_range(0..self.retry_interval_range)
        } else {
            0
        };
        Duration::from_secs(base + spread)
    }
}

#[derive(Debug)]
struct Fsm {
    state: BufferState,
    last_open_attempt: Instant,
    retry_interval: Duration,
}

impl Fsm {
    fn new(settings: &BufferSettings) -> Self {
        Self {
            state: BufferState::Disconnected,
            last_open_attempt: Instant::now(),
            retry_interval: settings.new_retry_interval(),
        }
    }
}

/// Store that fails over from a primary to a secondary and replays
pub struct BufferStore {
    core: StoreCore,
    settings: BufferSettings,
    primary: Box<dyn Store>,
    secondary: Box<dyn Store>,
    fsm: Mutex<Fsm>,
}

impl BufferStore {
    /// Unconfigured store; both children default to local files
    pub fn new(ctx: StoreContext, category: &str, multi_category: bool) -> Self {
        let primary = Box::new(FileStore::new(ctx.clone(), category, multi_category, false));
        let secondary = Box::new(FileStore::new(ctx.clone(), category, multi_category, true));
        Self::with_stores(ctx, category, multi_category, primary, secondary)
    }

    /// Store over already built children
    pub fn with_stores(
        ctx: StoreContext,
        category: &str,
        multi_category: bool,
        primary: Box<dyn Store>,
        secondary: Box<dyn Store>,
    ) -> Self {
        let settings = BufferSettings::default();
        Self {
            core: StoreCore::new(ctx, StoreType::Buffer, category, multi_category),
            fsm: Mutex::new(Fsm::new(&settings)),
            settings,
            primary,
            secondary,
        }
    }

    pub fn state(&self) -> BufferState {
        self.fsm.lock().state
    }

    pub fn primary(&self) -> &dyn Store {
        self.primary.as_ref()
    }

    pub fn secondary(&self) -> &dyn Store {
        self.secondary.as_ref()
    }

    fn configure_settings(&mut self, conf: &StoreConf) {
        let settings = &mut self.settings;
        if let Some(v) = conf.get_unsigned("max_queue_length") {
            settings.max_queue_length = v;
        }
        if let Some(v) = conf.get_unsigned("buffer_send_rate") {
            settings.buffer_send_rate = v;
        }
        if let Some(v) = conf.get_unsigned("retry_interval") {
            settings.avg_retry_interval = v;
        }
        if let Some(v) = conf.get_unsigned("retry_interval_range") {
            settings.retry_interval_range = v;
        }
        if let Some(v) = conf.get_string("replay_buffer")
            && v != "yes"
        {
            settings.replay_buffer = false;
        }

        if settings.retry_interval_range > settings.avg_retry_interval {
            tracing::warn!(
                category = %self.core.category(),
                retry_interval = settings.avg_retry_interval,
                retry_interval_range = settings.retry_interval_range,
                "bad config - retry_interval_range must be less than retry_interval, using retry_interval as range"
            );
            settings.retry_interval_range = settings.avg_retry_interval;
        }

        *self.fsm.get_mut() = Fsm::new(settings);
    }

    /// Build the `primary` or `secondary` child, or record why not
    fn build_child(&self, conf: &StoreConf, role: &str, readable: bool) -> Option<Box<dyn Store>> {
        let Some(child_conf) = conf.get_store(role) else {
            self.bad_config(format!("Bad config - buffer store doesn't have {} store", role));
            return None;
        };
        let Some(type_name) = child_conf.store_type() else {
            self.bad_config(format!("Bad config - buffer {} store doesn't have a type", role));
            return None;
        };
        if role == "primary" && type_name == StoreType::Multi.as_str() {
            self.bad_config("Bad config - buffer primary store cannot be multistore".to_string());
            return None;
        }

        let ctx = self.core.ctx();
        let category = self.core.category();
        let Some(mut child) =
            create_store(ctx, &type_name, category, readable, self.core.multi_category())
        else {
            self.bad_config(format!("Bad config - buffer {} store has unknown type", role));
            return None;
        };
        child.configure(&child_conf);
        Some(child)
    }

    fn bad_config(&self, msg: String) {
        tracing::error!(category = %self.core.category(), "{}", msg);
        self.core.set_status(msg);
    }

    /// Run exit actions for the current state and entry actions for `new`
    fn change_state(&self, fsm: &mut Fsm, new: BufferState) {
        match fsm.state {
            BufferState::Streaming => {
                self.secondary.open();
            }
            // whatever took us offline is resolved
            BufferState::Disconnected => self.core.clear_status(),
            BufferState::SendingBuffer => {}
        }

        match new {
            BufferState::Streaming => {
                if self.secondary.is_open() {
                    self.secondary.close();
                }
            }
            BufferState::Disconnected => {
                self.core.stats().incr(self.core.category(), counter::RETRIES);
                fsm.last_open_attempt = Instant::now();
                fsm.retry_interval = self.settings.new_retry_interval();
                tracing::info!(
                    category = %self.core.category(),
                    retry_interval_secs = fsm.retry_interval.as_secs(),
                    "choosing new retry interval"
                );
                if !self.secondary.is_open() {
                    self.secondary.open();
                }
            }
            BufferState::SendingBuffer => {
                if !self.secondary.is_open() {
                    self.secondary.open();
                }
            }
        }

        tracing::info!(
            category = %self.core.category(),
            from = %fsm.state,
            to = %new,
            "changing state"
        );
        fsm.state = new;
    }

    /// Replay up to `buffer_send_rate` groups from the secondary
    fn send_buffer(&self, fsm: &mut Fsm) {
        let now = Local::now();
        for _ in 0..self.settings.buffer_send_rate {
            let mut batch = MessageBatch::new();
            if !self.secondary.read_oldest(&mut batch, now) {
                // stay in this state and keep trying
                self.core.set_status("Failed to read from secondary store");
                tracing::warn!(category = %self.core.category(), "buffer store can't read from secondary store");
                break;
            }
            let size = batch.len();
            if size == 0 {
                // nothing to read is not an error
                self.secondary.delete_oldest(now);
            } else if self.primary.handle_messages(&mut batch) {
                self.secondary.delete_oldest(now);
            } else {
                if batch.len() != size {
                    tracing::info!(
                        category = %self.core.category(),
                        processed = size - batch.len(),
                        total = size,
                        "buffer store primary processed part of a replay batch"
                    );
                    if !self.secondary.replace_oldest(&mut batch, now) {
                        tracing::error!(
                            category = %self.core.category(),
                            lost = batch.len(),
                            "buffer store secondary could not keep unsent messages, dropping them"
                        );
                        self.core.stats().incr_by(
                            self.core.category(),
                            counter::LOST,
                            batch.len() as u64,
                        );
                        self.secondary.delete_oldest(now);
                    }
                }
                self.change_state(fsm, BufferState::Disconnected);
                break;
            }

            if self.secondary.empty(now) {
                tracing::info!(
                    category = %self.core.category(),
                    "no more buffer files to send, switching to streaming mode"
                );
                self.change_state(fsm, BufferState::Streaming);
                self.primary.flush();
                break;
            }
        }
    }
}

impl Store for BufferStore {
    fn core(&self) -> &StoreCore {
        &self.core
    }

    fn copy(&self, category: &str) -> Box<dyn Store> {
        Box::new(Self {
            core: self.core.rebind(category),
            settings: self.settings.clone(),
            primary: self.primary.copy(category),
            secondary: self.secondary.copy(category),
            fsm: Mutex::new(Fsm::new(&self.settings)),
        })
    }

    fn configure(&mut self, conf: &StoreConf) {
        self.configure_settings(conf);

        if let Some(secondary) = self.build_child(conf, "secondary", self.settings.replay_buffer) {
            self.secondary = secondary;
        }
        if let Some(primary) = self.build_child(conf, "primary", false) {
            self.primary = primary;
        }
    }

    fn open(&self) -> bool {
        let mut fsm = self.fsm.lock();
        if self.primary.open() {
            // files may be left over from a previous run
            self.change_state(&mut fsm, BufferState::SendingBuffer);
            if !self.settings.replay_buffer {
                self.change_state(&mut fsm, BufferState::Streaming);
            }
        } else {
            self.secondary.open();
            self.change_state(&mut fsm, BufferState::Disconnected);
        }
        drop(fsm);
        self.is_open()
    }

    fn is_open(&self) -> bool {
        self.primary.is_open() || self.secondary.is_open()
    }

    fn close(&self) {
        for store in [&self.primary, &self.secondary] {
            if store.is_open() {
                store.flush();
                store.close();
            }
        }
    }

    fn flush(&self) {
        for store in [&self.primary, &self.secondary] {
            if store.is_open() {
                store.flush();
            }
        }
    }

    fn handle_messages(&self, batch: &mut MessageBatch) -> bool {
        let mut fsm = self.fsm.lock();

        // a long queue means the primary is not keeping up
        if fsm.state == BufferState::Streaming && batch.len() as u64 > self.settings.max_queue_length {
            tracing::warn!(
                category = %self.core.category(),
                count = batch.len(),
                "buffer store queue backing up, switching to secondary store"
            );
            self.change_state(&mut fsm, BufferState::Disconnected);
        }

        if fsm.state == BufferState::Streaming {
            if self.primary.handle_messages(batch) {
                return true;
            }
            self.change_state(&mut fsm, BufferState::Disconnected);
        }

        let accepted = self.secondary.handle_messages(batch);
        if !accepted {
            tracing::error!(
                category = %self.core.category(),
                count = batch.len(),
                "buffer store secondary refused messages"
            );
        }
        accepted
    }

    fn periodic_check(&self) {
        self.primary.periodic_check();
        self.secondary.periodic_check();

        let mut fsm = self.fsm.lock();
        if fsm.state == BufferState::Disconnected
            && fsm.last_open_attempt.elapsed() >= fsm.retry_interval
        {
            if self.primary.open() {
                let next = if self.settings.replay_buffer {
                    BufferState::SendingBuffer
                } else {
                    BufferState::Streaming
                };
                self.change_state(&mut fsm, next);
            } else {
                // resets the retry timer
                self.change_state(&mut fsm, BufferState::Disconnected);
            }
        }

        if fsm.state == BufferState::SendingBuffer {
            self.send_buffer(&mut fsm);
        }
    }

    /// Secondary problems first: they are the ones that lose data
    fn status(&self) -> String {
        let status = self.secondary.status();
        if !status.is_empty() {
            return status;
        }
        let status = self.core.status();
        if !status.is_empty() {
            return status;
        }
        self.primary.status()
    }
}

impl fmt::Debug for BufferStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferStore")
            .field("category", &self.core.category())
            .field("primary", &self.primary.store_type())
            .field("secondary", &self.secondary.store_type())
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[path = "buffer_test.rs"]
mod buffer_test;
