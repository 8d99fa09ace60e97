//! Thrift file store - framed records through an in-memory write buffer
//!
//! Every entry becomes one length-framed record. Records accumulate in a
//! pending buffer that is written out when it reaches `msg_buffer_size`
//! bytes, every `flush_frequency_ms` from `periodic_check`, and on
//! `flush`/`close`/rotation. Each open starts a new sequence number.

use std::time::{Duration, Instant};

use chrono::{DateTime, Local};
use parking_lot::Mutex;
use sluice_config::StoreConf;
use sluice_protocol::MessageBatch;

use super::base::{FileSettings, RollState, RotatePeriod, bytes_to_pad};
use super::{LocalFile, fs};
use crate::stats::counter;
use crate::{Store, StoreContext, StoreCore, StoreType};

pub const DEFAULT_MSG_BUFFER_SIZE: u64 = 1024 * 1024;
pub const DEFAULT_FLUSH_FREQUENCY_MS: u64 = 3000;

#[derive(Debug)]
struct ThriftState {
    file: Option<LocalFile>,
    roll: RollState,
    pending: Vec<u8>,
    pending_count: usize,
    last_flush: Instant,
}

impl Default for ThriftState {
    fn default() -> Self {
        Self {
            file: None,
            roll: RollState::default(),
            pending: Vec::new(),
            pending_count: 0,
            last_flush: Instant::now(),
        }
    }
}

/// Store writing framed records with buffered writes
#[derive(Debug)]
pub struct ThriftFileStore {
    core: StoreCore,
    settings: FileSettings,
    flush_frequency: Duration,
    msg_buffer_size: u64,
    state: Mutex<ThriftState>,
}

impl ThriftFileStore {
    pub fn new(ctx: StoreContext, category: &str, multi_category: bool) -> Self {
        Self {
            core: StoreCore::new(ctx, StoreType::ThriftFile, category, multi_category),
            settings: FileSettings::new(category),
            flush_frequency: Duration::from_millis(DEFAULT_FLUSH_FREQUENCY_MS),
            msg_buffer_size: DEFAULT_MSG_BUFFER_SIZE,
            state: Mutex::new(ThriftState::default()),
        }
    }

    pub fn settings(&self) -> &FileSettings {
        &self.settings
    }

    /// Bytes waiting to be written
    pub fn pending_bytes(&self) -> usize {
        self.state.lock().pending.len()
    }

    fn open_internal(&self, state: &mut ThriftState, now: &DateTime<Local>) -> bool {
        let settings = &self.settings;
        let base = settings.base_name(now);
        let suffix = settings.find_newest(&base).map_or(0, |n| n + 1);
        let path = settings.full_filename(suffix, now);

        if let Err(e) = settings.create_file_directory(&path) {
            tracing::error!(
                category = %self.core.category(),
                file = %path.display(),
                error = %e,
                "could not create path for file"
            );
            self.core.set_status("File open error");
            return false;
        }

        if settings.rotate_period != RotatePeriod::Never {
            state.roll.last_roll = settings.roll_marker(now);
        }

        let mut file = LocalFile::new(&path, true).with_compression(settings.compression);
        if let Err(e) = file.open_write() {
            tracing::error!(
                category = %self.core.category(),
                file = %path.display(),
                error = %e,
                "failed to open file for writing"
            );
            self.core.set_status("File open error");
            return false;
        }
        tracing::info!(category = %self.core.category(), file = %path.display(), "opened file for writing");

        state.roll.current_size = file.file_size();
        state.roll.current_filename = path.clone();
        state.roll.events_written = 0;
        state.file = Some(file);
        state.last_flush = Instant::now();
        self.core.clear_status();

        if settings.create_symlink {
            let link = settings.full_symlink();
            if let Err(e) = fs::create_symlink(&path, &link) {
                tracing::warn!(
                    category = %self.core.category(),
                    link = %link.display(),
                    error = %e,
                    "failed to create symlink"
                );
            }
        }
        true
    }

    /// Write out the pending buffer. On failure the pending entries are
    /// dropped and the file is closed; all but the last `unacked` of them
    /// were already acknowledged and are counted as lost.
    fn flush_pending(&self, state: &mut ThriftState, unacked: usize) -> bool {
        state.last_flush = Instant::now();
        if state.pending.is_empty() {
            return true;
        }

        let result = match state.file.as_mut() {
            Some(file) => file.write(&state.pending).and_then(|_| file.flush()),
            None => Err(std::io::Error::new(
                std::io::ErrorKind::NotConnected,
                "no open file",
            )),
        };

        let lost = state.pending_count.saturating_sub(unacked);
        state.pending.clear();
        state.pending_count = 0;

        match result {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(
                    category = %self.core.category(),
                    file = %state.roll.current_filename.display(),
                    lost,
                    error = %e,
                    "thrift file store failed to write to file"
                );
                self.core.set_status("File write error");
                self.core
                    .stats()
                    .incr_by(self.core.category(), counter::LOST, lost as u64);
                if let Some(mut file) = state.file.take() {
                    file.close();
                }
                false
            }
        }
    }

    fn rotate(&self, state: &mut ThriftState, now: &DateTime<Local>) {
        self.flush_pending(state, 0);
        tracing::info!(
            category = %self.core.category(),
            file = %state.roll.current_filename.display(),
            size = state.roll.current_size,
            max_size = self.settings.max_size,
            "rotating file"
        );
        self.settings.write_stats_line(&state.roll, now);
        if let Some(mut file) = state.file.take() {
            file.close();
        }
        self.open_internal(state, now);
    }

    fn is_open_locked(state: &ThriftState) -> bool {
        state.file.as_ref().is_some_and(LocalFile::is_open)
    }
}

impl Store for ThriftFileStore {
    fn core(&self) -> &StoreCore {
        &self.core
    }

    fn copy(&self, category: &str) -> Box<dyn Store> {
        Box::new(Self {
            core: self.core.rebind(category),
            settings: self.settings.copy_for(category),
            flush_frequency: self.flush_frequency,
            msg_buffer_size: self.msg_buffer_size,
            state: Mutex::new(ThriftState::default()),
        })
    }

    fn configure(&mut self, conf: &StoreConf) {
        self.settings.configure(conf, self.core.category());
        if let Some(ms) = conf.get_unsigned("flush_frequency_ms")
            && ms > 0
        {
            self.flush_frequency = Duration::from_millis(ms);
        }
        if let Some(size) = conf.get_unsigned("msg_buffer_size")
            && size > 0
        {
            self.msg_buffer_size = size;
        }
    }

    fn open(&self) -> bool {
        let mut state = self.state.lock();
        if Self::is_open_locked(&state) {
            self.flush_pending(&mut state, 0);
            if let Some(mut file) = state.file.take() {
                file.close();
            }
        }
        self.open_internal(&mut state, &Local::now())
    }

    fn is_open(&self) -> bool {
        Self::is_open_locked(&self.state.lock())
    }

    fn close(&self) {
        let mut state = self.state.lock();
        self.flush_pending(&mut state, 0);
        if let Some(mut file) = state.file.take() {
            file.close();
        }
    }

    fn flush(&self) {
        let mut state = self.state.lock();
        if Self::is_open_locked(&state) {
            self.flush_pending(&mut state, 0);
        }
    }

    fn handle_messages(&self, batch: &mut MessageBatch) -> bool {
        let mut state = self.state.lock();
        if !Self::is_open_locked(&state) {
            return false;
        }

        let mut written = 0usize;
        let mut failed = false;
        for (handled, entry) in batch.iter().enumerate() {
            let header = fs::frame_header(entry.len());
            let record_len = (header.len() + entry.len()) as u64;
            let padding =
                bytes_to_pad(record_len, state.roll.current_size, self.settings.chunk_size);

            let pending = &mut state.pending;
            pending.resize(pending.len() + padding as usize, 0);
            pending.extend_from_slice(&header);
            pending.extend_from_slice(entry.message());
            state.pending_count += 1;
            state.roll.current_size += padding + record_len;
            state.roll.events_written += 1;

            if state.pending.len() as u64 >= self.msg_buffer_size {
                // entries of this batch still pending are reported back
                // unhandled; the earlier ones were already acknowledged
                if !self.flush_pending(&mut state, handled + 1 - written) {
                    failed = true;
                    break;
                }
                written = handled + 1;
            }
        }
        if failed {
            batch.drain_front(written);
            return false;
        }

        // large failover replays can outgrow max_size between checks
        if self.settings.max_size != 0 && state.roll.current_size > self.settings.max_size {
            self.rotate(&mut state, &Local::now());
        }
        true
    }

    fn periodic_check(&self) {
        let now = Local::now();
        let mut state = self.state.lock();
        if !Self::is_open_locked(&state) {
            return;
        }
        if state.last_flush.elapsed() >= self.flush_frequency {
            self.flush_pending(&mut state, 0);
        }
        if Self::is_open_locked(&state) && self.settings.should_rotate(&state.roll, &now) {
            self.rotate(&mut state, &now);
        }
    }
}

#[cfg(test)]
#[path = "thrift_test.rs"]
mod thrift_test;
