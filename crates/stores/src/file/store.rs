//! File store - batched writes to rotating local files
//!
//! Entries are collected into one write buffer and handed to the file in as
//! few `write` calls as `max_write_size` allows. When the file grows past
//! `max_size`, or the rotation period elapses, the store opens the next
//! sequence number.
//!
//! Created readable, the store acts as a buffer secondary: records are
//! length-framed so they can be read back, rotation by time is disabled and
//! multi-category instances write each entry's category ahead of it.

use std::io;
use std::path::Path;

use chrono::{DateTime, Local};
use parking_lot::Mutex;
use sluice_config::StoreConf;
use sluice_protocol::{LogEntry, MessageBatch};

use super::base::{FileSettings, RollState, RotatePeriod, bytes_to_pad};
use super::{LocalFile, META_LOGFILE_PREFIX, fs};
use crate::{Store, StoreContext, StoreCore, StoreType};

#[derive(Debug, Default)]
struct FileState {
    file: Option<LocalFile>,
    roll: RollState,
}

/// Store writing to rotating files on local disk
#[derive(Debug)]
pub struct FileStore {
    core: StoreCore,
    settings: FileSettings,
    buffer_file: bool,
    add_newlines: bool,
    state: Mutex<FileState>,
}

impl FileStore {
    pub fn new(ctx: StoreContext, category: &str, multi_category: bool, buffer_file: bool) -> Self {
        Self {
            core: StoreCore::new(ctx, StoreType::File, category, multi_category),
            settings: FileSettings::new(category),
            buffer_file,
            add_newlines: false,
            state: Mutex::new(FileState::default()),
        }
    }

    /// Naming and rotation settings in effect
    pub fn settings(&self) -> &FileSettings {
        &self.settings
    }

    /// Path of the file currently open for writing
    pub fn current_filename(&self) -> Option<std::path::PathBuf> {
        let state = self.state.lock();
        state
            .file
            .as_ref()
            .filter(|f| f.is_open())
            .map(|f| f.path().to_path_buf())
    }

    /// Buffer files put a length header ahead of every record
    fn push_frame(&self, record: &mut Vec<u8>, len: usize) {
        if self.buffer_file {
            record.extend_from_slice(&fs::frame_header(len));
        }
    }

    fn local_file(&self, path: &Path) -> LocalFile {
        LocalFile::new(path, self.buffer_file).with_compression(self.settings.compression)
    }

    fn open_internal(&self, state: &mut FileState, increment: bool, now: &DateTime<Local>) -> bool {
        let settings = &self.settings;
        let base = settings.base_name(now);
        let suffix = match settings.find_newest(&base) {
            Some(newest) if increment => newest + 1,
            Some(newest) => newest,
            None => 0,
        };
        let path = settings.full_filename(suffix, now);

        if settings.rotate_period != RotatePeriod::Never {
            state.roll.last_roll = settings.roll_marker(now);
        }

        if let Some(mut old) = state.file.take() {
            if settings.write_meta && !self.buffer_file && old.is_open() {
                let meta = format!("{}{}", META_LOGFILE_PREFIX, path.display());
                if let Err(e) = old.write(meta.as_bytes()) {
                    tracing::warn!(
                        category = %self.core.category(),
                        file = %old.path().display(),
                        error = %e,
                        "failed to write meta trailer"
                    );
                }
            }
            old.close();
        }

        if !settings.fs_supported() {
            tracing::error!(
                category = %self.core.category(),
                fs_type = %settings.fs_type,
                file = %path.display(),
                "unsupported file system type"
            );
            self.core.set_status("file open error");
            return false;
        }

        if let Err(e) = settings.create_file_directory(&path) {
            tracing::error!(
                category = %self.core.category(),
                file = %path.display(),
                error = %e,
                "failed to create directory for file"
            );
            self.core.set_status("File open error");
            return false;
        }

        let mut file = self.local_file(&path);
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

        // a symlink would show up as a match when reading buffer files back
        if settings.create_symlink && !self.buffer_file {
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

        tracing::info!(
            category = %self.core.category(),
            file = %path.display(),
            "opened file for writing"
        );

        state.roll.current_size = file.file_size();
        state.roll.current_filename = path;
        state.roll.events_written = 0;
        state.file = Some(file);
        self.core.clear_status();
        true
    }

    fn rotate(&self, state: &mut FileState, now: &DateTime<Local>) {
        tracing::info!(
            category = %self.core.category(),
            file = %state.roll.current_filename.display(),
            size = state.roll.current_size,
            max_size = self.settings.max_size,
            "rotating file"
        );
        self.settings.write_stats_line(&state.roll, now);
        self.open_internal(state, true, now);
    }

    fn close_locked(&self, state: &mut FileState) {
        if let Some(mut file) = state.file.take() {
            file.close();
        }
    }

    fn is_open_locked(state: &FileState) -> bool {
        state.file.as_ref().is_some_and(LocalFile::is_open)
    }

    /// Append `entry` to `buffer` the way it is laid out on disk, padding
    /// to the next chunk boundary when `offset` says it would straddle one
    fn encode_entry(&self, entry: &LogEntry, offset: u64, buffer: &mut Vec<u8>) -> u64 {
        let mut record = Vec::with_capacity(entry.len() + entry.category().len() + 16);

        if self.settings.write_category {
            let category_len = entry.category().len() + 1;
            self.push_frame(&mut record, category_len);
            record.extend_from_slice(entry.category().as_bytes());
            record.push(b'\n');
        }

        let message_len = entry.len() + usize::from(self.add_newlines);
        self.push_frame(&mut record, message_len);
        record.extend_from_slice(entry.message());
        if self.add_newlines {
            record.push(b'\n');
        }

        let padding = bytes_to_pad(record.len() as u64, offset, self.settings.chunk_size);
        buffer.resize(buffer.len() + padding as usize, 0);
        buffer.extend_from_slice(&record);
        padding + record.len() as u64
    }

    /// Write `batch` to `target`, or to the current file (rotating as it
    /// fills) when no target is given. On failure the handled prefix is
    /// removed from `batch`.
    fn write_messages(
        &self,
        state: &mut FileState,
        batch: &mut MessageBatch,
        mut target: Option<&mut LocalFile>,
        now: &DateTime<Local>,
    ) -> bool {
        let max_size = self.settings.max_size;
        let max_write = self.settings.effective_max_write();
        let total = batch.len();

        let mut size = match target {
            Some(ref file) => file.file_size(),
            None => state.roll.current_size,
        };
        let mut buffer = Vec::new();
        let mut buffered_len = 0u64;
        let mut num_buffered = 0usize;
        let mut num_written = 0usize;
        let mut success = true;

        for (i, entry) in batch.iter().enumerate() {
            buffered_len += self.encode_entry(entry, size + buffered_len, &mut buffer);
            num_buffered += 1;

            let last = i + 1 == total;
            if (max_size != 0 && size + buffered_len > max_write) || last {
                let result = match target.as_deref_mut() {
                    Some(file) => file.write(&buffer),
                    None => match state.file.as_mut() {
                        Some(file) => file.write(&buffer),
                        None => Err(io::Error::new(io::ErrorKind::NotConnected, "no open file")),
                    },
                };
                if let Err(e) = result {
                    tracing::error!(
                        category = %self.core.category(),
                        count = total,
                        error = %e,
                        "file store failed to write messages"
                    );
                    self.core.set_status("File write error");
                    success = false;
                    break;
                }

                num_written += num_buffered;
                size += buffered_len;
                if target.is_none() {
                    state.roll.current_size = size;
                    state.roll.events_written += num_buffered as u64;
                }
                buffer.clear();
                buffered_len = 0;
                num_buffered = 0;
            }

            if target.is_none() && max_size != 0 && size > max_size {
                self.rotate(state, now);
                size = state.roll.current_size;
            }
        }

        if !success {
            self.close_locked(state);
            batch.drain_front(num_written);
        }
        success
    }
}

impl Store for FileStore {
    fn core(&self) -> &StoreCore {
        &self.core
    }

    fn copy(&self, category: &str) -> Box<dyn Store> {
        Box::new(Self {
            core: self.core.rebind(category),
            settings: self.settings.copy_for(category),
            buffer_file: self.buffer_file,
            add_newlines: self.add_newlines,
            state: Mutex::new(FileState::default()),
        })
    }

    fn configure(&mut self, conf: &StoreConf) {
        self.settings.configure(conf, self.core.category());

        if self.buffer_file {
            self.settings.rotate_period = RotatePeriod::Never;
            // framing and chunk padding together would make the file unreadable
            self.settings.chunk_size = 0;
            if self.core.multi_category() {
                self.settings.write_category = true;
            }
        }

        self.add_newlines = conf.get_unsigned("add_newlines").is_some_and(|v| v > 0);
    }

    fn open(&self) -> bool {
        let mut state = self.state.lock();
        self.open_internal(&mut state, false, &Local::now())
    }

    fn is_open(&self) -> bool {
        Self::is_open_locked(&self.state.lock())
    }

    fn close(&self) {
        self.close_locked(&mut self.state.lock());
    }

    fn flush(&self) {
        let mut state = self.state.lock();
        if let Some(file) = state.file.as_mut()
            && let Err(e) = file.flush()
        {
            tracing::warn!(category = %self.core.category(), error = %e, "flush failed");
        }
    }

    fn handle_messages(&self, batch: &mut MessageBatch) -> bool {
        let now = Local::now();
        let mut state = self.state.lock();

        if !Self::is_open_locked(&state) {
            self.open_internal(&mut state, true, &now);
        }
        if !Self::is_open_locked(&state) {
            tracing::error!(category = %self.core.category(), "file failed to open");
            return false;
        }

        self.write_messages(&mut state, batch, None, &now)
    }

    fn periodic_check(&self) {
        let now = Local::now();
        let mut state = self.state.lock();
        if Self::is_open_locked(&state) && self.settings.should_rotate(&state.roll, &now) {
            self.rotate(&mut state, &now);
        }
    }

    fn read_oldest(&self, batch: &mut MessageBatch, now: DateTime<Local>) -> bool {
        let base = self.settings.base_name(&now);
        let Some(index) = self.settings.find_oldest(&base) else {
            return true;
        };
        let path = self.settings.full_filename(index, &now);

        let mut file = self.local_file(&path);
        if let Err(e) = file.open_read() {
            tracing::error!(
                category = %self.core.category(),
                file = %path.display(),
                error = %e,
                "failed to open file for reading"
            );
            return false;
        }

        let before = batch.len();
        while let Some(record) = file.read_next() {
            if record.is_empty() {
                continue;
            }

            if self.settings.write_category {
                let category = record.strip_suffix(b"\n").unwrap_or(&record[..]);
                let category = String::from_utf8_lossy(category).into_owned();
                match file.read_next() {
                    Some(message) => batch.push(LogEntry::new(category, message)),
                    None => tracing::warn!(
                        category = %self.core.category(),
                        stored_category = %category,
                        "category not stored with message"
                    ),
                }
            } else {
                batch.push(LogEntry::new(self.core.category(), record));
            }
        }
        file.close();

        tracing::info!(
            category = %self.core.category(),
            file = %path.display(),
            count = batch.len() - before,
            "read entries from file"
        );
        true
    }

    fn delete_oldest(&self, now: DateTime<Local>) -> bool {
        let base = self.settings.base_name(&now);
        let Some(index) = self.settings.find_oldest(&base) else {
            return true;
        };
        let path = self.settings.full_filename(index, &now);

        let mut state = self.state.lock();
        if state.roll.current_filename == path {
            self.close_locked(&mut state);
        }
        drop(state);

        match self.local_file(&path).delete() {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(
                    category = %self.core.category(),
                    file = %path.display(),
                    error = %e,
                    "failed to delete file"
                );
                false
            }
        }
    }

    fn replace_oldest(&self, batch: &mut MessageBatch, now: DateTime<Local>) -> bool {
        let base = self.settings.base_name(&now);
        let Some(index) = self.settings.find_oldest(&base) else {
            tracing::error!(category = %self.core.category(), base = %base, "could not find files");
            return false;
        };
        let path = self.settings.full_filename(index, &now);

        let mut state = self.state.lock();
        self.close_locked(&mut state);

        let mut file = self.local_file(&path);
        let success = match file.open_truncate() {
            Ok(()) => self.write_messages(&mut state, batch, Some(&mut file), &now),
            Err(e) => {
                tracing::error!(
                    category = %self.core.category(),
                    file = %path.display(),
                    error = %e,
                    "failed to open file for truncate"
                );
                false
            }
        };
        file.close();

        self.open_internal(&mut state, false, &now);
        success
    }

    fn empty(&self, now: DateTime<Local>) -> bool {
        let base = self.settings.base_name(&now);
        self.settings
            .suffixes(&base)
            .into_iter()
            .all(|suffix| self.local_file(&self.settings.full_filename(suffix, &now)).file_size() == 0)
    }
}

#[cfg(test)]
#[path = "store_test.rs"]
mod store_test;
