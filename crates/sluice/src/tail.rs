//! Tail source - follow a file by name
//!
//! Each complete line becomes one entry (newline included) in the source's
//! category. The file is polled: when its inode changes (rotated away and
//! recreated) the new file is read from the start, and when it shrinks
//! (copy-truncate rotation) reading rewinds to the beginning.

use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use sluice_config::TailSourceConfig;
use sluice_protocol::{LogEntry, MessageBatch, ResultCode};
use sluice_stores::counter;
use tokio_util::sync::CancellationToken;

use crate::handler::Handler;

/// Line reader that survives rotation and truncation
#[derive(Debug)]
pub struct Follower {
    path: PathBuf,
    reader: Option<BufReader<File>>,
    inode: u64,
    position: u64,
    partial: Vec<u8>,
}

impl Follower {
    /// Start following `path`, at its end unless `from_start`
    ///
    /// A missing file is not an error; it is picked up once it appears.
    pub fn open(path: impl Into<PathBuf>, from_start: bool) -> io::Result<Self> {
        let mut follower = Self {
            path: path.into(),
            reader: None,
            inode: 0,
            position: 0,
            partial: Vec::new(),
        };
        if follower.path.exists() {
            follower.reopen()?;
            if !from_start
                && let Some(reader) = follower.reader.as_mut()
            {
                follower.position = reader.seek(SeekFrom::End(0))?;
            }
        }
        Ok(follower)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn reopen(&mut self) -> io::Result<()> {
        let file = File::open(&self.path)?;
        self.inode = inode_of(&file.metadata()?);
        self.reader = Some(BufReader::new(file));
        self.position = 0;
        self.partial.clear();
        Ok(())
    }

    /// Complete lines written since the last poll
    pub fn poll(&mut self) -> io::Result<Vec<Vec<u8>>> {
        let meta = match fs::metadata(&self.path) {
            Ok(meta) => meta,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        if self.reader.is_none() || inode_of(&meta) != self.inode {
            tracing::debug!(file = %self.path.display(), "file replaced, following the new one");
            self.reopen()?;
        } else if meta.len() < self.position {
            tracing::debug!(file = %self.path.display(), "file shrank, assuming truncation and rewinding");
            if let Some(reader) = self.reader.as_mut() {
                reader.seek(SeekFrom::Start(0))?;
            }
            self.position = 0;
            self.partial.clear();
        }

        let Some(reader) = self.reader.as_mut() else {
            return Ok(Vec::new());
        };

        let mut lines = Vec::new();
        loop {
            let read = reader.read_until(b'\n', &mut self.partial)?;
            if read == 0 {
                break;
            }
            self.position += read as u64;
            if self.partial.last() == Some(&b'\n') {
                lines.push(std::mem::take(&mut self.partial));
            }
        }
        Ok(lines)
    }
}

#[cfg(unix)]
fn inode_of(meta: &fs::Metadata) -> u64 {
    use std::os::unix::fs::MetadataExt;
    meta.ino()
}

#[cfg(not(unix))]
fn inode_of(_meta: &fs::Metadata) -> u64 {
    0
}

/// Source that feeds a followed file into the handler
#[derive(Debug, Clone)]
pub struct TailSource {
    category: String,
    path: PathBuf,
    poll_interval: Duration,
    from_start: bool,
}

impl TailSource {
    pub fn new(config: &TailSourceConfig) -> Self {
        Self {
            category: config.category.clone(),
            path: config.file.clone(),
            poll_interval: Duration::from_millis(config.poll_interval_ms.max(1)),
            from_start: config.from_start,
        }
    }

    pub fn category(&self) -> &str {
        &self.category
    }

    /// Follow the file until cancelled. Blocking.
    pub fn run(self, handler: Arc<Handler>, cancel: CancellationToken) {
        tracing::info!(category = %self.category, file = %self.path.display(), "starting tail source");

        let mut follower = match Follower::open(&self.path, self.from_start) {
            Ok(follower) => follower,
            Err(e) => {
                tracing::error!(
                    category = %self.category,
                    file = %self.path.display(),
                    error = %e,
                    "cannot open tailed file"
                );
                return;
            }
        };

        while !cancel.is_cancelled() {
            let lines = follower.poll().unwrap_or_else(|e| {
                tracing::warn!(category = %self.category, file = %self.path.display(), error = %e, "tail read failed");
                Vec::new()
            });
            if lines.is_empty() {
                std::thread::sleep(self.poll_interval);
                continue;
            }
            self.deliver(&handler, lines);
        }
        tracing::info!(category = %self.category, "tail source stopped");
    }

    fn deliver(&self, handler: &Handler, lines: Vec<Vec<u8>>) {
        let count = lines.len() as u64;
        let batch: MessageBatch = lines
            .into_iter()
            .map(|line| LogEntry::new(self.category.as_str(), line))
            .collect();

        match handler.log(batch) {
            ResultCode::Ok => handler.stats().incr_by(&self.category, counter::TAIL_GOOD, count),
            ResultCode::TryLater => {
                tracing::warn!(category = %self.category, count, "tailed messages not accepted");
                handler.stats().incr_by(&self.category, counter::TAIL_BAD, count);
            }
        }
    }
}

#[cfg(test)]
#[path = "tail_test.rs"]
mod tail_test;
