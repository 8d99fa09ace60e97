//! Naming, rotation and directory rules shared by the file stores
//!
//! File names follow
//!
//! ```text
//! <file_path>/<base>[-YYYY-MM-DD]_NNNNN[.lz4]
//! <file_path>/YYYY/MM/DD/HH/<base>-YYYY-MM-DD-HH_NNNNN[.lz4]   (use_tree)
//! ```
//!
//! where the date part only appears when the store rotates hourly or daily
//! and `NNNNN` is the sequence number, found by scanning the directory for
//! the highest suffix already present.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Datelike, Local, Timelike};
use sluice_config::StoreConf;

use super::{STATS_FILENAME, fs};

pub const DEFAULT_MAX_SIZE: u64 = 1_000_000_000;
pub const DEFAULT_MAX_WRITE_SIZE: u64 = 1_000_000;
pub const DEFAULT_ROTATE_HOUR: u32 = 1;
pub const DEFAULT_ROTATE_MINUTE: u32 = 15;
pub const DEFAULT_FILE_PATH: &str = "/tmp";

/// When to start a new file regardless of size
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RotatePeriod {
    Never,
    Hourly,
    Daily,
    /// Every N seconds
    Every(u64),
}

impl RotatePeriod {
    /// Parse `hourly`, `daily`, `never` or `<N>[s|m|h|d|w]`
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "hourly" => return Some(Self::Hourly),
            "daily" => return Some(Self::Daily),
            "never" => return Some(Self::Never),
            _ => {}
        }

        let digits_end = value
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(value.len());
        let count: u64 = value[..digits_end].parse().ok()?;
        let multiplier = match &value[digits_end..] {
            "" | "s" => 1,
            "m" => 60,
            "h" => 60 * 60,
            "d" => 60 * 60 * 24,
            "w" => 60 * 60 * 24 * 7,
            _ => return None,
        };
        (count > 0).then(|| Self::Every(count * multiplier))
    }
}

/// Mutable bookkeeping for the file currently being written
#[derive(Debug, Clone, Default)]
pub struct RollState {
    pub current_size: u64,
    pub current_filename: PathBuf,
    /// Day of month, hour, or unix seconds of the last rotation, by period
    pub last_roll: i64,
    pub events_written: u64,
}

/// Settings common to `file` and `thriftfile` stores
#[derive(Debug, Clone)]
pub struct FileSettings {
    pub base_file_path: PathBuf,
    pub sub_directory: String,
    pub file_path: PathBuf,
    pub base_filename: String,
    pub base_symlink_name: String,
    pub max_size: u64,
    pub max_write_size: u64,
    pub rotate_period: RotatePeriod,
    pub rotate_hour: u32,
    pub rotate_minute: u32,
    pub fs_type: String,
    pub chunk_size: u64,
    pub write_meta: bool,
    pub write_category: bool,
    pub create_symlink: bool,
    pub use_tree: bool,
    pub write_stats: bool,
    pub compression: bool,
}

impl FileSettings {
    pub fn new(category: &str) -> Self {
        Self {
            base_file_path: PathBuf::from(DEFAULT_FILE_PATH),
            sub_directory: String::new(),
            file_path: PathBuf::from(DEFAULT_FILE_PATH),
            base_filename: category.to_string(),
            base_symlink_name: String::new(),
            max_size: DEFAULT_MAX_SIZE,
            max_write_size: DEFAULT_MAX_WRITE_SIZE,
            rotate_period: RotatePeriod::Never,
            rotate_hour: DEFAULT_ROTATE_HOUR,
            rotate_minute: DEFAULT_ROTATE_MINUTE,
            fs_type: "std".to_string(),
            chunk_size: 0,
            write_meta: false,
            write_category: false,
            create_symlink: true,
            use_tree: false,
            write_stats: true,
            compression: false,
        }
    }

    /// Read every file setting from `conf`; unknown or missing keys keep
    /// their defaults
    pub fn configure(&mut self, conf: &StoreConf, category: &str) {
        if let Some(path) = conf.get_string("file_path") {
            self.base_file_path = PathBuf::from(path);
        }
        if let Some(sub) = conf.get_string("sub_directory") {
            self.sub_directory = sub;
        }
        if conf.get_string("use_hostname_sub_directory").as_deref() == Some("yes") {
            self.use_hostname_sub_directory(category);
        }
        self.file_path = self.join_sub_directory();

        match conf.get_string("base_filename") {
            Some(base) => self.base_filename = base,
            None => tracing::warn!(
                category = %category,
                "bad config - no base_filename specified for file store"
            ),
        }
        if let Some(name) = conf.get_string("base_symlink_name") {
            self.base_symlink_name = name;
        }

        if let Some(period) = conf.get_string("rotate_period") {
            self.rotate_period = RotatePeriod::parse(&period).unwrap_or_else(|| {
                tracing::warn!(
                    category = %category,
                    rotate_period = %period,
                    "bad config - invalid format of rotate_period, rotations disabled"
                );
                RotatePeriod::Never
            });
        }

        if let Some(v) = conf.get_string("write_meta") {
            self.write_meta = v == "yes";
        }
        if let Some(v) = conf.get_string("write_category") {
            self.write_category = v == "yes";
        }
        if let Some(v) = conf.get_string("create_symlink") {
            self.create_symlink = v == "yes";
        }
        if let Some(v) = conf.get_string("use_tree") {
            self.use_tree = v == "yes";
            if self.use_tree {
                self.rotate_period = RotatePeriod::Hourly;
            }
        }
        if let Some(v) = conf.get_string("write_stats") {
            self.write_stats = v == "yes";
        }
        if let Some(v) = conf.get_string("fs_type") {
            self.fs_type = v;
        }

        if let Some(level) = conf.get_unsigned("lzo_compression") {
            self.compression = level > 0;
        }
        if let Some(v) = conf.get_unsigned("max_size") {
            self.max_size = v;
        }
        if let Some(v) = conf.get_unsigned("max_write_size") {
            self.max_write_size = v;
        }
        if let Some(v) = conf.get_unsigned("rotate_hour") {
            self.rotate_hour = v.min(u32::MAX as u64) as u32;
        }
        if let Some(v) = conf.get_unsigned("rotate_minute") {
            self.rotate_minute = v.min(u32::MAX as u64) as u32;
        }
        if let Some(v) = conf.get_unsigned("chunk_size") {
            self.chunk_size = v;
        }
    }

    /// Settings for a per-category copy: files go under
    /// `<file_path>/<category>` and are named after the category
    pub fn copy_for(&self, category: &str) -> Self {
        let mut copy = self.clone();
        copy.base_file_path = self.base_file_path.join(category);
        copy.file_path = copy.join_sub_directory();
        copy.base_filename = category.to_string();
        copy
    }

    fn join_sub_directory(&self) -> PathBuf {
        if self.sub_directory.is_empty() {
            self.base_file_path.clone()
        } else {
            self.base_file_path.join(&self.sub_directory)
        }
    }

    fn use_hostname_sub_directory(&mut self, category: &str) {
        if !self.sub_directory.is_empty() {
            tracing::warn!(
                category = %category,
                "bad config - use_hostname_sub_directory will override sub_directory path"
            );
        }
        match hostname::get() {
            Ok(name) if !name.is_empty() => {
                self.sub_directory = name.to_string_lossy().into_owned();
            }
            Ok(_) => tracing::warn!(category = %category, "could not get host name"),
            Err(e) => tracing::warn!(category = %category, error = %e, "could not get host name"),
        }
    }

    /// Check whether the underlying file system is supported
    pub fn fs_supported(&self) -> bool {
        self.fs_type == "std"
    }

    /// Largest single write
    pub fn effective_max_write(&self) -> u64 {
        self.max_size.min(self.max_write_size)
    }

    /// File name without directory or suffix for a file created at `now`.
    /// With `use_tree` this includes the date directories.
    pub fn base_name(&self, now: &DateTime<Local>) -> String {
        let (y, m, d, h) = (now.year(), now.month(), now.day(), now.hour());
        match self.rotate_period {
            RotatePeriod::Hourly | RotatePeriod::Daily if self.use_tree => format!(
                "{y}/{m:02}/{d:02}/{h:02}/{}-{y}-{m:02}-{d:02}-{h:02}",
                self.base_filename
            ),
            RotatePeriod::Hourly | RotatePeriod::Daily => {
                format!("{}-{y}-{m:02}-{d:02}", self.base_filename)
            }
            _ => self.base_filename.clone(),
        }
    }

    /// Full path of the file with sequence number `suffix`
    pub fn full_filename(&self, suffix: u32, now: &DateTime<Local>) -> PathBuf {
        let mut name = format!("{}_{:05}", self.base_name(now), suffix);
        if self.compression {
            name.push_str(".lz4");
        }
        self.file_path.join(name)
    }

    /// `<file_path>/<symlink or base>_current`
    pub fn full_symlink(&self) -> PathBuf {
        let base = if self.base_symlink_name.is_empty() {
            &self.base_filename
        } else {
            &self.base_symlink_name
        };
        self.file_path.join(format!("{}_current", base))
    }

    /// Directory holding files named from `base`
    fn dir_for(&self, base: &str) -> PathBuf {
        match self.file_path.join(base).parent() {
            Some(parent) if self.use_tree => parent.to_path_buf(),
            _ => self.file_path.clone(),
        }
    }

    /// Suffixes of every file matching `base`
    pub fn suffixes(&self, base: &str) -> Vec<u32> {
        let dir = self.dir_for(base);
        match fs::list(&dir) {
            Ok(names) => names.iter().filter_map(|n| file_suffix(n, base)).collect(),
            Err(e) => {
                tracing::warn!(dir = %dir.display(), error = %e, "failed to list directory");
                Vec::new()
            }
        }
    }

    /// Highest suffix of files matching `base`
    pub fn find_newest(&self, base: &str) -> Option<u32> {
        self.suffixes(base).into_iter().max()
    }

    /// Lowest suffix of files matching `base`
    pub fn find_oldest(&self, base: &str) -> Option<u32> {
        self.suffixes(base).into_iter().min()
    }

    /// Value to remember as the last rotation time for `now`
    pub fn roll_marker(&self, now: &DateTime<Local>) -> i64 {
        match self.rotate_period {
            RotatePeriod::Daily => now.day() as i64,
            RotatePeriod::Hourly => now.hour() as i64,
            RotatePeriod::Every(_) => now.timestamp(),
            RotatePeriod::Never => 0,
        }
    }

    /// Size or time based rotation check
    pub fn should_rotate(&self, roll: &RollState, now: &DateTime<Local>) -> bool {
        if self.max_size != 0 && roll.current_size > self.max_size {
            return true;
        }
        match self.rotate_period {
            RotatePeriod::Daily => {
                now.day() as i64 != roll.last_roll
                    && now.hour() >= self.rotate_hour
                    && now.minute() >= self.rotate_minute
            }
            RotatePeriod::Hourly => {
                now.hour() as i64 != roll.last_roll && now.minute() >= self.rotate_minute
            }
            RotatePeriod::Every(secs) => now.timestamp() >= roll.last_roll + secs as i64,
            RotatePeriod::Never => false,
        }
    }

    /// Append a line about the file being rotated away to `scribe_stats`
    pub fn write_stats_line(&self, roll: &RollState, now: &DateTime<Local>) {
        if !self.write_stats {
            return;
        }
        let path = self.file_path.join(STATS_FILENAME);
        let line = format!(
            "{} wrote <{}> bytes in <{}> events to file <{}>\n",
            now.format("%Y-%m-%d-%H:%M"),
            roll.current_size,
            roll.events_written,
            roll.current_filename.display()
        );
        let result = fs::create_dir(&self.file_path).and_then(|_| {
            OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)?
                .write_all(line.as_bytes())
        });
        if let Err(e) = result {
            tracing::warn!(file = %path.display(), error = %e, "failed to write stats file");
        }
    }

    /// Make sure the directory for `path` exists
    pub fn create_file_directory(&self, path: &Path) -> std::io::Result<()> {
        fs::create_dir(&self.base_file_path)?;
        match path.parent() {
            Some(parent) => fs::create_dir(parent),
            None => Ok(()),
        }
    }
}

/// Sequence number of `filename` if it belongs to `base`
///
/// `base` may carry leading directories (tree layout); only its last
/// component is compared. Trailing extensions after the digits are ignored.
pub fn file_suffix(filename: &str, base: &str) -> Option<u32> {
    let base = base.rsplit('/').next().unwrap_or(base);
    let (stem, suffix) = filename.rsplit_once('_')?;
    if stem != base {
        return None;
    }
    let digits_end = suffix
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(suffix.len());
    suffix[..digits_end].parse().ok()
}

/// Zero bytes to insert so a record of `next_len` bytes does not straddle a
/// `chunk_size` boundary, given `current_size` bytes already in the file.
///
/// A record that already starts on a boundary is never padded: when
/// `current_size % chunk_size == 0` the result is 0, not a full chunk, so
/// `bytes_to_pad(15, 0, 10)` is 0.
pub fn bytes_to_pad(next_len: u64, current_size: u64, chunk_size: u64) -> u64 {
    if chunk_size == 0 || current_size % chunk_size == 0 {
        return 0;
    }
    let space_left = chunk_size - current_size % chunk_size;
    if next_len > space_left { space_left } else { 0 }
}

#[cfg(test)]
#[path = "base_test.rs"]
mod base_test;
