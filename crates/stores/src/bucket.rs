//! Bucket store - partition a batch across N+1 children by key
//!
//! Every entry is assigned a bucket in `0..=num_buckets`. Bucket 0 takes
//! entries that carry no usable key; the rest are picked by `bucket_type`:
//!
//! | Type | Key | Bucket |
//! |------|-----|--------|
//! | `context_log` | decimal id after the third `\x01` | `hash32(id) % n + 1` |
//! | `random` | - | uniform in `1..=n` |
//! | `key_hash` | prefix before `delimiter` | `djb2(key) % n + 1` |
//! | `key_modulo` | prefix before `delimiter` | `key % n + 1` |
//! | `key_range` | prefix before `delimiter` | `(key % range) * n / range + 1` |
//!
//! Buckets are either listed explicitly as `bucket0..bucketN` blocks, or
//! stamped out of a single `bucket` template of type `file`/`thriftfile`,
//! each writing under `<file_path>/<bucket_subdir>NNN`.
//!
//! Each bucket's group is delivered on its own. A failing bucket hands its
//! unhandled entries back without undoing what other buckets accepted.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use rand::Rng;
use sluice_config::StoreConf;
use sluice_protocol::{LogEntry, MessageBatch};

use crate::{Store, StoreContext, StoreCore, StoreType, create_store};

pub const DEFAULT_DELIMITER: u8 = b':';
/// Largest accepted `num_buckets`
pub const MAX_BUCKETS: u64 = 65_535;
const CONTEXT_LOG_DELIMITER: u8 = 1;

/// How entries are mapped to buckets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BucketType {
    #[default]
    ContextLog,
    Random,
    KeyHash,
    KeyModulo,
    KeyRange,
}

impl BucketType {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "context_log" => Some(Self::ContextLog),
            "random" => Some(Self::Random),
            "key_hash" => Some(Self::KeyHash),
            "key_modulo" => Some(Self::KeyModulo),
            "key_range" => Some(Self::KeyRange),
            _ => None,
        }
    }

    /// Whether the key is a prefix ended by a delimiter
    pub const fn uses_delimiter(&self) -> bool {
        matches!(self, Self::KeyHash | Self::KeyModulo | Self::KeyRange)
    }
}

/// Store that routes each entry to one of `num_buckets + 1` children
pub struct BucketStore {
    core: StoreCore,
    bucket_type: BucketType,
    delimiter: u8,
    remove_key: bool,
    bucket_range: u64,
    num_buckets: u64,
    buckets: Vec<Box<dyn Store>>,
    opened: AtomicBool,
}

impl BucketStore {
    pub fn new(ctx: StoreContext, category: &str, multi_category: bool) -> Self {
        Self {
            core: StoreCore::new(ctx, StoreType::Bucket, category, multi_category),
            bucket_type: BucketType::default(),
            delimiter: DEFAULT_DELIMITER,
            remove_key: false,
            bucket_range: 0,
            num_buckets: 1,
            buckets: Vec::new(),
            opened: AtomicBool::new(false),
        }
    }

    pub fn bucket_type(&self) -> BucketType {
        self.bucket_type
    }

    pub fn num_buckets(&self) -> u64 {
        self.num_buckets
    }

    pub fn buckets(&self) -> &[Box<dyn Store>] {
        &self.buckets
    }

    /// Bucket index for a message, in `0..=num_buckets`
    pub fn bucketize(&self, message: &[u8]) -> usize {
        let n = self.num_buckets;
        if n == 0 {
            return 0;
        }

        let bucket = match self.bucket_type {
            BucketType::ContextLog => match context_log_id(message) {
                Some(id) => u64::from(integer_hash32(id)) % n + 1,
                None => 0,
            },
            BucketType::Random => rand::rng().random_range(0..n) + 1,
            other => {
                let Some(key) = self.key_of(message) else {
                    return 0;
                };
                match other {
                    BucketType::KeyModulo => leading_number(key) % n + 1,
                    BucketType::KeyRange if self.bucket_range == 0 => 0,
                    BucketType::KeyRange => {
                        let range = self.bucket_range;
                        let offset = u128::from(leading_number(key) % range);
                        (offset * u128::from(n) / u128::from(range)) as u64 + 1
                    }
                    _ => u64::from(string_hash32(key)) % n + 1,
                }
            }
        };
        bucket as usize
    }

    /// Prefix before the delimiter, `None` if missing or empty
    fn key_of<'a>(&self, message: &'a [u8]) -> Option<&'a [u8]> {
        let pos = message.iter().position(|&b| b == self.delimiter)?;
        let key = &message[..pos];
        (!key.is_empty()).then_some(key)
    }

    /// Entry with everything up to and including the delimiter dropped
    fn strip_key(&self, entry: &LogEntry) -> LogEntry {
        match entry.message().iter().position(|&b| b == self.delimiter) {
            Some(pos) => entry.with_message(entry.message_bytes().slice(pos + 1..)),
            None => entry.clone(),
        }
    }

    /// Hand a group to its bucket, returning what it did not accept
    fn deliver(&self, bucket: &dyn Store, group: MessageBatch) -> Option<MessageBatch> {
        if !self.remove_key {
            let mut group = group;
            return (!bucket.handle_messages(&mut group)).then_some(group);
        }

        let stripped: MessageBatch = group.iter().map(|e| Arc::new(self.strip_key(e))).collect();
        let mut pending = stripped.clone();
        if bucket.handle_messages(&mut pending) {
            return None;
        }
        Some(restore_originals(&group, &stripped, &pending))
    }

    fn configure_buckets(&mut self, conf: &StoreConf) -> Result<(), String> {
        if let Some(name) = conf.get_string("bucket_type") {
            match BucketType::parse(&name) {
                Some(t) => self.bucket_type = t,
                None => tracing::warn!(
                    category = %self.core.category(),
                    bucket_type = %name,
                    "unknown bucket_type, using context_log"
                ),
            }
        }

        if self.bucket_type == BucketType::KeyRange {
            self.bucket_range = conf.get_unsigned("bucket_range").unwrap_or(0);
            if self.bucket_range == 0 {
                tracing::warn!(category = %self.core.category(), "config warning - bucket_range is 0");
            }
        }

        if self.bucket_type.uses_delimiter() {
            self.delimiter = match conf.get_unsigned("delimiter") {
                None => DEFAULT_DELIMITER,
                Some(d) => match u8::try_from(d) {
                    Ok(0) | Err(_) => {
                        tracing::warn!(
                            category = %self.core.category(),
                            delimiter = d,
                            "config warning - delimiter must be 1..=255, using default"
                        );
                        DEFAULT_DELIMITER
                    }
                    Ok(d) => d,
                },
            };
        }

        if conf.get_string("remove_key").as_deref() == Some("yes") {
            self.remove_key = true;
            if self.bucket_type == BucketType::ContextLog {
                return Err(
                    "Bad config - bucketizer store of type context_log do not support remove_key"
                        .to_string(),
                );
            }
        }

        self.num_buckets = conf
            .get_unsigned("num_buckets")
            .ok_or_else(|| "Bad config - bucket store must have num_buckets".to_string())?;
        if self.num_buckets > MAX_BUCKETS {
            return Err(format!(
                "Bad config - invalid num_buckets {}, at most {} allowed",
                self.num_buckets, MAX_BUCKETS
            ));
        }

        let buckets = match conf.get_store("bucket") {
            Some(template) => self.buckets_from_template(conf, template),
            None => self.buckets_from_list(conf),
        };
        self.buckets = buckets.map_err(|e| format!("Bad config - {}", e))?;
        Ok(())
    }

    /// Stamp out `num_buckets + 1` file stores from one `bucket` block
    fn buckets_from_template(
        &self,
        conf: &StoreConf,
        mut template: StoreConf,
    ) -> Result<Vec<Box<dyn Store>>, String> {
        if conf.has_key("bucket0") || conf.has_key("bucket1") {
            return Err("bucket store has too many buckets defined".to_string());
        }

        let type_name = template.store_type().unwrap_or_default();
        if type_name != StoreType::File.as_str() && type_name != StoreType::ThriftFile.as_str() {
            return Err("store contained in a bucket store must have a type of \
                        either file or thriftfile if not defined explicitly"
                .to_string());
        }

        let subdir = conf
            .get_string("bucket_subdir")
            .ok_or_else(|| "bucketizer containing file stores must have a bucket_subdir".to_string())?;
        let path = template
            .get_string("file_path")
            .ok_or_else(|| "file store contained by bucketizer must have a file_path".to_string())?;
        let offset = conf.get_unsigned("bucket_offset").unwrap_or(0);
        let failure_bucket = conf.get_string("failure_bucket").filter(|s| !s.is_empty());

        let mut buckets = Vec::with_capacity(self.num_buckets as usize + 1);
        for i in 0..=self.num_buckets {
            let mut store = self.create_bucket(&type_name)?;
            let bucket_path = match &failure_bucket {
                Some(name) if i == 0 => format!("{}/{}", path, name),
                _ => format!("{}/{}{:03}", path, subdir, i + offset),
            };
            template.set_string("file_path", bucket_path);
            store.configure(&template);
            buckets.push(store);
        }
        Ok(buckets)
    }

    /// Build `bucket0..=bucketN` from their own blocks
    fn buckets_from_list(&self, conf: &StoreConf) -> Result<Vec<Box<dyn Store>>, String> {
        for key in ["bucket_subdir", "bucket_offset", "failure_bucket"] {
            if conf.has_key(key) {
                return Err(format!("cannot have {} when defining multiple buckets", key));
            }
        }

        let mut buckets = Vec::with_capacity(self.num_buckets as usize + 1);
        for i in 0..=self.num_buckets {
            let name = format!("bucket{}", i);
            let bucket_conf = conf
                .get_store(&name)
                .ok_or_else(|| format!("could not find bucket definition for {}", name))?;
            let type_name = bucket_conf
                .store_type()
                .ok_or_else(|| "store contained in a bucket store must have a type".to_string())?;

            let mut store = self.create_bucket(&type_name)?;
            store.configure(&bucket_conf);
            buckets.push(store);
        }

        if conf.has_key(&format!("bucket{}", self.num_buckets + 1)) {
            return Err("bucket store has too many buckets defined".to_string());
        }
        Ok(buckets)
    }

    fn create_bucket(&self, type_name: &str) -> Result<Box<dyn Store>, String> {
        create_store(
            self.core.ctx(),
            type_name,
            self.core.category(),
            false,
            self.core.multi_category(),
        )
        .ok_or_else(|| format!("can't create store of type: {}", type_name))
    }
}

impl Store for BucketStore {
    fn core(&self) -> &StoreCore {
        &self.core
    }

    fn copy(&self, category: &str) -> Box<dyn Store> {
        Box::new(Self {
            core: self.core.rebind(category),
            bucket_type: self.bucket_type,
            delimiter: self.delimiter,
            remove_key: self.remove_key,
            bucket_range: self.bucket_range,
            num_buckets: self.num_buckets,
            buckets: self.buckets.iter().map(|b| b.copy(category)).collect(),
            opened: AtomicBool::new(false),
        })
    }

    fn configure(&mut self, conf: &StoreConf) {
        if let Err(msg) = self.configure_buckets(conf) {
            tracing::error!(category = %self.core.category(), "{}", msg);
            self.core.set_status(msg);
            self.num_buckets = 0;
            self.buckets.clear();
        }
    }

    fn open(&self) -> bool {
        if self.num_buckets == 0 || self.buckets.len() as u64 != self.num_buckets + 1 {
            tracing::warn!(
                category = %self.core.category(),
                buckets = self.buckets.len(),
                num_buckets = self.num_buckets,
                "can't open bucket store"
            );
            return false;
        }

        for bucket in &self.buckets {
            if !bucket.open() {
                self.close();
                return false;
            }
        }
        self.opened.store(true, Ordering::Release);
        true
    }

    fn is_open(&self) -> bool {
        self.opened.load(Ordering::Acquire)
    }

    /// Closes every bucket, including ones that never opened
    fn close(&self) {
        for bucket in &self.buckets {
            bucket.close();
        }
        self.opened.store(false, Ordering::Release);
    }

    fn flush(&self) {
        for bucket in &self.buckets {
            bucket.flush();
        }
    }

    fn handle_messages(&self, batch: &mut MessageBatch) -> bool {
        if self.num_buckets == 0 || self.buckets.is_empty() {
            tracing::error!(category = %self.core.category(), "failed to write - no buckets configured");
            self.core.set_status("Failed write to bucket store");
            return false;
        }

        let mut groups: Vec<MessageBatch> = self.buckets.iter().map(|_| MessageBatch::new()).collect();
        for entry in batch.iter() {
            let index = self.bucketize(entry.message()).min(groups.len() - 1);
            groups[index].push_shared(entry.clone());
        }

        let mut success = true;
        let mut failed = MessageBatch::new();
        for (bucket, group) in self.buckets.iter().zip(groups) {
            if group.is_empty() {
                continue;
            }
            if let Some(mut unhandled) = self.deliver(bucket.as_ref(), group) {
                success = false;
                failed.append(&mut unhandled);
            }
        }

        if !success {
            *batch = failed;
        }
        success
    }

    fn periodic_check(&self) {
        for bucket in &self.buckets {
            bucket.periodic_check();
        }
    }

    fn status(&self) -> String {
        let status = self.core.status();
        if !status.is_empty() {
            return status;
        }
        self.buckets
            .iter()
            .map(|b| b.status())
            .find(|s| !s.is_empty())
            .unwrap_or_default()
    }
}

impl std::fmt::Debug for BucketStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BucketStore")
            .field("category", &self.core.category())
            .field("bucket_type", &self.bucket_type)
            .field("num_buckets", &self.num_buckets)
            .field("delimiter", &(self.delimiter as char))
            .field("remove_key", &self.remove_key)
            .finish_non_exhaustive()
    }
}

/// Map entries a bucket left unhandled back to their keyed originals
///
/// `unhandled` is an in-order subsequence of `stripped`. If a child handed
/// back entries it built itself, the whole group is returned.
fn restore_originals(
    group: &MessageBatch,
    stripped: &MessageBatch,
    unhandled: &MessageBatch,
) -> MessageBatch {
    let mut restored = MessageBatch::with_capacity(unhandled.len());
    let mut from = 0;
    for entry in unhandled {
        match stripped.as_slice()[from..].iter().position(|s| Arc::ptr_eq(s, entry)) {
            Some(offset) => {
                restored.push_shared(group[from + offset].clone());
                from += offset + 1;
            }
            None => return group.clone(),
        }
    }
    restored
}

/// Id after the third `\x01`, `None` when absent or zero
fn context_log_id(message: &[u8]) -> Option<u32> {
    let mut pos = 0;
    for _ in 0..3 {
        pos += message[pos..].iter().position(|&b| b == CONTEXT_LOG_DELIMITER)?;
        if message.len() <= pos + 1 {
            return None;
        }
        pos += 1;
    }
    if message[pos] == CONTEXT_LOG_DELIMITER {
        return None;
    }
    let id = leading_number(&message[pos..]) as u32;
    (id != 0).then_some(id)
}

/// Leading decimal integer, `0` when there is none
///
/// Leading whitespace and a sign are accepted. Negative values wrap the way
/// a C `long` converts to `unsigned long`.
fn leading_number(bytes: &[u8]) -> u64 {
    let bytes = match bytes.iter().position(|b| !b.is_ascii_whitespace()) {
        Some(start) => &bytes[start..],
        None => return 0,
    };
    let (negative, digits) = match bytes.first() {
        Some(b'-') => (true, &bytes[1..]),
        Some(b'+') => (false, &bytes[1..]),
        _ => (false, bytes),
    };
    let value = digits
        .iter()
        .take_while(|b| b.is_ascii_digit())
        .fold(0u64, |acc, b| acc.saturating_mul(10).saturating_add(u64::from(b - b'0')));
    if negative { value.wrapping_neg() } else { value }
}

/// djb2 string hash
pub fn string_hash32(key: &[u8]) -> u32 {
    key.iter()
        .fold(5381u32, |hash, &b| hash.wrapping_mul(33).wrapping_add(u32::from(b)))
}

/// Thomas Wang's 32-bit integer hash
pub fn integer_hash32(key: u32) -> u32 {
    let mut key = (!key).wrapping_add(key << 15);
    key ^= key >> 12;
    key = key.wrapping_add(key << 2);
    key ^= key >> 4;
    key = key.wrapping_mul(2057);
    key ^= key >> 16;
    key
}

#[cfg(test)]
#[path = "bucket_test.rs"]
mod bucket_test;
