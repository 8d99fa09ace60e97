//! Tests for the file store

use std::fs as stdfs;
use std::path::PathBuf;

use super::*;
use crate::testing::{batch, conf, messages_of};
use tempfile::TempDir;

fn file_store(dir: &TempDir, extra: &str) -> FileStore {
    configured(dir, extra, false, false)
}

fn buffer_file(dir: &TempDir, extra: &str, multi_category: bool) -> FileStore {
    configured(dir, extra, multi_category, true)
}

fn configured(dir: &TempDir, extra: &str, multi_category: bool, buffer: bool) -> FileStore {
    let mut store = FileStore::new(StoreContext::default(), "web", multi_category, buffer);
    store.configure(&conf(&format!(
        "file_path = \"{}\"\nbase_filename = \"web\"\n{}",
        dir.path().display(),
        extra
    )));
    store
}

fn read(dir: &TempDir, name: &str) -> Vec<u8> {
    stdfs::read(dir.path().join(name)).unwrap()
}

// =============================================================================
// Writing
// =============================================================================

#[test]
fn test_open_creates_file_and_symlink() {
    let dir = TempDir::new().unwrap();
    let store = file_store(&dir, "");

    assert!(store.open());
    assert!(store.is_open());
    assert_eq!(store.current_filename(), Some(dir.path().join("web_00000")));

    let link = dir.path().join("web_current");
    assert_eq!(stdfs::read_link(&link).unwrap(), dir.path().join("web_00000"));
}

#[test]
fn test_open_reuses_newest_file() {
    let dir = TempDir::new().unwrap();
    stdfs::write(dir.path().join("web_00004"), b"old\n").unwrap();
    let store = file_store(&dir, "");

    assert!(store.open());
    assert_eq!(store.current_filename(), Some(dir.path().join("web_00004")));
}

#[test]
fn test_handle_messages_opens_next_file_when_closed() {
    let dir = TempDir::new().unwrap();
    stdfs::write(dir.path().join("web_00003"), b"old\n").unwrap();
    let store = file_store(&dir, "add_newlines = 1");

    let mut b = batch("web", &["a"]);
    assert!(store.handle_messages(&mut b));
    assert_eq!(read(&dir, "web_00004"), b"a\n");
}

#[test]
fn test_add_newlines() {
    let dir = TempDir::new().unwrap();
    let store = file_store(&dir, "add_newlines = 1");
    assert!(store.open());

    let mut b = batch("web", &["first", "second"]);
    assert!(store.handle_messages(&mut b));
    store.flush();
    assert_eq!(read(&dir, "web_00000"), b"first\nsecond\n");
}

#[test]
fn test_plain_write_without_newlines() {
    let dir = TempDir::new().unwrap();
    let store = file_store(&dir, "");
    assert!(store.open());

    let mut b = batch("web", &["ab", "cd"]);
    assert!(store.handle_messages(&mut b));
    assert_eq!(read(&dir, "web_00000"), b"abcd");
}

#[test]
fn test_rotates_when_max_size_exceeded() {
    let dir = TempDir::new().unwrap();
    let store = file_store(&dir, "max_size = 10\nadd_newlines = 1");
    assert!(store.open());

    let mut b = batch("web", &["aaaa", "bbbb", "cccc", "dddd"]);
    assert!(store.handle_messages(&mut b));

    assert_eq!(read(&dir, "web_00000"), b"aaaa\nbbbb\ncccc\n");
    assert_eq!(read(&dir, "web_00001"), b"dddd\n");
    assert_eq!(store.current_filename(), Some(dir.path().join("web_00001")));

    let stats = stdfs::read_to_string(dir.path().join("scribe_stats")).unwrap();
    assert!(stats.contains("wrote <15> bytes in <3> events"));
    assert!(stats.contains("web_00000"));
}

#[test]
fn test_write_failure_returns_unwritten_suffix() {
    let dir = TempDir::new().unwrap();
    let logs = dir.path().join("logs");
    let mut store = FileStore::new(StoreContext::default(), "web", false, false);
    store.configure(&conf(&format!(
        "file_path = \"{}\"\nbase_filename = \"web\"\nmax_size = 5",
        logs.display()
    )));
    assert!(store.open());

    // the open file keeps working, but no new file can be created
    let moved = dir.path().join("moved");
    stdfs::rename(&logs, &moved).unwrap();
    stdfs::write(&logs, b"").unwrap();

    let mut b = batch("web", &["aaaa", "bbbb", "cccc", "dddd"]);
    assert!(!store.handle_messages(&mut b));

    assert_eq!(messages_of(&b), vec!["cccc", "dddd"]);
    assert!(!store.is_open());
    assert_eq!(store.status(), "File write error");
    assert_eq!(stdfs::read(moved.join("web_00000")).unwrap(), b"aaaabbbb");
}

#[test]
fn test_write_meta_on_rotation() {
    let dir = TempDir::new().unwrap();
    let store = file_store(&dir, "max_size = 3\nwrite_meta = \"yes\"\nwrite_stats = \"no\"");
    assert!(store.open());

    let mut b = batch("web", &["abcd", "e"]);
    assert!(store.handle_messages(&mut b));

    let first = String::from_utf8(read(&dir, "web_00000")).unwrap();
    let next = dir.path().join("web_00001");
    assert_eq!(first, format!("abcd{}{}", META_LOGFILE_PREFIX, next.display()));
    assert_eq!(read(&dir, "web_00001"), b"e");
    assert!(!dir.path().join("scribe_stats").exists());
}

#[test]
fn test_chunk_padding() {
    let dir = TempDir::new().unwrap();
    let store = file_store(&dir, "chunk_size = 8\nadd_newlines = 1");
    assert!(store.open());

    let mut b = batch("web", &["abcde", "fghij"]);
    assert!(store.handle_messages(&mut b));
    assert_eq!(read(&dir, "web_00000"), b"abcde\n\0\0fghij\n");
}

#[test]
fn test_sub_directory() {
    let dir = TempDir::new().unwrap();
    let store = file_store(&dir, "sub_directory = \"east\"");
    assert!(store.open());
    assert_eq!(
        store.current_filename(),
        Some(dir.path().join("east").join("web_00000"))
    );
}

#[test]
fn test_unsupported_fs_type() {
    let dir = TempDir::new().unwrap();
    let store = file_store(&dir, "fs_type = \"hdfs\"");

    assert!(!store.open());
    assert!(!store.is_open());
    assert_eq!(store.status(), "file open error");

    let mut b = batch("web", &["a"]);
    assert!(!store.handle_messages(&mut b));
    assert_eq!(b.len(), 1);
}

#[test]
fn test_close_then_handle_reopens() {
    let dir = TempDir::new().unwrap();
    let store = file_store(&dir, "");
    assert!(store.open());
    store.close();
    assert!(!store.is_open());

    let mut b = batch("web", &["x"]);
    assert!(store.handle_messages(&mut b));
    assert!(store.is_open());
    assert_eq!(read(&dir, "web_00001"), b"x");
}

#[test]
fn test_periodic_rotation() {
    let dir = TempDir::new().unwrap();
    let store = file_store(&dir, "rotate_period = \"2s\"\nwrite_stats = \"no\"");
    assert!(store.open());

    store.periodic_check();
    assert_eq!(store.current_filename(), Some(dir.path().join("web_00000")));

    std::thread::sleep(std::time::Duration::from_millis(2100));
    store.periodic_check();
    assert_eq!(store.current_filename(), Some(dir.path().join("web_00001")));
}

#[test]
fn test_periodic_check_does_not_open_closed_store() {
    let dir = TempDir::new().unwrap();
    let store = file_store(&dir, "max_size = 1");
    store.periodic_check();
    assert!(!store.is_open());
    assert!(stdfs::read_dir(dir.path()).unwrap().next().is_none());
}

#[test]
fn test_copy_writes_under_category_directory() {
    let dir = TempDir::new().unwrap();
    let store = file_store(&dir, "add_newlines = 1");
    let copy = store.copy("db");
    assert_eq!(copy.category(), "db");

    let mut b = batch("db", &["q"]);
    assert!(copy.open());
    assert!(copy.handle_messages(&mut b));
    let path: PathBuf = dir.path().join("db").join("db_00000");
    assert_eq!(stdfs::read(path).unwrap(), b"q\n");
}

// =============================================================================
// Buffer file read path
// =============================================================================

#[test]
fn test_buffer_file_round_trip() {
    let dir = TempDir::new().unwrap();
    let store = buffer_file(&dir, "", false);
    assert!(store.open());

    let mut b = batch("web", &["one", "two", "three"]);
    assert!(store.handle_messages(&mut b));
    assert!(!store.empty(Local::now()));

    let mut out = MessageBatch::new();
    assert!(store.read_oldest(&mut out, Local::now()));
    assert_eq!(messages_of(&out), vec!["one", "two", "three"]);
    assert!(out.iter().all(|e| e.category() == "web"));
}

#[test]
fn test_buffer_file_has_no_symlink_and_no_time_rotation() {
    let dir = TempDir::new().unwrap();
    let store = buffer_file(&dir, "rotate_period = \"hourly\"\nchunk_size = 64", false);
    assert!(store.open());

    assert_eq!(store.settings().rotate_period, RotatePeriod::Never);
    assert_eq!(store.settings().chunk_size, 0);
    assert!(!dir.path().join("web_current").exists());
}

#[test]
fn test_buffer_file_keeps_categories() {
    let dir = TempDir::new().unwrap();
    let store = buffer_file(&dir, "", true);
    assert!(store.open());

    let mut b: MessageBatch = vec![
        LogEntry::new("a", "alpha"),
        LogEntry::new("b", "beta"),
    ]
    .into();
    assert!(store.handle_messages(&mut b));

    let mut out = MessageBatch::new();
    assert!(store.read_oldest(&mut out, Local::now()));
    let pairs: Vec<_> = out
        .iter()
        .map(|e| (e.category().to_string(), String::from_utf8_lossy(e.message()).into_owned()))
        .collect();
    assert_eq!(
        pairs,
        vec![
            ("a".to_string(), "alpha".to_string()),
            ("b".to_string(), "beta".to_string())
        ]
    );
}

#[test]
fn test_read_oldest_without_files_is_empty_success() {
    let dir = TempDir::new().unwrap();
    let store = buffer_file(&dir, "", false);

    let mut out = MessageBatch::new();
    assert!(store.read_oldest(&mut out, Local::now()));
    assert!(out.is_empty());
    assert!(store.empty(Local::now()));
}

#[test]
fn test_read_oldest_picks_lowest_suffix() {
    let dir = TempDir::new().unwrap();
    let store = buffer_file(&dir, "max_size = 4", false);
    assert!(store.open());

    let mut b = batch("web", &["first", "second"]);
    assert!(store.handle_messages(&mut b));

    let mut out = MessageBatch::new();
    assert!(store.read_oldest(&mut out, Local::now()));
    assert_eq!(messages_of(&out), vec!["first"]);

    assert!(store.delete_oldest(Local::now()));
    out.clear();
    assert!(store.read_oldest(&mut out, Local::now()));
    assert_eq!(messages_of(&out), vec!["second"]);
}

#[test]
fn test_delete_oldest_closes_current_file() {
    let dir = TempDir::new().unwrap();
    let store = buffer_file(&dir, "", false);
    assert!(store.open());

    let mut b = batch("web", &["x"]);
    assert!(store.handle_messages(&mut b));
    assert!(store.delete_oldest(Local::now()));

    assert!(!store.is_open());
    assert!(!dir.path().join("web_00000").exists());
    assert!(store.empty(Local::now()));
}

#[test]
fn test_empty_ignores_zero_length_files() {
    let dir = TempDir::new().unwrap();
    let store = buffer_file(&dir, "", false);
    assert!(store.open());
    assert!(dir.path().join("web_00000").exists());
    assert!(store.empty(Local::now()));
}

#[test]
fn test_replace_oldest() {
    let dir = TempDir::new().unwrap();
    let store = buffer_file(&dir, "", false);
    assert!(store.open());

    let mut b = batch("web", &["1", "2", "3"]);
    assert!(store.handle_messages(&mut b));

    let mut remaining = batch("web", &["3"]);
    assert!(store.replace_oldest(&mut remaining, Local::now()));
    assert!(store.is_open());

    let mut out = MessageBatch::new();
    assert!(store.read_oldest(&mut out, Local::now()));
    assert_eq!(messages_of(&out), vec!["3"]);
}

#[test]
fn test_replace_oldest_without_files_fails() {
    let dir = TempDir::new().unwrap();
    let store = buffer_file(&dir, "", false);
    let mut b = batch("web", &["x"]);
    assert!(!store.replace_oldest(&mut b, Local::now()));
}

#[test]
fn test_compressed_buffer_file() {
    let dir = TempDir::new().unwrap();
    let store = buffer_file(&dir, "lzo_compression = 1", false);
    assert!(store.open());
    assert_eq!(store.current_filename(), Some(dir.path().join("web_00000.lz4")));

    let mut b = batch("web", &["a"]);
    assert!(store.handle_messages(&mut b));
    let mut b = batch("web", &["b", "c"]);
    assert!(store.handle_messages(&mut b));

    let mut out = MessageBatch::new();
    assert!(store.read_oldest(&mut out, Local::now()));
    assert_eq!(messages_of(&out), vec!["a", "b", "c"]);
}

#[test]
fn test_plain_file_store_read_splits_lines() {
    let dir = TempDir::new().unwrap();
    let store = file_store(&dir, "add_newlines = 1");
    assert!(store.open());

    let mut b = batch("web", &["x", "y"]);
    assert!(store.handle_messages(&mut b));

    let mut out = MessageBatch::new();
    assert!(store.read_oldest(&mut out, Local::now()));
    assert_eq!(messages_of(&out), vec!["x", "y"]);
}
