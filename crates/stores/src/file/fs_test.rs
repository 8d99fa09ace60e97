//! Tests for the local file abstraction

use super::*;
use tempfile::TempDir;

fn framed_record(data: &[u8]) -> Vec<u8> {
    let mut out = frame_header(data.len()).to_vec();
    out.extend_from_slice(data);
    out
}

// =============================================================================
// Framing
// =============================================================================

#[test]
fn test_frame_header_is_big_endian_length() {
    assert_eq!(frame_header(258), [0, 0, 1, 2]);
    assert_eq!(frame_header(0), [0; FRAME_LEN]);
}

#[test]
fn test_framed_write_then_read() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("buf_00000");

    let mut file = LocalFile::new(&path, true);
    file.open_write().unwrap();
    let mut data = framed_record(b"first");
    data.extend(framed_record(b""));
    data.extend(framed_record(b"third\nline"));
    file.write(&data).unwrap();
    file.close();
    assert!(!file.is_open());

    let mut reader = LocalFile::new(&path, true);
    reader.open_read().unwrap();
    assert_eq!(reader.read_next().as_deref(), Some(&b"first"[..]));
    assert_eq!(reader.read_next().as_deref(), Some(&b""[..]));
    assert_eq!(reader.read_next().as_deref(), Some(&b"third\nline"[..]));
    assert_eq!(reader.read_next(), None);
}

#[test]
fn test_framed_truncated_tail_dropped() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("buf_00000");

    let mut file = LocalFile::new(&path, true);
    file.open_write().unwrap();
    let mut data = framed_record(b"whole");
    data.extend_from_slice(&[0, 0, 0, 9, b'p', b'a']);
    file.write(&data).unwrap();
    file.close();

    file.open_read().unwrap();
    assert_eq!(file.read_next().as_deref(), Some(&b"whole"[..]));
    assert_eq!(file.read_next(), None);
}

#[test]
fn test_plain_read_splits_lines() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("plain");
    std::fs::write(&path, b"a\nbb\nccc").unwrap();

    let mut file = LocalFile::new(&path, false);
    file.open_read().unwrap();
    assert_eq!(file.read_next().as_deref(), Some(&b"a"[..]));
    assert_eq!(file.read_next().as_deref(), Some(&b"bb"[..]));
    assert_eq!(file.read_next().as_deref(), Some(&b"ccc"[..]));
    assert_eq!(file.read_next(), None);
}

// =============================================================================
// Compression
// =============================================================================

#[test]
fn test_compressed_writes_decode_across_frames() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("buf_00000.lz4");

    let mut file = LocalFile::new(&path, true).with_compression(true);
    file.open_write().unwrap();
    let first = framed_record(b"one");
    let second = framed_record(&[b'x'; 4096]);
    file.write(&first).unwrap();
    file.write(&second).unwrap();
    file.close();

    // compressed on disk
    assert!(file.file_size() < 4096);

    let mut reader = LocalFile::new(&path, true).with_compression(true);
    reader.open_read().unwrap();
    assert_eq!(reader.read_next().as_deref(), Some(&b"one"[..]));
    assert_eq!(reader.read_next().map(|r| r.len()), Some(4096));
    assert_eq!(reader.read_next(), None);
}

// =============================================================================
// Open modes and helpers
// =============================================================================

#[test]
fn test_append_and_truncate() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("f");

    let mut file = LocalFile::new(&path, false);
    file.open_write().unwrap();
    file.write(b"abc").unwrap();
    file.close();
    file.open_write().unwrap();
    file.write(b"def").unwrap();
    file.close();
    assert_eq!(std::fs::read(&path).unwrap(), b"abcdef");

    file.open_truncate().unwrap();
    file.write(b"x").unwrap();
    file.close();
    assert_eq!(file.file_size(), 1);
}

#[test]
fn test_write_requires_open() {
    let mut file = LocalFile::new("/nonexistent/f", false);
    let err = file.write(b"x").unwrap_err();
    assert_eq!(err.kind(), std::io::ErrorKind::NotConnected);
}

#[test]
fn test_missing_file_size_is_zero() {
    let dir = TempDir::new().unwrap();
    let file = LocalFile::new(dir.path().join("missing"), false);
    assert_eq!(file.file_size(), 0);
}

#[test]
fn test_list_missing_dir_is_empty() {
    let dir = TempDir::new().unwrap();
    assert!(list(&dir.path().join("nope")).unwrap().is_empty());
}

#[test]
fn test_list_and_delete() {
    let dir = TempDir::new().unwrap();
    create_dir(&dir.path().join("a/b")).unwrap();
    std::fs::write(dir.path().join("a/b/one"), b"1").unwrap();
    std::fs::write(dir.path().join("a/b/two"), b"2").unwrap();

    let mut names = list(&dir.path().join("a/b")).unwrap();
    names.sort();
    assert_eq!(names, vec!["one", "two"]);

    LocalFile::new(dir.path().join("a/b/one"), false)
        .delete()
        .unwrap();
    assert_eq!(list(&dir.path().join("a/b")).unwrap(), vec!["two"]);
}

#[cfg(unix)]
#[test]
fn test_create_symlink_replaces_existing() {
    let dir = TempDir::new().unwrap();
    let first = dir.path().join("log_00000");
    let second = dir.path().join("log_00001");
    let link = dir.path().join("log_current");
    std::fs::write(&first, b"1").unwrap();
    std::fs::write(&second, b"2").unwrap();

    create_symlink(&first, &link).unwrap();
    create_symlink(&second, &link).unwrap();
    assert_eq!(std::fs::read_link(&link).unwrap(), second);
}
