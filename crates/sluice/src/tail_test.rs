//! Tests for the tail source

use std::fs::OpenOptions;
use std::io::Write;

use sluice_config::Config;
use tempfile::TempDir;

use super::*;

fn append(path: &Path, data: &str) {
    let mut file = OpenOptions::new().create(true).append(true).open(path).unwrap();
    file.write_all(data.as_bytes()).unwrap();
}

fn text(lines: Vec<Vec<u8>>) -> Vec<String> {
    lines.into_iter().map(|l| String::from_utf8(l).unwrap()).collect()
}

// =============================================================================
// Follower
// =============================================================================

#[test]
fn test_starts_at_end_by_default() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("app.log");
    append(&path, "old\n");

    let mut follower = Follower::open(&path, false).unwrap();
    assert!(follower.poll().unwrap().is_empty());

    append(&path, "new\n");
    assert_eq!(text(follower.poll().unwrap()), vec!["new\n"]);
}

#[test]
fn test_from_start_reads_existing_lines() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("app.log");
    append(&path, "one\ntwo\n");

    let mut follower = Follower::open(&path, true).unwrap();
    assert_eq!(text(follower.poll().unwrap()), vec!["one\n", "two\n"]);
    assert!(follower.poll().unwrap().is_empty());
}

#[test]
fn test_partial_line_waits_for_newline() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("app.log");
    append(&path, "");

    let mut follower = Follower::open(&path, false).unwrap();
    append(&path, "hal");
    assert!(follower.poll().unwrap().is_empty());

    append(&path, "f\nnext");
    assert_eq!(text(follower.poll().unwrap()), vec!["half\n"]);
}

#[test]
fn test_truncation_rewinds() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("app.log");
    append(&path, "");
    let mut follower = Follower::open(&path, false).unwrap();

    append(&path, "a long first line\n");
    assert_eq!(follower.poll().unwrap().len(), 1);

    fs::write(&path, "short\n").unwrap();
    assert_eq!(text(follower.poll().unwrap()), vec!["short\n"]);
}

#[test]
fn test_follows_replaced_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("app.log");
    append(&path, "");
    let mut follower = Follower::open(&path, false).unwrap();

    append(&path, "before\n");
    assert_eq!(text(follower.poll().unwrap()), vec!["before\n"]);

    fs::rename(&path, dir.path().join("app.log.1")).unwrap();
    append(&path, "after rotation\n");
    assert_eq!(text(follower.poll().unwrap()), vec!["after rotation\n"]);
}

#[test]
fn test_missing_file_is_picked_up_later() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("later.log");

    let mut follower = Follower::open(&path, false).unwrap();
    assert!(follower.poll().unwrap().is_empty());

    append(&path, "hello\n");
    assert_eq!(text(follower.poll().unwrap()), vec!["hello\n"]);
    assert_eq!(follower.path(), path.as_path());
}

// =============================================================================
// TailSource
// =============================================================================

fn source(path: &Path) -> TailSource {
    TailSource::new(&TailSourceConfig {
        category: "app".into(),
        file: path.to_path_buf(),
        poll_interval_ms: 10,
        from_start: true,
    })
}

fn handler(store: &str) -> Arc<Handler> {
    let config: Config = format!("[store]\n{}", store).parse().unwrap();
    Arc::new(Handler::from_config(&config).unwrap())
}

#[test]
fn test_deliver_counts_tail_good() {
    let handler = handler("type = \"null\"");
    let source = source(Path::new("/unused"));

    source.deliver(&handler, vec![b"a\n".to_vec(), b"b\n".to_vec()]);
    assert_eq!(handler.stats().get("app", counter::TAIL_GOOD), 2);
    assert_eq!(handler.stats().get("app", counter::RECEIVED_GOOD), 2);
}

#[test]
fn test_deliver_counts_tail_bad_when_refused() {
    let handler = handler("type = \"bucket\"");
    let source = source(Path::new("/unused"));

    source.deliver(&handler, vec![b"a\n".to_vec()]);
    assert_eq!(handler.stats().get("app", counter::TAIL_BAD), 1);
    assert_eq!(handler.stats().get("app", counter::LOST), 1);
}

#[test]
fn test_run_until_cancelled() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("app.log");
    append(&path, "x\ny\n");

    let handler = handler("type = \"null\"");
    let cancel = CancellationToken::new();
    let worker = {
        let handler = handler.clone();
        let cancel = cancel.clone();
        let source = source(&path);
        std::thread::spawn(move || source.run(handler, cancel))
    };

    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    while handler.stats().get("app", counter::TAIL_GOOD) < 2 && std::time::Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(10));
    }
    cancel.cancel();
    worker.join().unwrap();

    assert_eq!(handler.stats().get("app", counter::TAIL_GOOD), 2);
    assert_eq!(source(&path).category(), "app");
}
