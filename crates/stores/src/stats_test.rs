//! Tests for StoreStats

use super::*;

#[test]
fn test_untouched_counter_is_zero() {
    let stats = StoreStats::new();
    assert_eq!(stats.get("web", counter::SENT), 0);
    assert!(stats.snapshot().is_empty());
}

#[test]
fn test_incr_and_incr_by() {
    let stats = StoreStats::new();
    stats.incr("web", counter::RETRIES);
    stats.incr("web", counter::RETRIES);
    stats.incr_by("web", counter::LOST, 5);
    stats.incr_by("web", counter::LOST, 0);

    assert_eq!(stats.get("web", counter::RETRIES), 2);
    assert_eq!(stats.get("web", counter::LOST), 5);
    assert_eq!(stats.get("db", counter::LOST), 0);
}

#[test]
fn test_snapshot_sorted() {
    let stats = StoreStats::new();
    stats.incr("web", counter::SENT);
    stats.incr("app", counter::SENT);
    stats.incr("app", counter::IGNORED);

    let snapshot = stats.snapshot();
    assert_eq!(
        snapshot,
        vec![
            ("app".to_string(), "ignored".to_string(), 1),
            ("app".to_string(), "sent".to_string(), 1),
            ("web".to_string(), "sent".to_string(), 1),
        ]
    );
}
