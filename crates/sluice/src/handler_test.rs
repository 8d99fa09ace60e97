//! Tests for the handler

use sluice_config::StoreConf;
use sluice_protocol::LogEntry;

use super::*;

fn handler(store_toml: &str) -> Handler {
    let config: Config = format!("[store]\n{}", store_toml).parse().unwrap();
    Handler::from_config(&config).unwrap()
}

fn entries(items: &[(&str, &str)]) -> MessageBatch {
    items
        .iter()
        .map(|(category, message)| LogEntry::new(*category, message.to_string()))
        .collect()
}

// =============================================================================
// Logging
// =============================================================================

#[test]
fn test_accepted_batch_counts_received() {
    let handler = handler("type = \"null\"");
    assert!(handler.open());

    let rc = handler.log(entries(&[("web", "a"), ("web", "b"), ("db", "c")]));
    assert_eq!(rc, ResultCode::Ok);
    assert_eq!(handler.stats().get("web", counter::RECEIVED_GOOD), 2);
    assert_eq!(handler.stats().get("db", counter::RECEIVED_GOOD), 1);
    assert_eq!(handler.stats().get(ROOT_CATEGORY, counter::IGNORED), 3);
}

#[test]
fn test_entries_without_category_are_dropped() {
    let handler = handler("type = \"null\"");

    let rc = handler.log(entries(&[("", "orphan"), ("web", "a")]));
    assert_eq!(rc, ResultCode::Ok);
    assert_eq!(handler.stats().get(ROOT_CATEGORY, counter::RECEIVED_BAD), 1);
    assert_eq!(handler.stats().get(ROOT_CATEGORY, counter::IGNORED), 1);
}

#[test]
fn test_refused_entries_are_counted_lost() {
    // no buckets configured: every batch fails
    let handler = handler("type = \"bucket\"");
    assert!(!handler.root().status().is_empty());

    let rc = handler.log(entries(&[("web", "1:a"), ("web", "2:b")]));
    assert_eq!(rc, ResultCode::TryLater);
    assert_eq!(handler.stats().get("web", counter::LOST), 2);
}

#[test]
fn test_empty_batch_is_ok() {
    let handler = handler("type = \"bucket\"");
    assert_eq!(handler.log(MessageBatch::new()), ResultCode::Ok);
}

// =============================================================================
// Construction
// =============================================================================

#[test]
fn test_new_wraps_existing_store() {
    let ctx = StoreContext::default();
    let conf: StoreConf = "type = \"null\"".parse().unwrap();
    let root = build_store(&ctx, &conf, ROOT_CATEGORY, false, true).unwrap();
    let handler = Handler::new(ctx, root);

    assert_eq!(handler.root().category(), ROOT_CATEGORY);
    handler.periodic_check();
    handler.log_stats();
    handler.shutdown();
}

#[test]
fn test_from_config_builds_nested_tree() {
    let handler = handler(
        r#"
type = "multi"
[store.store0]
type = "null"
[store.store1]
type = "null"
"#,
    );
    assert_eq!(handler.root().status(), "");
    assert_eq!(handler.log(entries(&[("web", "a")])), ResultCode::Ok);
    assert_eq!(handler.stats().get(ROOT_CATEGORY, counter::IGNORED), 2);
}
