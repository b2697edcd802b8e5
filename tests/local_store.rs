//! Integration tests for the local feed store: idempotent inserts, pruning,
//! cursor pagination and graceful degradation.
//!
//! Each test creates its own in-memory SQLite database for isolation.

use std::collections::HashSet;

use galleria::storage::{Database, FeedItem, LocalStore, PageCursor};
use pretty_assertions::assert_eq;

async fn test_store() -> LocalStore {
    LocalStore::from(Database::open(":memory:").await.unwrap())
}

fn item(name: &str) -> FeedItem {
    FeedItem {
        prompt: Some(format!("prompt for {}", name)),
        width: Some(1024),
        height: Some(768),
        ..FeedItem::new(format!("https://image.example.com/{}.jpg", name))
    }
}

fn items(names: &[&str]) -> Vec<FeedItem> {
    names.iter().map(|n| item(n)).collect()
}

fn urls(items: &[FeedItem]) -> Vec<String> {
    items.iter().map(|i| i.image_url.clone()).collect()
}

// ============================================================================
// Idempotent Insert
// ============================================================================

#[tokio::test]
async fn test_same_url_stored_once() {
    let store = test_store().await;

    assert_eq!(store.save(&items(&["a"]), 100).await, 1);
    assert_eq!(store.save(&items(&["a"]), 100).await, 0);
    assert_eq!(store.count().await, 1);
}

#[tokio::test]
async fn test_overlapping_save_counts_only_new_urls() {
    let store = test_store().await;
    store.save(&items(&["a", "b", "c"]), 100).await;

    assert_eq!(store.save(&items(&["b", "c", "d", "e"]), 100).await, 2);
    assert_eq!(store.count().await, 5);
}

#[tokio::test]
async fn test_saved_fields_round_trip() {
    let store = test_store().await;
    let mut original = item("full");
    original.seed = Some(42);
    original.model = Some("flux".to_string());
    original.nsfw = Some(false);
    store.save(std::slice::from_ref(&original), 100).await;

    let stored = store.fetch_by_url(&original.image_url).await.unwrap();
    assert!(stored.db_id.is_some());
    assert!(stored.db_timestamp.is_some());
    assert_eq!(stored.seed, Some(42));
    assert_eq!(stored.model.as_deref(), Some("flux"));
    assert_eq!(stored.nsfw, Some(false));
    assert_eq!(stored.prompt, original.prompt);
}

// ============================================================================
// Pruning
// ============================================================================

#[tokio::test]
async fn test_abcd_scenario() {
    let store = test_store().await;

    for name in ["A", "B", "C"] {
        store.save(&items(&[name]), 3).await;
    }
    assert_eq!(urls(&store.fetch_latest(3).await), urls(&items(&["C", "B", "A"])));

    store.save(&items(&["D"]), 3).await;
    assert_eq!(store.count().await, 3);
    assert_eq!(urls(&store.fetch_latest(3).await), urls(&items(&["D", "C", "B"])));
    assert!(store.fetch_by_url(&item("A").image_url).await.is_none());
}

#[tokio::test]
async fn test_prune_keeps_most_recent_rows() {
    let store = test_store().await;
    let names: Vec<String> = (0..25).map(|i| format!("img{i:02}")).collect();

    for chunk in names.chunks(7) {
        let batch: Vec<FeedItem> = chunk.iter().map(|n| item(n)).collect();
        store.save(&batch, 10).await;
        assert!(store.count().await <= 10);
    }

    let kept = store.fetch_latest(100).await;
    let expected: Vec<String> = names.iter().rev().take(10).map(|n| item(n).image_url).collect();
    assert_eq!(urls(&kept), expected);
}

// ============================================================================
// Pagination
// ============================================================================

#[tokio::test]
async fn test_pagination_returns_every_item_once() {
    let store = test_store().await;
    let total: usize = 23;
    let names: Vec<String> = (0..total).map(|i| format!("p{i}")).collect();
    let batch: Vec<FeedItem> = names.iter().map(|n| item(n)).collect();
    store.save(&batch, 1000).await;

    let page_size: usize = 5;
    let mut seen = store.fetch_latest(page_size).await;
    let mut calls = 1;
    loop {
        let cursor = seen.last().and_then(|i| i.db_id).map(PageCursor::Id).unwrap();
        let page = store.fetch_before(cursor, page_size).await;
        if page.is_empty() {
            break;
        }
        calls += 1;
        seen.extend(page);
    }

    assert_eq!(calls, total.div_ceil(page_size));
    assert_eq!(seen.len(), total);
    let unique: HashSet<&str> = seen.iter().map(|i| i.image_url.as_str()).collect();
    assert_eq!(unique.len(), total);

    let ids: Vec<i64> = seen.iter().map(|i| i.db_id.unwrap()).collect();
    assert!(ids.windows(2).all(|w| w[0] > w[1]), "ids not strictly descending: {ids:?}");
}

#[tokio::test]
async fn test_timestamp_cursor_fallback() {
    let store = test_store().await;
    store.save(&items(&["old"]), 100).await;
    let stored = store.fetch_latest(1).await;
    let ts = stored[0].db_timestamp.unwrap();

    // An unpersisted item stamped later than everything stored
    let pending = FeedItem {
        db_timestamp: Some(ts + 60_000),
        ..item("pending")
    };
    let page = store.fetch_before(pending.cursor().unwrap(), 10).await;
    assert_eq!(urls(&page), urls(&items(&["old"])));
}

// ============================================================================
// Deletion and Degradation
// ============================================================================

#[tokio::test]
async fn test_delete_by_url_and_all() {
    let store = test_store().await;
    store.save(&items(&["a", "b", "c"]), 100).await;

    assert!(store.delete_by_url(&item("b").image_url).await);
    assert!(!store.delete_by_url(&item("b").image_url).await);
    assert_eq!(store.count().await, 2);

    assert_eq!(store.delete_all().await, 2);
    assert!(store.fetch_latest(10).await.is_empty());
}

#[tokio::test]
async fn test_disabled_store_is_inert() {
    let store = LocalStore::disabled();

    assert!(!store.is_available());
    assert_eq!(store.save(&items(&["a"]), 10).await, 0);
    assert_eq!(store.count().await, 0);
    assert!(store.fetch_latest(10).await.is_empty());
    assert!(store.fetch_before(PageCursor::Id(10), 10).await.is_empty());
    assert!(!store.set_preference("k", "v").await);
    assert_eq!(store.get_preference("k").await, None);
}

#[tokio::test]
async fn test_open_failure_degrades() {
    let store = LocalStore::open("/nonexistent-dir/galleria/feed.db").await;
    assert!(!store.is_available());
    assert_eq!(store.delete_all().await, 0);
}
