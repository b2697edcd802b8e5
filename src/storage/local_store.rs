//! Gracefully degrading facade over [`Database`].
//!
//! The feed must stay usable (network-only) when persistence is unavailable,
//! so every operation here turns a storage failure into a logged no-op or an
//! empty result instead of an error.

use std::future::Future;

use super::schema::Database;
use super::types::{FeedItem, PageCursor};

#[derive(Clone)]
pub struct LocalStore {
    db: Option<Database>,
}

impl LocalStore {
    /// Open the store at `path`. A failed open yields a non-functional store.
    pub async fn open(path: &str) -> Self {
        match Database::open(path).await {
            Ok(db) => Self { db: Some(db) },
            Err(e) => {
                tracing::warn!(
                    path = %path,
                    error = %e,
                    "Local store unavailable, continuing without persistence"
                );
                Self { db: None }
            }
        }
    }

    /// A store with no backing database; every operation is a no-op.
    pub fn disabled() -> Self {
        Self { db: None }
    }

    pub fn is_available(&self) -> bool {
        self.db.is_some()
    }

    async fn degrade<'a, T, F, Fut>(&'a self, op: &'static str, fallback: T, f: F) -> T
    where
        F: FnOnce(&'a Database) -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        let Some(db) = &self.db else {
            tracing::debug!(op = op, "Local store unavailable, skipping");
            return fallback;
        };

        match f(db).await {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(op = op, error = %e, "Local store operation failed");
                fallback
            }
        }
    }

    // ========================================================================
    // Feed Items
    // ========================================================================

    /// Persist `items` (ignore-on-conflict by URL) and prune beyond `max_keep`.
    /// Returns the number of new rows.
    pub async fn save(&self, items: &[FeedItem], max_keep: usize) -> usize {
        self.degrade("save", 0, |db| db.save_feed_items(items, max_keep))
            .await
    }

    pub async fn fetch_latest(&self, limit: usize) -> Vec<FeedItem> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        self.degrade("fetch_latest", Vec::new(), |db| {
            db.fetch_latest_feed_items(limit)
        })
        .await
    }

    pub async fn fetch_before(&self, cursor: PageCursor, limit: usize) -> Vec<FeedItem> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        self.degrade("fetch_before", Vec::new(), |db| {
            db.fetch_feed_items_before(cursor, limit)
        })
        .await
    }

    pub async fn fetch_by_url(&self, image_url: &str) -> Option<FeedItem> {
        self.degrade("fetch_by_url", None, |db| db.fetch_feed_item_by_url(image_url))
            .await
    }

    pub async fn count(&self) -> u64 {
        let count = self
            .degrade("count", 0, |db| db.count_feed_items())
            .await;
        u64::try_from(count).unwrap_or(0)
    }

    pub async fn delete_all(&self) -> u64 {
        self.degrade("delete_all", 0, |db| db.delete_all_feed_items())
            .await
    }

    pub async fn delete_by_url(&self, image_url: &str) -> bool {
        self.degrade("delete_by_url", false, |db| {
            db.delete_feed_item_by_url(image_url)
        })
        .await
    }

    // ========================================================================
    // Key-Value Preferences
    // ========================================================================

    pub async fn get_preference(&self, key: &str) -> Option<String> {
        self.degrade("get_preference", None, |db| db.get_preference(key))
            .await
    }

    /// Returns whether the value was stored.
    pub async fn set_preference(&self, key: &str, value: &str) -> bool {
        self.degrade("set_preference", false, |db| async move {
            db.set_preference(key, value).await.map(|_| true)
        })
        .await
    }

    pub async fn delete_preference(&self, key: &str) -> bool {
        self.degrade("delete_preference", false, |db| db.delete_preference(key))
            .await
    }
}

impl From<Database> for LocalStore {
    fn from(db: Database) -> Self {
        Self { db: Some(db) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_disabled_store_degrades_to_empty() {
        let store = LocalStore::disabled();
        assert!(!store.is_available());

        assert_eq!(store.save(&[FeedItem::new("https://a.example/1.png")], 10).await, 0);
        assert!(store.fetch_latest(10).await.is_empty());
        assert!(store.fetch_before(PageCursor::Id(5), 10).await.is_empty());
        assert_eq!(store.count().await, 0);
        assert_eq!(store.delete_all().await, 0);
        assert!(!store.delete_by_url("https://a.example/1.png").await);
        assert!(store.get_preference("scan.cache").await.is_none());
        assert!(!store.set_preference("scan.cache", "{}").await);
    }

    #[tokio::test]
    async fn test_open_failure_yields_disabled_store() {
        let store = LocalStore::open("/nonexistent-dir/galleria/feed.db").await;
        assert!(!store.is_available());
        assert!(store.fetch_latest(5).await.is_empty());
    }

    #[tokio::test]
    async fn test_closed_pool_degrades_instead_of_failing() {
        let db = Database::open(":memory:").await.unwrap();
        let store = LocalStore::from(db.clone());
        store.save(&[FeedItem::new("https://a.example/1.png")], 10).await;
        assert_eq!(store.count().await, 1);

        db.pool.close().await;
        assert_eq!(store.count().await, 0);
        assert!(store.fetch_latest(5).await.is_empty());
    }

    #[tokio::test]
    async fn test_preferences_round_trip() {
        let store = LocalStore::from(Database::open(":memory:").await.unwrap());
        assert!(store.set_preference("scan.authorization", "3").await);
        assert_eq!(store.get_preference("scan.authorization").await.as_deref(), Some("3"));
        assert!(store.delete_preference("scan.authorization").await);
        assert!(store.get_preference("scan.authorization").await.is_none());
    }
}
