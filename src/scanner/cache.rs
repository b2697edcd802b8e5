//! Persisted scan aggregates and the authorization marker.
//!
//! Both live in the preference table of the [`LocalStore`], so a store that
//! failed to open simply means no fast path on the next launch.

use serde::{Deserialize, Serialize};

use super::asset::Category;
use super::fetch_result::FetchResult;
use super::library::AuthorizationStatus;
use crate::storage::LocalStore;

const CACHE_KEY: &str = "scanner.cache";
const AUTHORIZATION_KEY: &str = "scanner.authorization";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CategoryStats {
    pub total_size: u64,
    pub count: usize,
    pub latest_asset_id: Option<String>,
}

/// Last-known per-category aggregates.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanCache {
    pub all_videos: CategoryStats,
    pub short_videos: CategoryStats,
    pub screen_recordings: CategoryStats,
    pub screenshots: CategoryStats,
}

impl ScanCache {
    pub fn from_result(result: &FetchResult) -> Self {
        let stats = |category| {
            let bucket = result.bucket(category);
            CategoryStats {
                total_size: bucket.total_size,
                count: bucket.len(),
                latest_asset_id: bucket.latest_id().map(str::to_string),
            }
        };
        Self {
            all_videos: stats(Category::AllVideos),
            short_videos: stats(Category::ShortVideos),
            screen_recordings: stats(Category::ScreenRecordings),
            screenshots: stats(Category::Screenshots),
        }
    }

    pub fn stats(&self, category: Category) -> &CategoryStats {
        match category {
            Category::AllVideos => &self.all_videos,
            Category::ShortVideos => &self.short_videos,
            Category::ScreenRecordings => &self.screen_recordings,
            Category::Screenshots => &self.screenshots,
        }
    }

    /// A corrupt record is treated as absent.
    pub async fn load(store: &LocalStore) -> Option<Self> {
        let raw = store.get_preference(CACHE_KEY).await?;
        match serde_json::from_str(&raw) {
            Ok(cache) => Some(cache),
            Err(e) => {
                tracing::warn!(error = %e, "Discarding unreadable scan cache");
                None
            }
        }
    }

    pub async fn save(&self, store: &LocalStore) -> bool {
        match serde_json::to_string(self) {
            Ok(raw) => store.set_preference(CACHE_KEY, &raw).await,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to serialize scan cache");
                false
            }
        }
    }

    pub async fn discard(store: &LocalStore) -> bool {
        store.delete_preference(CACHE_KEY).await
    }
}

pub async fn last_authorization(store: &LocalStore) -> Option<i64> {
    store
        .get_preference(AUTHORIZATION_KEY)
        .await
        .and_then(|raw| raw.parse().ok())
}

pub async fn record_authorization(store: &LocalStore, status: AuthorizationStatus) -> bool {
    store
        .set_preference(AUTHORIZATION_KEY, &status.code().to_string())
        .await
}
