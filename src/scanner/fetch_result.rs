//! Per-category scan accumulation.
//!
//! [`FetchResult`] forms a monoid: [`FetchResult::empty`] is the identity and
//! [`FetchResult::combine`] concatenates bucket lists and adds sizes. Both the
//! progressive and the atomic scan are folds over single-asset results.

use std::collections::HashSet;

use super::asset::{Category, MediaAsset};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CategoryBucket {
    pub assets: Vec<MediaAsset>,
    pub total_size: u64,
}

impl CategoryBucket {
    fn push(&mut self, asset: MediaAsset) {
        self.total_size = self.total_size.saturating_add(asset.size);
        self.assets.push(asset);
    }

    fn extend(&mut self, other: CategoryBucket) {
        self.total_size = self.total_size.saturating_add(other.total_size);
        self.assets.extend(other.assets);
    }

    pub fn len(&self) -> usize {
        self.assets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assets.is_empty()
    }

    /// Identifier of the newest asset by creation date.
    pub fn latest_id(&self) -> Option<&str> {
        self.assets
            .iter()
            .max_by_key(|a| a.created_at)
            .map(|a| a.id.as_str())
    }

    /// Drop the given identifiers, returning the bytes subtracted.
    fn remove(&mut self, ids: &HashSet<&str>) -> u64 {
        let mut removed = 0u64;
        self.assets.retain(|asset| {
            if ids.contains(asset.id.as_str()) {
                removed = removed.saturating_add(asset.size);
                false
            } else {
                true
            }
        });
        self.total_size = self.total_size.saturating_sub(removed);
        removed
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FetchResult {
    pub all_videos: CategoryBucket,
    pub short_videos: CategoryBucket,
    pub screen_recordings: CategoryBucket,
    pub screenshots: CategoryBucket,
}

impl FetchResult {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Place one asset in every bucket it belongs to.
    ///
    /// A video may land in up to three buckets; a screenshot only ever in one.
    pub fn classify(asset: MediaAsset, short_video_threshold_secs: f64) -> Self {
        let mut result = Self::empty();
        if asset.is_video() {
            if asset.duration_secs <= short_video_threshold_secs {
                result.short_videos.push(asset.clone());
            }
            if asset.is_screen_recording {
                result.screen_recordings.push(asset.clone());
            }
            result.all_videos.push(asset);
        } else if asset.is_screenshot {
            result.screenshots.push(asset);
        }
        result
    }

    pub fn combine(mut self, other: Self) -> Self {
        self.all_videos.extend(other.all_videos);
        self.short_videos.extend(other.short_videos);
        self.screen_recordings.extend(other.screen_recordings);
        self.screenshots.extend(other.screenshots);
        self
    }

    pub fn bucket(&self, category: Category) -> &CategoryBucket {
        match category {
            Category::AllVideos => &self.all_videos,
            Category::ShortVideos => &self.short_videos,
            Category::ScreenRecordings => &self.screen_recordings,
            Category::Screenshots => &self.screenshots,
        }
    }

    fn buckets_mut(&mut self) -> [&mut CategoryBucket; 4] {
        [
            &mut self.all_videos,
            &mut self.short_videos,
            &mut self.screen_recordings,
            &mut self.screenshots,
        ]
    }

    /// Remove `ids` from every bucket. Returns the number of bucket entries removed.
    pub fn remove(&mut self, ids: &[String]) -> usize {
        let ids: HashSet<&str> = ids.iter().map(String::as_str).collect();
        let before = self.entry_count();
        for bucket in self.buckets_mut() {
            bucket.remove(&ids);
        }
        before - self.entry_count()
    }

    /// Flip selection on every entry for `id`. Returns the new state, or
    /// `None` when the asset is not listed.
    pub fn toggle_selection(&mut self, id: &str) -> Option<bool> {
        let mut state = None;
        for bucket in self.buckets_mut() {
            for asset in bucket.assets.iter_mut().filter(|a| a.id == id) {
                state = Some(asset.toggle_selection());
            }
        }
        state
    }

    /// Unique selected identifiers, in all-videos then screenshots order.
    pub fn selected_ids(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        Category::ALL
            .iter()
            .flat_map(|c| self.bucket(*c).assets.iter())
            .filter(|a| a.is_selected && seen.insert(a.id.as_str()))
            .map(|a| a.id.clone())
            .collect()
    }

    fn entry_count(&self) -> usize {
        Category::ALL.iter().map(|c| self.bucket(*c).len()).sum()
    }
}
