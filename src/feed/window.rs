use std::collections::{HashSet, VecDeque};
use std::ops::Range;

use crate::storage::FeedItem;

/// Bounded, deduplicated, newest-first view of the feed.
///
/// Index 0 is the newest item. Whenever the bound is exceeded items are
/// dropped from the tail (oldest end).
#[derive(Debug)]
pub struct FeedWindow {
    items: VecDeque<FeedItem>,
    urls: HashSet<String>,
    capacity: usize,
}

impl FeedWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            items: VecDeque::with_capacity(capacity),
            urls: HashSet::with_capacity(capacity),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn contains(&self, image_url: &str) -> bool {
        self.urls.contains(image_url)
    }

    /// The oldest item, used as the history pagination cursor.
    pub fn oldest(&self) -> Option<&FeedItem> {
        self.items.back()
    }

    pub fn to_vec(&self) -> Vec<FeedItem> {
        self.items.iter().cloned().collect()
    }

    pub fn clear(&mut self) {
        self.items.clear();
        self.urls.clear();
    }

    /// Replace the contents, keeping the first `capacity` unique items.
    pub fn reset(&mut self, items: Vec<FeedItem>) {
        self.clear();
        for item in items {
            if self.items.len() >= self.capacity {
                break;
            }
            if self.urls.insert(item.image_url.clone()) {
                self.items.push_back(item);
            }
        }
    }

    /// Insert items not already present at the front, preserving their
    /// relative order, then trim the tail to the bound.
    ///
    /// Returns the inserted items; they occupy indices `0..returned.len()`.
    pub fn prepend(&mut self, batch: Vec<FeedItem>) -> Vec<FeedItem> {
        let mut fresh = self.unique(batch);
        if fresh.len() > self.capacity {
            for dropped in fresh.drain(self.capacity..) {
                self.urls.remove(&dropped.image_url);
            }
        }

        for item in fresh.iter().rev() {
            self.items.push_front(item.clone());
        }
        while self.items.len() > self.capacity {
            if let Some(evicted) = self.items.pop_back() {
                self.urls.remove(&evicted.image_url);
            }
        }

        fresh
    }

    /// Add items not already present to the tail, as far as the bound allows.
    ///
    /// Returns the index range the appended items occupy.
    pub fn append(&mut self, batch: Vec<FeedItem>) -> (Range<usize>, Vec<FeedItem>) {
        let start = self.items.len();
        let room = self.capacity.saturating_sub(start);

        let mut fresh = self.unique(batch);
        if fresh.len() > room {
            for dropped in fresh.drain(room..) {
                self.urls.remove(&dropped.image_url);
            }
        }
        self.items.extend(fresh.iter().cloned());

        (start..self.items.len(), fresh)
    }

    /// Remove the item with `image_url`, returning its former index.
    pub fn remove(&mut self, image_url: &str) -> Option<usize> {
        if !self.urls.remove(image_url) {
            return None;
        }
        let index = self.items.iter().position(|i| i.image_url == image_url)?;
        self.items.remove(index);
        Some(index)
    }

    /// Filter `batch` down to items unseen by the window or earlier in the
    /// batch, registering their URLs.
    fn unique(&mut self, batch: Vec<FeedItem>) -> Vec<FeedItem> {
        batch
            .into_iter()
            .filter(|item| self.urls.insert(item.image_url.clone()))
            .collect()
    }
}
