//! Keeps the four category views current against a live media library.
//!
//! Scans are last-writer-wins: starting one cancels whatever is in flight,
//! and a superseded scan never touches the display state. All display
//! mutation happens under the state lock, which is never held across a
//! library call.

use futures::future::join_all;
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::asset::{Category, MediaAsset, PlatformAsset};
use super::cache::{last_authorization, record_authorization, ScanCache};
use super::fetch_result::FetchResult;
use super::library::{AuthorizationStatus, LibraryChange, LibraryError, MediaLibrary};
use crate::config::ScannerConfig;
use crate::storage::LocalStore;

const SCAN_EVENT_BUFFER: usize = 256;

// ============================================================================
// Errors and Events
// ============================================================================

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("Media library access denied")]
    PermissionDenied,

    #[error("Asset deletion failed: {0}")]
    DeletionFailed(String),

    #[error(transparent)]
    Library(LibraryError),
}

impl From<LibraryError> for ScanError {
    fn from(e: LibraryError) -> Self {
        match e {
            LibraryError::PermissionDenied => ScanError::PermissionDenied,
            other => ScanError::Library(other),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanMode {
    /// Batch by batch, publishing as it goes
    Progressive,
    /// Everything at once, one replace-all publication
    Atomic,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ScanOutcome {
    Completed(ScanCache),
    /// Superseded by a newer scan
    Cancelled,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ScanEvent {
    /// Stale aggregates from the previous session
    CacheRestored(ScanCache),
    /// Batch `index` of `total`. Index 0 replaces the display lists, later
    /// batches append to them.
    BatchPublished {
        index: usize,
        total: usize,
        delta: FetchResult,
    },
    ScanCompleted {
        mode: ScanMode,
        duration: Duration,
        summary: ScanCache,
    },
    AssetsRemoved {
        ids: Vec<String>,
        summary: ScanCache,
    },
}

// ============================================================================
// Scanner
// ============================================================================

#[derive(Clone)]
pub struct AssetScanner {
    inner: Arc<ScannerInner>,
}

struct ScannerInner {
    library: Arc<dyn MediaLibrary>,
    store: LocalStore,
    config: ScannerConfig,
    state: Mutex<ScanState>,
    events: broadcast::Sender<ScanEvent>,
    busy: watch::Sender<bool>,
}

#[derive(Default)]
struct ScanState {
    display: FetchResult,
    /// Bumped by every scan start; publications from older scans are dropped
    generation: u64,
    cancel: Option<CancellationToken>,
    in_progress: bool,
    rescan_pending: bool,
}

impl AssetScanner {
    pub fn new(library: Arc<dyn MediaLibrary>, store: LocalStore, config: ScannerConfig) -> Self {
        let (events, _) = broadcast::channel(SCAN_EVENT_BUFFER);
        let (busy, _) = watch::channel(false);
        Self {
            inner: Arc::new(ScannerInner {
                library,
                store,
                config,
                state: Mutex::new(ScanState::default()),
                events,
                busy,
            }),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ScanEvent> {
        self.inner.events.subscribe()
    }

    /// Current display lists.
    pub async fn snapshot(&self) -> FetchResult {
        self.inner.state.lock().await.display.clone()
    }

    /// Restore cached aggregates, then scan in the background.
    pub async fn read_data(&self) -> JoinHandle<Result<ScanOutcome, ScanError>> {
        self.check_authorization().await;
        if let Some(cache) = ScanCache::load(&self.inner.store).await {
            tracing::debug!(videos = cache.all_videos.count, "Restored scan cache");
            let _ = self.inner.events.send(ScanEvent::CacheRestored(cache));
        }

        let scanner = self.clone();
        tokio::spawn(async move { scanner.fetch_assets(true).await })
    }

    /// Enumerate the library and rebuild the category views.
    ///
    /// Progressive on a first-ever initial load, atomic otherwise. Changes
    /// reported while the scan runs trigger one more atomic pass before this
    /// returns.
    pub async fn fetch_assets(&self, initial: bool) -> Result<ScanOutcome, ScanError> {
        if !self.check_authorization().await.allows_read() {
            return Err(ScanError::PermissionDenied);
        }

        let has_cache = ScanCache::load(&self.inner.store).await.is_some();
        let mut mode = if initial && !has_cache {
            ScanMode::Progressive
        } else {
            ScanMode::Atomic
        };

        loop {
            let (generation, token) = self.begin().await;
            let started = Instant::now();

            match self.scan(generation, &token, mode).await {
                Ok(true) => match self.complete(generation, mode, started).await {
                    Some((summary, false)) => return Ok(ScanOutcome::Completed(summary)),
                    Some((_, true)) => {
                        tracing::debug!("Library changed during scan, rescanning");
                        mode = ScanMode::Atomic;
                    }
                    None => return Ok(ScanOutcome::Cancelled),
                },
                Ok(false) => {
                    tracing::debug!(generation = generation, "Scan superseded");
                    return Ok(ScanOutcome::Cancelled);
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Media library scan failed");
                    self.abandon(generation).await;
                    return Err(e);
                }
            }
        }
    }

    /// Reconcile a library change notification.
    ///
    /// Pure removals are applied directly; anything else (including any
    /// insertion) costs a full atomic rescan. During a scan the change is
    /// only noted and picked up when that scan completes.
    pub async fn handle_library_change(&self, change: LibraryChange) -> Result<(), ScanError> {
        {
            let mut state = self.inner.state.lock().await;
            if state.in_progress {
                state.rescan_pending = true;
                return Ok(());
            }
        }

        match change.removals_only() {
            Some([]) => Ok(()),
            Some(removed) => {
                self.remove_from_views(removed).await;
                Ok(())
            }
            None => self.fetch_assets(false).await.map(|_| ()),
        }
    }

    /// Ask the platform to delete `ids`; views change only once it confirms.
    pub async fn delete_assets(&self, ids: &[String]) -> Result<ScanCache, ScanError> {
        if ids.is_empty() {
            return Ok(ScanCache::from_result(&self.snapshot().await));
        }

        self.inner
            .library
            .delete_assets(ids)
            .await
            .map_err(|e| match e {
                LibraryError::PermissionDenied => ScanError::PermissionDenied,
                other => ScanError::DeletionFailed(other.to_string()),
            })?;

        Ok(self.remove_from_views(ids).await)
    }

    /// Whether the cached counts and newest ids still match the library.
    pub async fn is_cache_current(&self) -> Result<bool, ScanError> {
        let Some(cache) = ScanCache::load(&self.inner.store).await else {
            return Ok(false);
        };

        let threshold = self.inner.config.short_video_threshold_secs;
        let live = self
            .inner
            .library
            .fetch_assets()
            .await?
            .iter()
            .filter(|a| a.is_of_interest())
            .map(|a| FetchResult::classify(MediaAsset::new(a, 0), threshold))
            .fold(FetchResult::empty(), FetchResult::combine);
        let live = ScanCache::from_result(&live);

        Ok(Category::ALL.iter().all(|&category| {
            let (cached, current) = (cache.stats(category), live.stats(category));
            cached.count == current.count && cached.latest_asset_id == current.latest_asset_id
        }))
    }

    /// Forward library change notifications until the task is aborted.
    pub fn watch(&self) -> JoinHandle<()> {
        let mut changes = self.inner.library.changes();
        let scanner = self.clone();

        tokio::spawn(async move {
            loop {
                let change = match changes.recv().await {
                    Ok(change) => change,
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped = skipped, "Missed library changes, rescanning");
                        LibraryChange::Opaque
                    }
                    Err(RecvError::Closed) => break,
                };

                let scanner = scanner.clone();
                tokio::spawn(async move {
                    if let Err(e) = scanner.handle_library_change(change).await {
                        tracing::warn!(error = %e, "Failed to apply library change");
                    }
                });
            }
        })
    }

    /// Resolves once no scan is running.
    pub async fn wait_idle(&self) {
        let mut busy = self.inner.busy.subscribe();
        let _ = busy.wait_for(|busy| !*busy).await;
    }

    /// Returns the new selection state, or `None` for an unlisted asset.
    pub async fn toggle_selection(&self, id: &str) -> Option<bool> {
        self.inner.state.lock().await.display.toggle_selection(id)
    }

    pub async fn selected_ids(&self) -> Vec<String> {
        self.inner.state.lock().await.display.selected_ids()
    }

    // ------------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------------

    /// Discard the scan cache when the platform access level moved.
    async fn check_authorization(&self) -> AuthorizationStatus {
        let status = self.inner.library.authorization_status();
        let store = &self.inner.store;
        if last_authorization(store).await != Some(status.code()) {
            tracing::info!(status = ?status, "Library authorization changed, discarding scan cache");
            ScanCache::discard(store).await;
            record_authorization(store, status).await;
        }
        status
    }

    async fn begin(&self) -> (u64, CancellationToken) {
        let mut state = self.inner.state.lock().await;
        if let Some(previous) = state.cancel.take() {
            previous.cancel();
        }
        let token = CancellationToken::new();
        state.generation += 1;
        state.cancel = Some(token.clone());
        state.in_progress = true;
        self.inner.busy.send_replace(true);
        (state.generation, token)
    }

    /// Returns `Ok(false)` when cancelled before the last publication.
    async fn scan(
        &self,
        generation: u64,
        token: &CancellationToken,
        mode: ScanMode,
    ) -> Result<bool, ScanError> {
        let assets = tokio::select! {
            _ = token.cancelled() => return Ok(false),
            assets = self.inner.library.fetch_assets() => assets?,
        };
        let assets: Vec<PlatformAsset> = assets.into_iter().filter(|a| a.is_of_interest()).collect();
        tracing::info!(assets = assets.len(), mode = ?mode, "Scanning media library");

        match mode {
            ScanMode::Progressive => {
                let batch_size = self.inner.config.batch_size.max(1);
                // An empty library still publishes once to clear the display
                let batches: Vec<&[PlatformAsset]> = if assets.is_empty() {
                    vec![&assets[..]]
                } else {
                    assets.chunks(batch_size).collect()
                };
                let total = batches.len();

                for (index, batch) in batches.into_iter().enumerate() {
                    let delta = tokio::select! {
                        _ = token.cancelled() => return Ok(false),
                        delta = self.process_batch(batch) => delta,
                    };
                    if !self.publish(generation, index, total, delta).await {
                        return Ok(false);
                    }
                }
            }
            ScanMode::Atomic => {
                let result = tokio::select! {
                    _ = token.cancelled() => return Ok(false),
                    result = self.process_all(&assets) => result,
                };
                if !self.publish(generation, 0, 1, result).await {
                    return Ok(false);
                }
            }
        }
        Ok(true)
    }

    async fn process_one(&self, asset: &PlatformAsset) -> FetchResult {
        let mut item = MediaAsset::pending(asset);
        match self.inner.library.resource_size(asset).await {
            Ok(size) => item.resolve_size(size),
            Err(e) => {
                tracing::debug!(asset = %asset.id, error = %e, "Resource size unavailable");
                item.resolve_size(0);
            }
        }
        FetchResult::classify(item, self.inner.config.short_video_threshold_secs)
    }

    async fn process_batch(&self, batch: &[PlatformAsset]) -> FetchResult {
        join_all(batch.iter().map(|asset| self.process_one(asset)))
            .await
            .into_iter()
            .fold(FetchResult::empty(), FetchResult::combine)
    }

    /// Concurrency bounded by the batch size; results folded in library order.
    async fn process_all(&self, assets: &[PlatformAsset]) -> FetchResult {
        let pending: Vec<_> = assets.iter().map(|asset| self.process_one(asset)).collect();
        stream::iter(pending)
            .buffered(self.inner.config.batch_size.max(1))
            .fold(FetchResult::empty(), |acc, result| async move { acc.combine(result) })
            .await
    }

    async fn publish(&self, generation: u64, index: usize, total: usize, delta: FetchResult) -> bool {
        let mut state = self.inner.state.lock().await;
        if state.generation != generation {
            return false;
        }

        if index == 0 {
            state.display = delta.clone();
        } else {
            let current = std::mem::take(&mut state.display);
            state.display = current.combine(delta.clone());
        }
        let _ = self
            .inner
            .events
            .send(ScanEvent::BatchPublished { index, total, delta });
        true
    }

    /// Persist and announce a finished scan. Returns the summary and whether
    /// a rescan was requested meanwhile, or `None` if superseded.
    async fn complete(
        &self,
        generation: u64,
        mode: ScanMode,
        started: Instant,
    ) -> Option<(ScanCache, bool)> {
        let summary = {
            let state = self.inner.state.lock().await;
            if state.generation != generation {
                return None;
            }
            ScanCache::from_result(&state.display)
        };

        summary.save(&self.inner.store).await;
        let duration = started.elapsed();
        tracing::info!(
            mode = ?mode,
            duration_ms = duration.as_millis() as u64,
            videos = summary.all_videos.count,
            screenshots = summary.screenshots.count,
            "Media library scan completed"
        );
        let _ = self.inner.events.send(ScanEvent::ScanCompleted {
            mode,
            duration,
            summary: summary.clone(),
        });

        let mut state = self.inner.state.lock().await;
        if state.generation != generation {
            return Some((summary, false));
        }
        let rerun = std::mem::take(&mut state.rescan_pending);
        if !rerun {
            state.in_progress = false;
            state.cancel = None;
            self.inner.busy.send_replace(false);
        }
        Some((summary, rerun))
    }

    async fn abandon(&self, generation: u64) {
        let mut state = self.inner.state.lock().await;
        if state.generation == generation {
            state.in_progress = false;
            state.rescan_pending = false;
            state.cancel = None;
            self.inner.busy.send_replace(false);
        }
    }

    async fn remove_from_views(&self, ids: &[String]) -> ScanCache {
        let (summary, removed) = {
            let mut state = self.inner.state.lock().await;
            let removed = state.display.remove(ids);
            (ScanCache::from_result(&state.display), removed)
        };

        if removed > 0 {
            summary.save(&self.inner.store).await;
            tracing::info!(ids = ids.len(), entries = removed, "Removed assets from views");
            let _ = self.inner.events.send(ScanEvent::AssetsRemoved {
                ids: ids.to_vec(),
                summary: summary.clone(),
            });
        }
        summary
    }
}
