//! Single-writer aggregation over prioritized feed sources.
//!
//! All feed state (window, active source, exhaustion flag) lives inside one
//! spawned task. Callers talk to it through [`AggregatorHandle`] commands and
//! observe it through a broadcast of [`FeedEvent`]s. Sources push into the
//! same task through a [`SourceSink`], so window mutation is serialized
//! without locks.

use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::{Instant, MissedTickBehavior};

use super::source::{FeedSource, SourceError, SourceEvent, SourceSink};
use super::window::FeedWindow;
use crate::config::FeedConfig;
use crate::storage::{FeedItem, LocalStore};

const COMMAND_BUFFER: usize = 32;
const SOURCE_EVENT_BUFFER: usize = 64;
const FEED_EVENT_BUFFER: usize = 256;

// ============================================================================
// Events and Errors
// ============================================================================

/// Change notifications for feed observers.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedEvent {
    /// The whole window was replaced
    WindowReset(Vec<FeedItem>),
    /// New items now occupy indices `0..items.len()`
    ItemsPrepended(Vec<FeedItem>),
    /// Older items now occupy indices `start..start + items.len()`
    ItemsAppended { start: usize, items: Vec<FeedItem> },
    ItemRemoved { index: usize, image_url: String },
    ActiveSourceChanged(Option<String>),
    /// No source could be started; cached items remain visible
    AllSourcesFailed,
}

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("All feed sources failed")]
    AllSourcesFailed,

    #[error(transparent)]
    Source(#[from] SourceError),

    #[error("Feed aggregator is not running")]
    AggregatorClosed,
}

// ============================================================================
// Handle
// ============================================================================

enum Command {
    Start(oneshot::Sender<Option<String>>),
    LoadMoreHistory(oneshot::Sender<Result<usize, FeedError>>),
    Refresh(oneshot::Sender<Result<usize, FeedError>>),
    Clear(oneshot::Sender<u64>),
    RemoveItem {
        image_url: String,
        reply: oneshot::Sender<bool>,
    },
    Snapshot(oneshot::Sender<Vec<FeedItem>>),
    ActiveSource(oneshot::Sender<Option<String>>),
    Shutdown(oneshot::Sender<()>),
}

/// Cloneable front end to a running aggregator.
#[derive(Clone)]
pub struct AggregatorHandle {
    commands: mpsc::Sender<Command>,
    events: broadcast::Sender<FeedEvent>,
}

impl AggregatorHandle {
    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, FeedError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(command(tx))
            .await
            .map_err(|_| FeedError::AggregatorClosed)?;
        rx.await.map_err(|_| FeedError::AggregatorClosed)
    }

    /// Show cached items, start the best available source and begin health
    /// checks. Returns the name of the source that started, if any.
    pub async fn start(&self) -> Result<Option<String>, FeedError> {
        self.request(Command::Start).await
    }

    /// Append older items to the window. Returns how many were appended.
    pub async fn load_more_history(&self) -> Result<usize, FeedError> {
        self.request(Command::LoadMoreHistory).await?
    }

    /// Returns how many new items the refresh put at the front.
    pub async fn refresh(&self) -> Result<usize, FeedError> {
        self.request(Command::Refresh).await?
    }

    /// Empty both the window and the local store.
    pub async fn clear(&self) -> Result<u64, FeedError> {
        self.request(Command::Clear).await
    }

    pub async fn remove_item(&self, image_url: &str) -> Result<bool, FeedError> {
        let image_url = image_url.to_string();
        self.request(|reply| Command::RemoveItem { image_url, reply })
            .await
    }

    pub async fn snapshot(&self) -> Result<Vec<FeedItem>, FeedError> {
        self.request(Command::Snapshot).await
    }

    pub async fn active_source_name(&self) -> Result<Option<String>, FeedError> {
        self.request(Command::ActiveSource).await
    }

    pub fn subscribe(&self) -> broadcast::Receiver<FeedEvent> {
        self.events.subscribe()
    }

    /// Stop the active source (flushing its buffer) and end the task.
    pub async fn shutdown(&self) -> Result<(), FeedError> {
        self.request(Command::Shutdown).await
    }
}

// ============================================================================
// Aggregator
// ============================================================================

pub struct FeedAggregator {
    config: FeedConfig,
    store: LocalStore,
    sources: Vec<Arc<dyn FeedSource>>,
}

impl FeedAggregator {
    pub fn new(config: FeedConfig, store: LocalStore, mut sources: Vec<Arc<dyn FeedSource>>) -> Self {
        // Stable sort keeps configuration order among equal priorities
        sources.sort_by_key(|s| s.priority());
        Self {
            config,
            store,
            sources,
        }
    }

    /// Move the aggregator onto its own task.
    pub fn spawn(self) -> AggregatorHandle {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_BUFFER);
        let (source_tx, source_rx) = mpsc::channel(SOURCE_EVENT_BUFFER);
        let (events, _) = broadcast::channel(FEED_EVENT_BUFFER);

        let actor = Actor {
            window: FeedWindow::new(self.config.window_capacity),
            config: self.config,
            store: self.store,
            sources: self.sources,
            active: None,
            started: false,
            exhausted: false,
            source_tx,
            events: events.clone(),
        };
        tokio::spawn(actor.run(command_rx, source_rx));

        AggregatorHandle {
            commands: command_tx,
            events,
        }
    }
}

struct Actor {
    config: FeedConfig,
    store: LocalStore,
    /// Ascending priority
    sources: Vec<Arc<dyn FeedSource>>,
    window: FeedWindow,
    active: Option<usize>,
    started: bool,
    /// Set once `AllSourcesFailed` has been announced; cleared when a source starts
    exhausted: bool,
    source_tx: mpsc::Sender<SourceEvent>,
    events: broadcast::Sender<FeedEvent>,
}

impl Actor {
    async fn run(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        mut source_events: mpsc::Receiver<SourceEvent>,
    ) {
        let period = self.config.health_check_interval();
        let mut health = tokio::time::interval_at(Instant::now() + period, period);
        health.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                command = commands.recv() => match command {
                    Some(Command::Shutdown(reply)) => {
                        self.stop_active().await;
                        let _ = reply.send(());
                        break;
                    }
                    Some(Command::Start(reply)) => {
                        let active = self.start().await;
                        health.reset();
                        let _ = reply.send(active);
                    }
                    Some(command) => self.handle_command(command).await,
                    None => {
                        self.stop_active().await;
                        break;
                    }
                },

                Some(event) = source_events.recv() => self.handle_source_event(event).await,

                _ = health.tick(), if self.started => self.health_check().await,
            }
        }

        tracing::debug!("Feed aggregator stopped");
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::LoadMoreHistory(reply) => {
                let _ = reply.send(self.load_more_history().await);
            }
            Command::Refresh(reply) => {
                let _ = reply.send(self.refresh().await);
            }
            Command::Clear(reply) => {
                let _ = reply.send(self.clear().await);
            }
            Command::RemoveItem { image_url, reply } => {
                let _ = reply.send(self.remove_item(&image_url).await);
            }
            Command::Snapshot(reply) => {
                let _ = reply.send(self.window.to_vec());
            }
            Command::ActiveSource(reply) => {
                let _ = reply.send(self.active_name());
            }
            // Handled in the run loop
            Command::Start(_) | Command::Shutdown(_) => {}
        }
    }

    fn emit(&self, event: FeedEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    fn active_name(&self) -> Option<String> {
        self.active.map(|i| self.sources[i].name().to_string())
    }

    fn is_active(&self, name: &str) -> bool {
        self.active.is_some_and(|i| self.sources[i].name() == name)
    }

    // ------------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------------

    async fn start(&mut self) -> Option<String> {
        if self.started {
            return self.active_name();
        }
        self.started = true;

        let cached = self.store.fetch_latest(self.config.initial_load_count).await;
        tracing::info!(cached = cached.len(), "Loaded cached feed items");
        self.window.reset(cached);
        self.emit(FeedEvent::WindowReset(self.window.to_vec()));

        self.activate(None, false).await
    }

    /// Start the first source (ascending priority) that accepts, skipping
    /// `exclude`. Unless `probe` is set, sources reporting themselves
    /// unavailable are not tried.
    async fn activate(&mut self, exclude: Option<usize>, probe: bool) -> Option<String> {
        for index in 0..self.sources.len() {
            if Some(index) == exclude {
                continue;
            }
            let source = Arc::clone(&self.sources[index]);
            if !probe && !source.is_available() {
                tracing::debug!(source = %source.name(), "Skipping unavailable source");
                continue;
            }

            let sink = SourceSink::new(source.name(), self.source_tx.clone());
            match source.start_fetching(sink).await {
                Ok(()) => {
                    let name = source.name().to_string();
                    tracing::info!(source = %name, priority = source.priority(), "Feed source active");
                    self.active = Some(index);
                    self.exhausted = false;
                    self.emit(FeedEvent::ActiveSourceChanged(Some(name.clone())));
                    return Some(name);
                }
                Err(e) => {
                    tracing::warn!(source = %source.name(), error = %e, "Feed source failed to start");
                }
            }
        }

        self.active = None;
        if !self.exhausted {
            self.exhausted = true;
            tracing::warn!(sources = self.sources.len(), "No feed source could be started");
            self.emit(FeedEvent::AllSourcesFailed);
        }
        None
    }

    async fn stop_active(&mut self) {
        if let Some(index) = self.active.take() {
            self.sources[index].stop_fetching().await;
        }
    }

    /// Replace the active source with the next one that starts.
    async fn failover(&mut self) {
        let failed = self.active;
        if let Some(index) = failed {
            tracing::warn!(source = %self.sources[index].name(), "Failing over from source");
        }
        self.stop_active().await;

        if self.activate(failed, false).await.is_none() && failed.is_some() {
            self.emit(FeedEvent::ActiveSourceChanged(None));
        }
    }

    async fn health_check(&mut self) {
        match self.active {
            Some(index) if !self.sources[index].is_available() => self.failover().await,
            Some(_) => {}
            None => {
                tracing::debug!("No active feed source, retrying");
                self.activate(None, true).await;
            }
        }
    }

    // ------------------------------------------------------------------------
    // Source events
    // ------------------------------------------------------------------------

    async fn handle_source_event(&mut self, event: SourceEvent) {
        match event {
            SourceEvent::NewItems { source, items } => {
                if !self.is_active(&source) {
                    tracing::debug!(source = %source, count = items.len(), "Ignoring items from inactive source");
                    return;
                }
                let inserted = self.prepend(items);
                tracing::debug!(source = %source, inserted = inserted, "Ingested feed items");
            }
            SourceEvent::Error {
                source,
                error,
                available,
            } => {
                tracing::warn!(source = %source, error = %error, available = available, "Feed source error");
                if !available && self.is_active(&source) {
                    self.failover().await;
                }
            }
        }
    }

    fn prepend(&mut self, items: Vec<FeedItem>) -> usize {
        let inserted = self.window.prepend(items);
        let count = inserted.len();
        if count > 0 {
            self.emit(FeedEvent::ItemsPrepended(inserted));
        }
        count
    }

    fn append(&mut self, items: Vec<FeedItem>) -> usize {
        let (range, appended) = self.window.append(items);
        let count = appended.len();
        if count > 0 {
            self.emit(FeedEvent::ItemsAppended {
                start: range.start,
                items: appended,
            });
        }
        count
    }

    // ------------------------------------------------------------------------
    // Commands
    // ------------------------------------------------------------------------

    /// Store first; only ask the active source once local history runs dry.
    async fn load_more_history(&mut self) -> Result<usize, FeedError> {
        let limit = self.config.history_page_size;
        let from_store = match self.window.oldest().and_then(FeedItem::cursor) {
            Some(cursor) => self.store.fetch_before(cursor, limit).await,
            None if self.window.is_empty() => self.store.fetch_latest(limit).await,
            None => Vec::new(),
        };
        if !from_store.is_empty() {
            return Ok(self.append(from_store));
        }

        let Some(index) = self.active else {
            return Ok(0);
        };
        match self.sources[index].load_more().await {
            Ok(items) => Ok(self.append(items)),
            Err(SourceError::NoData) => {
                tracing::debug!(source = %self.sources[index].name(), "No more history");
                Ok(0)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn refresh(&mut self) -> Result<usize, FeedError> {
        match self.active {
            Some(index) => {
                let items = self.sources[index].refresh().await?;
                Ok(self.prepend(items))
            }
            None => self
                .activate(None, true)
                .await
                .map(|_| 0)
                .ok_or(FeedError::AllSourcesFailed),
        }
    }

    async fn clear(&mut self) -> u64 {
        let deleted = self.store.delete_all().await;
        self.window.clear();
        self.emit(FeedEvent::WindowReset(Vec::new()));
        tracing::info!(deleted = deleted, "Feed cleared");
        deleted
    }

    async fn remove_item(&mut self, image_url: &str) -> bool {
        let stored = self.store.delete_by_url(image_url).await;
        match self.window.remove(image_url) {
            Some(index) => {
                self.emit(FeedEvent::ItemRemoved {
                    index,
                    image_url: image_url.to_string(),
                });
                true
            }
            None => stored,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Database;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    /// Scripted source: items are pushed by the test through the captured sink.
    struct MockSource {
        name: String,
        priority: u32,
        available: AtomicBool,
        refuse_start: AtomicBool,
        starts: AtomicUsize,
        stops: AtomicUsize,
        sink: std::sync::Mutex<Option<SourceSink>>,
        pages: std::sync::Mutex<VecDeque<Vec<FeedItem>>>,
    }

    impl MockSource {
        fn new(name: &str, priority: u32) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                priority,
                available: AtomicBool::new(true),
                refuse_start: AtomicBool::new(false),
                starts: AtomicUsize::new(0),
                stops: AtomicUsize::new(0),
                sink: std::sync::Mutex::new(None),
                pages: std::sync::Mutex::new(VecDeque::new()),
            })
        }

        fn sink(&self) -> SourceSink {
            self.sink.lock().unwrap().clone().expect("source not started")
        }
    }

    #[async_trait]
    impl FeedSource for MockSource {
        fn name(&self) -> &str {
            &self.name
        }

        fn priority(&self) -> u32 {
            self.priority
        }

        fn is_available(&self) -> bool {
            self.available.load(Ordering::SeqCst)
        }

        async fn start_fetching(&self, sink: SourceSink) -> Result<(), SourceError> {
            self.starts.fetch_add(1, Ordering::SeqCst);
            if self.refuse_start.load(Ordering::SeqCst) {
                return Err(SourceError::Unavailable("refused".to_string()));
            }
            *self.sink.lock().unwrap() = Some(sink);
            Ok(())
        }

        async fn stop_fetching(&self) {
            self.stops.fetch_add(1, Ordering::SeqCst);
        }

        async fn load_more(&self) -> Result<Vec<FeedItem>, SourceError> {
            self.pages.lock().unwrap().pop_front().ok_or(SourceError::NoData)
        }

        async fn refresh(&self) -> Result<Vec<FeedItem>, SourceError> {
            Ok(vec![item("refreshed")])
        }
    }

    fn item(name: &str) -> FeedItem {
        FeedItem::new(format!("https://img.example.com/{name}.png"))
    }

    fn items(names: &[&str]) -> Vec<FeedItem> {
        names.iter().map(|n| item(n)).collect()
    }

    fn urls(items: &[FeedItem]) -> Vec<String> {
        items.iter().map(|i| i.image_url.clone()).collect()
    }

    fn config() -> FeedConfig {
        FeedConfig {
            initial_load_count: 3,
            window_capacity: 200,
            max_keep_count: 1000,
            // Out of the way unless a test lowers it
            health_check_interval_ms: 3_600_000,
            history_page_size: 3,
            sources: Vec::new(),
        }
    }

    async fn memory_store() -> LocalStore {
        LocalStore::from(Database::open(":memory:").await.unwrap())
    }

    fn spawn(config: FeedConfig, store: LocalStore, sources: &[Arc<MockSource>]) -> AggregatorHandle {
        let sources = sources
            .iter()
            .map(|s| Arc::clone(s) as Arc<dyn FeedSource>)
            .collect();
        FeedAggregator::new(config, store, sources).spawn()
    }

    async fn next_event(rx: &mut broadcast::Receiver<FeedEvent>) -> FeedEvent {
        tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("timed out waiting for feed event")
            .expect("event channel closed")
    }

    #[tokio::test]
    async fn test_start_shows_cache_then_activates_preferred_source() {
        let store = memory_store().await;
        store.save(&items(&["a", "b", "c", "d"]), 100).await;

        // Registered out of order: priority decides
        let backup = MockSource::new("backup", 2);
        let primary = MockSource::new("primary", 1);
        let handle = spawn(config(), store, &[Arc::clone(&backup), Arc::clone(&primary)]);
        let mut events = handle.subscribe();

        assert_eq!(handle.start().await.unwrap().as_deref(), Some("primary"));

        match next_event(&mut events).await {
            FeedEvent::WindowReset(window) => {
                assert_eq!(urls(&window), urls(&items(&["d", "c", "b"])));
            }
            other => panic!("unexpected event {other:?}"),
        }
        assert_eq!(
            next_event(&mut events).await,
            FeedEvent::ActiveSourceChanged(Some("primary".to_string()))
        );
        assert_eq!(backup.starts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_start_falls_through_refusing_and_unavailable_sources() {
        let first = MockSource::new("first", 1);
        first.refuse_start.store(true, Ordering::SeqCst);
        let second = MockSource::new("second", 2);
        second.available.store(false, Ordering::SeqCst);
        let third = MockSource::new("third", 3);

        let handle = spawn(config(), memory_store().await, &[first, Arc::clone(&second), third]);
        assert_eq!(handle.start().await.unwrap().as_deref(), Some("third"));
        assert_eq!(second.starts.load(Ordering::SeqCst), 0);
        assert_eq!(handle.active_source_name().await.unwrap().as_deref(), Some("third"));
    }

    #[tokio::test]
    async fn test_all_sources_failing_keeps_cached_items() {
        let store = memory_store().await;
        store.save(&items(&["cached"]), 100).await;
        let only = MockSource::new("only", 1);
        only.refuse_start.store(true, Ordering::SeqCst);

        let handle = spawn(config(), store, &[only]);
        let mut events = handle.subscribe();
        assert_eq!(handle.start().await.unwrap(), None);

        assert!(matches!(next_event(&mut events).await, FeedEvent::WindowReset(_)));
        assert_eq!(next_event(&mut events).await, FeedEvent::AllSourcesFailed);
        assert_eq!(urls(&handle.snapshot().await.unwrap()), urls(&items(&["cached"])));
        assert!(matches!(handle.refresh().await, Err(FeedError::AllSourcesFailed)));
    }

    #[tokio::test]
    async fn test_ingestion_prepends_only_unseen_items() {
        let source = MockSource::new("live", 1);
        let handle = spawn(config(), memory_store().await, &[Arc::clone(&source)]);
        let mut events = handle.subscribe();
        handle.start().await.unwrap();
        next_event(&mut events).await; // reset
        next_event(&mut events).await; // active

        let sink = source.sink();
        sink.new_items(items(&["a", "b", "c"])).await;
        assert!(matches!(next_event(&mut events).await, FeedEvent::ItemsPrepended(i) if i.len() == 3));

        sink.new_items(items(&["d", "b", "e", "a"])).await;
        match next_event(&mut events).await {
            FeedEvent::ItemsPrepended(inserted) => {
                assert_eq!(urls(&inserted), urls(&items(&["d", "e"])));
            }
            other => panic!("unexpected event {other:?}"),
        }
        assert_eq!(
            urls(&handle.snapshot().await.unwrap()),
            urls(&items(&["d", "e", "a", "b", "c"]))
        );
    }

    #[tokio::test]
    async fn test_unavailable_error_fails_over_to_next_source() {
        let primary = MockSource::new("primary", 1);
        let backup = MockSource::new("backup", 2);
        let handle = spawn(
            config(),
            memory_store().await,
            &[Arc::clone(&primary), Arc::clone(&backup)],
        );
        let mut events = handle.subscribe();
        handle.start().await.unwrap();
        next_event(&mut events).await;
        next_event(&mut events).await;

        // A recoverable error changes nothing
        primary.sink().error(SourceError::Timeout, true).await;
        primary.available.store(false, Ordering::SeqCst);
        primary.sink().error(SourceError::HttpStatus(503), false).await;

        assert_eq!(
            next_event(&mut events).await,
            FeedEvent::ActiveSourceChanged(Some("backup".to_string()))
        );
        assert_eq!(primary.stops.load(Ordering::SeqCst), 1);
        assert_eq!(handle.active_source_name().await.unwrap().as_deref(), Some("backup"));

        // Late items from the stopped source are not shown
        primary.sink().new_items(items(&["stale"])).await;
        backup.sink().new_items(items(&["fresh"])).await;
        match next_event(&mut events).await {
            FeedEvent::ItemsPrepended(inserted) => assert_eq!(urls(&inserted), urls(&items(&["fresh"]))),
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_failover_with_no_alternative_goes_sourceless() {
        let only = MockSource::new("only", 1);
        let handle = spawn(config(), memory_store().await, &[Arc::clone(&only)]);
        let mut events = handle.subscribe();
        handle.start().await.unwrap();
        next_event(&mut events).await;
        next_event(&mut events).await;

        only.available.store(false, Ordering::SeqCst);
        only.sink().error(SourceError::Timeout, false).await;

        assert_eq!(next_event(&mut events).await, FeedEvent::AllSourcesFailed);
        assert_eq!(next_event(&mut events).await, FeedEvent::ActiveSourceChanged(None));
        assert_eq!(handle.active_source_name().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_health_check_restarts_recovered_source() {
        let only = MockSource::new("only", 1);
        only.refuse_start.store(true, Ordering::SeqCst);
        let mut config = config();
        config.health_check_interval_ms = 20;

        let handle = spawn(config, memory_store().await, &[Arc::clone(&only)]);
        let mut events = handle.subscribe();
        assert_eq!(handle.start().await.unwrap(), None);
        next_event(&mut events).await;
        assert_eq!(next_event(&mut events).await, FeedEvent::AllSourcesFailed);

        only.refuse_start.store(false, Ordering::SeqCst);
        assert_eq!(
            next_event(&mut events).await,
            FeedEvent::ActiveSourceChanged(Some("only".to_string()))
        );
        // Failed probes in between announced nothing
        assert!(only.starts.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test]
    async fn test_health_check_fails_over_silently_unavailable_source() {
        let primary = MockSource::new("primary", 1);
        let backup = MockSource::new("backup", 2);
        let mut config = config();
        config.health_check_interval_ms = 20;

        let handle = spawn(config, memory_store().await, &[Arc::clone(&primary), backup]);
        let mut events = handle.subscribe();
        handle.start().await.unwrap();
        next_event(&mut events).await;
        next_event(&mut events).await;

        primary.available.store(false, Ordering::SeqCst);
        assert_eq!(
            next_event(&mut events).await,
            FeedEvent::ActiveSourceChanged(Some("backup".to_string()))
        );
    }

    #[tokio::test]
    async fn test_load_more_history_prefers_store() {
        let store = memory_store().await;
        store
            .save(&items(&["1", "2", "3", "4", "5", "6", "7"]), 100)
            .await;
        let source = MockSource::new("live", 1);
        source.pages.lock().unwrap().push_back(items(&["net"]));

        let handle = spawn(config(), store, &[Arc::clone(&source)]);
        let mut events = handle.subscribe();
        handle.start().await.unwrap();
        next_event(&mut events).await;
        next_event(&mut events).await;

        // Window holds 7, 6, 5; store pages supply the rest
        assert_eq!(handle.load_more_history().await.unwrap(), 3);
        match next_event(&mut events).await {
            FeedEvent::ItemsAppended { start, items: appended } => {
                assert_eq!(start, 3);
                assert_eq!(urls(&appended), urls(&items(&["4", "3", "2"])));
            }
            other => panic!("unexpected event {other:?}"),
        }
        assert_eq!(handle.load_more_history().await.unwrap(), 1);
        assert_eq!(source.pages.lock().unwrap().len(), 1);

        // Store exhausted: the source is asked
        assert_eq!(handle.load_more_history().await.unwrap(), 1);
        assert!(source.pages.lock().unwrap().is_empty());
        assert_eq!(handle.load_more_history().await.unwrap(), 0);

        let window = handle.snapshot().await.unwrap();
        assert_eq!(
            urls(&window),
            urls(&items(&["7", "6", "5", "4", "3", "2", "1", "net"]))
        );
    }

    #[tokio::test]
    async fn test_refresh_prepends_returned_items() {
        let source = MockSource::new("live", 1);
        let handle = spawn(config(), memory_store().await, &[source]);
        handle.start().await.unwrap();

        assert_eq!(handle.refresh().await.unwrap(), 1);
        assert_eq!(handle.refresh().await.unwrap(), 0);
        assert_eq!(urls(&handle.snapshot().await.unwrap()), urls(&items(&["refreshed"])));
    }

    #[tokio::test]
    async fn test_remove_and_clear() {
        let store = memory_store().await;
        store.save(&items(&["a", "b"]), 100).await;
        let handle = spawn(config(), store.clone(), &[MockSource::new("live", 1)]);
        let mut events = handle.subscribe();
        handle.start().await.unwrap();
        next_event(&mut events).await;
        next_event(&mut events).await;

        assert!(handle.remove_item(&item("b").image_url).await.unwrap());
        assert_eq!(
            next_event(&mut events).await,
            FeedEvent::ItemRemoved {
                index: 0,
                image_url: item("b").image_url,
            }
        );
        assert_eq!(store.count().await, 1);
        assert!(!handle.remove_item(&item("b").image_url).await.unwrap());

        assert_eq!(handle.clear().await.unwrap(), 1);
        assert_eq!(next_event(&mut events).await, FeedEvent::WindowReset(Vec::new()));
        assert!(handle.snapshot().await.unwrap().is_empty());
        assert_eq!(store.count().await, 0);
    }

    #[tokio::test]
    async fn test_shutdown_stops_active_source() {
        let source = MockSource::new("live", 1);
        let handle = spawn(config(), memory_store().await, &[Arc::clone(&source)]);
        handle.start().await.unwrap();

        handle.shutdown().await.unwrap();
        assert_eq!(source.stops.load(Ordering::SeqCst), 1);
        assert!(matches!(handle.snapshot().await, Err(FeedError::AggregatorClosed)));
    }
}
