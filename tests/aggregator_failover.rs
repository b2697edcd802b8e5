//! Integration tests for aggregator failover and window behavior.
//!
//! Scripted in-process sources drive the aggregator through its public
//! handle; the HTTP test wires real streaming and polling sources to
//! wiremock servers.

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use galleria::config::{FeedConfig, SourceConfig, SourceKind};
use galleria::feed::{
    build_client, build_sources, FeedAggregator, FeedEvent, FeedSource, SourceError,
    SourceHealth, SourceSink,
};
use galleria::storage::{Database, FeedItem, LocalStore};
use pretty_assertions::assert_eq;

// ============================================================================
// Scripted Source
// ============================================================================

/// Fails `failures` times in a row on start, then goes quiet. Items pushed by
/// the test go through the sink captured at start.
struct ScriptedSource {
    name: String,
    priority: u32,
    failures: usize,
    health: SourceHealth,
    starts: AtomicUsize,
    sink: Mutex<Option<SourceSink>>,
}

impl ScriptedSource {
    fn new(name: &str, priority: u32, failures: usize) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            priority,
            failures,
            health: SourceHealth::new(3),
            starts: AtomicUsize::new(0),
            sink: Mutex::new(None),
        })
    }

    async fn push(&self, items: Vec<FeedItem>) {
        let sink = self.sink.lock().await.clone().expect("source not started");
        assert!(sink.new_items(items).await);
    }
}

#[async_trait]
impl FeedSource for ScriptedSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn priority(&self) -> u32 {
        self.priority
    }

    fn is_available(&self) -> bool {
        self.health.is_available()
    }

    async fn start_fetching(&self, sink: SourceSink) -> Result<(), SourceError> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        *self.sink.lock().await = Some(sink.clone());

        for _ in 0..self.failures {
            self.health.record_failure();
            let available = self.health.is_available();
            sink.error(SourceError::HttpStatus(503), available).await;
        }
        Ok(())
    }

    async fn stop_fetching(&self) {}

    async fn load_more(&self) -> Result<Vec<FeedItem>, SourceError> {
        Err(SourceError::NoData)
    }

    async fn refresh(&self) -> Result<Vec<FeedItem>, SourceError> {
        Ok(Vec::new())
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn feed_config() -> FeedConfig {
    FeedConfig {
        initial_load_count: 50,
        window_capacity: 200,
        max_keep_count: 1000,
        health_check_interval_ms: 3_600_000,
        history_page_size: 50,
        sources: Vec::new(),
    }
}

async fn memory_store() -> LocalStore {
    LocalStore::from(Database::open(":memory:").await.unwrap())
}

fn item(name: &str) -> FeedItem {
    FeedItem::new(format!("https://image.example.com/{}.png", name))
}

fn urls(items: &[FeedItem]) -> Vec<String> {
    items.iter().map(|i| i.image_url.clone()).collect()
}

async fn wait_for_source(events: &mut broadcast::Receiver<FeedEvent>, name: &str) {
    let wanted = FeedEvent::ActiveSourceChanged(Some(name.to_string()));
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match events.recv().await {
                Ok(event) if event == wanted => return,
                Ok(_) => continue,
                Err(e) => panic!("event stream ended: {e}"),
            }
        }
    })
    .await
    .unwrap_or_else(|_| panic!("source {name} never became active"));
}

async fn next_prepended(events: &mut broadcast::Receiver<FeedEvent>) -> Vec<FeedItem> {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let FeedEvent::ItemsPrepended(items) = events.recv().await.unwrap() {
                return items;
            }
        }
    })
    .await
    .expect("no items were prepended")
}

// ============================================================================
// Failover
// ============================================================================

#[tokio::test]
async fn test_three_failures_fail_over_to_next_priority() {
    let primary = ScriptedSource::new("primary", 1, 3);
    let backup = ScriptedSource::new("backup", 2, 0);
    let sources: Vec<Arc<dyn FeedSource>> = vec![primary.clone(), backup.clone()];

    let handle = FeedAggregator::new(feed_config(), memory_store().await, sources).spawn();
    let mut events = handle.subscribe();

    assert_eq!(handle.start().await.unwrap().as_deref(), Some("primary"));
    wait_for_source(&mut events, "primary").await;
    wait_for_source(&mut events, "backup").await;

    assert_eq!(handle.active_source_name().await.unwrap().as_deref(), Some("backup"));
    assert!(!primary.is_available());
    assert_eq!(backup.starts.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_two_failures_do_not_fail_over() {
    let primary = ScriptedSource::new("primary", 1, 2);
    let backup = ScriptedSource::new("backup", 2, 0);
    let sources: Vec<Arc<dyn FeedSource>> = vec![primary.clone(), backup.clone()];

    let handle = FeedAggregator::new(feed_config(), memory_store().await, sources).spawn();
    let mut events = handle.subscribe();
    handle.start().await.unwrap();

    // Both errors are queued before this push, so once the items arrive the
    // errors have been handled
    primary.push(vec![item("still-primary")]).await;
    assert_eq!(urls(&next_prepended(&mut events).await), urls(&[item("still-primary")]));

    assert_eq!(handle.active_source_name().await.unwrap().as_deref(), Some("primary"));
    assert_eq!(backup.starts.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_dedup_window_growth() {
    let source = ScriptedSource::new("live", 1, 0);
    let handle = FeedAggregator::new(
        feed_config(),
        memory_store().await,
        vec![source.clone() as Arc<dyn FeedSource>],
    )
    .spawn();
    let mut events = handle.subscribe();
    handle.start().await.unwrap();

    let first: Vec<FeedItem> = ["a", "b", "c", "d"].iter().map(|n| item(n)).collect();
    source.push(first).await;
    next_prepended(&mut events).await;

    // K = 2 duplicates among 5
    let second: Vec<FeedItem> = ["e", "b", "f", "d", "g"].iter().map(|n| item(n)).collect();
    source.push(second).await;
    let inserted = next_prepended(&mut events).await;
    assert_eq!(urls(&inserted), urls(&[item("e"), item("f"), item("g")]));

    let window = handle.snapshot().await.unwrap();
    assert_eq!(window.len(), 4 + 5 - 2);
    assert_eq!(
        urls(&window[..3]),
        urls(&[item("e"), item("f"), item("g")])
    );
}

#[tokio::test]
async fn test_window_never_exceeds_capacity() {
    let source = ScriptedSource::new("live", 1, 0);
    let mut config = feed_config();
    config.window_capacity = 10;
    let handle = FeedAggregator::new(
        config,
        memory_store().await,
        vec![source.clone() as Arc<dyn FeedSource>],
    )
    .spawn();
    let mut events = handle.subscribe();
    handle.start().await.unwrap();

    for round in 0..4 {
        let batch: Vec<FeedItem> = (0..4).map(|i| item(&format!("r{round}-{i}"))).collect();
        source.push(batch).await;
        next_prepended(&mut events).await;
        assert!(handle.snapshot().await.unwrap().len() <= 10);
    }

    // Newest at the front, oldest trimmed from the tail
    let window = handle.snapshot().await.unwrap();
    assert_eq!(window.len(), 10);
    assert_eq!(window[0].image_url, item("r3-0").image_url);
    assert_eq!(window[9].image_url, item("r1-1").image_url);
}

// ============================================================================
// Real sources over HTTP
// ============================================================================

#[tokio::test]
async fn test_failing_stream_fails_over_to_polling_source() {
    let stream_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/feed"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&stream_server)
        .await;

    let poll_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/images"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "items": [
                {"imageURL": "https://image.example.com/polled-1.png", "prompt": "a lighthouse"},
                {"imageURL": "https://image.example.com/polled-2.png", "prompt": "a harbor"}
            ],
            "pagination": {"next_cursor": null}
        })))
        .mount(&poll_server)
        .await;

    let mut config = feed_config();
    config.sources = vec![
        SourceConfig {
            name: "stream".to_string(),
            kind: SourceKind::Stream,
            priority: 1,
            url: format!("{}/feed", stream_server.uri()),
            reconnect_delay_ms: 10,
            ..SourceConfig::default()
        },
        SourceConfig {
            name: "poll".to_string(),
            kind: SourceKind::Poll,
            priority: 2,
            url: format!("{}/images", poll_server.uri()),
            poll_interval_ms: 60_000,
            ..SourceConfig::default()
        },
    ];

    let store = memory_store().await;
    let client = build_client().unwrap();
    let sources = build_sources(&config, &client, &store);
    let handle = FeedAggregator::new(config, store.clone(), sources).spawn();
    let mut events = handle.subscribe();

    assert_eq!(handle.start().await.unwrap().as_deref(), Some("stream"));
    wait_for_source(&mut events, "poll").await;

    let inserted = next_prepended(&mut events).await;
    assert_eq!(inserted.len(), 2);
    assert_eq!(store.count().await, 2);

    handle.shutdown().await.unwrap();
}
