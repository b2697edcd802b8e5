//! The feed source capability set shared by every producer.

use async_trait::async_trait;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::storage::FeedItem;

/// Errors a single feed source can report.
#[derive(Debug, Error)]
pub enum SourceError {
    /// Network-level error (DNS, connection, TLS, broken stream)
    #[error("Request failed: {0}")]
    Network(#[from] reqwest::Error),
    /// HTTP response with non-2xx status code
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    #[error("Request timed out")]
    Timeout,
    /// Payload could not be decoded
    #[error("Parse error: {0}")]
    Parse(String),
    /// No usable endpoint or configuration
    #[error("Source unavailable: {0}")]
    Unavailable(String),
    /// Pagination reached the end of the data set
    #[error("No more data available")]
    NoData,
    #[error("Response too large")]
    ResponseTooLarge,
}

/// Messages a running source pushes to its owner.
#[derive(Debug)]
pub enum SourceEvent {
    NewItems {
        source: Arc<str>,
        items: Vec<FeedItem>,
    },
    Error {
        source: Arc<str>,
        error: SourceError,
        /// Whether the source still considers itself usable after this failure
        available: bool,
    },
}

/// Channel handed to a source on start; replaces per-source callbacks.
#[derive(Clone)]
pub struct SourceSink {
    source: Arc<str>,
    tx: mpsc::Sender<SourceEvent>,
}

impl SourceSink {
    pub fn new(source: impl Into<Arc<str>>, tx: mpsc::Sender<SourceEvent>) -> Self {
        Self {
            source: source.into(),
            tx,
        }
    }

    /// Returns false once the receiving side is gone.
    pub async fn new_items(&self, items: Vec<FeedItem>) -> bool {
        self.tx
            .send(SourceEvent::NewItems {
                source: Arc::clone(&self.source),
                items,
            })
            .await
            .is_ok()
    }

    /// Returns false once the receiving side is gone.
    pub async fn error(&self, error: SourceError, available: bool) -> bool {
        self.tx
            .send(SourceEvent::Error {
                source: Arc::clone(&self.source),
                error,
                available,
            })
            .await
            .is_ok()
    }
}

/// Consecutive-failure tracking.
///
/// A source becomes unavailable once failures reach the threshold and
/// becomes available again on the next success.
#[derive(Debug)]
pub struct SourceHealth {
    failures: AtomicU32,
    threshold: u32,
}

impl SourceHealth {
    pub fn new(threshold: u32) -> Self {
        Self {
            failures: AtomicU32::new(0),
            threshold: threshold.max(1),
        }
    }

    pub fn record_success(&self) {
        let previous = self.failures.swap(0, Ordering::AcqRel);
        if previous >= self.threshold {
            tracing::info!(failures = previous, "Source recovered");
        }
    }

    /// Returns the new consecutive failure count.
    pub fn record_failure(&self) -> u32 {
        self.failures.fetch_add(1, Ordering::AcqRel).saturating_add(1)
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.failures.load(Ordering::Acquire)
    }

    pub fn is_available(&self) -> bool {
        self.consecutive_failures() < self.threshold
    }
}

/// A prioritized producer of feed items.
///
/// Sources push live items through the [`SourceSink`] given to
/// `start_fetching`; `load_more` and `refresh` return items directly.
#[async_trait]
pub trait FeedSource: Send + Sync {
    fn name(&self) -> &str;

    /// Lower value = preferred.
    fn priority(&self) -> u32;

    fn is_available(&self) -> bool;

    /// Begin producing items. Errors only when the source cannot run at all;
    /// runtime failures are reported through the sink.
    async fn start_fetching(&self, sink: SourceSink) -> Result<(), SourceError>;

    /// Stop producing and flush anything buffered but not yet persisted.
    async fn stop_fetching(&self);

    /// One page of older items, if the source supports history.
    async fn load_more(&self) -> Result<Vec<FeedItem>, SourceError>;

    /// Restart from the newest data.
    async fn refresh(&self) -> Result<Vec<FeedItem>, SourceError>;
}
