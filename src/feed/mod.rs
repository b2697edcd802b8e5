//! Live image feed: sources, aggregation and the in-memory window.
//!
//! - **Sources**: [`StreamingSource`] (server-sent events) and
//!   [`PollingSource`] (cursor-paginated REST), both behind [`FeedSource`]
//! - **Aggregation**: [`FeedAggregator`] owns the window on a single task,
//!   fails over between sources by priority and broadcasts [`FeedEvent`]s
//! - **Window**: [`FeedWindow`], bounded and deduplicated by image URL
//!
//! # Example
//!
//! ```ignore
//! let client = feed::build_client()?;
//! let sources = feed::build_sources(&config.feed, &client, &store);
//! let handle = FeedAggregator::new(config.feed.clone(), store, sources).spawn();
//! let mut events = handle.subscribe();
//! handle.start().await?;
//! ```

mod aggregator;
mod polling;
mod record;
mod source;
mod sse;
mod streaming;
mod window;

pub use aggregator::{AggregatorHandle, FeedAggregator, FeedError, FeedEvent};
pub use polling::PollingSource;
pub use record::ImageRecord;
pub use source::{FeedSource, SourceError, SourceEvent, SourceHealth, SourceSink};
pub use streaming::StreamingSource;
pub use window::FeedWindow;

use std::sync::Arc;
use std::time::Duration;

use crate::config::{FeedConfig, SourceKind};
use crate::storage::LocalStore;

/// Shared HTTP client for all sources.
///
/// No client-wide request timeout: the event stream stays open indefinitely,
/// so each source applies its own per-request limits.
pub fn build_client() -> Result<reqwest::Client, reqwest::Error> {
    reqwest::Client::builder()
        .pool_max_idle_per_host(4)
        .pool_idle_timeout(Duration::from_secs(30))
        .tcp_keepalive(Duration::from_secs(60))
        .connect_timeout(Duration::from_secs(15))
        .build()
}

/// Instantiate every configured source in configuration order.
pub fn build_sources(
    config: &FeedConfig,
    client: &reqwest::Client,
    store: &LocalStore,
) -> Vec<Arc<dyn FeedSource>> {
    config
        .sources
        .iter()
        .map(|source| -> Arc<dyn FeedSource> {
            match source.kind {
                SourceKind::Stream => Arc::new(StreamingSource::new(
                    source.clone(),
                    client.clone(),
                    store.clone(),
                    config.max_keep_count,
                )),
                SourceKind::Poll => Arc::new(PollingSource::new(
                    source.clone(),
                    client.clone(),
                    store.clone(),
                    config.max_keep_count,
                )),
            }
        })
        .collect()
}
