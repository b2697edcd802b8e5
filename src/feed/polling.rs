//! Pull source polling a paginated REST endpoint with an opaque cursor.

use async_trait::async_trait;
use futures::StreamExt;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use url::Url;

use super::record::ImageRecord;
use super::source::{FeedSource, SourceError, SourceHealth, SourceSink};
use crate::config::SourceConfig;
use crate::storage::{FeedItem, LocalStore};

const MAX_PAGE_SIZE_BYTES: usize = 10 * 1024 * 1024; // 10MB

pub struct PollingSource {
    config: SourceConfig,
    shared: Arc<PollShared>,
    running: Mutex<Option<Running>>,
}

struct Running {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

struct PollShared {
    name: Arc<str>,
    client: reqwest::Client,
    api_token: Option<SecretString>,
    store: LocalStore,
    max_keep: usize,
    page_size: usize,
    request_timeout: Duration,
    poll_interval: Duration,
    retry_delay: Duration,
    health: SourceHealth,
    /// Held across a page request so the poll loop and `load_more` never
    /// race on the cursor.
    state: Mutex<PageState>,
}

#[derive(Debug, Default)]
struct PageState {
    cursor: Option<String>,
    /// The last page carried no next cursor.
    exhausted: bool,
}

/// Response envelope of the paginated endpoint.
#[derive(Debug, Deserialize)]
struct PageResponse {
    #[serde(alias = "data", alias = "images")]
    items: Vec<serde_json::Value>,
    #[serde(default)]
    pagination: Option<Pagination>,
}

#[derive(Debug, Default, Deserialize)]
struct Pagination {
    #[serde(default, alias = "nextCursor", alias = "next")]
    next_cursor: Option<String>,
}

struct Page {
    items: Vec<FeedItem>,
    next_cursor: Option<String>,
}

impl PollingSource {
    pub fn new(
        config: SourceConfig,
        client: reqwest::Client,
        store: LocalStore,
        max_keep: usize,
    ) -> Self {
        let shared = PollShared {
            name: Arc::from(config.name.as_str()),
            client,
            api_token: config.api_token.clone().map(SecretString::from),
            store,
            max_keep,
            page_size: config.page_size.max(1),
            request_timeout: config.request_timeout(),
            poll_interval: config.poll_interval(),
            retry_delay: config.retry_delay(),
            health: SourceHealth::new(config.failure_threshold),
            state: Mutex::new(PageState::default()),
        };

        Self {
            config,
            shared: Arc::new(shared),
            running: Mutex::new(None),
        }
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.shared.health.consecutive_failures()
    }

    fn endpoint(&self) -> Result<Url, SourceError> {
        self.config
            .endpoint()
            .map_err(|e| SourceError::Unavailable(e.to_string()))
    }
}

#[async_trait]
impl FeedSource for PollingSource {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn priority(&self) -> u32 {
        self.config.priority
    }

    fn is_available(&self) -> bool {
        self.shared.health.is_available()
    }

    async fn start_fetching(&self, sink: SourceSink) -> Result<(), SourceError> {
        let endpoint = self.endpoint()?;

        let mut running = self.running.lock().await;
        if running.is_some() {
            tracing::debug!(source = %self.config.name, "Poll loop already running");
            return Ok(());
        }

        let cancel = CancellationToken::new();
        let task = tokio::spawn(run_poll_loop(
            Arc::clone(&self.shared),
            endpoint,
            sink,
            cancel.clone(),
        ));
        tracing::info!(source = %self.config.name, "Polling source started");

        *running = Some(Running { cancel, task });
        Ok(())
    }

    async fn stop_fetching(&self) {
        let Some(running) = self.running.lock().await.take() else {
            return;
        };

        running.cancel.cancel();
        if let Err(e) = running.task.await {
            tracing::warn!(source = %self.config.name, error = %e, "Poll task ended abnormally");
        }
        tracing::info!(source = %self.config.name, "Polling source stopped");
    }

    async fn load_more(&self) -> Result<Vec<FeedItem>, SourceError> {
        let endpoint = self.endpoint()?;
        let mut state = self.shared.state.lock().await;
        if state.exhausted {
            return Err(SourceError::NoData);
        }
        self.shared.poll_page(&endpoint, &mut state).await
    }

    async fn refresh(&self) -> Result<Vec<FeedItem>, SourceError> {
        let endpoint = self.endpoint()?;
        let mut state = self.shared.state.lock().await;
        *state = PageState::default();
        self.shared.poll_page(&endpoint, &mut state).await
    }
}

async fn run_poll_loop(
    shared: Arc<PollShared>,
    endpoint: Url,
    sink: SourceSink,
    cancel: CancellationToken,
) {
    loop {
        let result = tokio::select! {
            _ = cancel.cancelled() => break,
            result = async {
                let mut state = shared.state.lock().await;
                if state.exhausted {
                    // End of data: wrap around to the newest page
                    *state = PageState::default();
                }
                shared.poll_page(&endpoint, &mut state).await
            } => result,
        };

        let delay = match result {
            Ok(items) => {
                if !items.is_empty() {
                    let delivered = tokio::select! {
                        _ = cancel.cancelled() => break,
                        delivered = sink.new_items(items) => delivered,
                    };
                    if !delivered {
                        break;
                    }
                }
                shared.poll_interval
            }
            Err(error) => {
                let available = shared.health.is_available();
                tracing::warn!(
                    source = %shared.name,
                    error = %error,
                    failures = shared.health.consecutive_failures(),
                    available = available,
                    "Poll failed"
                );
                let delivered = tokio::select! {
                    _ = cancel.cancelled() => break,
                    delivered = sink.error(error, available) => delivered,
                };
                if !delivered || !available {
                    break;
                }
                shared.retry_delay
            }
        };

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

impl PollShared {
    /// Fetch the page at the current cursor, persist it, advance the cursor,
    /// and update health.
    async fn poll_page(
        &self,
        endpoint: &Url,
        state: &mut PageState,
    ) -> Result<Vec<FeedItem>, SourceError> {
        match self.fetch_page(endpoint, state.cursor.as_deref()).await {
            Ok(page) => {
                self.health.record_success();
                let saved = self.store.save(&page.items, self.max_keep).await;
                tracing::debug!(
                    source = %self.name,
                    received = page.items.len(),
                    saved = saved,
                    has_more = page.next_cursor.is_some(),
                    "Fetched page"
                );
                state.exhausted = page.next_cursor.is_none();
                state.cursor = page.next_cursor;
                Ok(page.items)
            }
            Err(e) => {
                self.health.record_failure();
                Err(e)
            }
        }
    }

    async fn fetch_page(&self, endpoint: &Url, cursor: Option<&str>) -> Result<Page, SourceError> {
        let mut url = endpoint.clone();
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("limit", &self.page_size.to_string());
            if let Some(cursor) = cursor {
                query.append_pair("cursor", cursor);
            }
        }

        let mut request = self.client.get(url);
        if let Some(token) = &self.api_token {
            request = request.bearer_auth(token.expose_secret());
        }

        let response = tokio::time::timeout(self.request_timeout, request.send())
            .await
            .map_err(|_| SourceError::Timeout)?
            .map_err(SourceError::Network)?;

        if !response.status().is_success() {
            return Err(SourceError::HttpStatus(response.status().as_u16()));
        }

        let bytes = tokio::time::timeout(
            self.request_timeout,
            read_limited_bytes(response, MAX_PAGE_SIZE_BYTES),
        )
        .await
        .map_err(|_| SourceError::Timeout)??;

        let envelope: PageResponse =
            serde_json::from_slice(&bytes).map_err(|e| SourceError::Parse(e.to_string()))?;

        let received_at = chrono::Utc::now().timestamp_millis();
        let total = envelope.items.len();
        let items: Vec<FeedItem> = envelope
            .items
            .into_iter()
            .filter_map(|value| match serde_json::from_value::<ImageRecord>(value) {
                Ok(record) => record.into_item(received_at),
                Err(e) => {
                    tracing::debug!(source = %self.name, error = %e, "Skipping unparseable page item");
                    None
                }
            })
            .collect();

        if items.len() < total {
            tracing::debug!(
                source = %self.name,
                skipped = total - items.len(),
                "Page items without usable image URL skipped"
            );
        }

        Ok(Page {
            items,
            next_cursor: envelope
                .pagination
                .and_then(|p| p.next_cursor)
                .filter(|c| !c.is_empty()),
        })
    }
}

async fn read_limited_bytes(
    response: reqwest::Response,
    limit: usize,
) -> Result<Vec<u8>, SourceError> {
    if let Some(len) = response.content_length() {
        if len as usize > limit {
            return Err(SourceError::ResponseTooLarge);
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(SourceError::Network)?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(SourceError::ResponseTooLarge);
        }
        bytes.extend_from_slice(&chunk);
    }

    Ok(bytes)
}
