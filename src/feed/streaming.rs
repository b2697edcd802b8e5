//! Push source consuming a long-lived `text/event-stream` connection.

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::ACCEPT;
use secrecy::{ExposeSecret, SecretString};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::record::ImageRecord;
use super::source::{FeedSource, SourceError, SourceHealth, SourceSink};
use super::sse::{data_payload, LineDecoder};
use crate::config::SourceConfig;
use crate::storage::{FeedItem, LocalStore};

/// No bytes for this long (not even keepalives) counts as a dead connection.
const STREAM_IDLE_TIMEOUT: Duration = Duration::from_secs(300);

pub struct StreamingSource {
    config: SourceConfig,
    shared: Arc<StreamShared>,
    running: Mutex<Option<Running>>,
}

struct Running {
    cancel: CancellationToken,
    task: JoinHandle<()>,
    sink: SourceSink,
}

/// State reachable from the background stream task.
struct StreamShared {
    name: Arc<str>,
    client: reqwest::Client,
    api_token: Option<SecretString>,
    store: LocalStore,
    max_keep: usize,
    flush_every: usize,
    terminal_status: String,
    connect_timeout: Duration,
    reconnect_delay: Duration,
    health: SourceHealth,
    /// Emitted items not yet persisted
    buffer: Mutex<Vec<FeedItem>>,
}

impl StreamingSource {
    pub fn new(
        config: SourceConfig,
        client: reqwest::Client,
        store: LocalStore,
        max_keep: usize,
    ) -> Self {
        let shared = StreamShared {
            name: Arc::from(config.name.as_str()),
            client,
            api_token: config.api_token.clone().map(SecretString::from),
            store,
            max_keep,
            flush_every: config.flush_every.max(1),
            terminal_status: config.terminal_status.clone(),
            connect_timeout: config.request_timeout(),
            reconnect_delay: config.reconnect_delay(),
            health: SourceHealth::new(config.failure_threshold),
            buffer: Mutex::new(Vec::new()),
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
}

#[async_trait]
impl FeedSource for StreamingSource {
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
        let endpoint = self
            .config
            .endpoint()
            .map_err(|e| SourceError::Unavailable(e.to_string()))?;

        let mut running = self.running.lock().await;
        if running.is_some() {
            tracing::debug!(source = %self.config.name, "Stream already running");
            return Ok(());
        }

        let cancel = CancellationToken::new();
        let task = tokio::spawn(run_stream(
            Arc::clone(&self.shared),
            endpoint,
            sink.clone(),
            cancel.clone(),
        ));
        tracing::info!(source = %self.config.name, "Streaming source started");

        *running = Some(Running { cancel, task, sink });
        Ok(())
    }

    async fn stop_fetching(&self) {
        let Some(running) = self.running.lock().await.take() else {
            return;
        };

        running.cancel.cancel();
        if let Err(e) = running.task.await {
            tracing::warn!(source = %self.config.name, error = %e, "Stream task ended abnormally");
        }

        let flushed = self.shared.flush().await;
        tracing::info!(
            source = %self.config.name,
            flushed = flushed,
            "Streaming source stopped"
        );
    }

    /// Pure push source: there is no history to page through.
    async fn load_more(&self) -> Result<Vec<FeedItem>, SourceError> {
        Ok(Vec::new())
    }

    /// Restart the stream; new items arrive through the sink.
    async fn refresh(&self) -> Result<Vec<FeedItem>, SourceError> {
        let sink = self
            .running
            .lock()
            .await
            .as_ref()
            .map(|running| running.sink.clone());
        let Some(sink) = sink else {
            return Err(SourceError::Unavailable("stream not started".to_string()));
        };

        self.stop_fetching().await;
        self.start_fetching(sink).await?;
        Ok(Vec::new())
    }
}

/// Connect, consume, and reconnect until cancelled or unavailable.
async fn run_stream(
    shared: Arc<StreamShared>,
    endpoint: url::Url,
    sink: SourceSink,
    cancel: CancellationToken,
) {
    loop {
        let outcome = tokio::select! {
            _ = cancel.cancelled() => break,
            outcome = shared.stream_once(&endpoint, &sink) => outcome,
        };

        match outcome {
            Ok(emitted) => {
                tracing::debug!(
                    source = %shared.name,
                    emitted = emitted,
                    "Event stream ended, reconnecting"
                );
            }
            Err(error) => {
                let failures = shared.health.record_failure();
                let available = shared.health.is_available();
                tracing::warn!(
                    source = %shared.name,
                    error = %error,
                    failures = failures,
                    available = available,
                    "Event stream failed"
                );
                let delivered = tokio::select! {
                    _ = cancel.cancelled() => break,
                    delivered = sink.error(error, available) => delivered,
                };
                if !delivered {
                    break;
                }
            }
        }

        if !shared.health.is_available() {
            tracing::info!(source = %shared.name, "Source unavailable, not reconnecting");
            break;
        }

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(shared.reconnect_delay) => {}
        }
    }
}

impl StreamShared {
    /// One connection lifetime. Returns the number of items emitted when the
    /// server closes the stream cleanly.
    async fn stream_once(&self, endpoint: &url::Url, sink: &SourceSink) -> Result<usize, SourceError> {
        let mut request = self
            .client
            .get(endpoint.clone())
            .header(ACCEPT, "text/event-stream");
        if let Some(token) = &self.api_token {
            request = request.bearer_auth(token.expose_secret());
        }

        let response = tokio::time::timeout(self.connect_timeout, request.send())
            .await
            .map_err(|_| SourceError::Timeout)?
            .map_err(SourceError::Network)?;

        if !response.status().is_success() {
            return Err(SourceError::HttpStatus(response.status().as_u16()));
        }

        self.health.record_success();
        tracing::debug!(source = %self.name, "Event stream connected");

        let mut decoder = LineDecoder::new();
        let mut stream = response.bytes_stream();
        let mut emitted = 0;

        loop {
            let chunk = match tokio::time::timeout(STREAM_IDLE_TIMEOUT, stream.next()).await {
                Err(_) => return Err(SourceError::Timeout),
                Ok(None) => break,
                Ok(Some(chunk)) => chunk.map_err(SourceError::Network)?,
            };

            for line in decoder.push(&chunk) {
                if let Some(item) = self.decode_line(&line) {
                    emitted += 1;
                    if !self.emit(item, sink).await {
                        return Ok(emitted);
                    }
                }
            }
        }

        if let Some(item) = decoder.finish().and_then(|line| self.decode_line(&line)) {
            emitted += 1;
            self.emit(item, sink).await;
        }

        Ok(emitted)
    }

    /// Decode one line into a final item. Bad records are skipped, never fatal.
    fn decode_line(&self, line: &str) -> Option<FeedItem> {
        let payload = data_payload(line)?;

        let record = match ImageRecord::parse(payload) {
            Ok(record) => record,
            Err(e) => {
                tracing::debug!(source = %self.name, error = %e, "Skipping unparseable stream record");
                return None;
            }
        };

        if record.status.as_deref() != Some(self.terminal_status.as_str()) {
            return None;
        }

        record.into_item(chrono::Utc::now().timestamp_millis())
    }

    /// Buffer for persistence and push to the sink. Returns false if the sink closed.
    async fn emit(&self, item: FeedItem, sink: &SourceSink) -> bool {
        let ready = {
            let mut buffer = self.buffer.lock().await;
            buffer.push(item.clone());
            if buffer.len() >= self.flush_every {
                std::mem::take(&mut *buffer)
            } else {
                Vec::new()
            }
        };

        if !ready.is_empty() {
            let saved = self.store.save(&ready, self.max_keep).await;
            tracing::debug!(source = %self.name, buffered = ready.len(), saved = saved, "Flushed stream buffer");
        }

        sink.new_items(vec![item]).await
    }

    /// Persist whatever is buffered. Returns the number of items flushed.
    async fn flush(&self) -> usize {
        let pending = std::mem::take(&mut *self.buffer.lock().await);
        if pending.is_empty() {
            return 0;
        }
        self.store.save(&pending, self.max_keep).await;
        pending.len()
    }
}
