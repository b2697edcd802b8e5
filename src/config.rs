//! Configuration file parser for ~/.config/galleria/config.toml.
//!
//! The config file is optional: a missing file yields `Config::default()`.
//! Unknown keys are silently ignored by serde (with `deny_unknown_fields` off),
//! though we log a warning when the file contains potential typos.
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use url::Url;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// Config file exceeds maximum allowed size.
    #[error("Config file too large: {0}")]
    TooLarge(String),

    #[error("Invalid feed source '{name}': {reason}")]
    InvalidSource { name: String, reason: String },
}

// ============================================================================
// Configuration Structs
// ============================================================================

/// Top-level application configuration.
///
/// All fields use `#[serde(default)]` so any subset of keys can be specified.
/// Missing keys fall back to `Default::default()`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Override for the feed database location.
    pub database_path: Option<PathBuf>,

    pub feed: FeedConfig,

    pub scanner: ScannerConfig,
}

/// Settings for the feed aggregator and its sources.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    /// Items loaded from the local store as the optimistic initial view.
    pub initial_load_count: usize,

    /// Upper bound of the in-memory feed window.
    pub window_capacity: usize,

    /// Rows kept in the local store; older rows are pruned on save.
    pub max_keep_count: usize,

    pub health_check_interval_ms: u64,

    /// Page size for local-store history pagination.
    pub history_page_size: usize,

    pub sources: Vec<SourceConfig>,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            initial_load_count: 50,
            window_capacity: 200,
            max_keep_count: 1000,
            health_check_interval_ms: 60_000,
            history_page_size: 50,
            sources: vec![SourceConfig::default()],
        }
    }
}

impl FeedConfig {
    pub fn health_check_interval(&self) -> Duration {
        Duration::from_millis(self.health_check_interval_ms.max(1))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// Long-lived server-sent event stream
    Stream,
    /// Paginated REST endpoint polled on an interval
    Poll,
}

/// One `[[feed.sources]]` entry.
///
/// Custom Debug impl masks `api_token` to prevent secret leakage in logs.
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    pub name: String,
    pub kind: SourceKind,

    /// Lower value = preferred.
    pub priority: u32,

    pub url: String,

    /// Sent as a bearer token when present.
    pub api_token: Option<String>,

    /// Consecutive failures after which the source reports itself unavailable.
    pub failure_threshold: u32,

    pub request_timeout_ms: u64,

    /// Stream: buffered items are flushed to the local store every N items.
    pub flush_every: usize,

    /// Stream: delay before reconnecting after the stream ends or fails.
    pub reconnect_delay_ms: u64,

    /// Stream: only records with this status are emitted.
    pub terminal_status: String,

    /// Poll: `limit` query parameter.
    pub page_size: usize,

    pub poll_interval_ms: u64,

    /// Poll: delay after a failed page before the loop resumes.
    pub retry_delay_ms: u64,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            name: "pollinations".to_string(),
            kind: SourceKind::Stream,
            priority: 1,
            url: "https://image.pollinations.ai/feed".to_string(),
            api_token: None,
            failure_threshold: 3,
            request_timeout_ms: 30_000,
            flush_every: 10,
            reconnect_delay_ms: 3_000,
            terminal_status: "end_generating".to_string(),
            page_size: 50,
            poll_interval_ms: 30_000,
            retry_delay_ms: 10_000,
        }
    }
}

impl std::fmt::Debug for SourceConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceConfig")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("priority", &self.priority)
            .field("url", &self.url)
            .field("api_token", &self.api_token.as_ref().map(|_| "[REDACTED]"))
            .field("failure_threshold", &self.failure_threshold)
            .field("request_timeout_ms", &self.request_timeout_ms)
            .field("flush_every", &self.flush_every)
            .field("reconnect_delay_ms", &self.reconnect_delay_ms)
            .field("terminal_status", &self.terminal_status)
            .field("page_size", &self.page_size)
            .field("poll_interval_ms", &self.poll_interval_ms)
            .field("retry_delay_ms", &self.retry_delay_ms)
            .finish()
    }
}

impl SourceConfig {
    /// Parse the endpoint, accepting only http(s) URLs with a host.
    pub fn endpoint(&self) -> Result<Url, ConfigError> {
        let invalid = |reason: String| ConfigError::InvalidSource {
            name: self.name.clone(),
            reason,
        };

        let url = Url::parse(&self.url).map_err(|e| invalid(e.to_string()))?;
        match url.scheme() {
            "http" | "https" => {}
            other => return Err(invalid(format!("unsupported scheme '{other}'"))),
        }
        if url.host_str().is_none() {
            return Err(invalid("missing host".to_string()));
        }
        Ok(url)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

/// Settings for the media library scanner.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScannerConfig {
    /// Assets processed concurrently per batch.
    pub batch_size: usize,

    /// Videos at or under this duration are "short".
    pub short_video_threshold_secs: f64,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            short_video_threshold_secs: 6.0,
        }
    }
}

impl Config {
    /// Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    /// Load configuration from a TOML file.
    ///
    /// - Missing file → `Ok(Config::default())`
    /// - Empty file → `Ok(Config::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Unknown keys → silently accepted (serde default behavior), logged as warning
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::metadata(path) {
            Ok(meta) if meta.len() > Self::MAX_FILE_SIZE => {
                return Err(ConfigError::TooLarge(format!(
                    "Config file is {} bytes (max {} bytes)",
                    meta.len(),
                    Self::MAX_FILE_SIZE
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
            Ok(_) => {}
        }

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // File deleted between metadata and read
                tracing::debug!(path = %path.display(), "Config file disappeared, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        if content.trim().is_empty() {
            tracing::debug!(path = %path.display(), "Config file is empty, using defaults");
            return Ok(Self::default());
        }

        if let Ok(raw) = content.parse::<toml::Table>() {
            let known_keys = ["database_path", "feed", "scanner"];
            for key in raw.keys() {
                if !known_keys.contains(&key.as_str()) {
                    tracing::warn!(key = %key, "Unknown key in config file, ignoring");
                }
            }
        }

        let config: Config = toml::from_str(&content)?;
        tracing::info!(
            path = %path.display(),
            sources = config.feed.sources.len(),
            "Loaded configuration"
        );
        Ok(config)
    }
}

// ============================================================================
// Tests
// ============================================================================
