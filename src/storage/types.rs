use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Database-specific errors with user-friendly messages
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Another process has locked the database
    #[error("The feed database is locked by another process")]
    InstanceLocked,

    /// Migration failed
    #[error("Database migration failed: {0}")]
    Migration(String),

    /// Generic database error
    #[error("Database error: {0}")]
    Other(#[from] sqlx::Error),
}

impl DatabaseError {
    /// Check if a sqlx error indicates database locking
    pub(crate) fn from_sqlx(err: sqlx::Error) -> Self {
        let error_string = err.to_string().to_lowercase();

        // SQLITE_BUSY (5), SQLITE_LOCKED (6), SQLITE_CANTOPEN (14)
        if error_string.contains("database is locked")
            || error_string.contains("database table is locked")
            || error_string.contains("sqlite_busy")
            || error_string.contains("sqlite_locked")
            || error_string.contains("unable to open database file")
        {
            return DatabaseError::InstanceLocked;
        }

        DatabaseError::Other(err)
    }
}

// ============================================================================
// Pagination
// ============================================================================

/// Cursor for backward ("load more history") pagination.
///
/// `Id` is preferred; `Timestamp` covers items that have not been persisted
/// yet and therefore carry no storage id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageCursor {
    Id(i64),
    Timestamp(i64),
}

// ============================================================================
// Data Structures
// ============================================================================

/// A discovered media unit from one of the feed sources.
///
/// `image_url` is the identity: two items with the same URL are the same
/// logical item. `db_id` and `db_timestamp` are assigned by storage; sources
/// stamp `db_timestamp` with the ingestion time so unpersisted items still
/// have a pagination cursor.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeedItem {
    pub image_url: String,
    pub prompt: Option<String>,
    pub width: Option<i64>,
    pub height: Option<i64>,
    pub seed: Option<i64>,
    pub model: Option<String>,
    pub quality: Option<String>,
    pub status: Option<String>,
    pub nsfw: Option<bool>,
    pub safe: Option<bool>,
    pub enhance: Option<bool>,
    pub nologo: Option<bool>,
    /// Monotonic storage id
    pub db_id: Option<i64>,
    /// Insertion time in unix milliseconds
    pub db_timestamp: Option<i64>,
}

impl FeedItem {
    pub fn new(image_url: impl Into<String>) -> Self {
        Self {
            image_url: image_url.into(),
            ..Self::default()
        }
    }

    /// Cursor pointing just past this item, preferring the storage id.
    pub fn cursor(&self) -> Option<PageCursor> {
        self.db_id
            .map(PageCursor::Id)
            .or(self.db_timestamp.map(PageCursor::Timestamp))
    }

    /// Width over height, when both dimensions are known and non-zero.
    pub fn aspect_ratio(&self) -> Option<f64> {
        match (self.width, self.height) {
            (Some(w), Some(h)) if w > 0 && h > 0 => Some(w as f64 / h as f64),
            _ => None,
        }
    }
}

/// Internal row type for feed item queries (used by sqlx FromRow)
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct FeedItemRow {
    pub id: i64,
    pub image_url: String,
    pub prompt: Option<String>,
    pub width: Option<i64>,
    pub height: Option<i64>,
    pub seed: Option<i64>,
    pub model: Option<String>,
    pub quality: Option<String>,
    pub status: Option<String>,
    pub enhance: Option<bool>,
    pub safe: Option<bool>,
    pub nologo: Option<bool>,
    pub nsfw: Option<bool>,
    pub created_at: i64,
}

impl FeedItemRow {
    pub(crate) fn into_item(self) -> FeedItem {
        FeedItem {
            image_url: self.image_url,
            prompt: self.prompt,
            width: self.width,
            height: self.height,
            seed: self.seed,
            model: self.model,
            quality: self.quality,
            status: self.status,
            nsfw: self.nsfw,
            safe: self.safe,
            enhance: self.enhance,
            nologo: self.nologo,
            db_id: Some(self.id),
            db_timestamp: Some(self.created_at),
        }
    }
}
