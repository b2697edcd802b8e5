use anyhow::Result;
use sqlx::QueryBuilder;

use super::schema::Database;
use super::types::{FeedItem, FeedItemRow, PageCursor};

/// 12 bound columns * 40 rows = 480, well under SQLite's 999 parameter limit.
const INSERT_BATCH_SIZE: usize = 40;

/// Maximum number of items returned by a single page query (OOM protection)
const MAX_PAGE_SIZE: i64 = 1000;

const SELECT_COLUMNS: &str = "SELECT id, image_url, prompt, width, height, seed, model, quality, \
     status, enhance, safe, nologo, nsfw, created_at FROM feed_items";

impl Database {
    // ========================================================================
    // Feed Item Mutations
    // ========================================================================

    /// Insert feed items, ignoring any whose `image_url` is already stored,
    /// then prune the oldest rows beyond `max_keep`.
    ///
    /// The whole batch (inserts and pruning) runs in one transaction.
    /// Returns the number of genuinely new rows.
    pub async fn save_feed_items(&self, items: &[FeedItem], max_keep: usize) -> Result<usize> {
        if items.is_empty() {
            return Ok(0);
        }

        let now = chrono::Utc::now().timestamp_millis();
        let mut tx = self.pool.begin().await?;
        let mut inserted: usize = 0;

        for chunk in items.chunks(INSERT_BATCH_SIZE) {
            let mut builder: QueryBuilder<sqlx::Sqlite> = QueryBuilder::new(
                "INSERT OR IGNORE INTO feed_items (image_url, prompt, width, height, seed, model, \
                 quality, status, enhance, safe, nologo, nsfw, created_at) ",
            );

            builder.push_values(chunk, |mut b, item| {
                b.push_bind(&item.image_url)
                    .push_bind(&item.prompt)
                    .push_bind(item.width)
                    .push_bind(item.height)
                    .push_bind(item.seed)
                    .push_bind(&item.model)
                    .push_bind(&item.quality)
                    .push_bind(&item.status)
                    .push_bind(item.enhance)
                    .push_bind(item.safe)
                    .push_bind(item.nologo)
                    .push_bind(item.nsfw)
                    .push_bind(now);
            });

            let result = builder.build().execute(&mut *tx).await?;
            inserted += result.rows_affected() as usize;
        }

        let max_keep = i64::try_from(max_keep).unwrap_or(i64::MAX);
        let pruned = sqlx::query(
            r#"
            DELETE FROM feed_items
            WHERE id NOT IN (SELECT id FROM feed_items ORDER BY id DESC LIMIT ?)
        "#,
        )
        .bind(max_keep)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        tx.commit().await?;

        if pruned > 0 {
            tracing::debug!(pruned = pruned, max_keep = max_keep, "Pruned oldest feed items");
        }

        Ok(inserted)
    }

    /// Delete every stored feed item, returns the number of rows removed
    pub async fn delete_all_feed_items(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM feed_items")
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// Delete a single feed item by its image URL
    pub async fn delete_feed_item_by_url(&self, image_url: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM feed_items WHERE image_url = ?")
            .bind(image_url)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    // ========================================================================
    // Feed Item Queries
    // ========================================================================

    /// The `limit` most recently inserted items, newest first
    pub async fn fetch_latest_feed_items(&self, limit: i64) -> Result<Vec<FeedItem>> {
        let rows = sqlx::query_as::<_, FeedItemRow>(&format!(
            "{SELECT_COLUMNS} ORDER BY id DESC LIMIT ?"
        ))
        .bind(limit.clamp(0, MAX_PAGE_SIZE))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(FeedItemRow::into_item).collect())
    }

    /// Up to `limit` items strictly older than `cursor`, newest first
    pub async fn fetch_feed_items_before(
        &self,
        cursor: PageCursor,
        limit: i64,
    ) -> Result<Vec<FeedItem>> {
        let limit = limit.clamp(0, MAX_PAGE_SIZE);
        let rows = match cursor {
            PageCursor::Id(id) => {
                sqlx::query_as::<_, FeedItemRow>(&format!(
                    "{SELECT_COLUMNS} WHERE id < ? ORDER BY id DESC LIMIT ?"
                ))
                .bind(id)
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
            PageCursor::Timestamp(ts) => {
                sqlx::query_as::<_, FeedItemRow>(&format!(
                    "{SELECT_COLUMNS} WHERE created_at < ? ORDER BY created_at DESC, id DESC LIMIT ?"
                ))
                .bind(ts)
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
        };

        Ok(rows.into_iter().map(FeedItemRow::into_item).collect())
    }

    /// Look up a single item by its image URL
    pub async fn fetch_feed_item_by_url(&self, image_url: &str) -> Result<Option<FeedItem>> {
        let row = sqlx::query_as::<_, FeedItemRow>(&format!(
            "{SELECT_COLUMNS} WHERE image_url = ?"
        ))
        .bind(image_url)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(FeedItemRow::into_item))
    }

    /// Total number of stored feed items
    pub async fn count_feed_items(&self) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM feed_items")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}
