use super::schema::GraphTx;
use super::types::{ItemUpsert, NewItem, StoreError};

impl GraphTx {
    // ========================================================================
    // Item Operations
    // ========================================================================

    /// Insert or update an item keyed by its content hash.
    ///
    /// Two-phase like every upsert here: `INSERT OR IGNORE` decides `is_new`
    /// from the affected row count, then an existing row has its content
    /// fields refreshed. `crawled_at` keeps the first crawl time so a
    /// redelivered record leaves the row unchanged.
    pub async fn upsert_item(&mut self, item: &NewItem<'_>) -> Result<ItemUpsert, StoreError> {
        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO item
                (content_hash, url_id, source_feed_url_id, title, author, published, updated, crawled_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
        )
        .bind(item.content_hash)
        .bind(item.url_id)
        .bind(item.source_feed_url_id)
        .bind(item.title)
        .bind(item.author)
        .bind(item.published)
        .bind(item.updated)
        .bind(item.crawled_at)
        .execute(&mut *self.tx)
        .await
        .map_err(StoreError::on_write("item", item.content_hash))?;

        if result.rows_affected() == 1 {
            return Ok(ItemUpsert {
                id: result.last_insert_rowid(),
                is_new: true,
            });
        }

        let (id,): (i64,) = sqlx::query_as(
            r#"
            UPDATE item SET
                url_id = ?,
                source_feed_url_id = ?,
                title = COALESCE(?, title),
                author = COALESCE(?, author),
                published = COALESCE(?, published),
                updated = COALESCE(?, updated)
            WHERE content_hash = ?
            RETURNING id
        "#,
        )
        .bind(item.url_id)
        .bind(item.source_feed_url_id)
        .bind(item.title)
        .bind(item.author)
        .bind(item.published)
        .bind(item.updated)
        .bind(item.content_hash)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(StoreError::on_write("item", item.content_hash))?;

        Ok(ItemUpsert { id, is_new: false })
    }
}

#[cfg(test)]
mod tests {
    use crate::storage::{Database, NewItem};

    #[tokio::test]
    async fn test_upsert_item_reports_new_then_existing() {
        let db = Database::open(":memory:").await.unwrap();
        let mut tx = db.begin().await.unwrap();
        let url_id = tx.upsert_url("https://blog.example/post").await.unwrap();
        let feed_id = tx.upsert_url("https://blog.example/feed").await.unwrap();

        let mut item = NewItem {
            content_hash: "abc",
            url_id,
            source_feed_url_id: feed_id,
            title: Some("First"),
            author: None,
            published: Some(1_700_000_000),
            updated: None,
            crawled_at: 1_700_000_100,
        };
        let first = tx.upsert_item(&item).await.unwrap();
        assert!(first.is_new);

        item.title = Some("Edited");
        item.author = Some("ann");
        item.crawled_at = 1_800_000_000;
        let second = tx.upsert_item(&item).await.unwrap();
        tx.commit().await.unwrap();

        assert_eq!(second.id, first.id);
        assert!(!second.is_new);

        let stored = db.items().await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].title.as_deref(), Some("Edited"));
        assert_eq!(stored[0].author.as_deref(), Some("ann"));
        assert_eq!(stored[0].crawled_at, 1_700_000_100);
    }

    #[tokio::test]
    async fn test_upsert_item_with_unknown_url_is_conflict() {
        let db = Database::open(":memory:").await.unwrap();
        let mut tx = db.begin().await.unwrap();
        let item = NewItem {
            content_hash: "dangling",
            url_id: 999,
            source_feed_url_id: 998,
            title: None,
            author: None,
            published: None,
            updated: None,
            crawled_at: 0,
        };
        let err = tx.upsert_item(&item).await.unwrap_err();
        assert!(err.is_conflict(), "expected conflict, got {err:?}");
    }
}
