use super::schema::Database;
use super::types::{BlobKind, FeedRow, GraphCounts, HyperlinkRow, ItemRow, StoreError};

impl Database {
    // ========================================================================
    // Read Operations
    // ========================================================================
    //
    // These run outside the writer and are used for progress reporting and by
    // tests. They share the single pool connection, so a read waits for any
    // open write transaction to finish.

    /// Row counts for every entity table.
    pub async fn counts(&self) -> Result<GraphCounts, StoreError> {
        let row: (i64, i64, i64, i64, i64, i64, i64) = sqlx::query_as(
            r#"
            SELECT
                (SELECT COUNT(*) FROM url),
                (SELECT COUNT(*) FROM item),
                (SELECT COUNT(*) FROM hyperlink),
                (SELECT COUNT(*) FROM feed),
                (SELECT COUNT(*) FROM keyword),
                (SELECT COUNT(*) FROM tagging),
                (SELECT COUNT(*) FROM content_blob)
        "#,
        )
        .fetch_one(&self.pool)
        .await
        .map_err(StoreError::from_sqlx)?;

        Ok(GraphCounts {
            urls: row.0,
            items: row.1,
            hyperlinks: row.2,
            feeds: row.3,
            keywords: row.4,
            taggings: row.5,
            blobs: row.6,
        })
    }

    /// Number of hyperlink rows whose source or target has no URL row.
    ///
    /// Always zero while foreign keys are enforced; kept as an integrity check.
    pub async fn dangling_hyperlinks(&self) -> Result<i64, StoreError> {
        let (count,): (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*) FROM hyperlink h
            LEFT JOIN url s ON s.id = h.source_url_id
            LEFT JOIN url t ON t.id = h.target_url_id
            WHERE s.id IS NULL OR t.id IS NULL
        "#,
        )
        .fetch_one(&self.pool)
        .await
        .map_err(StoreError::from_sqlx)?;
        Ok(count)
    }

    /// Look up the id of a normalized URL literal.
    pub async fn url_id(&self, literal: &str) -> Result<Option<i64>, StoreError> {
        let row: Option<(i64,)> = sqlx::query_as("SELECT id FROM url WHERE literal = ?")
            .bind(literal)
            .fetch_optional(&self.pool)
            .await
            .map_err(StoreError::from_sqlx)?;
        Ok(row.map(|r| r.0))
    }

    /// All feeds ordered by URL.
    pub async fn feeds(&self) -> Result<Vec<FeedRow>, StoreError> {
        sqlx::query_as::<_, FeedRow>(
            r#"
            SELECT f.id, u.literal AS url, f.title, f.alive
            FROM feed f
            JOIN url u ON u.id = f.url_id
            ORDER BY u.literal
        "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(StoreError::from_sqlx)
    }

    /// The feed row for a URL, if one was recorded.
    pub async fn feed(&self, url: &str) -> Result<Option<FeedRow>, StoreError> {
        sqlx::query_as::<_, FeedRow>(
            r#"
            SELECT f.id, u.literal AS url, f.title, f.alive
            FROM feed f
            JOIN url u ON u.id = f.url_id
            WHERE u.literal = ?
        "#,
        )
        .bind(url)
        .fetch_optional(&self.pool)
        .await
        .map_err(StoreError::from_sqlx)
    }

    /// All items in insertion order.
    pub async fn items(&self) -> Result<Vec<ItemRow>, StoreError> {
        sqlx::query_as::<_, ItemRow>(
            r#"
            SELECT i.id, i.content_hash, u.literal AS url, s.literal AS source_feed,
                   i.title, i.author, i.published, i.updated, i.crawled_at
            FROM item i
            JOIN url u ON u.id = i.url_id
            JOIN url s ON s.id = i.source_feed_url_id
            ORDER BY i.id
        "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(StoreError::from_sqlx)
    }

    /// All hyperlinks, ordered by source, target and element.
    pub async fn hyperlinks(&self) -> Result<Vec<HyperlinkRow>, StoreError> {
        sqlx::query_as::<_, HyperlinkRow>(
            r#"
            SELECT s.literal AS source, t.literal AS target, h.element
            FROM hyperlink h
            JOIN url s ON s.id = h.source_url_id
            JOIN url t ON t.id = h.target_url_id
            ORDER BY s.literal, t.literal, h.element
        "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(StoreError::from_sqlx)
    }

    /// Keywords attached to the item with `content_hash`, alphabetically.
    pub async fn keywords_for(&self, content_hash: &str) -> Result<Vec<String>, StoreError> {
        let rows: Vec<(String,)> = sqlx::query_as(
            r#"
            SELECT k.text FROM tagging t
            JOIN keyword k ON k.id = t.keyword_id
            JOIN item i ON i.id = t.item_id
            WHERE i.content_hash = ?
            ORDER BY k.text
        "#,
        )
        .bind(content_hash)
        .fetch_all(&self.pool)
        .await
        .map_err(StoreError::from_sqlx)?;
        Ok(rows.into_iter().map(|r| r.0).collect())
    }

    /// Cached markup of `kind` for a URL.
    pub async fn content_blob(&self, url: &str, kind: BlobKind) -> Result<Option<String>, StoreError> {
        let row: Option<(String,)> = sqlx::query_as(
            r#"
            SELECT b.markup FROM content_blob b
            JOIN url u ON u.id = b.url_id
            WHERE u.literal = ? AND b.kind = ?
        "#,
        )
        .bind(url)
        .bind(kind.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(StoreError::from_sqlx)?;
        Ok(row.map(|r| r.0))
    }
}

#[cfg(test)]
mod tests {
    use crate::storage::Database;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_counts_empty_store() {
        let db = Database::open(":memory:").await.unwrap();
        assert_eq!(db.counts().await.unwrap(), Default::default());
        assert_eq!(db.dangling_hyperlinks().await.unwrap(), 0);
        assert!(db.feeds().await.unwrap().is_empty());
        assert_eq!(db.url_id("https://nowhere.example/").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_keywords_for_item() {
        let db = Database::open(":memory:").await.unwrap();
        let mut tx = db.begin().await.unwrap();
        let url = tx.upsert_url("https://a.example/post").await.unwrap();
        let feed = tx.upsert_url("https://a.example/feed").await.unwrap();
        let item = tx
            .upsert_item(&crate::storage::NewItem {
                content_hash: "h1",
                url_id: url,
                source_feed_url_id: feed,
                title: None,
                author: None,
                published: None,
                updated: None,
                crawled_at: 1,
            })
            .await
            .unwrap();
        tx.tag(item.id, "rust").await.unwrap();
        tx.tag(item.id, "async").await.unwrap();
        tx.tag(item.id, "rust").await.unwrap();
        tx.commit().await.unwrap();

        assert_eq!(db.keywords_for("h1").await.unwrap(), vec!["async", "rust"]);
        let counts = db.counts().await.unwrap();
        assert_eq!(counts.keywords, 2);
        assert_eq!(counts.taggings, 2);
    }
}
