use super::schema::GraphTx;
use super::types::StoreError;

impl GraphTx {
    // ========================================================================
    // Feed Operations
    // ========================================================================

    /// Insert or update the feed row for a URL.
    ///
    /// `alive` always takes the latest resolution outcome. An empty title
    /// never overwrites a known one.
    pub async fn upsert_feed(&mut self, url_id: i64, title: &str, alive: bool) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO feed (url_id, title, alive) VALUES (?, ?, ?)
            ON CONFLICT(url_id) DO UPDATE SET
                title = CASE WHEN excluded.title != '' THEN excluded.title ELSE feed.title END,
                alive = excluded.alive
        "#,
        )
        .bind(url_id)
        .bind(title)
        .bind(alive)
        .execute(&mut *self.tx)
        .await
        .map_err(StoreError::on_write("feed", url_id.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::storage::Database;

    #[tokio::test]
    async fn test_feed_alive_transitions() {
        let db = Database::open(":memory:").await.unwrap();
        let mut tx = db.begin().await.unwrap();
        let url = tx.upsert_url("https://a.example/feed").await.unwrap();
        tx.upsert_feed(url, "A Blog", true).await.unwrap();
        tx.upsert_feed(url, "", false).await.unwrap();
        tx.commit().await.unwrap();

        let feed = db.feed("https://a.example/feed").await.unwrap().unwrap();
        assert_eq!(feed.title, "A Blog");
        assert!(!feed.alive);
        assert_eq!(db.counts().await.unwrap().feeds, 1);
    }
}
