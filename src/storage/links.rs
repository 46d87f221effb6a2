use super::schema::GraphTx;
use super::types::StoreError;

impl GraphTx {
    // ========================================================================
    // Hyperlink Operations
    // ========================================================================

    /// Record a directed edge. Unique on `(source, target, element)`; repeat
    /// observations are not weighted.
    pub async fn upsert_hyperlink(
        &mut self,
        source_url_id: i64,
        target_url_id: i64,
        element: &str,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT OR IGNORE INTO hyperlink (source_url_id, target_url_id, element) VALUES (?, ?, ?)",
        )
        .bind(source_url_id)
        .bind(target_url_id)
        .bind(element)
        .execute(&mut *self.tx)
        .await
        .map_err(StoreError::on_write(
            "hyperlink",
            format!("{source_url_id}->{target_url_id} <{element}>"),
        ))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::storage::Database;

    #[tokio::test]
    async fn test_hyperlink_unique_per_element() {
        let db = Database::open(":memory:").await.unwrap();
        let mut tx = db.begin().await.unwrap();
        let a = tx.upsert_url("https://a.example/").await.unwrap();
        let b = tx.upsert_url("https://b.example/").await.unwrap();

        tx.upsert_hyperlink(a, b, "a").await.unwrap();
        tx.upsert_hyperlink(a, b, "a").await.unwrap();
        tx.upsert_hyperlink(a, b, "img").await.unwrap();
        tx.upsert_hyperlink(b, a, "a").await.unwrap();
        tx.commit().await.unwrap();

        assert_eq!(db.counts().await.unwrap().hyperlinks, 3);
    }

    #[tokio::test]
    async fn test_hyperlink_to_missing_url_is_conflict() {
        let db = Database::open(":memory:").await.unwrap();
        let mut tx = db.begin().await.unwrap();
        let a = tx.upsert_url("https://a.example/").await.unwrap();
        let err = tx.upsert_hyperlink(a, a + 100, "a").await.unwrap_err();
        assert!(err.is_conflict());
    }
}
