use super::schema::GraphTx;
use super::types::{BlobKind, StoreError};

impl GraphTx {
    // ========================================================================
    // Content Blob Operations
    // ========================================================================

    /// Store the markup snippet of `kind` for a URL, replacing older markup.
    pub async fn upsert_content_blob(
        &mut self,
        url_id: i64,
        kind: BlobKind,
        markup: &str,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO content_blob (url_id, kind, markup) VALUES (?, ?, ?)
            ON CONFLICT(url_id, kind) DO UPDATE SET markup = excluded.markup
        "#,
        )
        .bind(url_id)
        .bind(kind.as_str())
        .bind(markup)
        .execute(&mut *self.tx)
        .await
        .map_err(StoreError::on_write("content_blob", format!("{url_id}:{}", kind.as_str())))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::storage::{BlobKind, Database};

    #[tokio::test]
    async fn test_blob_replaced_per_kind() {
        let db = Database::open(":memory:").await.unwrap();
        let mut tx = db.begin().await.unwrap();
        let url = tx.upsert_url("https://a.example/post").await.unwrap();
        tx.upsert_content_blob(url, BlobKind::Summary, "<p>old</p>").await.unwrap();
        tx.upsert_content_blob(url, BlobKind::Summary, "<p>new</p>").await.unwrap();
        tx.upsert_content_blob(url, BlobKind::Webpage, "<html></html>").await.unwrap();
        tx.commit().await.unwrap();

        assert_eq!(db.counts().await.unwrap().blobs, 2);
        assert_eq!(
            db.content_blob("https://a.example/post", BlobKind::Summary).await.unwrap().as_deref(),
            Some("<p>new</p>")
        );
    }
}
