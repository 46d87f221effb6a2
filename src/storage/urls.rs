use super::schema::GraphTx;
use super::types::StoreError;

impl GraphTx {
    // ========================================================================
    // URL Operations
    // ========================================================================

    /// Insert a URL literal if unseen and return its surrogate id.
    ///
    /// The literal must already be normalized; it is the dedup key. URL rows
    /// are immutable, so a repeat call only looks the id up.
    pub async fn upsert_url(&mut self, literal: &str) -> Result<i64, StoreError> {
        let result = sqlx::query("INSERT OR IGNORE INTO url (literal) VALUES (?)")
            .bind(literal)
            .execute(&mut *self.tx)
            .await
            .map_err(StoreError::on_write("url", literal))?;

        if result.rows_affected() == 1 {
            return Ok(result.last_insert_rowid());
        }

        let (id,): (i64,) = sqlx::query_as("SELECT id FROM url WHERE literal = ?")
            .bind(literal)
            .fetch_one(&mut *self.tx)
            .await
            .map_err(StoreError::from_sqlx)?;
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use crate::storage::Database;

    #[tokio::test]
    async fn test_upsert_url_returns_stable_id() {
        let db = Database::open(":memory:").await.unwrap();
        let mut tx = db.begin().await.unwrap();

        let first = tx.upsert_url("https://example.com/a").await.unwrap();
        let second = tx.upsert_url("https://example.com/b").await.unwrap();
        let again = tx.upsert_url("https://example.com/a").await.unwrap();
        tx.commit().await.unwrap();

        assert_ne!(first, second);
        assert_eq!(first, again);
        assert_eq!(db.counts().await.unwrap().urls, 2);
    }

    #[tokio::test]
    async fn test_upsert_url_across_transactions() {
        let db = Database::open(":memory:").await.unwrap();

        let mut tx = db.begin().await.unwrap();
        let id = tx.upsert_url("https://example.com/").await.unwrap();
        tx.commit().await.unwrap();

        let mut tx = db.begin().await.unwrap();
        let again = tx.upsert_url("https://example.com/").await.unwrap();
        tx.commit().await.unwrap();

        assert_eq!(id, again);
        assert_eq!(db.url_id("https://example.com/").await.unwrap(), Some(id));
    }
}
