use super::schema::GraphTx;
use super::types::StoreError;

impl GraphTx {
    // ========================================================================
    // Keyword / Tagging Operations
    // ========================================================================

    /// Tag an item with a keyword, creating the keyword on first use.
    ///
    /// The keyword text is stored as given; callers lowercase it.
    pub async fn tag(&mut self, item_id: i64, keyword: &str) -> Result<(), StoreError> {
        let result = sqlx::query("INSERT OR IGNORE INTO keyword (text) VALUES (?)")
            .bind(keyword)
            .execute(&mut *self.tx)
            .await
            .map_err(StoreError::on_write("keyword", keyword))?;

        let keyword_id = if result.rows_affected() == 1 {
            result.last_insert_rowid()
        } else {
            let (id,): (i64,) = sqlx::query_as("SELECT id FROM keyword WHERE text = ?")
                .bind(keyword)
                .fetch_one(&mut *self.tx)
                .await
                .map_err(StoreError::from_sqlx)?;
            id
        };

        sqlx::query("INSERT OR IGNORE INTO tagging (item_id, keyword_id) VALUES (?, ?)")
            .bind(item_id)
            .bind(keyword_id)
            .execute(&mut *self.tx)
            .await
            .map_err(StoreError::on_write("tagging", format!("{item_id}:{keyword}")))?;
        Ok(())
    }
}
