use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqliteLockingMode, SqlitePoolOptions, SqliteSynchronous},
    Sqlite, SqlitePool, Transaction,
};
use std::str::FromStr;
use std::time::Duration;

use super::types::StoreError;

/// Current schema version, recorded in `schema_version`.
pub const SCHEMA_VERSION: i64 = 1;

/// How long `open` waits for another process to release the file.
const LOCK_WAIT: Duration = Duration::from_secs(1);

// ============================================================================
// Database
// ============================================================================

/// Handle to the graph store.
///
/// The pool holds a single connection: the store has exactly one writer at a
/// time, and read-side lookups share that connection.
#[derive(Clone)]
pub struct Database {
    pub(crate) pool: SqlitePool,
}

/// An open write transaction against the graph.
///
/// All upserts go through this type so that a batch either fully applies or
/// fully rolls back. Dropping it without [`GraphTx::commit`] rolls back.
pub struct GraphTx {
    pub(crate) tx: Transaction<'static, Sqlite>,
}

impl Database {
    /// Open (or create) the graph store and run migrations
    ///
    /// The connection takes the file in exclusive locking mode and keeps it
    /// until [`close`](Self::close) or drop, so one store (and with it one
    /// output directory) belongs to a single crawl at a time.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::InstanceLocked` if another crawl holds the file
    /// (SQLITE_BUSY, SQLITE_LOCKED, SQLITE_CANTOPEN).
    /// Returns `StoreError::Migration` if the schema could not be created.
    pub async fn open(path: &str) -> Result<Self, StoreError> {
        let url = format!("sqlite:{}?mode=rwc", path);

        let options = SqliteConnectOptions::from_str(&url)
            .map_err(StoreError::from_sqlx)?
            .locking_mode(SqliteLockingMode::Exclusive)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(LOCK_WAIT);

        // In-memory stores vanish with their last connection, so the one
        // connection is never recycled.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .acquire_timeout(Duration::from_secs(30))
            .connect_with(options)
            .await
            .map_err(StoreError::from_sqlx)?;
        let db = Self { pool };
        db.migrate().await.map_err(|e| match StoreError::from_sqlx(e) {
            StoreError::InstanceLocked => StoreError::InstanceLocked,
            other => StoreError::Migration(other.to_string()),
        })?;
        Ok(db)
    }

    /// Begin a write transaction.
    pub async fn begin(&self) -> Result<GraphTx, StoreError> {
        let tx = self.pool.begin().await.map_err(StoreError::from_sqlx)?;
        Ok(GraphTx { tx })
    }

    /// Close the pool, checkpointing the WAL.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Run database migrations atomically within a transaction.
    ///
    /// Every statement uses `IF NOT EXISTS`, so re-running on an existing
    /// store is a no-op. Table order follows foreign-key dependencies.
    async fn migrate(&self) -> Result<(), sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER PRIMARY KEY
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS url (
                id INTEGER PRIMARY KEY,
                literal TEXT NOT NULL UNIQUE
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS keyword (
                id INTEGER PRIMARY KEY,
                text TEXT NOT NULL UNIQUE
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        // Items dedup on content_hash, not url: a feed may republish the same
        // page with cosmetic differences.
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS item (
                id INTEGER PRIMARY KEY,
                content_hash TEXT NOT NULL UNIQUE,
                url_id INTEGER NOT NULL REFERENCES url(id) ON DELETE RESTRICT ON UPDATE RESTRICT,
                source_feed_url_id INTEGER NOT NULL REFERENCES url(id) ON DELETE RESTRICT ON UPDATE RESTRICT,
                title TEXT,
                author TEXT,
                published INTEGER,
                updated INTEGER,
                crawled_at INTEGER NOT NULL
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS hyperlink (
                id INTEGER PRIMARY KEY,
                source_url_id INTEGER NOT NULL REFERENCES url(id) ON DELETE RESTRICT ON UPDATE RESTRICT,
                target_url_id INTEGER NOT NULL REFERENCES url(id) ON DELETE RESTRICT ON UPDATE RESTRICT,
                element TEXT NOT NULL,
                UNIQUE(source_url_id, target_url_id, element)
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS feed (
                id INTEGER PRIMARY KEY,
                url_id INTEGER NOT NULL UNIQUE REFERENCES url(id) ON DELETE RESTRICT ON UPDATE RESTRICT,
                title TEXT NOT NULL DEFAULT '',
                alive INTEGER NOT NULL
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS tagging (
                id INTEGER PRIMARY KEY,
                item_id INTEGER NOT NULL REFERENCES item(id) ON DELETE RESTRICT ON UPDATE RESTRICT,
                keyword_id INTEGER NOT NULL REFERENCES keyword(id) ON DELETE RESTRICT ON UPDATE RESTRICT,
                UNIQUE(item_id, keyword_id)
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS content_blob (
                id INTEGER PRIMARY KEY,
                url_id INTEGER NOT NULL REFERENCES url(id) ON DELETE RESTRICT ON UPDATE RESTRICT,
                kind TEXT NOT NULL CHECK (kind IN ('summary', 'webpage')),
                markup TEXT NOT NULL,
                UNIQUE(url_id, kind)
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        // Reverse lookups used by exporters reading the finished store
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_item_url ON item(url_id)")
            .execute(&mut *tx)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_item_source_feed ON item(source_feed_url_id)")
            .execute(&mut *tx)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_hyperlink_target ON hyperlink(target_url_id)")
            .execute(&mut *tx)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_tagging_keyword ON tagging(keyword_id)")
            .execute(&mut *tx)
            .await?;

        sqlx::query("INSERT OR IGNORE INTO schema_version (version) VALUES (?)")
            .bind(SCHEMA_VERSION)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        Ok(())
    }
}

impl GraphTx {
    /// Commit every write made through this transaction.
    pub async fn commit(self) -> Result<(), StoreError> {
        self.tx.commit().await.map_err(StoreError::from_sqlx)
    }

    /// Discard every write made through this transaction.
    pub async fn rollback(self) -> Result<(), StoreError> {
        self.tx.rollback().await.map_err(StoreError::from_sqlx)
    }
}
