use sqlx::error::ErrorKind;
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Graph store errors with user-facing messages
#[derive(Debug, Error)]
pub enum StoreError {
    /// Another crawl is writing to the same output location
    #[error("Another crawl appears to be writing to this output location. Stop it and try again.")]
    InstanceLocked,

    /// Migration failed
    #[error("Graph store migration failed: {0}")]
    Migration(String),

    /// A write violated a uniqueness or foreign-key invariant.
    ///
    /// Correct write ordering makes this impossible, so it is never retried:
    /// the crawl halts instead of continuing with a possibly inconsistent graph.
    #[error("Store conflict on {table} ({key}): {source}")]
    Conflict {
        table: &'static str,
        key: String,
        #[source]
        source: sqlx::Error,
    },

    /// Generic database error
    #[error("Database error: {0}")]
    Other(#[from] sqlx::Error),
}

impl StoreError {
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
            return StoreError::InstanceLocked;
        }

        StoreError::Other(err)
    }

    /// Classify a failed write against `table`, keyed by the natural key it was
    /// writing. Constraint violations become [`StoreError::Conflict`].
    pub(crate) fn on_write(table: &'static str, key: impl Into<String>) -> impl FnOnce(sqlx::Error) -> Self {
        let key = key.into();
        move |err| {
            let is_constraint = match &err {
                sqlx::Error::Database(db_err) => matches!(
                    db_err.kind(),
                    ErrorKind::UniqueViolation
                        | ErrorKind::ForeignKeyViolation
                        | ErrorKind::NotNullViolation
                        | ErrorKind::CheckViolation
                ),
                _ => false,
            };
            if is_constraint {
                StoreError::Conflict {
                    table,
                    key,
                    source: err,
                }
            } else {
                StoreError::from_sqlx(err)
            }
        }
    }

    /// True for errors that indicate a programming error in write ordering.
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict { .. })
    }
}

// ============================================================================
// Write Inputs
// ============================================================================

/// An item row ready to be written, with every URL already resolved to its id.
#[derive(Debug, Clone)]
pub struct NewItem<'a> {
    pub content_hash: &'a str,
    pub url_id: i64,
    pub source_feed_url_id: i64,
    pub title: Option<&'a str>,
    pub author: Option<&'a str>,
    pub published: Option<i64>,
    pub updated: Option<i64>,
    pub crawled_at: i64,
}

/// Result of an item upsert.
///
/// `is_new` is false when a row with the same content hash already existed,
/// i.e. the item has been delivered before (duplicate delivery or an earlier run).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ItemUpsert {
    pub id: i64,
    pub is_new: bool,
}

/// The two alternative markup snippets cached per URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlobKind {
    /// The entry summary as served by the feed cache
    Summary,
    /// The rendered webpage / full content snippet
    Webpage,
}

impl BlobKind {
    pub fn as_str(self) -> &'static str {
        match self {
            BlobKind::Summary => "summary",
            BlobKind::Webpage => "webpage",
        }
    }
}

// ============================================================================
// Data Structures
// ============================================================================

/// Row counts for every table in the graph.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GraphCounts {
    pub urls: i64,
    pub items: i64,
    pub hyperlinks: i64,
    pub feeds: i64,
    pub keywords: i64,
    pub taggings: i64,
    pub blobs: i64,
}

/// Feed row joined with its URL literal
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct FeedRow {
    pub id: i64,
    pub url: String,
    pub title: String,
    pub alive: bool,
}

/// Item row joined with its URL literals
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ItemRow {
    pub id: i64,
    pub content_hash: String,
    pub url: String,
    pub source_feed: String,
    pub title: Option<String>,
    pub author: Option<String>,
    pub published: Option<i64>,
    pub updated: Option<i64>,
    pub crawled_at: i64,
}

/// Hyperlink row joined with its URL literals
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct HyperlinkRow {
    pub source: String,
    pub target: String,
    pub element: String,
}
