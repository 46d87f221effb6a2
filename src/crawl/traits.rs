use async_trait::async_trait;
use thiserror::Error;

use super::record::Record;

// ============================================================================
// Collaborator Outcomes
// ============================================================================

/// Final outcome of a failed fetch, as seen by the frontier.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchFailure {
    #[error("not found")]
    NotFound,
    #[error("rate limited")]
    RateLimited,
    #[error("transient error: {0}")]
    Transient(String),
}

impl FetchFailure {
    /// Rate limiting and transient errors are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, FetchFailure::RateLimited | FetchFailure::Transient(_))
    }
}

/// Metadata of a confirmed feed endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedMeta {
    /// Canonical URL of the feed. May differ from the candidate that was tried.
    pub url: String,
    pub title: Option<String>,
}

/// Outcome of probing a candidate feed URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Confirmed(FeedMeta),
    NotAFeed,
}

/// One raw feed entry as delivered by the fetcher.
#[derive(Debug, Clone)]
pub struct Content {
    /// Feed the entry was fetched from.
    pub feed_url: String,
    pub payload: serde_json::Value,
}

/// One page of a feed.
#[derive(Debug, Clone, Default)]
pub struct FeedPage {
    pub entries: Vec<Content>,
    /// Cursor for the next page; `None` on the last page.
    pub continuation: Option<String>,
    pub title: Option<String>,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ExtractError {
    #[error("malformed entry: {0}")]
    Malformed(String),
    #[error("entry has no usable URL")]
    MissingUrl,
}

// ============================================================================
// Collaborator Traits
// ============================================================================

/// Network access to the feed source.
///
/// Implementations make a single attempt per call; the crawler owns the
/// retry policy.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Fetch one page of `feed_url`, starting at `continuation` if given.
    async fn fetch_page(&self, feed_url: &str, continuation: Option<&str>) -> Result<FeedPage, FetchFailure>;

    /// Check whether `candidate` is a feed endpoint.
    async fn resolve_feed(&self, candidate: &str) -> Result<Resolution, FetchFailure>;

    /// Feeds the source's directory offers for `query`, best match first.
    /// Sources without a directory find nothing.
    async fn search_feeds(&self, query: &str) -> Result<Vec<FeedMeta>, FetchFailure> {
        let _ = query;
        Ok(Vec::new())
    }
}

/// Turns raw entries into records.
pub trait Extractor: Send + Sync {
    fn parse(&self, content: &Content) -> Result<Record, ExtractError>;
}
