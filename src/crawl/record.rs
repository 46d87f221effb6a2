use chrono::{DateTime, SecondsFormat, Utc};
use sha2::{Digest, Sha256};
use std::collections::{BTreeSet, HashSet};
use thiserror::Error;

use crate::storage::BlobKind;
use crate::util::{clean_text, normalize_url, origin_of, UrlError};

// ============================================================================
// Extractor Output
// ============================================================================

/// Structured form of one feed entry, as produced by an [`Extractor`].
///
/// URLs are raw literals here; [`Record::prepare`] normalizes them.
///
/// [`Extractor`]: super::Extractor
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub item: ItemRecord,
    pub hyperlinks: Vec<LinkRecord>,
    pub keywords: Vec<String>,
    pub blobs: Vec<BlobRecord>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ItemRecord {
    /// Stable entry id assigned by the feed source, if any.
    pub entry_id: Option<String>,
    pub url: String,
    pub source_feed: String,
    pub title: Option<String>,
    pub author: Option<String>,
    pub published: Option<DateTime<Utc>>,
    pub updated: Option<DateTime<Utc>>,
}

/// An outgoing link found in the entry markup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkRecord {
    pub target: String,
    /// Tag name of the element carrying the link (`a`, `img`, ...).
    pub element: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobRecord {
    pub kind: BlobKind,
    pub markup: String,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RecordError {
    #[error("invalid item URL {url:?}: {source}")]
    ItemUrl { url: String, source: UrlError },
    #[error("invalid source feed URL {url:?}: {source}")]
    SourceFeed { url: String, source: UrlError },
}

// ============================================================================
// Prepared Record
// ============================================================================

/// A record with every URL normalized and its content hash computed,
/// ready for the write coordinator.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedRecord {
    pub content_hash: String,
    pub url: String,
    pub source_feed: String,
    pub title: Option<String>,
    pub author: Option<String>,
    /// Unix seconds.
    pub published: Option<i64>,
    pub updated: Option<i64>,
    pub crawled_at: i64,
    pub hyperlinks: Vec<PreparedLink>,
    pub keywords: Vec<String>,
    pub blobs: Vec<BlobRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedLink {
    pub target: String,
    pub element: String,
}

impl Record {
    /// Normalize the record for storage.
    ///
    /// Links with unusable targets are dropped, duplicate `(target, element)`
    /// pairs collapse, keywords are cleaned, lowercased and deduplicated, and
    /// duplicate blob kinds keep the last markup.
    ///
    /// # Errors
    ///
    /// Fails if the item URL or the source feed URL is not a valid http(s) URL.
    pub fn prepare(self, crawled_at: DateTime<Utc>) -> Result<PreparedRecord, RecordError> {
        let url = normalize_url(&self.item.url).map_err(|source| RecordError::ItemUrl {
            url: self.item.url.clone(),
            source,
        })?;
        let source_feed =
            normalize_url(&self.item.source_feed).map_err(|source| RecordError::SourceFeed {
                url: self.item.source_feed.clone(),
                source,
            })?;

        let content_hash = content_hash(
            source_feed.as_str(),
            self.item.entry_id.as_deref(),
            url.as_str(),
            self.item.published,
        );

        let mut seen = HashSet::new();
        let hyperlinks = self
            .hyperlinks
            .into_iter()
            .filter_map(|link| match normalize_url(&link.target) {
                Ok(target) => Some(PreparedLink {
                    target: target.to_string(),
                    element: link.element.trim().to_ascii_lowercase(),
                }),
                Err(e) => {
                    tracing::trace!(target = %link.target, error = %e, "Dropping unusable link");
                    None
                }
            })
            .filter(|link| seen.insert((link.target.clone(), link.element.clone())))
            .collect();

        let keywords: BTreeSet<String> = self
            .keywords
            .iter()
            .filter_map(|k| clean_text(k))
            .map(|k| k.to_lowercase())
            .collect();

        let mut blobs: Vec<BlobRecord> = Vec::with_capacity(self.blobs.len());
        for blob in self.blobs {
            blobs.retain(|b| b.kind != blob.kind);
            blobs.push(blob);
        }

        Ok(PreparedRecord {
            content_hash,
            url: url.to_string(),
            source_feed: source_feed.to_string(),
            title: self.item.title.as_deref().and_then(clean_text),
            author: self.item.author.as_deref().and_then(clean_text),
            published: self.item.published.map(|t| t.timestamp()),
            updated: self.item.updated.map(|t| t.timestamp()),
            crawled_at: crawled_at.timestamp(),
            hyperlinks,
            keywords: keywords.into_iter().collect(),
            blobs,
        })
    }
}

impl PreparedRecord {
    /// Distinct origins (domain keys) of every hyperlink target.
    pub fn link_domains(&self) -> Vec<String> {
        let origins: BTreeSet<String> = self
            .hyperlinks
            .iter()
            .filter_map(|l| url::Url::parse(&l.target).ok())
            .map(|u| origin_of(&u))
            .collect();
        origins.into_iter().collect()
    }
}

/// Dedup key of an item.
///
/// Lowercase hex SHA-256 over
/// `normalized_feed_url "\n" identity "\n" published`, where `identity` is the
/// trimmed entry id when present and non-empty, otherwise the normalized item
/// URL, and `published` is RFC 3339 UTC with second precision (empty when
/// unknown). Title, author and content never enter the hash, so edits to a
/// post update the existing row instead of creating a new one.
pub fn content_hash(
    feed_url: &str,
    entry_id: Option<&str>,
    item_url: &str,
    published: Option<DateTime<Utc>>,
) -> String {
    let identity = entry_id
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .unwrap_or(item_url);
    let published = published
        .map(|t| t.to_rfc3339_opts(SecondsFormat::Secs, true))
        .unwrap_or_default();

    let input = format!("{}\n{}\n{}", feed_url, identity, published);
    let hash = Sha256::digest(input.as_bytes());
    format!("{:x}", hash)
}
