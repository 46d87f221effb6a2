use chrono::{DateTime, Utc};
use scraper::{Html, Selector};
use serde::Deserialize;
use std::collections::HashSet;

use crate::crawl::{BlobRecord, Content, ExtractError, Extractor, ItemRecord, LinkRecord, Record};
use crate::storage::BlobKind;

/// Attributes that may carry a link target, in lookup order.
const LINK_ATTRS: [&str; 4] = ["href", "src", "data-href", "data-src"];
const LINK_SELECTOR: &str = "[href], [src], [data-href], [data-src]";

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Entry {
    id: Option<String>,
    origin_id: Option<String>,
    /// Usually a list of `{href, type}`; some entries carry a bare string.
    alternate: Option<serde_json::Value>,
    title: Option<String>,
    author: Option<String>,
    /// Epoch milliseconds.
    published: Option<i64>,
    updated: Option<i64>,
    origin: Option<Origin>,
    #[serde(default)]
    keywords: Vec<String>,
    summary: Option<Markup>,
    content: Option<Markup>,
    visual: Option<Visual>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Origin {
    stream_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Markup {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Visual {
    url: Option<String>,
}

/// [`Extractor`] for Feedly stream entries.
#[derive(Debug, Default, Clone, Copy)]
pub struct FeedlyExtractor;

impl FeedlyExtractor {
    pub fn new() -> Self {
        Self
    }
}

impl Extractor for FeedlyExtractor {
    fn parse(&self, content: &Content) -> Result<Record, ExtractError> {
        let entry: Entry = serde_json::from_value(content.payload.clone())
            .map_err(|e| ExtractError::Malformed(e.to_string()))?;

        let url = page_url(&entry).ok_or(ExtractError::MissingUrl)?;
        let source_feed = entry
            .origin
            .as_ref()
            .and_then(|o| o.stream_id.as_deref())
            .and_then(|id| id.strip_prefix("feed/"))
            .unwrap_or(&content.feed_url)
            .to_string();

        let summary = entry.summary.and_then(|m| m.content).filter(|s| !s.is_empty());
        let webpage = entry.content.and_then(|m| m.content).filter(|s| !s.is_empty());

        let selector =
            Selector::parse(LINK_SELECTOR).map_err(|e| ExtractError::Malformed(format!("link selector: {e}")))?;
        let mut seen = HashSet::new();
        let mut hyperlinks = Vec::new();
        for markup in [webpage.as_deref(), summary.as_deref()].into_iter().flatten() {
            collect_links(markup, &selector, &mut seen, &mut hyperlinks);
        }
        if let Some(image) = entry.visual.and_then(|v| v.url).and_then(|u| link_target(&u)) {
            if seen.insert(image.clone()) {
                hyperlinks.push(LinkRecord {
                    target: image,
                    element: "img".to_string(),
                });
            }
        }

        let mut blobs = Vec::new();
        if let Some(markup) = summary {
            blobs.push(BlobRecord {
                kind: BlobKind::Summary,
                markup,
            });
        }
        if let Some(markup) = webpage {
            blobs.push(BlobRecord {
                kind: BlobKind::Webpage,
                markup,
            });
        }

        Ok(Record {
            item: ItemRecord {
                entry_id: entry.id.filter(|id| !id.is_empty()),
                url,
                source_feed,
                title: entry.title,
                author: entry.author,
                published: entry.published.and_then(DateTime::<Utc>::from_timestamp_millis),
                updated: entry.updated.and_then(DateTime::<Utc>::from_timestamp_millis),
            },
            hyperlinks,
            keywords: entry.keywords.iter().map(|k| k.trim().to_lowercase()).collect(),
            blobs,
        })
    }
}

/// `originId` when it is an absolute URL with a host, else the first
/// alternate link.
fn page_url(entry: &Entry) -> Option<String> {
    if let Some(origin_id) = entry.origin_id.as_deref() {
        if url::Url::parse(origin_id).is_ok_and(|u| u.has_host()) {
            return Some(origin_id.to_string());
        }
    }
    match entry.alternate.as_ref()? {
        serde_json::Value::Array(links) => links
            .iter()
            .filter_map(|l| l.get("href")?.as_str())
            .find(|href| !href.is_empty())
            .map(str::to_string),
        _ => None,
    }
}

fn collect_links(markup: &str, selector: &Selector, seen: &mut HashSet<String>, out: &mut Vec<LinkRecord>) {
    let fragment = Html::parse_fragment(markup);
    for element in fragment.select(selector) {
        let value = element.value();
        for attr in LINK_ATTRS {
            let Some(target) = value.attr(attr).and_then(link_target) else {
                continue;
            };
            if seen.insert(target.clone()) {
                out.push(LinkRecord {
                    target,
                    element: value.name().to_string(),
                });
            }
        }
    }
}

/// Absolute http(s) links pass through; protocol-relative ones get `http:`.
/// Anything else is not a crawlable link.
fn link_target(raw: &str) -> Option<String> {
    let raw = raw.trim();
    if raw.starts_with("//") {
        return Some(format!("http:{raw}"));
    }
    let lower = raw.to_ascii_lowercase();
    if lower.starts_with("http://") || lower.starts_with("https://") {
        Some(raw.to_string())
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn content(payload: serde_json::Value) -> Content {
        Content {
            feed_url: "https://blog.example/feed".to_string(),
            payload,
        }
    }

    fn links(record: &Record) -> Vec<(&str, &str)> {
        record
            .hyperlinks
            .iter()
            .map(|l| (l.target.as_str(), l.element.as_str()))
            .collect()
    }

    #[test]
    fn test_full_entry() {
        let record = FeedlyExtractor::new()
            .parse(&content(json!({
                "id": "entry-1",
                "originId": "https://blog.example/posts/1",
                "title": "First post",
                "author": "Sam",
                "published": 1_700_000_000_000_i64,
                "updated": 1_700_000_600_000_i64,
                "origin": {"streamId": "feed/https://blog.example/rss", "title": "Blog"},
                "keywords": ["Rust", " Crawling "],
                "summary": {"content": "<p>See <a href=\"https://a.example/x\">a</a></p>"},
                "content": {"content": "<img src=\"//cdn.example/i.png\"><a href=\"/relative\">r</a>"},
                "visual": {"url": "https://img.example/v.jpg"}
            })))
            .unwrap();

        assert_eq!(record.item.entry_id.as_deref(), Some("entry-1"));
        assert_eq!(record.item.url, "https://blog.example/posts/1");
        assert_eq!(record.item.source_feed, "https://blog.example/rss");
        assert_eq!(record.item.title.as_deref(), Some("First post"));
        assert_eq!(record.item.author.as_deref(), Some("Sam"));
        assert_eq!(record.item.published.map(|d| d.timestamp()), Some(1_700_000_000));
        assert_eq!(record.item.updated.map(|d| d.timestamp()), Some(1_700_000_600));
        assert_eq!(
            links(&record),
            vec![
                ("http://cdn.example/i.png", "img"),
                ("https://a.example/x", "a"),
                ("https://img.example/v.jpg", "img"),
            ]
        );
        assert_eq!(record.keywords, vec!["rust", "crawling"]);
        assert_eq!(record.blobs.len(), 2);
        assert_eq!(record.blobs[0].kind, BlobKind::Summary);
        assert_eq!(record.blobs[1].kind, BlobKind::Webpage);
    }

    #[test]
    fn test_non_url_origin_id_falls_back_to_alternate() {
        let record = FeedlyExtractor::new()
            .parse(&content(json!({
                "originId": "tag:blog.example,2024:1",
                "alternate": [{"href": "https://blog.example/p/1", "type": "text/html"}]
            })))
            .unwrap();
        assert_eq!(record.item.url, "https://blog.example/p/1");
        assert_eq!(record.item.source_feed, "https://blog.example/feed");
        assert!(record.hyperlinks.is_empty());
        assert!(record.blobs.is_empty());
    }

    #[test]
    fn test_missing_url() {
        let result = FeedlyExtractor::new().parse(&content(json!({"id": "x", "alternate": "none"})));
        assert_eq!(result, Err(ExtractError::MissingUrl));
    }

    #[test]
    fn test_malformed_payload() {
        let result = FeedlyExtractor::new().parse(&content(json!({"keywords": "not-a-list"})));
        assert!(matches!(result, Err(ExtractError::Malformed(_))));
    }

    #[test]
    fn test_first_occurrence_per_target_wins() {
        let record = FeedlyExtractor::new()
            .parse(&content(json!({
                "originId": "https://blog.example/p/2",
                "summary": {"content": "<a href=\"https://a.example/\">1</a><iframe src=\"https://a.example/\"></iframe>\
                                        <div data-href=\"https://b.example/\"></div><a href=\"mailto:x@y.z\">m</a>"}
            })))
            .unwrap();
        assert_eq!(
            links(&record),
            vec![("https://a.example/", "a"), ("https://b.example/", "div")]
        );
    }

    #[test]
    fn test_link_target() {
        assert_eq!(link_target("https://a.example/"), Some("https://a.example/".into()));
        assert_eq!(link_target("HTTP://A.example/"), Some("HTTP://A.example/".into()));
        assert_eq!(link_target("//a.example/x"), Some("http://a.example/x".into()));
        assert_eq!(link_target("/local"), None);
        assert_eq!(link_target("javascript:void(0)"), None);
        assert_eq!(link_target("http"), None);
    }
}
