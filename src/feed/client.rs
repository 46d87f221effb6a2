use async_trait::async_trait;
use futures::StreamExt;
use reqwest::redirect::Policy;
use reqwest::StatusCode;
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;
use url::Url;

use crate::config::Config;
use crate::crawl::{Content, FeedMeta, FeedPage, FetchFailure, Fetcher, Resolution};

const MAX_RESPONSE_SIZE: usize = 10 * 1024 * 1024; // 10MB
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const STREAMS_PATH: &str = "/v3/streams/contents";
const SEARCH_PATH: &str = "/v3/search/feeds";
const SEARCH_COUNT: u32 = 20;

/// Environment variable that overrides `access_token` from the config file.
pub const TOKEN_ENV: &str = "FEEDLY_ACCESS_TOKEN";

/// Errors raised while building the client.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("invalid api_base {0:?}")]
    InvalidBase(String),
    #[error("failed to build HTTP client: {0}")]
    Http(#[from] reqwest::Error),
}

/// Body read failures, before they are folded into [`FetchFailure`].
#[derive(Debug, Error)]
enum BodyError {
    #[error("request failed: {0}")]
    Network(#[from] reqwest::Error),
    #[error("response too large")]
    TooLarge,
    #[error("incomplete response: expected {expected} bytes, received {received}")]
    Incomplete { expected: u64, received: usize },
}

/// Connection settings for [`FeedlyClient`].
#[derive(Clone)]
pub struct FeedlyOptions {
    pub api_base: String,
    /// Entries requested per page.
    pub count: u32,
    /// `oldest` or `newest`.
    pub ranked: String,
    pub token: Option<SecretString>,
}

impl FeedlyOptions {
    /// Settings from `config`; [`TOKEN_ENV`] wins over the configured token.
    pub fn from_config(config: &Config) -> Self {
        let token = std::env::var(TOKEN_ENV)
            .ok()
            .filter(|t| !t.trim().is_empty())
            .or_else(|| config.access_token.clone())
            .map(SecretString::from);
        Self {
            api_base: config.api_base.clone(),
            count: config.download_per_batch,
            ranked: config.download_order.clone(),
            token,
        }
    }
}

/// Wire shape of a streams/contents response.
#[derive(Debug, Deserialize)]
struct StreamResponse {
    #[serde(default)]
    items: Vec<serde_json::Value>,
    continuation: Option<String>,
    title: Option<String>,
}

/// Wire shape of a search/feeds response.
#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<SearchResult>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchResult {
    feed_id: Option<String>,
    title: Option<String>,
}

/// [`Fetcher`] backed by the Feedly cloud streams API.
///
/// Feeds are addressed as `feed/<url>` stream ids. One call is one HTTP
/// request; retries are left to the crawler.
pub struct FeedlyClient {
    http: reqwest::Client,
    streams: Url,
    search: Url,
    count: u32,
    ranked: String,
    token: Option<SecretString>,
}

impl FeedlyClient {
    pub fn new(options: FeedlyOptions) -> Result<Self, ClientError> {
        let base = options.api_base.trim_end_matches('/');
        let streams = Url::parse(&format!("{base}{STREAMS_PATH}"))
            .map_err(|_| ClientError::InvalidBase(options.api_base.clone()))?;
        let search = Url::parse(&format!("{base}{SEARCH_PATH}"))
            .map_err(|_| ClientError::InvalidBase(options.api_base.clone()))?;

        let http = reqwest::Client::builder()
            .redirect(Policy::limited(3))
            .pool_max_idle_per_host(4)
            .pool_idle_timeout(Duration::from_secs(30))
            .tcp_keepalive(Duration::from_secs(60))
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        if options.token.is_none() {
            tracing::warn!("No Feedly access token configured; requests are anonymous");
        }

        Ok(Self {
            http,
            streams,
            search,
            count: options.count,
            ranked: options.ranked,
            token: options.token,
        })
    }

    fn stream_url(&self, feed_url: &str, count: u32, continuation: Option<&str>) -> Url {
        let mut url = self.streams.clone();
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("streamId", &format!("feed/{feed_url}"))
                .append_pair("count", &count.to_string())
                .append_pair("ranked", &self.ranked)
                .append_pair("similar", "true")
                .append_pair("unreadOnly", "false");
            if let Some(token) = continuation {
                query.append_pair("continuation", token);
            }
        }
        url
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T, FetchFailure> {
        let mut request = self.http.get(url.clone());
        if let Some(token) = &self.token {
            request = request.header("Authorization", format!("OAuth {}", token.expose_secret()));
        }

        let response = tokio::time::timeout(REQUEST_TIMEOUT, request.send())
            .await
            .map_err(|_| FetchFailure::Transient("request timed out".to_string()))?
            .map_err(|e| FetchFailure::Transient(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(FetchFailure::RateLimited);
        }
        if status.is_server_error() {
            return Err(FetchFailure::Transient(format!("HTTP {}", status.as_u16())));
        }
        if !status.is_success() {
            // 404 and the other client errors will not improve on retry.
            tracing::debug!(url = %url, status = status.as_u16(), "API request rejected");
            return Err(FetchFailure::NotFound);
        }

        let bytes = read_limited_bytes(response, MAX_RESPONSE_SIZE)
            .await
            .map_err(|e| FetchFailure::Transient(e.to_string()))?;
        serde_json::from_slice(&bytes).map_err(|e| FetchFailure::Transient(format!("invalid API JSON: {e}")))
    }
}

#[async_trait]
impl Fetcher for FeedlyClient {
    async fn fetch_page(&self, feed_url: &str, continuation: Option<&str>) -> Result<FeedPage, FetchFailure> {
        let body: StreamResponse = self.get_json(self.stream_url(feed_url, self.count, continuation)).await?;
        tracing::debug!(
            feed = %feed_url,
            entries = body.items.len(),
            more = body.continuation.is_some(),
            "Fetched feed page"
        );
        Ok(FeedPage {
            entries: body
                .items
                .into_iter()
                .map(|payload| Content {
                    feed_url: feed_url.to_string(),
                    payload,
                })
                .collect(),
            continuation: body.continuation.filter(|c| !c.is_empty()),
            title: body.title,
        })
    }

    /// A candidate is a feed when the service holds at least one entry for it.
    async fn resolve_feed(&self, candidate: &str) -> Result<Resolution, FetchFailure> {
        match self.get_json::<StreamResponse>(self.stream_url(candidate, 1, None)).await {
            Ok(body) if !body.items.is_empty() => Ok(Resolution::Confirmed(FeedMeta {
                url: candidate.to_string(),
                title: body.title.filter(|t| !t.trim().is_empty()),
            })),
            Ok(_) | Err(FetchFailure::NotFound) => Ok(Resolution::NotAFeed),
            Err(e) => Err(e),
        }
    }

    /// Results are `feed/<url>` ids; anything else is skipped.
    async fn search_feeds(&self, query: &str) -> Result<Vec<FeedMeta>, FetchFailure> {
        let mut url = self.search.clone();
        url.query_pairs_mut()
            .append_pair("query", query)
            .append_pair("count", &SEARCH_COUNT.to_string());

        let body = match self.get_json::<SearchResponse>(url).await {
            Err(FetchFailure::NotFound) => return Ok(Vec::new()),
            other => other?,
        };
        let feeds: Vec<FeedMeta> = body
            .results
            .into_iter()
            .filter_map(|r| {
                let url = r.feed_id?.strip_prefix("feed/")?.to_string();
                Some(FeedMeta {
                    url,
                    title: r.title.filter(|t| !t.trim().is_empty()),
                })
            })
            .collect();
        tracing::debug!(query, results = feeds.len(), "Searched feeds");
        Ok(feeds)
    }
}

/// Read a response body, stopping at `limit` bytes.
///
/// A body shorter than its Content-Length is reported as incomplete.
async fn read_limited_bytes(response: reqwest::Response, limit: usize) -> Result<Vec<u8>, BodyError> {
    let expected_length = response.content_length();
    if let Some(len) = expected_length {
        if len as usize > limit {
            return Err(BodyError::TooLarge);
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(BodyError::TooLarge);
        }
        bytes.extend_from_slice(&chunk);
    }

    if let Some(expected) = expected_length {
        if (bytes.len() as u64) < expected {
            return Err(BodyError::Incomplete {
                expected,
                received: bytes.len(),
            });
        }
    }
    Ok(bytes)
}
