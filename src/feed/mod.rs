//! Feedly-backed collaborators for the crawler.
//!
//! - [`FeedlyClient`] implements [`Fetcher`](crate::crawl::Fetcher) over the
//!   cloud streams API.
//! - [`FeedlyExtractor`] implements [`Extractor`](crate::crawl::Extractor)
//!   for the entry JSON that API returns.

mod client;
mod extract;

pub use client::{ClientError, FeedlyClient, FeedlyOptions, TOKEN_ENV};
pub use extract::FeedlyExtractor;
