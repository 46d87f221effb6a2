//! Feed-cluster crawler.
//!
//! Starting from one seed feed, the crawler walks outward breadth-first to
//! the feeds of websites mentioned in crawled entries and merges the
//! resulting hyperlink graph into a SQLite store. Runs can be interrupted and
//! resumed from a checkpoint, and repeated runs merge into the same store.

pub mod config;
pub mod crawl;
pub mod feed;
pub mod presets;
pub mod storage;
pub mod util;
