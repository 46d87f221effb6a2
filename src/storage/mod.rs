mod blobs;
mod feeds;
mod items;
mod keywords;
mod links;
mod schema;
mod stats;
mod types;
mod urls;

pub use schema::{Database, GraphTx, SCHEMA_VERSION};
pub use types::{
    BlobKind, FeedRow, GraphCounts, HyperlinkRow, ItemRow, ItemUpsert, NewItem, StoreError,
};
