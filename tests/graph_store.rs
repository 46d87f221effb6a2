//! Merge behaviour of the graph store across repeated and overlapping writes.

use chrono::{TimeZone, Utc};
use feedcluster::crawl::{apply_feed, apply_records, BlobRecord, FeedRecord, ItemRecord, LinkRecord, PreparedRecord, Record};
use feedcluster::storage::{BlobKind, Database, GraphCounts, StoreError};
use pretty_assertions::assert_eq;

const FEED: &str = "https://blog.example/feed";

fn record(entry: &str, links: &[&str], keywords: &[&str]) -> Record {
    Record {
        item: ItemRecord {
            entry_id: Some(entry.to_string()),
            url: format!("https://blog.example/posts/{entry}"),
            source_feed: FEED.to_string(),
            title: Some(format!("Post {entry}")),
            author: Some("Sam".to_string()),
            published: Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).single(),
            updated: None,
        },
        hyperlinks: links
            .iter()
            .map(|t| LinkRecord {
                target: t.to_string(),
                element: "a".to_string(),
            })
            .collect(),
        keywords: keywords.iter().map(|k| k.to_string()).collect(),
        blobs: vec![BlobRecord {
            kind: BlobKind::Summary,
            markup: format!("<p>{entry}</p>"),
        }],
    }
}

fn prepare(record: Record) -> PreparedRecord {
    record
        .prepare(Utc.with_ymd_and_hms(2024, 3, 2, 0, 0, 0).unwrap())
        .unwrap()
}

#[tokio::test]
async fn test_redelivery_is_a_no_op() {
    let db = Database::open(":memory:").await.unwrap();
    let batch = vec![
        prepare(record("1", &["https://a.example/x", "https://b.example/"], &["rust"])),
        prepare(record("2", &["https://a.example/y"], &["rust", "sqlite"])),
    ];

    let first = apply_records(&db, &batch).await.unwrap();
    let after_first = db.counts().await.unwrap();
    let second = apply_records(&db, &batch).await.unwrap();
    let after_second = db.counts().await.unwrap();

    assert!(first.iter().all(|u| u.is_new));
    assert!(second.iter().all(|u| !u.is_new));
    assert_eq!(
        first.iter().map(|u| u.id).collect::<Vec<_>>(),
        second.iter().map(|u| u.id).collect::<Vec<_>>()
    );
    assert_eq!(after_first, after_second);
    assert_eq!(
        after_second,
        GraphCounts {
            // 2 posts, the feed, 3 link targets
            urls: 6,
            items: 2,
            hyperlinks: 3,
            feeds: 0,
            keywords: 2,
            taggings: 3,
            blobs: 2,
        }
    );
    assert_eq!(db.dangling_hyperlinks().await.unwrap(), 0);
}

#[tokio::test]
async fn test_overlapping_deliveries_union_their_links() {
    let db = Database::open(":memory:").await.unwrap();
    apply_records(&db, &[prepare(record("1", &["https://a.example/", "https://b.example/"], &[]))])
        .await
        .unwrap();
    apply_records(&db, &[prepare(record("1", &["https://b.example/", "https://c.example/"], &["late"]))])
        .await
        .unwrap();

    let targets: Vec<String> = db.hyperlinks().await.unwrap().into_iter().map(|h| h.target).collect();
    assert_eq!(
        targets,
        vec!["https://a.example/", "https://b.example/", "https://c.example/"]
    );
    assert_eq!(db.counts().await.unwrap().items, 1);

    let hash = &db.items().await.unwrap()[0].content_hash;
    assert_eq!(db.keywords_for(hash).await.unwrap(), vec!["late"]);
}

#[tokio::test]
async fn test_later_delivery_refreshes_content_fields() {
    let db = Database::open(":memory:").await.unwrap();
    apply_records(&db, &[prepare(record("1", &[], &[]))]).await.unwrap();

    let mut edited = record("1", &[], &[]);
    edited.item.title = Some("Post 1 (edited)".to_string());
    edited.item.author = None;
    edited.blobs[0].markup = "<p>edited</p>".to_string();
    apply_records(&db, &[prepare(edited)]).await.unwrap();

    let items = db.items().await.unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].title.as_deref(), Some("Post 1 (edited)"));
    // A missing field never erases a known value.
    assert_eq!(items[0].author.as_deref(), Some("Sam"));
    assert_eq!(
        db.content_blob("https://blog.example/posts/1", BlobKind::Summary)
            .await
            .unwrap()
            .as_deref(),
        Some("<p>edited</p>")
    );
}

#[tokio::test]
async fn test_feed_rows_track_liveness() {
    let db = Database::open(":memory:").await.unwrap();
    apply_feed(
        &db,
        &FeedRecord {
            url: FEED.to_string(),
            title: "Blog".to_string(),
            alive: true,
        },
    )
    .await
    .unwrap();
    apply_feed(
        &db,
        &FeedRecord {
            url: FEED.to_string(),
            title: String::new(),
            alive: false,
        },
    )
    .await
    .unwrap();

    let feeds = db.feeds().await.unwrap();
    assert_eq!(feeds.len(), 1);
    assert_eq!(feeds[0].url, FEED);
    assert_eq!(feeds[0].title, "Blog");
    assert!(!feeds[0].alive);
}

#[tokio::test]
async fn test_feed_and_item_share_url_rows() {
    let db = Database::open(":memory:").await.unwrap();
    apply_records(&db, &[prepare(record("1", &[FEED], &[]))]).await.unwrap();
    apply_feed(
        &db,
        &FeedRecord {
            url: FEED.to_string(),
            title: "Blog".to_string(),
            alive: true,
        },
    )
    .await
    .unwrap();

    let counts = db.counts().await.unwrap();
    assert_eq!(counts.urls, 2);
    assert_eq!(counts.feeds, 1);
    assert!(db.url_id(FEED).await.unwrap().is_some());
    assert!(db.feed(FEED).await.unwrap().is_some_and(|f| f.alive));
}

#[tokio::test]
async fn test_store_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("index.db");
    let path = path.to_str().unwrap();
    let batch = vec![prepare(record("1", &["https://a.example/"], &["rust"]))];

    let db = Database::open(path).await.unwrap();
    apply_records(&db, &batch).await.unwrap();
    let before = db.counts().await.unwrap();
    db.close().await;

    let db = Database::open(path).await.unwrap();
    assert_eq!(db.counts().await.unwrap(), before);
    let rerun = apply_records(&db, &batch).await.unwrap();
    assert!(!rerun[0].is_new);
    assert_eq!(db.counts().await.unwrap(), before);
    db.close().await;
}

#[tokio::test]
async fn test_second_open_is_refused_while_held() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("index.db");
    let path = path.to_str().unwrap();

    let held = Database::open(path).await.unwrap();
    apply_records(&held, &[prepare(record("1", &[], &[]))]).await.unwrap();

    assert!(matches!(Database::open(path).await, Err(StoreError::InstanceLocked)));

    held.close().await;
    let reopened = Database::open(path).await.unwrap();
    assert_eq!(reopened.counts().await.unwrap().items, 1);
    reopened.close().await;
}
