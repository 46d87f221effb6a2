//! The single writer.
//!
//! Page workers hand prepared records to the coordinator over a bounded
//! channel; it batches them into transactions against the graph store and,
//! once a batch has committed, reports each stored item back to the frontier.

use lru::LruCache;
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use super::record::PreparedRecord;
use super::state::ItemOutcome;
use super::CrawlError;
use crate::storage::{Database, GraphTx, ItemUpsert, NewItem, StoreError};

const URL_CACHE_CAPACITY: NonZeroUsize = match NonZeroUsize::new(20_000) {
    Some(n) => n,
    None => unreachable!(),
};

// ============================================================================
// Commands
// ============================================================================

/// A feed row to write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedRecord {
    pub url: String,
    pub title: String,
    pub alive: bool,
}

#[derive(Debug)]
pub enum WriteCommand {
    /// Every record extracted from one fetched page. Always committed in a
    /// single transaction.
    Page { depth: u32, records: Vec<PreparedRecord> },
    Feed(FeedRecord),
    /// Commit everything received so far, then reply.
    Flush(oneshot::Sender<()>),
}

/// Sending side of the writer queue.
#[derive(Debug, Clone)]
pub struct WriterHandle {
    tx: mpsc::Sender<WriteCommand>,
}

impl WriterHandle {
    /// Queue one page. Blocks while the queue is full.
    pub async fn send_page(&self, depth: u32, records: Vec<PreparedRecord>) -> Result<(), CrawlError> {
        self.tx
            .send(WriteCommand::Page { depth, records })
            .await
            .map_err(|_| CrawlError::WriterGone)
    }

    pub async fn send_feed(&self, feed: FeedRecord) -> Result<(), CrawlError> {
        self.tx
            .send(WriteCommand::Feed(feed))
            .await
            .map_err(|_| CrawlError::WriterGone)
    }

    /// Wait until every command sent before this call is committed and its
    /// item reports are queued.
    pub async fn flush(&self) -> Result<(), CrawlError> {
        let (done_tx, done_rx) = oneshot::channel();
        self.tx
            .send(WriteCommand::Flush(done_tx))
            .await
            .map_err(|_| CrawlError::WriterGone)?;
        done_rx.await.map_err(|_| CrawlError::WriterGone)
    }
}

// ============================================================================
// URL Id Cache
// ============================================================================

/// Maps normalized URL literals to their row ids.
///
/// Ids written by the open transaction are staged separately and only become
/// visible to later batches once the transaction commits; a rolled back id
/// must never be reused.
struct UrlIdCache {
    committed: LruCache<String, i64>,
    staged: HashMap<String, i64>,
}

impl UrlIdCache {
    fn new() -> Self {
        Self {
            committed: LruCache::new(URL_CACHE_CAPACITY),
            staged: HashMap::new(),
        }
    }

    async fn resolve(&mut self, tx: &mut GraphTx, literal: &str) -> Result<i64, StoreError> {
        if let Some(&id) = self.staged.get(literal) {
            return Ok(id);
        }
        if let Some(&id) = self.committed.get(literal) {
            return Ok(id);
        }
        let id = tx.upsert_url(literal).await?;
        self.staged.insert(literal.to_string(), id);
        Ok(id)
    }

    fn commit(&mut self) {
        for (literal, id) in self.staged.drain() {
            self.committed.put(literal, id);
        }
    }

    fn discard(&mut self) {
        self.staged.clear();
    }
}

// ============================================================================
// Coordinator
// ============================================================================

#[derive(Debug, Clone, Copy)]
pub struct WriterOptions {
    pub queue_capacity: usize,
    pub batch_size: usize,
    pub flush_interval: Duration,
}

impl Default for WriterOptions {
    fn default() -> Self {
        Self {
            queue_capacity: 64,
            batch_size: 200,
            flush_interval: Duration::from_secs(2),
        }
    }
}

/// Totals over the writer's lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriterStats {
    pub batches: u64,
    pub items_written: u64,
    pub items_new: u64,
    pub feeds_written: u64,
}

enum Pending {
    Page { depth: u32, records: Vec<PreparedRecord> },
    Feed(FeedRecord),
}

pub struct WriteCoordinator {
    db: Database,
    options: WriterOptions,
    cache: UrlIdCache,
    reports: mpsc::UnboundedSender<ItemOutcome>,
    pending: Vec<Pending>,
    pending_records: usize,
    stats: WriterStats,
}

impl WriteCoordinator {
    /// Start the writer task.
    ///
    /// The task ends when every [`WriterHandle`] is dropped, after committing
    /// what it still holds. It stops early on the first store error, rolling
    /// back the open batch; the error is returned through the join handle.
    pub fn spawn(
        db: Database,
        options: WriterOptions,
        reports: mpsc::UnboundedSender<ItemOutcome>,
    ) -> (WriterHandle, JoinHandle<Result<WriterStats, StoreError>>) {
        let (tx, rx) = mpsc::channel(options.queue_capacity.max(1));
        let coordinator = Self {
            db,
            options,
            cache: UrlIdCache::new(),
            reports,
            pending: Vec::new(),
            pending_records: 0,
            stats: WriterStats::default(),
        };
        let handle = tokio::spawn(coordinator.run(rx));
        (WriterHandle { tx }, handle)
    }

    async fn run(mut self, mut rx: mpsc::Receiver<WriteCommand>) -> Result<WriterStats, StoreError> {
        let mut ticker = tokio::time::interval(self.options.flush_interval.max(Duration::from_millis(10)));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                cmd = rx.recv() => match cmd {
                    Some(WriteCommand::Page { depth, records }) => {
                        self.pending_records += records.len();
                        self.pending.push(Pending::Page { depth, records });
                        if self.pending_records >= self.options.batch_size {
                            self.commit().await?;
                        }
                    }
                    Some(WriteCommand::Feed(feed)) => {
                        self.pending_records += 1;
                        self.pending.push(Pending::Feed(feed));
                        if self.pending_records >= self.options.batch_size {
                            self.commit().await?;
                        }
                    }
                    Some(WriteCommand::Flush(done)) => {
                        self.commit().await?;
                        let _ = done.send(());
                    }
                    None => {
                        self.commit().await?;
                        tracing::debug!(batches = self.stats.batches, "Writer finished");
                        return Ok(self.stats);
                    }
                },
                _ = ticker.tick() => {
                    if !self.pending.is_empty() {
                        self.commit().await?;
                    }
                }
            }
        }
    }

    /// Apply every pending command in one transaction.
    async fn commit(&mut self) -> Result<(), StoreError> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let pending = std::mem::take(&mut self.pending);
        self.pending_records = 0;

        let mut tx = self.db.begin().await?;
        let mut outcomes = Vec::new();
        let mut feeds = 0;

        let result: Result<(), StoreError> = async {
            for entry in &pending {
                match entry {
                    Pending::Page { depth, records } => {
                        for record in records {
                            let upsert = write_record(&mut tx, &mut self.cache, record).await?;
                            outcomes.push((upsert, *depth, record.link_domains()));
                        }
                    }
                    Pending::Feed(feed) => {
                        write_feed(&mut tx, &mut self.cache, feed).await?;
                        feeds += 1;
                    }
                }
            }
            Ok(())
        }
        .await;

        let result = match result {
            Ok(()) => tx.commit().await,
            Err(e) => {
                if let Err(rollback) = tx.rollback().await {
                    tracing::warn!(error = %rollback, "Rollback failed");
                }
                Err(e)
            }
        };
        if let Err(e) = result {
            self.cache.discard();
            tracing::error!(error = %e, "Write batch failed; stopping writer");
            return Err(e);
        }
        self.cache.commit();

        self.stats.batches += 1;
        self.stats.feeds_written += feeds;
        self.stats.items_written += outcomes.len() as u64;
        tracing::debug!(items = outcomes.len(), feeds, "Committed write batch");

        for (upsert, depth, domains) in outcomes {
            if upsert.is_new {
                self.stats.items_new += 1;
            }
            // The frontier may already be gone during shutdown.
            let _ = self.reports.send(ItemOutcome {
                item_id: upsert.id,
                is_new: upsert.is_new,
                depth,
                domains,
            });
        }
        Ok(())
    }
}

/// Write one record: URL rows first, then the item, then everything that
/// references the item or its URLs.
async fn write_record(
    tx: &mut GraphTx,
    cache: &mut UrlIdCache,
    record: &PreparedRecord,
) -> Result<ItemUpsert, StoreError> {
    let result: Result<ItemUpsert, StoreError> = async {
        let url_id = cache.resolve(tx, &record.url).await?;
        let feed_id = cache.resolve(tx, &record.source_feed).await?;
        let mut targets = Vec::with_capacity(record.hyperlinks.len());
        for link in &record.hyperlinks {
            targets.push(cache.resolve(tx, &link.target).await?);
        }

        let upsert = tx
            .upsert_item(&NewItem {
                content_hash: &record.content_hash,
                url_id,
                source_feed_url_id: feed_id,
                title: record.title.as_deref(),
                author: record.author.as_deref(),
                published: record.published,
                updated: record.updated,
                crawled_at: record.crawled_at,
            })
            .await?;

        for (link, target_id) in record.hyperlinks.iter().zip(targets) {
            tx.upsert_hyperlink(url_id, target_id, &link.element).await?;
        }
        for keyword in &record.keywords {
            tx.tag(upsert.id, keyword).await?;
        }
        for blob in &record.blobs {
            tx.upsert_content_blob(url_id, blob.kind, &blob.markup).await?;
        }
        Ok(upsert)
    }
    .await;

    if let Err(e) = &result {
        if e.is_conflict() {
            tracing::error!(
                item_url = %record.url,
                source_feed = %record.source_feed,
                content_hash = %record.content_hash,
                links = record.hyperlinks.len(),
                error = %e,
                "Store conflict while writing record"
            );
        }
    }
    result
}

async fn write_feed(tx: &mut GraphTx, cache: &mut UrlIdCache, feed: &FeedRecord) -> Result<(), StoreError> {
    let url_id = cache.resolve(tx, &feed.url).await?;
    tx.upsert_feed(url_id, &feed.title, feed.alive).await
}

/// Apply `records` in one transaction, bypassing the queue.
///
/// Returns the item upsert result of each record, in order.
pub async fn apply_records(db: &Database, records: &[PreparedRecord]) -> Result<Vec<ItemUpsert>, StoreError> {
    let mut cache = UrlIdCache::new();
    let mut tx = db.begin().await?;
    let mut upserts = Vec::with_capacity(records.len());
    for record in records {
        upserts.push(write_record(&mut tx, &mut cache, record).await?);
    }
    tx.commit().await?;
    Ok(upserts)
}

/// Apply one feed row in its own transaction.
pub async fn apply_feed(db: &Database, feed: &FeedRecord) -> Result<(), StoreError> {
    let mut cache = UrlIdCache::new();
    let mut tx = db.begin().await?;
    write_feed(&mut tx, &mut cache, feed).await?;
    tx.commit().await
}
