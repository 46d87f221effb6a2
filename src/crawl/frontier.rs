//! Breadth-first scheduling over the state table.
//!
//! The crawl advances one depth level at a time. A level first resolves the
//! websites promoted at that depth, then crawls every feed queued at that
//! depth until each is exhausted, and ends with a barrier: the writer is
//! flushed, outstanding item reports are counted, and a checkpoint is taken.
//! Reports from a level can only promote websites into the next level, so
//! no feed at depth `d + 1` starts before depth `d` is drained.

use chrono::Utc;
use futures::stream::{self, FuturesUnordered, StreamExt};
use std::collections::HashSet;
use std::pin::pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::checkpoint::CheckpointStore;
use super::coordinator::{FeedRecord, WriterHandle};
use super::record::PreparedRecord;
use super::retry::RetryPolicy;
use super::state::{DomainFilter, DomainState, FeedCursor, FrontierState, ItemOutcome, Promotion};
use super::templates::TemplateSet;
use super::traits::{Extractor, FetchFailure, Fetcher, Resolution};
use super::CrawlError;
use crate::util::normalize_url;

#[derive(Debug, Clone, Copy)]
pub struct FrontierOptions {
    pub concurrency: usize,
    pub checkpoint_interval: Duration,
    pub drain_timeout: Duration,
    /// Fall back to the fetcher's feed search when no candidate resolves.
    pub enable_search: bool,
    pub retry: RetryPolicy,
}

impl Default for FrontierOptions {
    fn default() -> Self {
        Self {
            concurrency: 8,
            checkpoint_interval: Duration::from_secs(20),
            drain_timeout: Duration::from_secs(30),
            enable_search: false,
            retry: RetryPolicy::default(),
        }
    }
}

/// How a frontier run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunEnd {
    /// Nothing left to crawl.
    Completed,
    /// Stopped by cancellation after draining and checkpointing.
    Interrupted,
}

/// Counters for one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrontierStats {
    pub pages_fetched: u64,
    pub entries_seen: u64,
    pub records_rejected: u64,
    pub feeds_confirmed: u64,
    pub feeds_dead: u64,
    pub items_reported: u64,
    pub items_new: u64,
    pub promotions: u64,
}

#[derive(Debug)]
pub struct FrontierOutcome {
    pub end: RunEnd,
    pub state: FrontierState,
    pub stats: FrontierStats,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Interrupted,
}

enum ResolveOutcome {
    Confirmed { url: String, title: Option<String> },
    /// No candidate was a feed; carries the first candidate, if any.
    Dead { candidate: Option<String> },
}

enum PageOutcome {
    Fetched {
        continuation: Option<String>,
        entries: usize,
        rejected: usize,
    },
    NotFound,
    GaveUp(FetchFailure),
}

struct PageContext {
    fetcher: Arc<dyn Fetcher>,
    extractor: Arc<dyn Extractor>,
    retry: RetryPolicy,
    writer: WriterHandle,
}

pub struct Frontier {
    state: FrontierState,
    filter: DomainFilter,
    templates: Arc<TemplateSet>,
    options: FrontierOptions,
    pages: Arc<PageContext>,
    writer: WriterHandle,
    reports: mpsc::UnboundedReceiver<ItemOutcome>,
    checkpoints: CheckpointStore,
    stats: FrontierStats,
}

impl Frontier {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        state: FrontierState,
        filter: DomainFilter,
        templates: TemplateSet,
        options: FrontierOptions,
        fetcher: Arc<dyn Fetcher>,
        extractor: Arc<dyn Extractor>,
        writer: WriterHandle,
        reports: mpsc::UnboundedReceiver<ItemOutcome>,
        checkpoints: CheckpointStore,
    ) -> Self {
        let pages = Arc::new(PageContext {
            fetcher,
            extractor,
            retry: options.retry,
            writer: writer.clone(),
        });
        Self {
            state,
            filter,
            templates: Arc::new(templates),
            options,
            pages,
            writer,
            reports,
            checkpoints,
            stats: FrontierStats::default(),
        }
    }

    /// Crawl until the frontier is empty or `cancel` fires.
    ///
    /// On cancellation no new fetch is dispatched, in-flight pages get up to
    /// the drain timeout to finish, the writer is flushed and a final
    /// checkpoint is written before returning [`RunEnd::Interrupted`].
    pub async fn run(mut self, cancel: CancellationToken) -> Result<FrontierOutcome, CrawlError> {
        let period = self.options.checkpoint_interval.max(Duration::from_millis(10));
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let end = loop {
            if cancel.is_cancelled() {
                break RunEnd::Interrupted;
            }
            let Some(depth) = self.state.next_depth() else {
                break RunEnd::Completed;
            };
            tracing::info!(
                depth,
                websites = self.state.promoted.iter().filter(|p| p.depth == depth).count(),
                feeds = self.state.crawling.iter().filter(|c| c.depth == depth).count(),
                "Starting level"
            );

            if self.resolve_level(depth, &cancel, &mut ticker).await? == Flow::Interrupted {
                break RunEnd::Interrupted;
            }
            if self.crawl_level(depth, &cancel, &mut ticker).await? == Flow::Interrupted {
                break RunEnd::Interrupted;
            }
            self.checkpoint().await?;
        };

        self.checkpoint().await?;
        match end {
            RunEnd::Completed => tracing::info!("Frontier exhausted"),
            RunEnd::Interrupted => tracing::info!("Crawl interrupted; state saved"),
        }

        Ok(FrontierOutcome {
            end,
            state: self.state,
            stats: self.stats,
        })
    }

    // ========================================================================
    // Resolution
    // ========================================================================

    async fn resolve_level(
        &mut self,
        depth: u32,
        cancel: &CancellationToken,
        ticker: &mut Interval,
    ) -> Result<Flow, CrawlError> {
        let batch: Vec<Promotion> = self
            .state
            .promoted
            .iter()
            .filter(|p| p.depth == depth)
            .cloned()
            .collect();
        if batch.is_empty() {
            return Ok(Flow::Continue);
        }

        let fetcher = Arc::clone(&self.pages.fetcher);
        let templates = Arc::clone(&self.templates);
        let retry = self.options.retry;
        let search = self.options.enable_search;

        // `buffered` keeps discovery order while resolving concurrently.
        let mut results = pin!(stream::iter(batch)
            .map(move |promotion| {
                let fetcher = Arc::clone(&fetcher);
                let templates = Arc::clone(&templates);
                async move {
                    let outcome = resolve(fetcher.as_ref(), &templates, retry, search, &promotion.query).await;
                    (promotion, outcome)
                }
            })
            .buffered(self.options.concurrency.max(1)));

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(Flow::Interrupted),
                _ = ticker.tick() => self.checkpoint().await?,
                next = results.next() => match next {
                    Some((promotion, outcome)) => self.apply_resolution(promotion, outcome).await?,
                    None => return Ok(Flow::Continue),
                },
            }
        }
    }

    async fn apply_resolution(&mut self, promotion: Promotion, outcome: ResolveOutcome) -> Result<(), CrawlError> {
        if let Some(pos) = self.state.promoted.iter().position(|p| *p == promotion) {
            self.state.promoted.remove(pos);
        }
        let depth = promotion.depth;

        let next_state = match outcome {
            ResolveOutcome::Confirmed { url, title } => {
                self.stats.feeds_confirmed += 1;
                self.writer
                    .send_feed(FeedRecord {
                        url: url.clone(),
                        title: title.unwrap_or_default(),
                        alive: true,
                    })
                    .await?;

                if !self.state.feeds.insert(url.clone()) {
                    tracing::debug!(domain = %promotion.domain, feed = %url, "Feed already scheduled");
                    DomainState::Exhausted { depth }
                } else if self.state.settings.crawls_depth(depth) {
                    tracing::info!(domain = %promotion.domain, feed = %url, depth, "Feed confirmed");
                    self.state.crawling.push_back(FeedCursor {
                        domain: promotion.domain.clone(),
                        feed_url: url.clone(),
                        depth,
                        continuation: None,
                        pages: 0,
                    });
                    DomainState::Crawling { depth, feed_url: url }
                } else {
                    tracing::debug!(domain = %promotion.domain, feed = %url, depth, "Feed beyond depth limit; recorded only");
                    DomainState::Exhausted { depth }
                }
            }
            ResolveOutcome::Dead { candidate } => {
                if depth == 0 {
                    return Err(CrawlError::NoSeedFeed(promotion.query));
                }
                self.stats.feeds_dead += 1;
                tracing::info!(domain = %promotion.domain, "No feed found");
                if let Some(url) = candidate {
                    self.writer
                        .send_feed(FeedRecord {
                            url,
                            title: String::new(),
                            alive: false,
                        })
                        .await?;
                }
                DomainState::Exhausted { depth }
            }
        };
        self.state.domains.insert(promotion.domain, next_state);
        Ok(())
    }

    // ========================================================================
    // Crawling
    // ========================================================================

    async fn crawl_level(
        &mut self,
        depth: u32,
        cancel: &CancellationToken,
        ticker: &mut Interval,
    ) -> Result<Flow, CrawlError> {
        let mut tasks = FuturesUnordered::new();
        let mut in_flight: HashSet<String> = HashSet::new();
        let mut drain_deadline: Option<Instant> = None;

        loop {
            // A page finishing in the same poll as the signal must not let
            // the next one start.
            if drain_deadline.is_none() && cancel.is_cancelled() {
                tracing::info!(in_flight = tasks.len(), "Interrupted; draining in-flight fetches");
                drain_deadline = Some(Instant::now() + self.options.drain_timeout);
            }
            if drain_deadline.is_none() {
                while tasks.len() < self.options.concurrency.max(1) {
                    let Some(cursor) = self
                        .state
                        .crawling
                        .iter()
                        .find(|c| c.depth == depth && !in_flight.contains(&c.feed_url))
                        .cloned()
                    else {
                        break;
                    };
                    in_flight.insert(cursor.feed_url.clone());
                    tasks.push(crawl_page(Arc::clone(&self.pages), cursor));
                }
            }

            if tasks.is_empty() {
                return Ok(match drain_deadline {
                    Some(_) => Flow::Interrupted,
                    None => Flow::Continue,
                });
            }

            let deadline = drain_deadline.unwrap_or_else(Instant::now);
            tokio::select! {
                biased;
                _ = cancel.cancelled(), if drain_deadline.is_none() => {
                    tracing::info!(in_flight = tasks.len(), "Interrupted; draining in-flight fetches");
                    drain_deadline = Some(Instant::now() + self.options.drain_timeout);
                }
                _ = tokio::time::sleep_until(deadline), if drain_deadline.is_some() => {
                    tracing::warn!(abandoned = tasks.len(), "Drain timeout; abandoning in-flight fetches");
                    return Ok(Flow::Interrupted);
                }
                Some(report) = self.reports.recv() => self.account(report),
                _ = ticker.tick() => self.checkpoint().await?,
                Some((cursor, outcome)) = tasks.next() => {
                    in_flight.remove(&cursor.feed_url);
                    let draining = drain_deadline.is_some() || cancel.is_cancelled();
                    self.apply_page(cursor, outcome?, draining).await?;
                }
            }
        }
    }

    /// Fold one page result into the state table. `draining` is set once the
    /// run is being interrupted.
    async fn apply_page(&mut self, cursor: FeedCursor, outcome: PageOutcome, draining: bool) -> Result<(), CrawlError> {
        match outcome {
            PageOutcome::Fetched {
                continuation,
                entries,
                rejected,
            } => {
                self.stats.pages_fetched += 1;
                self.stats.entries_seen += entries as u64;
                self.stats.records_rejected += rejected as u64;
                match continuation {
                    // A repeated token would loop forever.
                    Some(next) if cursor.continuation.as_deref() != Some(next.as_str()) => {
                        if let Some(c) = self.state.crawling.iter_mut().find(|c| c.feed_url == cursor.feed_url) {
                            c.continuation = Some(next);
                            c.pages += 1;
                        }
                    }
                    _ => self.finish_feed(&cursor, "all pages fetched"),
                }
            }
            PageOutcome::NotFound => {
                self.writer
                    .send_feed(FeedRecord {
                        url: cursor.feed_url.clone(),
                        title: String::new(),
                        alive: false,
                    })
                    .await?;
                self.finish_feed(&cursor, "feed not found");
            }
            // The cursor stays queued, so a resumed run retries the page.
            PageOutcome::GaveUp(e) if draining => {
                tracing::info!(feed = %cursor.feed_url, error = %e, "Page failed while draining; kept for resume");
            }
            PageOutcome::GaveUp(e) => {
                tracing::warn!(feed = %cursor.feed_url, error = %e, "Giving up on feed");
                self.writer
                    .send_feed(FeedRecord {
                        url: cursor.feed_url.clone(),
                        title: String::new(),
                        alive: false,
                    })
                    .await?;
                self.finish_feed(&cursor, "fetch failed");
            }
        }
        Ok(())
    }

    fn finish_feed(&mut self, cursor: &FeedCursor, reason: &str) {
        self.state.crawling.retain(|c| c.feed_url != cursor.feed_url);
        self.state
            .domains
            .insert(cursor.domain.clone(), DomainState::Exhausted { depth: cursor.depth });
        tracing::info!(
            feed = %cursor.feed_url,
            depth = cursor.depth,
            pages = cursor.pages + 1,
            reason,
            "Feed exhausted"
        );
    }

    // ========================================================================
    // Accounting and checkpoints
    // ========================================================================

    fn account(&mut self, report: ItemOutcome) {
        self.stats.items_reported += 1;
        if report.is_new {
            self.stats.items_new += 1;
        }
        let promotions = self.state.account(&report, &self.filter);
        self.stats.promotions += promotions.len() as u64;
        for p in promotions {
            tracing::info!(domain = %p.domain, depth = p.depth, "Website promoted");
        }
    }

    /// Barrier: flush the writer, count every report it produced, snapshot.
    async fn checkpoint(&mut self) -> Result<(), CrawlError> {
        self.writer.flush().await?;
        while let Ok(report) = self.reports.try_recv() {
            self.account(report);
        }
        self.checkpoints.save_async(&self.state).await?;

        let p = self.state.progress();
        tracing::info!(
            depth = self.state.next_depth().unwrap_or_default(),
            discovered = p.discovered,
            scheduled = p.scheduled,
            crawling = p.crawling,
            finished = p.finished,
            explored = %format!("{:.2}%", p.explored * 100.0),
            pages = self.stats.pages_fetched,
            items = self.stats.items_reported,
            items_new = self.stats.items_new,
            "Progress"
        );
        Ok(())
    }
}

/// Try the template candidates for `query` in order, then, with
/// `search` on, take the first usable feed the fetcher's search offers.
async fn resolve(
    fetcher: &dyn Fetcher,
    templates: &TemplateSet,
    retry: RetryPolicy,
    search: bool,
    query: &str,
) -> ResolveOutcome {
    let mut candidates = templates.candidates(query);
    if candidates.is_empty() {
        if let Ok(url) = normalize_url(query) {
            candidates.push(url.to_string());
        }
    }

    for candidate in &candidates {
        match retry.run(candidate, || fetcher.resolve_feed(candidate)).await {
            Ok(Resolution::Confirmed(meta)) => {
                let url = normalize_url(&meta.url)
                    .map(|u| u.to_string())
                    .unwrap_or_else(|_| candidate.clone());
                return ResolveOutcome::Confirmed { url, title: meta.title };
            }
            Ok(Resolution::NotAFeed) => {
                tracing::debug!(candidate = %candidate, "Not a feed");
            }
            Err(e) => {
                tracing::debug!(candidate = %candidate, error = %e, "Candidate failed");
            }
        }
    }

    if search {
        match retry.run(query, || fetcher.search_feeds(query)).await {
            Ok(found) => {
                if let Some((url, title)) = found
                    .into_iter()
                    .find_map(|meta| normalize_url(&meta.url).ok().map(|u| (u.to_string(), meta.title)))
                {
                    tracing::info!(query, feed = %url, "Feed found by search");
                    return ResolveOutcome::Confirmed { url, title };
                }
                tracing::debug!(query, "Search found no feed");
            }
            Err(e) => tracing::debug!(query, error = %e, "Feed search failed"),
        }
    }

    ResolveOutcome::Dead {
        candidate: candidates.into_iter().next(),
    }
}

/// Fetch one page of a feed and queue its records for the writer.
///
/// All records of the page go to the writer in one command, so a page is
/// either fully queued or not at all.
async fn crawl_page(ctx: Arc<PageContext>, cursor: FeedCursor) -> (FeedCursor, Result<PageOutcome, CrawlError>) {
    let fetched = ctx
        .retry
        .run(&cursor.feed_url, || {
            ctx.fetcher.fetch_page(&cursor.feed_url, cursor.continuation.as_deref())
        })
        .await;

    let page = match fetched {
        Ok(page) => page,
        Err(FetchFailure::NotFound) => return (cursor, Ok(PageOutcome::NotFound)),
        Err(e) => return (cursor, Ok(PageOutcome::GaveUp(e))),
    };

    let crawled_at = Utc::now();
    let mut records: Vec<PreparedRecord> = Vec::with_capacity(page.entries.len());
    for entry in &page.entries {
        let record = match ctx.extractor.parse(entry) {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(feed = %cursor.feed_url, error = %e, "Skipping entry");
                continue;
            }
        };
        match record.prepare(crawled_at) {
            Ok(r) => records.push(r),
            Err(e) => tracing::warn!(feed = %cursor.feed_url, error = %e, "Skipping record"),
        }
    }
    tracing::debug!(
        feed = %cursor.feed_url,
        page = cursor.pages + 1,
        entries = page.entries.len(),
        records = records.len(),
        "Fetched page"
    );

    let records_len = records.len();
    if !records.is_empty() {
        if let Err(e) = ctx.writer.send_page(cursor.depth, records).await {
            return (cursor, Err(e));
        }
    }
    let entries = page.entries.len();
    (
        cursor,
        Ok(PageOutcome::Fetched {
            continuation: page.continuation,
            entries,
            rejected: entries - records_len,
        }),
    )
}
