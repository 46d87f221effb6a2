//! The crawl engine: frontier, write coordinator and checkpoints.
//!
//! [`run`] wires them together for one output location:
//!
//! ```text
//! Frontier ──page tasks──▶ Fetcher / Extractor
//!    ▲                          │ prepared records (bounded queue)
//!    │ item reports             ▼
//!    └────────────────── WriteCoordinator ──▶ Graph store (index.db)
//! ```

mod checkpoint;
mod coordinator;
mod frontier;
mod record;
mod retry;
mod state;
mod templates;
mod traits;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::config::{Config, ConfigError};
use crate::storage::{Database, GraphCounts, StoreError};
use crate::util::{normalize_url, origin_of, UrlError};

pub use checkpoint::{CheckpointError, CheckpointStore};
pub use coordinator::{
    apply_feed, apply_records, FeedRecord, WriteCommand, WriteCoordinator, WriterHandle, WriterOptions,
    WriterStats,
};
pub use frontier::{Frontier, FrontierOptions, FrontierOutcome, FrontierStats, RunEnd};
pub use record::{
    content_hash, BlobRecord, ItemRecord, LinkRecord, PreparedLink, PreparedRecord, Record, RecordError,
};
pub use retry::RetryPolicy;
pub use state::{
    CrawlSettings, DomainFilter, DomainState, FeedCursor, FrontierProgress, FrontierState, IdRanges, ItemOutcome,
    Promotion,
};
pub use templates::{FeedTemplate, TemplateError, TemplateSet};
pub use traits::{Content, ExtractError, Extractor, FeedMeta, FeedPage, FetchFailure, Fetcher, Resolution};

/// File name of the graph store inside the output directory.
pub const STORE_FILE: &str = "index.db";

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum CrawlError {
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The writer task stopped; its own error is reported separately.
    #[error("the store writer stopped unexpectedly")]
    WriterGone,

    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),

    #[error("no feed could be resolved for the seed {0}")]
    NoSeedFeed(String),

    #[error("invalid seed URL {seed:?}: {source}")]
    InvalidSeed {
        seed: String,
        #[source]
        source: UrlError,
    },

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to prepare output directory: {0}")]
    Io(#[from] std::io::Error),
}

// ============================================================================
// Orchestration
// ============================================================================

/// What to crawl and where.
#[derive(Debug, Clone)]
pub struct CrawlRequest {
    pub seed: String,
    pub output: PathBuf,
    /// Drop any checkpoint and start the frontier over. The store is kept and
    /// merged into.
    pub restart: bool,
}

/// Summary of a finished or interrupted run.
#[derive(Debug, Clone)]
pub struct CrawlReport {
    pub end: RunEnd,
    pub resumed: bool,
    pub progress: FrontierProgress,
    pub frontier: FrontierStats,
    pub writer: WriterStats,
    pub counts: GraphCounts,
}

/// Run (or resume) the crawl for `request.output`.
///
/// The graph store lives at `<output>/index.db` and the checkpoint next to
/// it. A checkpoint left by an earlier run of the same seed is resumed; one
/// for a different seed is refused unless `restart` is set.
pub async fn run(
    config: &Config,
    request: &CrawlRequest,
    fetcher: Arc<dyn Fetcher>,
    extractor: Arc<dyn Extractor>,
    cancel: CancellationToken,
) -> Result<CrawlReport, CrawlError> {
    let seed = normalize_url(&request.seed).map_err(|source| CrawlError::InvalidSeed {
        seed: request.seed.clone(),
        source,
    })?;
    let config = &config.with_preset(seed.as_str())?;
    let templates = config.templates()?;

    std::fs::create_dir_all(&request.output)?;
    let db = Database::open(&store_path(&request.output)).await?;

    // Checkpoint files are only touched while the store lock is held.
    let checkpoints = CheckpointStore::new(&request.output);
    let settings = CrawlSettings {
        depth_limit: config.depth_limit,
        expansion_threshold: config.expansion_threshold,
    };
    let (state, resumed) = match initial_state(&checkpoints, request.restart, &seed, settings) {
        Ok(loaded) => loaded,
        Err(e) => {
            db.close().await;
            return Err(e);
        }
    };
    if state.is_complete() {
        tracing::info!("Crawl already complete; use --restart to crawl again");
    }

    let (report_tx, report_rx) = mpsc::unbounded_channel();
    let (writer, writer_task) = WriteCoordinator::spawn(
        db.clone(),
        WriterOptions {
            queue_capacity: config.queue_capacity,
            batch_size: config.batch_size,
            flush_interval: config.flush_interval(),
        },
        report_tx,
    );

    let frontier = Frontier::new(
        state,
        DomainFilter {
            follow: config.follow_domains.clone(),
            ignore: config.ignore_domains.clone(),
        },
        templates,
        FrontierOptions {
            concurrency: config.concurrency,
            checkpoint_interval: config.checkpoint_interval(),
            drain_timeout: config.drain_timeout(),
            enable_search: config.enable_search,
            retry: RetryPolicy {
                max_attempts: config.max_page_attempts,
                base_delay: config.retry_base_delay(),
            },
        },
        fetcher,
        extractor,
        writer,
        report_rx,
        checkpoints,
    );

    // The frontier owns the last writer handle; the writer finishes once it
    // returns.
    let outcome = frontier.run(cancel).await;
    let writer_stats = match writer_task.await {
        Ok(Ok(stats)) => stats,
        Ok(Err(e)) => {
            db.close().await;
            return Err(e.into());
        }
        Err(join) => {
            tracing::error!(error = %join, "Writer task panicked");
            db.close().await;
            return Err(CrawlError::WriterGone);
        }
    };
    let outcome = match outcome {
        Ok(outcome) => outcome,
        Err(e) => {
            db.close().await;
            return Err(e);
        }
    };

    let counts = db.counts().await?;
    db.close().await;

    Ok(CrawlReport {
        end: outcome.end,
        resumed,
        progress: outcome.state.progress(),
        frontier: outcome.stats,
        writer: writer_stats,
        counts,
    })
}

/// The frontier state to start from: the saved snapshot for this seed, or a
/// fresh state when there is none or `restart` is set.
fn initial_state(
    checkpoints: &CheckpointStore,
    restart: bool,
    seed: &Url,
    settings: CrawlSettings,
) -> Result<(FrontierState, bool), CrawlError> {
    if restart {
        tracing::info!(path = %checkpoints.path().display(), "Restart requested; discarding checkpoint");
        checkpoints.discard()?;
    }

    let Some(saved) = checkpoints.load()? else {
        tracing::info!(seed = %seed, "Starting new crawl");
        return Ok((FrontierState::new(seed.as_str(), &origin_of(seed), settings), false));
    };

    if saved.seed != seed.as_str() {
        return Err(CheckpointError::SeedMismatch {
            saved: saved.seed,
            requested: seed.to_string(),
        }
        .into());
    }
    if saved.settings != settings {
        tracing::warn!(
            saved_depth_limit = saved.settings.depth_limit,
            saved_threshold = saved.settings.expansion_threshold,
            "Resumed crawl keeps its original depth limit and threshold"
        );
    }
    let p = saved.progress();
    tracing::info!(
        discovered = p.discovered,
        finished = p.finished,
        pending_feeds = saved.crawling.len(),
        pending_websites = saved.promoted.len(),
        accounted_items = saved.accounted.len(),
        path = %checkpoints.path().display(),
        "Resuming crawl from checkpoint"
    );
    Ok((saved, true))
}

pub fn store_path(output: &Path) -> String {
    output.join(STORE_FILE).to_string_lossy().into_owned()
}
