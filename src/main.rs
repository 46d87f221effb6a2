use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use feedcluster::config::Config;
use feedcluster::crawl::{self, CrawlError, CrawlReport, CrawlRequest, RunEnd};
use feedcluster::feed::{FeedlyClient, FeedlyExtractor, FeedlyOptions};
use feedcluster::storage::StoreError;

const CONFIG_FILE: &str = "feedcluster.toml";

#[derive(Parser, Debug)]
#[command(
    name = "feedcluster",
    about = "Crawl the cluster of feeds around a seed feed into a hyperlink graph"
)]
struct Args {
    /// Seed feed URL
    #[arg(long, value_name = "URL")]
    feed: String,

    /// Output directory for the graph store and checkpoints
    #[arg(long, value_name = "DIR", default_value = "./crawl")]
    output: PathBuf,

    /// Configuration file [default: <output>/feedcluster.toml]
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Maximum crawl depth (seed = 0, 0 = unlimited)
    #[arg(long)]
    depth_limit: Option<u32>,

    /// Items mentioning a website before its feed is crawled
    #[arg(long)]
    threshold: Option<u32>,

    /// Concurrent fetches
    #[arg(long)]
    concurrency: Option<usize>,

    /// Site preset to apply (tumblr, wordpress, livejournal, none)
    #[arg(long, value_name = "NAME")]
    preset: Option<String>,

    /// Use the API's feed search when no candidate URL resolves
    #[arg(long)]
    search: bool,

    /// Discard the checkpoint and start the frontier over (the store is kept)
    #[arg(long)]
    restart: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let config_path = args.config.clone().unwrap_or_else(|| args.output.join(CONFIG_FILE));
    let mut config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;
    if let Some(depth_limit) = args.depth_limit {
        config.depth_limit = depth_limit;
    }
    if let Some(threshold) = args.threshold {
        config.expansion_threshold = threshold;
    }
    if let Some(concurrency) = args.concurrency {
        config.concurrency = concurrency;
    }
    if let Some(preset) = args.preset.clone() {
        config.preset = Some(preset);
    }
    if args.search {
        config.enable_search = true;
    }
    config.validate().context("Invalid configuration")?;

    let fetcher = FeedlyClient::new(FeedlyOptions::from_config(&config)).context("Failed to create HTTP client")?;

    let cancel = CancellationToken::new();
    let signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupt received; finishing in-flight work and saving a checkpoint");
            signal.cancel();
        }
    });

    let request = CrawlRequest {
        seed: args.feed.clone(),
        output: args.output.clone(),
        restart: args.restart,
    };
    let report = match crawl::run(
        &config,
        &request,
        Arc::new(fetcher),
        Arc::new(FeedlyExtractor::new()),
        cancel,
    )
    .await
    {
        Ok(report) => report,
        Err(CrawlError::Store(StoreError::InstanceLocked)) => {
            eprintln!(
                "Error: Another crawl is already writing to {}. Wait for it to finish and try again.",
                args.output.display()
            );
            std::process::exit(1);
        }
        Err(e) => return Err(e).context("Crawl failed"),
    };

    print_summary(&report);
    if report.end == RunEnd::Interrupted {
        println!();
        println!("Crawl interrupted. Run the same command again to resume:");
        println!("  feedcluster --feed {} --output {}", args.feed, args.output.display());
    }
    Ok(())
}

fn print_summary(report: &CrawlReport) {
    let p = &report.progress;
    let c = &report.counts;
    println!(
        "{} crawl{}",
        match report.end {
            RunEnd::Completed => "Completed",
            RunEnd::Interrupted => "Interrupted",
        },
        if report.resumed { " (resumed)" } else { "" }
    );
    println!(
        "  websites: {} discovered, {} scheduled, {} finished ({:.0}% explored)",
        p.discovered,
        p.scheduled,
        p.finished,
        p.explored * 100.0
    );
    println!(
        "  this run: {} pages, {} items ({} new), {} feeds confirmed, {} dead",
        report.frontier.pages_fetched,
        report.writer.items_written,
        report.writer.items_new,
        report.frontier.feeds_confirmed,
        report.frontier.feeds_dead
    );
    println!(
        "  store:    {} urls, {} items, {} hyperlinks, {} feeds, {} keywords",
        c.urls, c.items, c.hyperlinks, c.feeds, c.keywords
    );
}
