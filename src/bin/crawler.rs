//! Follow links from a set of discovery roots, polling everything they
//! turn up and recording every observed version.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;

use datawatch::datadiff::{Collection, LoadMode};
use datawatch::fetcher::{FetcherLoop, ReqwestFetcher};
use datawatch::methods::Codecs;
use datawatch::storage::LocalFileStorage;

/// Crawl a set of discovery roots and record every observed version.
#[derive(Debug, Parser)]
#[command(name = "crawler", version, about)]
struct Args {
    /// Root URL to discover targets from; may be repeated.
    #[arg(long = "root", required = true)]
    roots: Vec<String>,

    /// Regex for filtering discovered target URLs (match-any); may be
    /// repeated.
    #[arg(long = "target-regex", required = true)]
    target_regex: Vec<String>,

    /// User agent to send on every request.
    #[arg(long = "user-agent")]
    user_agent: String,

    /// Desired fetch delay for each target, in seconds.
    #[arg(long = "target-fetch-delay", default_value_t = 60)]
    target_fetch_delay: u64,

    /// Desired fetch delay for each discovery root, in seconds.
    #[arg(long = "rediscovery-delay", default_value_t = 300)]
    rediscovery_delay: u64,

    /// Minimum delay between the end of one fetch and the start of the
    /// next, in seconds.
    #[arg(long = "fetching-rate-limit", default_value_t = 0.2)]
    fetching_rate_limit: f64,

    /// Output directory for checkpoints.
    #[arg(long = "checkpoint-output-dir")]
    checkpoint_output_dir: PathBuf,

    /// Output directory for summaries.
    #[arg(long = "summary-output-dir")]
    summary_output_dir: Option<PathBuf>,

    /// Desired delay between summaries, in seconds.
    #[arg(long = "summary-delay", default_value_t = 3600)]
    summary_delay: u64,

    /// Desired delay between checkpoint attempts, in seconds.
    #[arg(long = "checkpoint-delay", default_value_t = 30)]
    checkpoint_delay: u64,

    /// Multiplier applied to a quiescent target's fetch interval after
    /// each run that finds no change; omit for a constant interval.
    #[arg(long = "exponential-backoff")]
    exponential_backoff: Option<f64>,

    /// Number of scheduler steps to service before exiting. The
    /// reference crawler runs forever; this bounds it for a single
    /// process invocation.
    #[arg(long, default_value_t = 1000)]
    iterations: usize,
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    std::fs::create_dir_all(&args.checkpoint_output_dir)?;

    let storage = Arc::new(LocalFileStorage::new(&args.checkpoint_output_dir)?);
    let collection = Collection::new(storage, Codecs::new(), LoadMode::OnlyFromLastCheckpoint);

    let mut loop_ = FetcherLoop::new(collection, ReqwestFetcher::with_user_agent(&args.user_agent))
        .with_target_filters(&args.target_regex)?
        .with_fetch_delay(Duration::from_secs(args.target_fetch_delay))
        .with_discovery_delay(Duration::from_secs(args.rediscovery_delay))
        .with_rate_limit(Duration::from_secs_f64(args.fetching_rate_limit));

    if let Some(factor) = args.exponential_backoff {
        loop_ = loop_.with_exponential_backoff(factor);
    }

    if let Some(summary_dir) = &args.summary_output_dir {
        std::fs::create_dir_all(summary_dir)?;
        let summary_storage = Arc::new(LocalFileStorage::new(summary_dir)?);
        let summary_collection = Collection::new(summary_storage, Codecs::new(), LoadMode::OnlyFromLastCheckpoint);
        loop_ = loop_.with_summary_collection(summary_collection);
        loop_.schedule_summary(Duration::from_secs(args.summary_delay));
    }
    loop_.schedule_checkpoint(Duration::from_secs(args.checkpoint_delay));

    for root in &args.roots {
        log::info!("tracking discovery root {root}");
        loop_.add_discovery_root(root.clone());
    }

    let outcomes = loop_.run_many(args.iterations)?;
    log::info!("completed {} scheduler steps", outcomes.len());

    let flushed = loop_.sync_and_flush()?;
    log::info!("flushed {flushed} chunks to {}", args.checkpoint_output_dir.display());

    Ok(())
}
