//! The crawler: a [`scheduling::SchedulingLoop`] of discovery roots and
//! fetch targets feeding a [`datadiff::Collection`], plus periodic
//! non-fetching tasks (checkpoint flush, cross-collection summary) driven
//! through the same loop.

mod http;
mod links;

pub use http::{FetchedBody, HttpError, HttpFetcher, ReqwestFetcher};
pub use links::{compile_target_filters, extract_links, matches_any_filter};

use std::collections::{HashMap, HashSet};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use regex::Regex;
use thiserror::Error;

use crate::datadiff::{Collection, DatadiffError};
use crate::scheduling::{Delay, Priority, RunOutcome, SchedulerError, SchedulingLoop, SystemClock, Task};

/// Errors raised while running the crawl loop.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The scheduling loop itself failed (e.g. an empty queue).
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),
    /// The storage engine failed to record a fetched body.
    #[error(transparent)]
    Storage(#[from] DatadiffError),
    /// A `--target-regex` pattern failed to compile.
    #[error(transparent)]
    BadFilter(#[from] regex::Error),
}

/// Default delay between fetches of one target, before backoff.
pub const DEFAULT_FETCH_DELAY: Duration = Duration::from_secs(60);
/// Default delay between re-running link discovery on one root.
pub const DEFAULT_DISCOVERY_DELAY: Duration = Duration::from_secs(300);
/// Default minimum delay between the end of one fetch and the start of
/// the next, across every target.
pub const DEFAULT_RATELIMIT: Duration = Duration::from_millis(200);
/// Fuzz ratio applied to the global rate limit and to a target's own
/// delay, matching the reference scheduler's default.
pub const DEFAULT_FUZZ_RATIO: f64 = 0.5;
/// How long a discovery root waits before its first run.
const INITIAL_DISCOVERY_DELAY: Duration = Duration::from_secs(1);
/// Backoff has no cap in the reference implementation; this bounds it so
/// a quiescent target's interval cannot grow without limit.
const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(7 * 24 * 3600);

const DISCOVERY_PREFIX: &str = "discover:";
const CHECKPOINT_TASK_ID: &str = "__checkpoint__";
const SUMMARY_TASK_ID: &str = "__summary__";

fn discovery_task_id(root: &str) -> String {
    format!("{DISCOVERY_PREFIX}{root}")
}

fn decode_discovery_id(id: &str) -> Option<&str> {
    id.strip_prefix(DISCOVERY_PREFIX)
}

fn current_version() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock is after the Unix epoch")
        .as_nanos()
        .to_string()
}

/// Drives a [`Collection`] by polling discovery roots and the fetch
/// targets they turn up, plus whatever periodic housekeeping tasks have
/// been scheduled alongside them.
pub struct FetcherLoop<F: HttpFetcher> {
    collection: Collection,
    scheduler: SchedulingLoop<SystemClock>,
    http: F,
    target_filters: Vec<Regex>,
    /// Every target currently claimed by each discovery root's last run.
    /// A fetch task reschedules only while its url is still claimed by
    /// at least one root; once every root's discovery run drops it, the
    /// next fetch leaves it unscheduled.
    targets_by_root: HashMap<String, HashSet<String>>,
    fetch_delay: Duration,
    discovery_delay: Duration,
    backoff_factor: Option<f64>,
    summary_collection: Option<Collection>,
}

impl<F: HttpFetcher> FetcherLoop<F> {
    /// Build a crawl loop over `collection`, fetching with `http`.
    pub fn new(collection: Collection, http: F) -> Self {
        Self {
            collection,
            scheduler: SchedulingLoop::new(SystemClock::new(), DEFAULT_RATELIMIT, DEFAULT_FUZZ_RATIO),
            http,
            target_filters: Vec::new(),
            targets_by_root: HashMap::new(),
            fetch_delay: DEFAULT_FETCH_DELAY,
            discovery_delay: DEFAULT_DISCOVERY_DELAY,
            backoff_factor: None,
            summary_collection: None,
        }
    }

    /// Only follow discovered links matching at least one of `patterns`
    /// (match-any, like the reference crawler's `--target-regex`).
    pub fn with_target_filters<S: AsRef<str>>(mut self, patterns: &[S]) -> Result<Self, FetchError> {
        let owned: Vec<String> = patterns.iter().map(|p| p.as_ref().to_string()).collect();
        self.target_filters = compile_target_filters(&owned)?;
        Ok(self)
    }

    /// Override the minimum delay between the end of one fetch and the
    /// start of the next.
    pub fn with_rate_limit(mut self, base_delay: Duration) -> Self {
        self.scheduler = SchedulingLoop::new(SystemClock::new(), base_delay, DEFAULT_FUZZ_RATIO);
        self
    }

    /// Override the delay between fetches of one target.
    pub fn with_fetch_delay(mut self, delay: Duration) -> Self {
        self.fetch_delay = delay;
        self
    }

    /// Override the delay between discovery runs on one root.
    pub fn with_discovery_delay(mut self, delay: Duration) -> Self {
        self.discovery_delay = delay;
        self
    }

    /// Grow a target's fetch interval by `factor` on every consecutive
    /// unchanged run, resetting to the base delay the moment it changes.
    pub fn with_exponential_backoff(mut self, factor: f64) -> Self {
        self.backoff_factor = Some(factor);
        self
    }

    /// Periodically republish this loop's collection into a separate
    /// summary collection (see [`Collection::summarize_to`]).
    pub fn with_summary_collection(mut self, summary: Collection) -> Self {
        self.summary_collection = Some(summary);
        self
    }

    /// Track and immediately schedule a fetch target directly, without
    /// requiring link discovery to have found it. The target is treated
    /// as its own root for liveness purposes, so it keeps rescheduling
    /// indefinitely.
    pub fn add_target(&mut self, url: impl Into<String>) {
        let url = url.into();
        self.targets_by_root.entry(url.clone()).or_default().insert(url.clone());
        self.schedule_fetch_target(url);
    }

    /// Start periodically following links found on `root`, scheduling a
    /// fetch task for every newly discovered target matching the
    /// configured target filters.
    pub fn add_discovery_root(&mut self, root: impl Into<String>) {
        let root = root.into();
        self.targets_by_root.entry(root.clone()).or_default();
        self.scheduler.push(Task::new(
            discovery_task_id(&root),
            Priority::Low,
            INITIAL_DISCOVERY_DELAY,
            Delay::Fixed(self.discovery_delay),
        ));
    }

    /// Periodically flush pending writes to storage, exempt from the
    /// global rate limit so housekeeping never waits behind fetch
    /// traffic.
    pub fn schedule_checkpoint(&mut self, delay: Duration) {
        self.scheduler.push(
            Task::new(CHECKPOINT_TASK_ID, Priority::High, delay, Delay::Fixed(delay)).without_global_ratelimit(),
        );
    }

    /// Periodically republish into the collection configured via
    /// [`FetcherLoop::with_summary_collection`]. No-op if none was set.
    pub fn schedule_summary(&mut self, delay: Duration) {
        if self.summary_collection.is_none() {
            return;
        }
        self.scheduler
            .push(Task::new(SUMMARY_TASK_ID, Priority::High, delay, Delay::Fixed(delay)).without_global_ratelimit());
    }

    fn schedule_fetch_target(&mut self, url: String) {
        let delay = match self.backoff_factor {
            Some(factor) => Delay::Backoff {
                base: self.fetch_delay,
                max: DEFAULT_MAX_BACKOFF,
                factor,
            },
            None => Delay::Fixed(self.fetch_delay),
        };
        self.scheduler.push(Task::new(url, Priority::Normal, self.fetch_delay, delay));
    }

    /// Every currently tracked URL, grouped by the root that currently
    /// claims it.
    pub fn targets_by_root(&self) -> &HashMap<String, HashSet<String>> {
        &self.targets_by_root
    }

    /// Service exactly one due task: a discovery run, a fetch, or a
    /// scheduled housekeeping callback.
    pub fn run_once(&mut self) -> Result<RunOutcome, FetchError> {
        let mut discovered: Option<(String, HashSet<String>)> = None;

        let outcome = {
            let collection = &mut self.collection;
            let http = &self.http;
            let filters = &self.target_filters;
            let targets_by_root = &self.targets_by_root;
            let mut summary_collection = self.summary_collection.as_mut();
            let discovered = &mut discovered;

            self.scheduler.step(|task| {
                if task.id == CHECKPOINT_TASK_ID {
                    return match collection.sync_and_flush() {
                        Ok(_) => RunOutcome::Unchanged,
                        Err(e) => {
                            log::warn!("checkpoint flush failed: {e}");
                            RunOutcome::Failed
                        }
                    };
                }
                if task.id == SUMMARY_TASK_ID {
                    return match summary_collection.as_deref_mut() {
                        Some(summary) => match collection.summarize_to(summary) {
                            Ok(_) => RunOutcome::Unchanged,
                            Err(e) => {
                                log::warn!("summary failed: {e}");
                                RunOutcome::Failed
                            }
                        },
                        None => RunOutcome::Done,
                    };
                }
                if let Some(root) = decode_discovery_id(&task.id) {
                    return run_discovery(http, root, filters, discovered);
                }
                run_fetch(collection, http, &task.id, targets_by_root)
            })?
        };

        if let Some((root, newly_discovered)) = discovered {
            let already_tracked: HashSet<String> =
                self.targets_by_root.values().flatten().cloned().collect();
            let brand_new: Vec<String> = newly_discovered
                .iter()
                .filter(|url| !already_tracked.contains(*url))
                .cloned()
                .collect();
            self.targets_by_root.insert(root, newly_discovered);
            for url in brand_new {
                self.schedule_fetch_target(url);
            }
        }

        Ok(outcome)
    }

    /// Run up to `iterations` steps, stopping early if the queue empties.
    pub fn run_many(&mut self, iterations: usize) -> Result<Vec<RunOutcome>, FetchError> {
        let mut outcomes = Vec::with_capacity(iterations);
        for _ in 0..iterations {
            if self.scheduler.is_empty() {
                break;
            }
            outcomes.push(self.run_once()?);
        }
        Ok(outcomes)
    }

    /// Flush every pending change to storage.
    pub fn sync_and_flush(&mut self) -> Result<usize, DatadiffError> {
        self.collection.sync_and_flush()
    }

    /// Access the underlying collection, e.g. to read a fetched value.
    pub fn collection_mut(&mut self) -> &mut Collection {
        &mut self.collection
    }
}

/// Fetch a discovery root, extract its links, and filter them. Always
/// reports `Unchanged`, since discovery runs reschedule unconditionally
/// on a fixed delay regardless of what they find.
fn run_discovery<F: HttpFetcher>(
    http: &F,
    root: &str,
    filters: &[Regex],
    discovered: &mut Option<(String, HashSet<String>)>,
) -> RunOutcome {
    let body = match http.fetch(root) {
        Ok(body) => body,
        Err(e) => {
            log::warn!("discovery fetch of {root} failed: {e}");
            return RunOutcome::Failed;
        }
    };
    let links = extract_links(&body.final_url, &body.bytes);
    let matching: HashSet<String> = links.into_iter().filter(|link| matches_any_filter(link, filters)).collect();
    *discovered = Some((root.to_string(), matching));
    RunOutcome::Unchanged
}

/// Fetch a tracked target and record it. Reports [`RunOutcome::Done`]
/// once no discovery root claims this url anymore, so it stops being
/// rescheduled.
fn run_fetch<F: HttpFetcher>(
    collection: &mut Collection,
    http: &F,
    url: &str,
    targets_by_root: &HashMap<String, HashSet<String>>,
) -> RunOutcome {
    let body = match http.fetch(url) {
        Ok(body) => body,
        Err(e) => {
            log::warn!("fetch of {url} failed: {e}");
            return RunOutcome::Failed;
        }
    };
    let changed = match collection.update_data(url, current_version(), body.bytes) {
        Ok(changed) => changed,
        Err(e) => {
            log::warn!("recording {url} failed: {e}");
            return RunOutcome::Failed;
        }
    };
    let still_claimed = targets_by_root.values().any(|claimed| claimed.contains(url));
    if !still_claimed {
        return RunOutcome::Done;
    }
    if changed {
        RunOutcome::Changed
    } else {
        RunOutcome::Unchanged
    }
}

#[cfg(test)]
mod tests {
    use super::http::MockFetcher;
    use super::*;
    use crate::datadiff::LoadMode;
    use crate::methods::Codecs;
    use crate::storage::InMemoryStorage;
    use std::sync::Arc;

    fn collection() -> Collection {
        Collection::new(Arc::new(InMemoryStorage::new()), Codecs::new(), LoadMode::FullHistory)
    }

    fn fetcher_loop(responses: HashMap<String, Result<FetchedBody, String>>) -> FetcherLoop<MockFetcher> {
        FetcherLoop::new(collection(), MockFetcher { responses })
            .with_rate_limit(Duration::ZERO)
            .with_fetch_delay(Duration::ZERO)
    }

    #[test]
    fn run_once_records_a_directly_added_target() {
        let mut responses = HashMap::new();
        responses.insert(
            "https://example.com/".to_string(),
            Ok(FetchedBody {
                final_url: "https://example.com/".to_string(),
                bytes: b"hello world".to_vec(),
                content_type: Some("text/plain".to_string()),
            }),
        );
        let mut loop_ = fetcher_loop(responses);
        loop_.add_target("https://example.com/");
        let outcome = loop_.run_once().unwrap();
        assert_eq!(outcome, RunOutcome::Changed);
    }

    #[test]
    fn discovery_root_schedules_only_matching_links() {
        let mut responses = HashMap::new();
        responses.insert(
            "https://example.com/".to_string(),
            Ok(FetchedBody {
                final_url: "https://example.com/".to_string(),
                bytes: br#"<a href="/docs/a">a</a><a href="/blog/b">b</a>"#.to_vec(),
                content_type: Some("text/html".to_string()),
            }),
        );
        let mut loop_ = fetcher_loop(responses)
            .with_target_filters(&[r"^https://example\.com/docs/.*"])
            .unwrap();
        loop_.add_discovery_root("https://example.com/");
        loop_.run_once().unwrap();
        let tracked = loop_.targets_by_root();
        let under_root = &tracked["https://example.com/"];
        assert!(under_root.contains("https://example.com/docs/a"));
        assert!(!under_root.contains("https://example.com/blog/b"));
    }

    #[test]
    fn fetch_target_stops_rescheduling_once_unclaimed() {
        let mut responses = HashMap::new();
        responses.insert(
            "https://example.com/".to_string(),
            Ok(FetchedBody {
                final_url: "https://example.com/".to_string(),
                bytes: br#"<a href="/docs/a">a</a>"#.to_vec(),
                content_type: Some("text/html".to_string()),
            }),
        );
        responses.insert(
            "https://example.com/docs/a".to_string(),
            Ok(FetchedBody {
                final_url: "https://example.com/docs/a".to_string(),
                bytes: b"v1".to_vec(),
                content_type: Some("text/plain".to_string()),
            }),
        );
        let mut loop_ = fetcher_loop(responses)
            .with_target_filters(&[r"^https://example\.com/docs/.*"])
            .unwrap()
            .with_discovery_delay(Duration::from_secs(10_000));
        loop_.add_discovery_root("https://example.com/");
        // Discovery run: finds /docs/a, schedules its fetch.
        loop_.run_once().unwrap();
        // First fetch of /docs/a: still claimed, reschedules.
        let first = loop_.run_once().unwrap();
        assert_eq!(first, RunOutcome::Changed);
        // A second, unrelated discovery result drops the target from
        // every root's claimed set before the target's next fetch runs.
        loop_.targets_by_root.insert("https://example.com/".to_string(), HashSet::new());
        let second = loop_.run_once().unwrap();
        assert_eq!(second, RunOutcome::Done);
    }

    #[test]
    fn checkpoint_task_flushes_the_collection() {
        let mut loop_ = fetcher_loop(HashMap::new());
        loop_.collection_mut().update_data("k", "1".to_string(), b"v".to_vec()).unwrap();
        loop_.schedule_checkpoint(Duration::ZERO);
        let outcome = loop_.run_once().unwrap();
        assert_eq!(outcome, RunOutcome::Unchanged);
        assert!(!loop_.collection_mut().entry("k").unwrap().unwrap().is_dirty());
    }

    #[test]
    fn summary_task_republishes_into_the_configured_collection() {
        let mut loop_ = fetcher_loop(HashMap::new());
        loop_.collection_mut().update_data("k", "1".to_string(), b"v".to_vec()).unwrap();
        loop_.collection_mut().sync_and_flush().unwrap();
        let summary = collection();
        loop_ = loop_.with_summary_collection(summary);
        loop_.schedule_summary(Duration::ZERO);
        let outcome = loop_.run_once().unwrap();
        assert_eq!(outcome, RunOutcome::Unchanged);
    }

    #[test]
    fn failed_fetch_reports_failed_outcome() {
        let mut loop_ = fetcher_loop(HashMap::new());
        loop_.add_target("https://example.com/missing");
        let outcome = loop_.run_once().unwrap();
        assert_eq!(outcome, RunOutcome::Failed);
    }
}
