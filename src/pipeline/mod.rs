//! Feed processing pipeline.
//!
//! The [`Pipeline`] loads the feed list from a [`FeedDirectory`], then drains
//! it with a bounded pool of feed workers. Each feed worker fetches and parses
//! one feed, registers its entries with the [`EntryStore`], and hands them to
//! a per-feed pool of entry workers that run the [`ContentCleaner`]. Both
//! levels use the same [`WorkerPool`] primitive.
//!
//! All state lives in the entry store and the feed state tracker; every
//! mutation is pushed to subscribers as a [`PipelineEvent`].
//!
//! ```ignore
//! let pipeline = Pipeline::builder(directory, fetcher, cleaner).build();
//! let mut updates = pipeline.subscribe();
//! pipeline.initialize_feeds().await?;
//! while let Some(event) = updates.recv().await { /* render */ }
//! ```

mod entry_worker;
mod feed_worker;
mod pool;

pub use pool::{PoolReport, WorkerPool};

use serde::Serialize;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::{mpsc, watch, Semaphore};

use crate::content::ContentCleaner;
use crate::events::{EventBus, PipelineEvent};
use crate::feed::{DirectoryError, DocumentFetcher, FeedDirectory, FETCH_TIMEOUT};
use crate::storage::{
    Entry, EntryStatus, EntryStore, Feed, FeedState, FeedStateTracker, FeedStatus, ReadState,
};
use feed_worker::drive_feed;

/// Concurrent feed workers in the global pool.
pub const FEED_WORKERS: usize = 5;
/// Concurrent entry workers per feed.
pub const ENTRY_WORKERS: usize = 5;
/// Entries kept per feed, in document order.
pub const MAX_ENTRIES_PER_FEED: usize = 15;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineConfig {
    pub feed_workers: usize,
    pub entry_workers: usize,
    pub fetch_timeout: Duration,
    pub max_entries_per_feed: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            feed_workers: FEED_WORKERS,
            entry_workers: ENTRY_WORKERS,
            fetch_timeout: FETCH_TIMEOUT,
            max_entries_per_feed: MAX_ENTRIES_PER_FEED,
        }
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Failed to load feed list: {0}")]
    Directory(#[from] DirectoryError),

    #[error("Unknown feed: {0}")]
    UnknownFeed(String),

    #[error("Pipeline is shutting down")]
    Closed,
}

/// Point-in-time counts over the whole pipeline.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PipelineSummary {
    pub feeds: usize,
    pub feeds_ready: usize,
    pub feeds_failed: usize,
    pub feeds_pending: usize,
    pub entries: usize,
    pub entries_cleaned: usize,
    pub entries_rejected: usize,
    pub entries_pending: usize,
}

impl PipelineSummary {
    /// True once every feed has reached `Ready` or `Error`.
    pub fn is_settled(&self) -> bool {
        self.feeds_pending == 0
    }
}

/// State shared by the orchestrator and every worker.
pub(crate) struct Shared {
    pub(crate) config: PipelineConfig,
    pub(crate) directory: Arc<dyn FeedDirectory>,
    pub(crate) fetcher: Arc<dyn DocumentFetcher>,
    pub(crate) cleaner: Arc<dyn ContentCleaner>,
    pub(crate) read_state: Option<Arc<dyn ReadState>>,
    pub(crate) entries: EntryStore,
    pub(crate) states: FeedStateTracker,
    pub(crate) events: EventBus,
    feeds: RwLock<Arc<Vec<Feed>>>,
    /// Id of the background run in progress, if any.
    active_run: watch::Sender<Option<u64>>,
    next_run: AtomicU64,
    retry_permits: Semaphore,
}

/// Marks the owning run finished when dropped, unless a clear or a newer
/// run has already taken its place.
struct RunGuard {
    shared: Arc<Shared>,
    run_id: u64,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        let run_id = self.run_id;
        self.shared.active_run.send_if_modified(|active| {
            if *active == Some(run_id) {
                *active = None;
                true
            } else {
                false
            }
        });
    }
}

/// Builds a [`Pipeline`] from its collaborators.
pub struct PipelineBuilder {
    config: PipelineConfig,
    directory: Arc<dyn FeedDirectory>,
    fetcher: Arc<dyn DocumentFetcher>,
    cleaner: Arc<dyn ContentCleaner>,
    read_state: Option<Arc<dyn ReadState>>,
}

impl PipelineBuilder {
    pub fn config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn read_state(mut self, read_state: Arc<dyn ReadState>) -> Self {
        self.read_state = Some(read_state);
        self
    }

    pub fn build(self) -> Pipeline {
        let events = EventBus::new();
        let (active_run, _) = watch::channel(None);
        Pipeline {
            shared: Arc::new(Shared {
                retry_permits: Semaphore::new(self.config.feed_workers.max(1)),
                config: self.config,
                directory: self.directory,
                fetcher: self.fetcher,
                cleaner: self.cleaner,
                read_state: self.read_state,
                entries: EntryStore::new(events.clone()),
                states: FeedStateTracker::new(events.clone()),
                events,
                feeds: RwLock::new(Arc::new(Vec::new())),
                active_run,
                next_run: AtomicU64::new(1),
            }),
        }
    }
}

/// Handle to the feed processing pipeline.
///
/// Cheap to clone; clones share all state.
#[derive(Clone)]
pub struct Pipeline {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("config", &self.shared.config)
            .field("feeds", &self.feeds().len())
            .field("entries", &self.shared.entries.len())
            .field("running", &self.is_running())
            .finish()
    }
}

impl Pipeline {
    pub fn builder(
        directory: Arc<dyn FeedDirectory>,
        fetcher: Arc<dyn DocumentFetcher>,
        cleaner: Arc<dyn ContentCleaner>,
    ) -> PipelineBuilder {
        PipelineBuilder {
            config: PipelineConfig::default(),
            directory,
            fetcher,
            cleaner,
            read_state: None,
        }
    }

    pub fn config(&self) -> PipelineConfig {
        self.shared.config
    }

    /// Loads the feed list and starts processing every feed in the
    /// background.
    ///
    /// Returns as soon as the feed list is loaded and every feed has been
    /// seeded as `Idle`. Processing continues on a spawned task; use
    /// [`Pipeline::wait`] or the update subscription to follow it.
    ///
    /// Idempotent while a run is in progress: a second call starts nothing
    /// and returns the feed list of the current run. Calling it after a run
    /// has finished replaces all entries and states with a fresh run.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Directory`] if the feed list cannot be
    /// loaded. Nothing is seeded in that case and a later call may retry.
    pub async fn initialize_feeds(&self) -> Result<Vec<Feed>, PipelineError> {
        let run_id = self.shared.next_run.fetch_add(1, Ordering::Relaxed);
        let started = self.shared.active_run.send_if_modified(|active| {
            if active.is_some() {
                false
            } else {
                *active = Some(run_id);
                true
            }
        });
        if !started {
            tracing::debug!("Pipeline run already in progress, initialize ignored");
            return Ok(self.feeds());
        }
        let guard = RunGuard {
            shared: Arc::clone(&self.shared),
            run_id,
        };

        let listed = self.shared.directory.list_feeds().await?;
        let feeds = dedupe_feeds(listed);

        if !self.shared.entries.is_empty() || !self.shared.states.all().is_empty() {
            self.shared.events.publish(PipelineEvent::Cleared);
        }
        self.shared.entries.clear();
        *self
            .shared
            .feeds
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Arc::new(feeds.clone());
        self.shared.events.publish(PipelineEvent::FeedsLoaded {
            feeds: feeds.clone(),
        });

        let generations = self.shared.states.seed(&feeds);
        let work: Vec<(Feed, u64)> = feeds
            .iter()
            .filter_map(|feed| {
                let generation = *generations.get(&feed.id)?;
                self.shared.entries.begin_run(&feed.id, generation);
                Some((feed.clone(), generation))
            })
            .collect();

        tracing::info!(
            run = run_id,
            feeds = work.len(),
            workers = self.shared.config.feed_workers,
            "Pipeline run started"
        );

        let shared = Arc::clone(&self.shared);
        tokio::spawn(async move {
            let _guard = guard;
            run_feeds(&shared, run_id, work).await;
        });

        Ok(feeds)
    }

    /// Waits for the background run started by
    /// [`Pipeline::initialize_feeds`]. Returns immediately when no run is in
    /// progress.
    pub async fn wait(&self) {
        let mut rx = self.shared.active_run.subscribe();
        // The sender lives as long as `self`, so this cannot fail
        let _ = rx.wait_for(Option::is_none).await;
    }

    pub fn is_running(&self) -> bool {
        self.shared.active_run.borrow().is_some()
    }

    /// Re-drives one feed from scratch and returns its final state.
    ///
    /// The feed's entries are purged and its state reset to `Idle` under a
    /// new run generation, so anything an earlier run of the same feed still
    /// has in flight is discarded. Other feeds are left untouched; this is
    /// safe to call while the background run is busy with them.
    ///
    /// Retries run outside the global feed pool, but concurrent retries are
    /// capped at `feed_workers`.
    ///
    /// # Errors
    ///
    /// - [`PipelineError::UnknownFeed`] - the id is not in the loaded feed list
    /// - [`PipelineError::Closed`] - the retry limiter was shut down
    pub async fn retry_feed(&self, feed_id: &str) -> Result<FeedState, PipelineError> {
        let feed = self
            .feeds()
            .into_iter()
            .find(|f| f.id == feed_id)
            .ok_or_else(|| PipelineError::UnknownFeed(feed_id.to_string()))?;

        let _permit = self
            .shared
            .retry_permits
            .acquire()
            .await
            .map_err(|_| PipelineError::Closed)?;

        let generation = self.shared.states.reset(feed_id);
        self.shared.entries.begin_run(feed_id, generation);
        tracing::info!(feed_id = %feed_id, generation = generation, "Retrying feed");

        drive_feed(&self.shared, &feed, generation).await;

        self.shared
            .states
            .get(feed_id)
            .ok_or_else(|| PipelineError::UnknownFeed(feed_id.to_string()))
    }

    pub fn get_feed_state(&self, feed_id: &str) -> Option<FeedState> {
        self.shared.states.get(feed_id)
    }

    /// All feed states in feed-list order.
    pub fn feed_states(&self) -> Vec<FeedState> {
        self.shared.states.all()
    }

    /// Entries of one feed in registration (document) order.
    pub fn get_entries_by_feed(&self, feed_id: &str) -> Vec<Entry> {
        self.shared.entries.get_by_feed(feed_id)
    }

    pub fn entries(&self) -> Vec<Entry> {
        self.shared.entries.all()
    }

    pub fn get_entry(&self, entry_id: &str) -> Option<Entry> {
        self.shared.entries.get(entry_id)
    }

    /// The feed list of the current run.
    pub fn feeds(&self) -> Vec<Feed> {
        self.shared
            .feeds
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .clone()
    }

    /// Subscribes to every entry and feed state mutation from now on.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<PipelineEvent> {
        self.shared.events.subscribe()
    }

    /// Whether the read-state collaborator has seen this entry. Always
    /// `false` without one.
    pub async fn is_consumed(&self, entry_id: &str) -> bool {
        match &self.shared.read_state {
            Some(read_state) => read_state.is_consumed(entry_id).await,
            None => false,
        }
    }

    /// Wipes all entries, feed states and the feed list.
    ///
    /// Work still in flight is not cancelled; its remaining updates are
    /// rejected as belonging to a superseded run. A new run may be started
    /// right away.
    pub fn clear(&self) {
        self.shared.entries.clear();
        self.shared.states.clear();
        *self
            .shared
            .feeds
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Arc::new(Vec::new());
        self.shared
            .active_run
            .send_if_modified(|active| active.take().is_some());
        self.shared.events.publish(PipelineEvent::Cleared);
        tracing::info!("Pipeline state cleared");
    }

    pub fn summary(&self) -> PipelineSummary {
        let states = self.shared.states.all();
        let entries = &self.shared.entries;
        let feeds_ready = states.iter().filter(|s| s.status == FeedStatus::Ready).count();
        let feeds_failed = states.iter().filter(|s| s.status == FeedStatus::Error).count();
        let entries_cleaned = entries.count_by_status(EntryStatus::Cleaned);
        let entries_rejected = entries.count_by_status(EntryStatus::Error);
        let entry_count = entries.len();

        PipelineSummary {
            feeds: states.len(),
            feeds_ready,
            feeds_failed,
            feeds_pending: states.len() - feeds_ready - feeds_failed,
            entries: entry_count,
            entries_cleaned,
            entries_rejected,
            entries_pending: entry_count.saturating_sub(entries_cleaned + entries_rejected),
        }
    }
}

/// Drains the feed queue with the global feed pool.
async fn run_feeds(shared: &Arc<Shared>, run_id: u64, work: Vec<(Feed, u64)>) {
    let started = Instant::now();
    let pool = WorkerPool::new("feed", shared.config.feed_workers);
    let report = pool
        .run(work, |(feed, generation)| async move {
            drive_feed(shared, &feed, generation).await;
        })
        .await;

    tracing::info!(
        run = run_id,
        feeds = report.processed,
        panicked = report.panicked,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Pipeline run finished"
    );
}

/// Keeps the first occurrence of every feed id.
fn dedupe_feeds(feeds: Vec<Feed>) -> Vec<Feed> {
    let mut seen = HashSet::new();
    feeds
        .into_iter()
        .filter(|feed| {
            let fresh = seen.insert(feed.id.clone());
            if !fresh {
                tracing::warn!(feed_id = %feed.id, "Duplicate feed in directory, skipping");
            }
            fresh
        })
        .collect()
}
