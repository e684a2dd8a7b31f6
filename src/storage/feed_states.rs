use crate::events::{EventBus, PipelineEvent};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::types::{Feed, FeedState, FeedStatus, Progress};

/// One state machine per known feed.
///
/// Every transition is a functional replace performed under a single mutex,
/// which serializes the completion counter across all entry workers of a
/// feed. Transitions carry the run generation they belong to; a transition
/// for a superseded generation is dropped.
#[derive(Debug)]
pub struct FeedStateTracker {
    inner: Mutex<Inner>,
    next_generation: AtomicU64,
    events: EventBus,
}

#[derive(Debug, Default)]
struct Inner {
    states: HashMap<String, FeedState>,
    /// Feed ids in directory order, for stable listing.
    order: Vec<String>,
}

fn is_legal(from: FeedStatus, to: FeedStatus) -> bool {
    use FeedStatus::*;
    matches!(
        (from, to),
        (Idle, Fetching)
            | (Fetching, Processing)
            | (Fetching, Ready)
            | (Fetching, Error)
            | (Processing, Processing)
            | (Processing, Ready)
            | (Processing, Error)
    )
}

impl FeedStateTracker {
    pub fn new(events: EventBus) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            next_generation: AtomicU64::new(1),
            events,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn generation(&self) -> u64 {
        self.next_generation.fetch_add(1, Ordering::Relaxed)
    }

    /// Replaces all states with one `Idle` state per feed, in list order.
    /// Returns the generation assigned to each feed.
    pub fn seed(&self, feeds: &[Feed]) -> HashMap<String, u64> {
        let mut inner = self.lock();
        inner.states.clear();
        inner.order.clear();

        let mut generations = HashMap::with_capacity(feeds.len());
        for feed in feeds {
            if inner.states.contains_key(&feed.id) {
                tracing::warn!(feed_id = %feed.id, "Duplicate feed id in directory, skipping");
                continue;
            }
            let state = FeedState::idle(&feed.id, self.generation());
            generations.insert(feed.id.clone(), state.generation);
            inner.order.push(feed.id.clone());
            inner.states.insert(feed.id.clone(), state.clone());
            self.events.publish(PipelineEvent::FeedState { state });
        }
        generations
    }

    /// Starts a new run for one feed: back to `Idle` under a fresh
    /// generation, invalidating whatever an older run still has in flight.
    pub fn reset(&self, feed_id: &str) -> u64 {
        let mut inner = self.lock();
        let state = FeedState::idle(feed_id, self.generation());
        let generation = state.generation;
        if !inner.states.contains_key(feed_id) {
            inner.order.push(feed_id.to_string());
        }
        inner.states.insert(feed_id.to_string(), state.clone());
        self.events.publish(PipelineEvent::FeedState { state });
        generation
    }

    /// Applies `next` to the current state of `feed_id` if it still belongs
    /// to `generation` and the resulting transition is legal.
    fn transition<F>(&self, feed_id: &str, generation: u64, next: F) -> Option<FeedState>
    where
        F: FnOnce(&FeedState) -> FeedState,
    {
        let mut inner = self.lock();
        let current = inner.states.get(feed_id)?;

        if current.generation != generation {
            tracing::debug!(
                feed_id = %feed_id,
                current = current.generation,
                incoming = generation,
                "Stale feed transition ignored"
            );
            return None;
        }

        let updated = next(current);
        if !is_legal(current.status, updated.status) {
            tracing::warn!(
                feed_id = %feed_id,
                from = %current.status,
                to = %updated.status,
                "Illegal feed transition ignored"
            );
            return None;
        }

        tracing::debug!(feed_id = %feed_id, from = %current.status, to = %updated.status, "Feed transition");
        inner.states.insert(feed_id.to_string(), updated.clone());
        self.events.publish(PipelineEvent::FeedState {
            state: updated.clone(),
        });
        Some(updated)
    }

    pub fn set_fetching(&self, feed_id: &str, generation: u64) -> Option<FeedState> {
        self.transition(feed_id, generation, |s| s.with_status(FeedStatus::Fetching))
    }

    pub fn set_processing(&self, feed_id: &str, generation: u64, total: usize) -> Option<FeedState> {
        self.transition(feed_id, generation, |s| s.processing(total))
    }

    pub fn set_ready(&self, feed_id: &str, generation: u64) -> Option<FeedState> {
        self.transition(feed_id, generation, |s| s.with_status(FeedStatus::Ready))
    }

    pub fn set_error(&self, feed_id: &str, generation: u64, message: String) -> Option<FeedState> {
        self.transition(feed_id, generation, |s| s.failed(message))
    }

    /// Counts one finished entry. Moves the feed to `Ready` once every entry
    /// has reported.
    pub fn record_completion(&self, feed_id: &str, generation: u64) -> Option<FeedState> {
        self.transition(feed_id, generation, |s| match s.progress {
            Some(Progress { total, completed }) if s.status == FeedStatus::Processing => {
                let completed = (completed + 1).min(total);
                if completed >= total {
                    s.with_status(FeedStatus::Ready)
                } else {
                    FeedState {
                        progress: Some(Progress { total, completed }),
                        ..s.clone()
                    }
                }
            }
            // Not processing: hand back an illegal self-transition so it is rejected
            _ => s.clone(),
        })
    }

    pub fn get(&self, feed_id: &str) -> Option<FeedState> {
        self.lock().states.get(feed_id).cloned()
    }

    /// All states in directory order.
    pub fn all(&self) -> Vec<FeedState> {
        let inner = self.lock();
        inner
            .order
            .iter()
            .filter_map(|id| inner.states.get(id).cloned())
            .collect()
    }

    pub fn clear(&self) {
        let mut inner = self.lock();
        inner.states.clear();
        inner.order.clear();
    }
}
