//! Push-based update subscription.
//!
//! Every mutation of the entry store or the feed state tracker is published
//! as a [`PipelineEvent`] to all live subscribers. Subscribers receive an
//! unbounded channel so no event is ever dropped for a slow reader; closed
//! receivers are pruned on the next publish.

use crate::storage::{Entry, Feed, FeedState};
use serde::Serialize;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc;

/// A state change visible to the presentation layer.
///
/// Feed-list seeding is delivered in directory order. Entry completions
/// arrive in whatever order workers finish.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PipelineEvent {
    /// The feed list was (re)loaded at the start of a run.
    FeedsLoaded { feeds: Vec<Feed> },
    /// A feed's state was replaced.
    FeedState { state: FeedState },
    /// An entry was added or replaced.
    Entry { entry: Entry },
    /// All entries of a feed were purged ahead of a retry.
    EntriesRemoved { feed_id: String, count: usize },
    /// All pipeline state was wiped.
    Cleared,
}

#[derive(Clone, Default)]
pub struct EventBus {
    subscribers: Arc<Mutex<Vec<mpsc::UnboundedSender<PipelineEvent>>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<PipelineEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(tx);
        rx
    }

    /// Publishes to every subscriber. Never blocks, so callers may hold
    /// their own state lock while publishing to keep event order identical
    /// to mutation order.
    pub fn publish(&self, event: PipelineEvent) {
        let mut subscribers = self
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let before = subscribers.len();
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
        let dropped = before - subscribers.len();
        if dropped > 0 {
            tracing::debug!(dropped = dropped, "Pruned closed update subscribers");
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}
