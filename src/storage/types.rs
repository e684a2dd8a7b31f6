use serde::Serialize;
use std::fmt;
use std::sync::Arc;

// ============================================================================
// Feeds
// ============================================================================

/// A subscribed feed as listed by the feed directory.
///
/// Owned by the directory collaborator; the pipeline only reads it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Feed {
    pub id: String,
    pub url: String,
    /// Arc<str> so the feed list can be cloned into every worker cheaply.
    pub title: Arc<str>,
}

impl Feed {
    pub fn new(id: impl Into<String>, url: impl Into<String>, title: &str) -> Self {
        Self {
            id: id.into(),
            url: url.into(),
            title: Arc::from(title),
        }
    }
}

/// Lifecycle phase of one feed's processing run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedStatus {
    Idle,
    Fetching,
    Processing,
    Ready,
    Error,
}

impl FeedStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, FeedStatus::Ready | FeedStatus::Error)
    }
}

impl fmt::Display for FeedStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FeedStatus::Idle => "idle",
            FeedStatus::Fetching => "fetching",
            FeedStatus::Processing => "processing",
            FeedStatus::Ready => "ready",
            FeedStatus::Error => "error",
        };
        f.write_str(s)
    }
}

/// Completion counter, only present while a feed is `Processing`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Progress {
    pub total: usize,
    pub completed: usize,
}

/// Processing state of one feed.
///
/// `progress` is `Some` only while `status == Processing`; `error` is `Some`
/// only while `status == Error`. Constructors below are the only way the
/// tracker builds states, which keeps those pairings intact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FeedState {
    pub feed_id: String,
    pub status: FeedStatus,
    pub progress: Option<Progress>,
    pub error: Option<String>,
    /// Run that produced this state. Updates from older runs are discarded.
    pub generation: u64,
}

impl FeedState {
    pub fn idle(feed_id: &str, generation: u64) -> Self {
        Self {
            feed_id: feed_id.to_string(),
            status: FeedStatus::Idle,
            progress: None,
            error: None,
            generation,
        }
    }

    pub(crate) fn with_status(&self, status: FeedStatus) -> Self {
        Self {
            feed_id: self.feed_id.clone(),
            status,
            progress: None,
            error: None,
            generation: self.generation,
        }
    }

    pub(crate) fn processing(&self, total: usize) -> Self {
        Self {
            progress: Some(Progress {
                total,
                completed: 0,
            }),
            ..self.with_status(FeedStatus::Processing)
        }
    }

    pub(crate) fn failed(&self, message: String) -> Self {
        Self {
            error: Some(message),
            ..self.with_status(FeedStatus::Error)
        }
    }
}

// ============================================================================
// Entries
// ============================================================================

/// One entry as extracted from a syndication document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEntry {
    pub title: String,
    /// Globally unique entry identifier.
    pub link: String,
    /// Unix timestamp (seconds).
    pub published: Option<i64>,
    pub author: Option<String>,
    pub body: String,
}

/// Cleaning status of an entry. Moves forward only:
/// `Raw -> Cleaning -> Cleaned | Error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryStatus {
    Raw,
    Cleaning,
    Cleaned,
    Error,
}

impl EntryStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, EntryStatus::Cleaned | EntryStatus::Error)
    }
}

impl fmt::Display for EntryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EntryStatus::Raw => "raw",
            EntryStatus::Cleaning => "cleaning",
            EntryStatus::Cleaned => "cleaned",
            EntryStatus::Error => "error",
        };
        f.write_str(s)
    }
}

/// A pipeline-owned entry.
///
/// Records are never mutated in place once published: every transition
/// produces a new `Entry` that replaces the old one in the store, so
/// snapshots handed to subscribers stay stable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Entry {
    /// Same value as `link`; kept separate so lookups read naturally.
    pub id: String,
    pub feed_id: String,
    pub title: String,
    pub link: String,
    pub published: Option<i64>,
    pub author: Option<String>,
    #[serde(skip)]
    pub raw_body: Arc<str>,
    pub cleaned_body: Option<String>,
    pub status: EntryStatus,
    pub generation: u64,
}

impl Entry {
    pub fn from_raw(feed_id: &str, raw: RawEntry, generation: u64) -> Self {
        Self {
            id: raw.link.clone(),
            feed_id: feed_id.to_string(),
            title: raw.title,
            link: raw.link,
            published: raw.published,
            author: raw.author,
            raw_body: Arc::from(raw.body),
            cleaned_body: None,
            status: EntryStatus::Raw,
            generation,
        }
    }

    pub fn cleaning(&self) -> Self {
        Self {
            status: EntryStatus::Cleaning,
            cleaned_body: None,
            ..self.clone()
        }
    }

    pub fn cleaned(&self, text: String) -> Self {
        Self {
            status: EntryStatus::Cleaned,
            cleaned_body: Some(text),
            ..self.clone()
        }
    }

    pub fn rejected(&self) -> Self {
        Self {
            status: EntryStatus::Error,
            cleaned_body: None,
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(link: &str) -> RawEntry {
        RawEntry {
            title: "Title".into(),
            link: link.into(),
            published: Some(1_700_000_000),
            author: None,
            body: "<p>body</p>".into(),
        }
    }

    #[test]
    fn test_entry_from_raw_uses_link_as_id() {
        let entry = Entry::from_raw("f1", raw("https://example.com/a"), 3);
        assert_eq!(entry.id, "https://example.com/a");
        assert_eq!(entry.feed_id, "f1");
        assert_eq!(entry.status, EntryStatus::Raw);
        assert_eq!(entry.generation, 3);
        assert!(entry.cleaned_body.is_none());
    }

    #[test]
    fn test_cleaned_body_present_only_when_cleaned() {
        let entry = Entry::from_raw("f1", raw("a"), 1);
        let cleaned = entry.cleaning().cleaned("text".into());
        assert_eq!(cleaned.status, EntryStatus::Cleaned);
        assert_eq!(cleaned.cleaned_body.as_deref(), Some("text"));

        let rejected = cleaned.rejected();
        assert_eq!(rejected.status, EntryStatus::Error);
        assert!(rejected.cleaned_body.is_none());
    }

    #[test]
    fn test_feed_state_constructors_keep_fields_paired() {
        let idle = FeedState::idle("f1", 7);
        let processing = idle.processing(4);
        assert_eq!(processing.progress, Some(Progress { total: 4, completed: 0 }));
        assert!(processing.error.is_none());

        let failed = processing.failed("boom".into());
        assert_eq!(failed.status, FeedStatus::Error);
        assert!(failed.progress.is_none());
        assert_eq!(failed.error.as_deref(), Some("boom"));
        assert_eq!(failed.generation, 7);
    }

    #[test]
    fn test_status_display() {
        assert_eq!(FeedStatus::Processing.to_string(), "processing");
        assert_eq!(EntryStatus::Cleaned.to_string(), "cleaned");
        assert!(EntryStatus::Error.is_terminal());
        assert!(!FeedStatus::Fetching.is_terminal());
    }
}
