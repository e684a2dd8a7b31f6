use async_trait::async_trait;
use std::collections::HashSet;
use std::path::PathBuf;
use thiserror::Error;

use super::opml::{parse_opml, OpmlError};
use crate::storage::Feed;

#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error(transparent)]
    Opml(#[from] OpmlError),

    #[error("Feed directory unavailable: {0}")]
    Unavailable(String),
}

/// Source of the user's subscribed feeds.
#[async_trait]
pub trait FeedDirectory: Send + Sync {
    async fn list_feeds(&self) -> Result<Vec<Feed>, DirectoryError>;
}

/// A fixed feed list.
#[derive(Debug, Clone, Default)]
pub struct StaticDirectory {
    feeds: Vec<Feed>,
}

impl StaticDirectory {
    pub fn new(feeds: Vec<Feed>) -> Self {
        Self { feeds }
    }
}

#[async_trait]
impl FeedDirectory for StaticDirectory {
    async fn list_feeds(&self) -> Result<Vec<Feed>, DirectoryError> {
        Ok(self.feeds.clone())
    }
}

/// Feeds read from an OPML subscription file on every call.
///
/// The feed URL doubles as the feed id; repeated URLs are listed once.
#[derive(Debug, Clone)]
pub struct OpmlDirectory {
    path: PathBuf,
}

impl OpmlDirectory {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl FeedDirectory for OpmlDirectory {
    async fn list_feeds(&self) -> Result<Vec<Feed>, DirectoryError> {
        let content = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(OpmlError::Io)?;

        let mut seen = HashSet::new();
        let feeds: Vec<Feed> = parse_opml(&content)?
            .into_iter()
            .filter(|f| seen.insert(f.xml_url.clone()))
            .map(|f| Feed::new(f.xml_url.clone(), f.xml_url, &f.title))
            .collect();

        tracing::debug!(path = %self.path.display(), feeds = feeds.len(), "Loaded feed directory");
        Ok(feeds)
    }
}
