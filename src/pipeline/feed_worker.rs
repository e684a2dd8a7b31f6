use std::sync::Arc;

use super::entry_worker::process_entries;
use super::Shared;
use crate::feed::{fetch_with_timeout, parse_feed};
use crate::storage::{Entry, Feed};

/// Drives one feed run: `Idle -> Fetching -> Processing -> Ready`, or
/// `Error` when the fetch or the parse fails.
///
/// Every failure is recorded on the feed's state and nothing is returned;
/// a failing feed never affects its siblings. When `generation` has been
/// superseded (retry or clear) the first rejected transition ends the run.
pub(crate) async fn drive_feed(shared: &Arc<Shared>, feed: &Feed, generation: u64) {
    let feed_id = feed.id.as_str();
    if shared.states.set_fetching(feed_id, generation).is_none() {
        return;
    }

    let bytes = match fetch_with_timeout(
        shared.fetcher.as_ref(),
        &feed.url,
        shared.config.fetch_timeout,
    )
    .await
    {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::warn!(feed_id = %feed_id, title = %feed.title, error = %e, "Feed fetch failed");
            shared.states.set_error(feed_id, generation, e.to_string());
            return;
        }
    };

    // Off the task that polls every feed and entry worker
    let max_entries = shared.config.max_entries_per_feed;
    let parsed = match tokio::task::spawn_blocking(move || parse_feed(&bytes, max_entries)).await {
        Ok(Ok(parsed)) => parsed,
        Ok(Err(e)) => {
            tracing::warn!(feed_id = %feed_id, title = %feed.title, error = %e, "Feed parse failed");
            shared.states.set_error(feed_id, generation, e.to_string());
            return;
        }
        Err(e) => {
            tracing::warn!(feed_id = %feed_id, title = %feed.title, error = %e, "Feed parser failed unexpectedly");
            shared.states.set_error(feed_id, generation, format!("Feed parse failed: {e}"));
            return;
        }
    };
    if parsed.skipped > 0 {
        tracing::warn!(
            feed_id = %feed_id,
            skipped = parsed.skipped,
            format = ?parsed.format,
            "Skipped entries without a link or identifier"
        );
    }

    let entries: Vec<Entry> = parsed
        .entries
        .into_iter()
        .map(|raw| Entry::from_raw(feed_id, raw, generation))
        .collect();
    let registered = shared.entries.add_entries(entries);

    if registered.is_empty() {
        shared.states.set_ready(feed_id, generation);
        return;
    }
    if shared
        .states
        .set_processing(feed_id, generation, registered.len())
        .is_none()
    {
        return;
    }

    process_entries(shared, feed_id, generation, registered).await;
}
