use std::sync::Arc;

use super::pool::{PoolReport, WorkerPool};
use super::Shared;
use crate::storage::Entry;

/// Cleans every entry of one feed run on a fresh pool of
/// `entry_workers` workers.
///
/// Returns once the queue is drained. Every entry that still belongs to the
/// live run has then reached `Cleaned` or `Error` and has been counted
/// against the feed's progress exactly once.
pub(crate) async fn process_entries(
    shared: &Arc<Shared>,
    feed_id: &str,
    generation: u64,
    entries: Vec<Entry>,
) -> PoolReport {
    let pool = WorkerPool::new("entry", shared.config.entry_workers);
    let report = pool
        .run(entries, |entry| process_entry(shared, entry))
        .await;

    tracing::debug!(
        feed_id = %feed_id,
        generation = generation,
        processed = report.processed,
        panicked = report.panicked,
        "Entry pool drained"
    );
    report
}

/// Drives one entry through `Raw -> Cleaning -> Cleaned | Error`.
///
/// The cleaner runs on the blocking pool: it is CPU work, and a panic in it
/// surfaces as a `JoinError` here instead of unwinding through the worker.
async fn process_entry(shared: &Arc<Shared>, entry: Entry) {
    let cleaning = entry.cleaning();
    if !shared.entries.update_entry(cleaning.clone()) {
        // Run superseded by a retry or a clear
        return;
    }

    let cleaner = Arc::clone(&shared.cleaner);
    let raw = Arc::clone(&entry.raw_body);
    let outcome = tokio::task::spawn_blocking(move || cleaner.clean(&raw)).await;

    let finished = match outcome {
        Ok(Ok(Some(text))) => cleaning.cleaned(text),
        Ok(Ok(None)) => {
            tracing::debug!(entry_id = %entry.id, "Entry rejected, nothing worth speaking");
            cleaning.rejected()
        }
        Ok(Err(e)) => {
            tracing::debug!(entry_id = %entry.id, error = %e, "Entry rejected by cleaner");
            cleaning.rejected()
        }
        Err(e) => {
            tracing::warn!(entry_id = %entry.id, error = %e, "Cleaner failed unexpectedly, rejecting entry");
            cleaning.rejected()
        }
    };

    if shared.entries.update_entry(finished) {
        shared
            .states
            .record_completion(&entry.feed_id, entry.generation);
    }
}
