use crate::events::{EventBus, PipelineEvent};
use std::collections::{HashMap, HashSet};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::types::{Entry, EntryStatus};

/// Authoritative cross-feed entry collection.
///
/// Entries live in a `Vec` in registration order, with an id -> position
/// index for O(1) replacement. Both live behind one lock and every mutation
/// publishes its event while that lock is held, so subscribers observe
/// mutations in the order they were applied.
///
/// The store also remembers the newest run generation started for each feed
/// (see [`EntryStore::begin_run`]); entries from an older run of that feed
/// are refused, as is anything older than the last [`EntryStore::clear`].
#[derive(Debug)]
pub struct EntryStore {
    inner: RwLock<Inner>,
    events: EventBus,
}

#[derive(Debug, Default)]
struct Inner {
    entries: Vec<Entry>,
    index: HashMap<String, usize>,
    /// Newest generation started per feed.
    runs: HashMap<String, u64>,
    /// Generations below this predate the last clear.
    floor: u64,
    high_water: u64,
}

impl Inner {
    fn is_superseded(&self, feed_id: &str, generation: u64) -> bool {
        generation < self.floor || self.runs.get(feed_id).is_some_and(|&g| generation < g)
    }

    fn purge_feed(&mut self, feed_id: &str) -> usize {
        let before = self.entries.len();
        self.entries.retain(|e| e.feed_id != feed_id);
        let removed = before - self.entries.len();
        if removed > 0 {
            self.rebuild_index();
        }
        removed
    }

    fn rebuild_index(&mut self) {
        self.index = self
            .entries
            .iter()
            .enumerate()
            .map(|(pos, e)| (e.id.clone(), pos))
            .collect();
    }

    /// Index lookup, falling back to a linear scan when the index has no
    /// (or a stale) position for `id`. A scan hit repairs the index.
    fn locate(&mut self, id: &str) -> Option<usize> {
        if let Some(&pos) = self.index.get(id) {
            if self.entries.get(pos).is_some_and(|e| e.id == id) {
                return Some(pos);
            }
        }

        let pos = self.entries.iter().position(|e| e.id == id)?;
        tracing::debug!(entry_id = %id, position = pos, "Entry index miss, recovered by scan");
        self.index.insert(id.to_string(), pos);
        Some(pos)
    }
}

impl EntryStore {
    pub fn new(events: EventBus) -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            events,
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Starts run `generation` for `feed_id`: purges the feed's entries and
    /// refuses later registrations from older runs. Returns `false` (and
    /// changes nothing) if a newer run already started.
    pub fn begin_run(&self, feed_id: &str, generation: u64) -> bool {
        let mut inner = self.write();
        if inner.is_superseded(feed_id, generation) {
            tracing::debug!(feed_id = %feed_id, generation = generation, "Run already superseded");
            return false;
        }

        let removed = inner.purge_feed(feed_id);
        inner.runs.insert(feed_id.to_string(), generation);
        inner.high_water = inner.high_water.max(generation);
        if removed > 0 {
            self.events.publish(PipelineEvent::EntriesRemoved {
                feed_id: feed_id.to_string(),
                count: removed,
            });
        }
        true
    }

    /// Appends entries and extends the index in one step.
    ///
    /// Entries whose id is already present (in the store or earlier in the
    /// same batch) are skipped, as are entries from a superseded run.
    /// Returns the entries actually registered, in input order.
    pub fn add_entries(&self, entries: Vec<Entry>) -> Vec<Entry> {
        let mut inner = self.write();
        let mut seen = HashSet::new();
        let mut added = Vec::with_capacity(entries.len());

        for entry in entries {
            inner.high_water = inner.high_water.max(entry.generation);
            if inner.is_superseded(&entry.feed_id, entry.generation) {
                tracing::debug!(
                    entry_id = %entry.id,
                    feed_id = %entry.feed_id,
                    generation = entry.generation,
                    "Entry from superseded run dropped"
                );
                continue;
            }
            if inner.index.contains_key(&entry.id) || !seen.insert(entry.id.clone()) {
                tracing::warn!(
                    entry_id = %entry.id,
                    feed_id = %entry.feed_id,
                    "Duplicate entry id, skipping"
                );
                continue;
            }
            let pos = inner.entries.len();
            inner.index.insert(entry.id.clone(), pos);
            inner.entries.push(entry.clone());
            self.events.publish(PipelineEvent::Entry {
                entry: entry.clone(),
            });
            added.push(entry);
        }

        added
    }

    /// Replaces the stored record with the same id.
    ///
    /// Returns `false` without touching anything when the id is unknown,
    /// when the stored record belongs to a different run generation, or when
    /// the stored record is already terminal.
    pub fn update_entry(&self, entry: Entry) -> bool {
        let mut inner = self.write();

        let Some(pos) = inner.locate(&entry.id) else {
            tracing::warn!(entry_id = %entry.id, "Update for unknown entry ignored");
            return false;
        };

        let current = &inner.entries[pos];
        if current.generation != entry.generation {
            tracing::debug!(
                entry_id = %entry.id,
                stored = current.generation,
                incoming = entry.generation,
                "Stale entry update ignored"
            );
            return false;
        }
        if current.status.is_terminal() {
            tracing::warn!(
                entry_id = %entry.id,
                status = %current.status,
                "Update for finished entry ignored"
            );
            return false;
        }

        inner.entries[pos] = entry.clone();
        self.events.publish(PipelineEvent::Entry { entry });
        true
    }

    pub fn get(&self, id: &str) -> Option<Entry> {
        let inner = self.read();
        match inner.index.get(id) {
            Some(&pos) if inner.entries.get(pos).is_some_and(|e| e.id == id) => {
                Some(inner.entries[pos].clone())
            }
            _ => inner.entries.iter().find(|e| e.id == id).cloned(),
        }
    }

    /// Entries owned by `feed_id`, in registration order.
    pub fn get_by_feed(&self, feed_id: &str) -> Vec<Entry> {
        self.read()
            .entries
            .iter()
            .filter(|e| e.feed_id == feed_id)
            .cloned()
            .collect()
    }

    pub fn all(&self) -> Vec<Entry> {
        self.read().entries.clone()
    }

    pub fn count_by_status(&self, status: EntryStatus) -> usize {
        self.read()
            .entries
            .iter()
            .filter(|e| e.status == status)
            .count()
    }

    /// Empties the collection and index. Work still in flight from any run
    /// started before the clear can no longer register entries.
    pub fn clear(&self) {
        let mut inner = self.write();
        inner.entries.clear();
        inner.index.clear();
        inner.runs.clear();
        inner.floor = inner.high_water + 1;
    }

    pub fn len(&self) -> usize {
        self.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[cfg(test)]
    fn forget_index(&self, id: &str) {
        self.write().index.remove(id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::RawEntry;
    use pretty_assertions::assert_eq;

    fn entry(feed: &str, link: &str, generation: u64) -> Entry {
        Entry::from_raw(
            feed,
            RawEntry {
                title: format!("Title {link}"),
                link: link.to_string(),
                published: None,
                author: None,
                body: "<p>Body</p>".into(),
            },
            generation,
        )
    }

    fn store() -> EntryStore {
        EntryStore::new(EventBus::new())
    }

    #[test]
    fn test_add_and_query_by_feed_in_order() {
        let store = store();
        store.add_entries(vec![entry("a", "1", 1), entry("b", "2", 1), entry("a", "3", 1)]);

        let ids: Vec<_> = store.get_by_feed("a").into_iter().map(|e| e.id).collect();
        assert_eq!(ids, vec!["1".to_string(), "3".to_string()]);
        assert_eq!(store.len(), 3);
    }

    #[test]
    fn test_duplicate_ids_are_skipped() {
        let store = store();
        let added = store.add_entries(vec![entry("a", "1", 1), entry("a", "1", 1)]);
        assert_eq!(added.len(), 1);

        let added = store.add_entries(vec![entry("b", "1", 1), entry("b", "2", 1)]);
        assert_eq!(added.len(), 1);
        assert_eq!(added[0].id, "2");
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_update_replaces_whole_record() {
        let store = store();
        let added = store.add_entries(vec![entry("a", "1", 1)]);
        let cleaned = added[0].cleaning().cleaned("spoken text".into());

        assert!(store.update_entry(cleaned.clone()));
        assert_eq!(store.get("1"), Some(cleaned));
    }

    #[test]
    fn test_update_unknown_entry_is_noop() {
        let store = store();
        store.add_entries(vec![entry("a", "1", 1)]);
        assert!(!store.update_entry(entry("a", "missing", 1).cleaning()));
        assert_eq!(store.get("1").unwrap().status, EntryStatus::Raw);
    }

    #[test]
    fn test_update_falls_back_to_scan_when_index_lags() {
        let store = store();
        store.add_entries(vec![entry("a", "1", 1), entry("a", "2", 1)]);
        store.forget_index("2");

        let updated = store.get("2").unwrap().cleaning();
        assert!(store.update_entry(updated));
        assert_eq!(store.get("2").unwrap().status, EntryStatus::Cleaning);
    }

    #[test]
    fn test_stale_generation_update_is_ignored() {
        let store = store();
        store.add_entries(vec![entry("a", "1", 2)]);
        assert!(!store.update_entry(entry("a", "1", 1).cleaning()));
        assert_eq!(store.get("1").unwrap().status, EntryStatus::Raw);
    }

    #[test]
    fn test_terminal_entry_is_not_overwritten() {
        let store = store();
        let e = store.add_entries(vec![entry("a", "1", 1)]).remove(0);
        assert!(store.update_entry(e.rejected()));
        assert!(!store.update_entry(e.cleaning()));
        assert_eq!(store.get("1").unwrap().status, EntryStatus::Error);
    }

    #[test]
    fn test_new_run_purge_rebuilds_index() {
        let store = store();
        store.add_entries(vec![entry("a", "1", 1), entry("b", "2", 1), entry("a", "3", 1)]);

        assert!(store.begin_run("a", 2));
        assert_eq!(store.len(), 1);

        // "2" moved from position 1 to 0; the update must land on it
        let e = store.get("2").unwrap();
        assert!(store.update_entry(e.cleaning()));
        assert_eq!(store.get_by_feed("b")[0].status, EntryStatus::Cleaning);
    }

    #[test]
    fn test_clear_empties_store() {
        let store = store();
        store.add_entries(vec![entry("a", "1", 1)]);
        store.clear();
        assert!(store.is_empty());
        assert!(store.get("1").is_none());
    }

    #[test]
    fn test_begin_run_purges_and_blocks_older_runs() {
        let store = store();
        assert!(store.begin_run("a", 1));
        store.add_entries(vec![entry("a", "1", 1), entry("b", "2", 1)]);

        assert!(store.begin_run("a", 2));
        assert!(store.get_by_feed("a").is_empty());
        assert_eq!(store.len(), 1);

        // A late registration from run 1 must not come back
        assert!(store.add_entries(vec![entry("a", "1", 1)]).is_empty());
        assert_eq!(store.add_entries(vec![entry("a", "1", 2)]).len(), 1);

        // Starting an older run after a newer one is refused
        assert!(!store.begin_run("a", 1));
        assert_eq!(store.get_by_feed("a").len(), 1);
    }

    #[test]
    fn test_clear_blocks_inflight_registrations() {
        let store = store();
        store.begin_run("a", 4);
        store.clear();
        assert!(store.add_entries(vec![entry("a", "1", 4)]).is_empty());
        assert_eq!(store.add_entries(vec![entry("a", "1", 5)]).len(), 1);
    }

    #[test]
    fn test_purge_event_only_when_entries_removed() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        let store = EntryStore::new(bus);

        assert!(store.begin_run("a", 1));
        assert!(rx.try_recv().is_err());

        store.add_entries(vec![entry("a", "1", 1), entry("a", "2", 1)]);
        while rx.try_recv().is_ok() {}

        assert!(store.begin_run("a", 2));
        match rx.try_recv() {
            Ok(PipelineEvent::EntriesRemoved { feed_id, count }) => {
                assert_eq!(feed_id, "a");
                assert_eq!(count, 2);
            }
            other => panic!("unexpected event: {other:?}"),
        }
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_mutations_are_published() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        let store = EntryStore::new(bus);

        let e = store.add_entries(vec![entry("a", "1", 1)]).remove(0);
        store.update_entry(e.cleaning());

        match rx.recv().await {
            Some(PipelineEvent::Entry { entry }) => assert_eq!(entry.status, EntryStatus::Raw),
            other => panic!("unexpected event: {other:?}"),
        }
        match rx.recv().await {
            Some(PipelineEvent::Entry { entry }) => {
                assert_eq!(entry.status, EntryStatus::Cleaning)
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
