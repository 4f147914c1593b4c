// Cache store for per-key request state.
// Holds every cache entry, propagates invalidation, and broadcasts changes to subscribers.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, info};

use super::entry::{CacheEntry, CacheKey, EntrySnapshot};

/// Default capacity of the change-event channel.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// What happened to an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheEventKind {
    Loading,
    Ready,
    Failed,
    Invalidated,
}

/// Notification emitted on every entry mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CacheEvent {
    pub key: CacheKey,
    pub kind: CacheEventKind,
}

/// Keyed table of cache entries.
///
/// Constructed once per application and shared by reference (usually in an
/// `Arc`) between the dispatcher and readers. Locks are never held across an
/// await point, so every mutation is atomic to other callers.
pub struct CacheStore {
    entries: Mutex<HashMap<CacheKey, CacheEntry>>,
    events: broadcast::Sender<CacheEvent>,
}

impl Default for CacheStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CacheStore {
    pub fn new() -> Self {
        Self::with_event_capacity(DEFAULT_EVENT_CAPACITY)
    }

    /// Create a store whose event channel buffers `capacity` events per subscriber.
    pub fn with_event_capacity(capacity: usize) -> Self {
        let (events, _) = broadcast::channel(capacity.max(1));
        Self {
            entries: Mutex::new(HashMap::new()),
            events,
        }
    }

    /// Subscribe to entry change events.
    pub fn subscribe(&self) -> broadcast::Receiver<CacheEvent> {
        self.events.subscribe()
    }

    /// Copy of the entry for `key`, if one has been created.
    pub fn snapshot(&self, key: &CacheKey) -> Option<EntrySnapshot> {
        self.lock()
            .get(key)
            .map(|entry| EntrySnapshot::of(key, entry))
    }

    /// All keys that currently have an entry, sorted.
    pub fn keys(&self) -> Vec<CacheKey> {
        let mut keys: Vec<CacheKey> = self.lock().keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Mark every entry whose label is in `labels` as stale.
    ///
    /// Clears fingerprint and fetch time but keeps the payload. Labels with no
    /// entry are ignored. Performs no I/O. Returns the number of entries that
    /// were actually dirtied.
    pub fn invalidate<I, S>(&self, labels: I) -> usize
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let labels: Vec<S> = labels.into_iter().collect();
        if labels.is_empty() {
            return 0;
        }

        let dirtied: Vec<CacheKey> = {
            let mut entries = self.lock();
            entries
                .iter_mut()
                .filter(|(key, _)| labels.iter().any(|l| l.as_ref() == key.label))
                .filter_map(|(key, entry)| entry.invalidate().then(|| key.clone()))
                .collect()
        };

        for key in &dirtied {
            info!(key = %key, "cache entry invalidated");
            self.emit(key, CacheEventKind::Invalidated);
        }
        dirtied.len()
    }

    /// Run `f` against the entry for `key`, creating it if needed.
    pub(crate) fn with_entry<R>(&self, key: &CacheKey, f: impl FnOnce(&mut CacheEntry) -> R) -> R {
        let mut entries = self.lock();
        let entry = entries.entry(key.clone()).or_insert_with(|| {
            debug!(key = %key, "cache entry created");
            CacheEntry::new()
        });
        f(entry)
    }

    /// Run `f` against the entry for `key` without creating it.
    pub(crate) fn inspect<R>(&self, key: &CacheKey, f: impl FnOnce(Option<&CacheEntry>) -> R) -> R {
        f(self.lock().get(key))
    }

    pub(crate) fn emit(&self, key: &CacheKey, kind: CacheEventKind) {
        // No subscribers is not an error
        let _ = self.events.send(CacheEvent {
            key: key.clone(),
            kind,
        });
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<CacheKey, CacheEntry>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use chrono::Utc;
    use futures::FutureExt;
    use futures::future::BoxFuture;
    use serde_json::json;

    use crate::cache::entry::{EntryStatus, InFlight, Payload};
    use crate::error::Result;

    fn fill(store: &CacheStore, key: &CacheKey, value: serde_json::Value) {
        let request: BoxFuture<'static, Result<Payload>> =
            async { Ok(Arc::new(json!(null))) }.boxed();
        store.with_entry(key, |entry| {
            entry.begin_loading(
                InFlight {
                    id: 1,
                    request: request.shared(),
                },
                None,
            );
            let generation = entry.generation;
            entry.complete(1, generation, Arc::new(value), "fp".to_string(), Utc::now());
        });
    }

    #[test]
    fn test_entries_created_lazily() {
        let store = CacheStore::new();
        let key = CacheKey::new("pools");
        assert!(store.snapshot(&key).is_none());

        store.with_entry(&key, |_| {});
        let snapshot = store.snapshot(&key).unwrap();
        assert_eq!(snapshot.status, EntryStatus::Idle);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_invalidate_marks_all_scopes_of_label() {
        let store = CacheStore::new();
        let a = CacheKey::scoped("pools", "o1");
        let b = CacheKey::scoped("pools", "o2");
        let other = CacheKey::new("organizations");
        fill(&store, &a, json!(1));
        fill(&store, &b, json!(2));
        fill(&store, &other, json!(3));

        assert_eq!(store.invalidate(["pools"]), 2);

        for key in [&a, &b] {
            let snapshot = store.snapshot(key).unwrap();
            assert!(snapshot.fingerprint.is_none());
            assert!(snapshot.fetched_at.is_none());
            assert!(snapshot.payload.is_some());
        }
        assert!(store.snapshot(&other).unwrap().fingerprint.is_some());
    }

    #[test]
    fn test_invalidate_is_idempotent() {
        let store = CacheStore::new();
        let key = CacheKey::new("pools");
        fill(&store, &key, json!(1));

        assert_eq!(store.invalidate(["pools"]), 1);
        assert_eq!(store.invalidate(["pools"]), 0);
        assert_eq!(store.invalidate(["missing"]), 0);
        assert!(store.snapshot(&CacheKey::new("missing")).is_none());
    }

    #[tokio::test]
    async fn test_invalidate_emits_events() {
        let store = CacheStore::new();
        let key = CacheKey::new("pools");
        fill(&store, &key, json!(1));

        let mut events = store.subscribe();
        store.invalidate(["pools"]);

        let event = events.recv().await.unwrap();
        assert_eq!(
            event,
            CacheEvent {
                key,
                kind: CacheEventKind::Invalidated
            }
        );
    }

    #[test]
    fn test_keys_sorted() {
        let store = CacheStore::new();
        store.with_entry(&CacheKey::new("pools"), |_| {});
        store.with_entry(&CacheKey::new("expenses"), |_| {});

        let keys: Vec<String> = store.keys().iter().map(|k| k.to_string()).collect();
        assert_eq!(keys, vec!["expenses", "pools"]);
    }
}
