// Read hook for view code.
// Reports what a cache entry currently holds and whether the caller should fetch.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use crate::api::RequestDescriptor;
use crate::cache::{
    CacheEntry, CacheKey, CacheStore, Clock, EntryStatus, ErrorRecord, Payload, fingerprint,
    is_stale,
};

/// Loading state for async data, as a view renders it.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum LoadingState<T> {
    #[default]
    Idle,
    Loading,
    Loaded(T),
    Error(String),
}

impl<T> LoadingState<T> {
    pub fn is_loading(&self) -> bool {
        matches!(self, LoadingState::Loading)
    }

    pub fn is_loaded(&self) -> bool {
        matches!(self, LoadingState::Loaded(_))
    }

    pub fn data(&self) -> Option<&T> {
        match self {
            LoadingState::Loaded(data) => Some(data),
            _ => None,
        }
    }
}

/// What a reader sees for one key.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReadResult {
    /// Last good payload, possibly stale.
    pub payload: Option<Payload>,
    pub status: EntryStatus,
    pub is_loading: bool,
    pub is_stale: bool,
    pub error: Option<ErrorRecord>,
    pub fetched_at: Option<DateTime<Utc>>,
}

impl ReadResult {
    fn missing() -> Self {
        Self {
            payload: None,
            status: EntryStatus::Idle,
            is_loading: false,
            is_stale: true,
            error: None,
            fetched_at: None,
        }
    }

    fn of(entry: &CacheEntry, is_stale: bool) -> Self {
        Self {
            payload: entry.payload.clone(),
            status: entry.status,
            is_loading: entry.is_loading(),
            is_stale,
            error: entry.error.clone(),
            fetched_at: entry.fetched_at,
        }
    }

    /// Whether the caller should issue a request now.
    ///
    /// False while a request is already loading, so many readers of one key
    /// do not each trigger a fetch.
    pub fn should_fetch(&self) -> bool {
        self.is_stale && !self.is_loading
    }

    /// Collapse into a single renderable state.
    ///
    /// A stale payload is still shown as loaded while a refetch runs.
    pub fn loading_state(&self) -> LoadingState<Payload> {
        match (&self.payload, self.status) {
            (Some(payload), EntryStatus::Ready | EntryStatus::Loading) => {
                LoadingState::Loaded(payload.clone())
            }
            (_, EntryStatus::Failed) => LoadingState::Error(
                self.error
                    .as_ref()
                    .map(|e| e.message.clone())
                    .unwrap_or_default(),
            ),
            (None, EntryStatus::Loading) => LoadingState::Loading,
            _ => LoadingState::Idle,
        }
    }
}

/// Read-only view over the cache store.
///
/// Never fetches and never fails: errors surface as data on the result.
#[derive(Clone)]
pub struct ReadHook {
    store: Arc<CacheStore>,
    clock: Arc<dyn Clock>,
}

impl ReadHook {
    pub fn new(store: Arc<CacheStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Read `key` as seen by a caller whose current inputs are `params`.
    ///
    /// Staleness uses the TTL of the last request issued for the key.
    pub fn read(&self, key: impl Into<CacheKey>, params: &Value) -> ReadResult {
        let key = key.into();
        let proposed = fingerprint(params);
        let now = self.clock.now();
        self.store.inspect(&key, |entry| match entry {
            Some(entry) => ReadResult::of(entry, is_stale(entry, &proposed, entry.ttl, now)),
            None => ReadResult::missing(),
        })
    }

    /// Read the entry a descriptor would populate, using its fingerprint and TTL.
    pub fn read_descriptor(&self, descriptor: &RequestDescriptor) -> ReadResult {
        let key = descriptor.key();
        let proposed = descriptor.fingerprint();
        let now = self.clock.now();
        self.store.inspect(&key, |entry| match entry {
            Some(entry) => ReadResult::of(entry, is_stale(entry, &proposed, descriptor.ttl, now)),
            None => ReadResult::missing(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use serde_json::json;

    use crate::cache::{ManualClock, SystemClock};
    use crate::cache::entry::InFlight;
    use futures::FutureExt;
    use futures::future::BoxFuture;

    fn hook_with(store: Arc<CacheStore>) -> ReadHook {
        ReadHook::new(store, Arc::new(SystemClock))
    }

    fn pending() -> InFlight {
        let request: BoxFuture<'static, crate::error::Result<Payload>> =
            async { Ok(Arc::new(json!(null))) }.boxed();
        InFlight {
            id: 1,
            request: request.shared(),
        }
    }

    fn fill(store: &CacheStore, key: &CacheKey, params: &Value, ttl: Option<Duration>, at: DateTime<Utc>) {
        store.with_entry(key, |entry| {
            entry.begin_loading(pending(), ttl);
            let generation = entry.generation;
            entry.complete(1, generation, Arc::new(json!({"pools": ["a"]})), fingerprint(params), at);
        });
    }

    #[test]
    fn test_missing_entry_reads_stale_idle() {
        let hook = hook_with(Arc::new(CacheStore::new()));
        let result = hook.read("pools", &json!({"orgId": "o1"}));

        assert_eq!(result.status, EntryStatus::Idle);
        assert!(result.payload.is_none());
        assert!(result.is_stale);
        assert!(result.should_fetch());
        assert_eq!(result.loading_state(), LoadingState::Idle);
    }

    #[test]
    fn test_reading_does_not_create_entries() {
        let store = Arc::new(CacheStore::new());
        hook_with(store.clone()).read("pools", &json!({}));

        assert!(store.is_empty());
    }

    #[test]
    fn test_fresh_entry() {
        let store = Arc::new(CacheStore::new());
        let params = json!({"orgId": "o1"});
        fill(&store, &CacheKey::new("pools"), &params, None, Utc::now());

        let result = hook_with(store).read("pools", &json!({"orgId": "o1"}));
        assert!(!result.is_stale);
        assert!(!result.should_fetch());
        assert!(result.loading_state().is_loaded());
    }

    #[test]
    fn test_changed_params_are_stale_but_keep_payload() {
        let store = Arc::new(CacheStore::new());
        fill(&store, &CacheKey::new("pools"), &json!({"orgId": "o1"}), None, Utc::now());

        let result = hook_with(store).read("pools", &json!({"orgId": "o2"}));
        assert!(result.is_stale);
        assert!(result.payload.is_some());
    }

    #[test]
    fn test_entry_ttl_is_honored() {
        let t0 = Utc::now();
        let store = Arc::new(CacheStore::new());
        let params = json!({"orgId": "o1"});
        fill(&store, &CacheKey::new("pools"), &params, Some(Duration::from_secs(1)), t0);

        let clock = Arc::new(ManualClock::new(t0));
        let hook = ReadHook::new(store, clock.clone());
        assert!(!hook.read("pools", &params).is_stale);

        clock.advance(Duration::from_millis(1001));
        assert!(hook.read("pools", &params).is_stale);
    }

    #[test]
    fn test_loading_entry_suppresses_fetch() {
        let store = Arc::new(CacheStore::new());
        let key = CacheKey::new("pools");
        store.with_entry(&key, |entry| entry.begin_loading(pending(), None));

        let result = hook_with(store).read("pools", &json!({}));
        assert!(result.is_loading);
        assert!(result.is_stale);
        assert!(!result.should_fetch());
        assert!(result.loading_state().is_loading());
    }

    #[test]
    fn test_failed_entry_surfaces_error() {
        let store = Arc::new(CacheStore::new());
        let key = CacheKey::new("pools");
        store.with_entry(&key, |entry| {
            entry.begin_loading(pending(), None);
            entry.fail(
                1,
                ErrorRecord {
                    message: "Failed to load pools".to_string(),
                    status: Some(502),
                    retryable: true,
                    occurred_at: Utc::now(),
                },
            );
        });

        let result = hook_with(store).read("pools", &json!({}));
        assert_eq!(result.status, EntryStatus::Failed);
        assert!(result.should_fetch());
        assert_eq!(
            result.loading_state(),
            LoadingState::Error("Failed to load pools".to_string())
        );
    }
}
