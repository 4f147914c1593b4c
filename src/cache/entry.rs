// Cache entries and their lifecycle.
// One entry per cache key, moving through Idle -> Loading -> Ready/Failed and back.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, Shared};
use serde::Serialize;
use serde_json::Value;

use crate::error::Result;

/// A transformed response body as stored in the cache.
pub type Payload = Arc<Value>;

/// Handle to a pending network request that any number of callers can await.
pub type PendingRequest = Shared<BoxFuture<'static, Result<Payload>>>;

/// Identity of a cache entry: the endpoint label plus an optional scope.
///
/// Two scopes of the same label (for example two organizations) never share
/// an entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct CacheKey {
    pub label: String,
    pub scope: Option<String>,
}

impl CacheKey {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            scope: None,
        }
    }

    pub fn scoped(label: impl Into<String>, scope: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            scope: Some(scope.into()),
        }
    }
}

impl From<&str> for CacheKey {
    fn from(label: &str) -> Self {
        Self::new(label)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.scope {
            Some(scope) => write!(f, "{}@{}", self.label, scope),
            None => f.write_str(&self.label),
        }
    }
}

/// Lifecycle status of a cache entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryStatus {
    #[default]
    Idle,
    Loading,
    Ready,
    Failed,
}

/// A failure as recorded on an entry for consumers to render.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorRecord {
    pub message: String,
    pub status: Option<u16>,
    pub retryable: bool,
    pub occurred_at: DateTime<Utc>,
}

/// The request currently occupying an entry's in-flight slot.
#[derive(Clone)]
pub(crate) struct InFlight {
    pub id: u64,
    pub request: PendingRequest,
}

impl fmt::Debug for InFlight {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InFlight").field("id", &self.id).finish()
    }
}

/// Last-known state for one cache key.
#[derive(Debug, Clone, Default)]
pub struct CacheEntry {
    pub status: EntryStatus,
    pub payload: Option<Payload>,
    /// Fingerprint of the parameters that produced `payload`.
    pub fingerprint: Option<String>,
    pub fetched_at: Option<DateTime<Utc>>,
    pub error: Option<ErrorRecord>,
    /// Time-to-live from the most recent descriptor issued for this key.
    pub ttl: Option<Duration>,
    /// Bumped on every invalidation.
    pub(crate) generation: u64,
    pub(crate) in_flight: Option<InFlight>,
}

impl CacheEntry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_loading(&self) -> bool {
        self.status == EntryStatus::Loading
    }

    pub fn has_in_flight(&self) -> bool {
        self.in_flight.is_some()
    }

    /// Enter `Loading` and occupy the in-flight slot.
    pub(crate) fn begin_loading(&mut self, in_flight: InFlight, ttl: Option<Duration>) {
        self.status = EntryStatus::Loading;
        self.ttl = ttl;
        self.in_flight = Some(in_flight);
    }

    /// Store a successful response.
    ///
    /// Payload and fingerprint are written together. If the entry was
    /// invalidated after the request started, the payload is kept but left
    /// without a fingerprint so the next read refetches.
    pub(crate) fn complete(
        &mut self,
        request_id: u64,
        started_generation: u64,
        payload: Payload,
        fingerprint: String,
        at: DateTime<Utc>,
    ) {
        self.status = EntryStatus::Ready;
        self.payload = Some(payload);
        if self.generation == started_generation {
            self.fingerprint = Some(fingerprint);
            self.fetched_at = Some(at);
        } else {
            self.fingerprint = None;
            self.fetched_at = None;
        }
        self.error = None;
        self.release(request_id);
    }

    /// Record a failed request. The previous payload is retained.
    pub(crate) fn fail(&mut self, request_id: u64, record: ErrorRecord) {
        self.status = EntryStatus::Failed;
        self.error = Some(record);
        self.release(request_id);
    }

    /// Mark the entry dirty without discarding its payload.
    ///
    /// Returns true if a fingerprint or timestamp was actually cleared.
    pub(crate) fn invalidate(&mut self) -> bool {
        self.generation = self.generation.wrapping_add(1);
        let changed = self.fingerprint.is_some() || self.fetched_at.is_some();
        self.fingerprint = None;
        self.fetched_at = None;
        changed
    }

    /// Free the in-flight slot if it still belongs to `request_id`.
    fn release(&mut self, request_id: u64) {
        if self.in_flight.as_ref().is_some_and(|f| f.id == request_id) {
            self.in_flight = None;
        }
    }
}

/// Read-only copy of an entry, without the in-flight handle.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntrySnapshot {
    pub key: CacheKey,
    pub status: EntryStatus,
    pub payload: Option<Payload>,
    pub fingerprint: Option<String>,
    pub fetched_at: Option<DateTime<Utc>>,
    pub error: Option<ErrorRecord>,
    pub in_flight: bool,
}

impl EntrySnapshot {
    pub(crate) fn of(key: &CacheKey, entry: &CacheEntry) -> Self {
        Self {
            key: key.clone(),
            status: entry.status,
            payload: entry.payload.clone(),
            fingerprint: entry.fingerprint.clone(),
            fetched_at: entry.fetched_at,
            error: entry.error.clone(),
            in_flight: entry.in_flight.is_some(),
        }
    }
}
