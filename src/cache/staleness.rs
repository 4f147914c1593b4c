// Staleness policy.
// Decides whether a cached entry may be reused for a proposed fingerprint.

use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};

use super::entry::{CacheEntry, EntryStatus};

/// Source of the current time.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    /// Move the clock forward.
    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        let delta = chrono::Duration::from_std(by).unwrap_or_else(|_| chrono::Duration::zero());
        if let Some(next) = now.checked_add_signed(delta) {
            *now = next;
        }
    }

    pub fn set(&self, to: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(|e| e.into_inner()) = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Check whether an entry must be refreshed.
///
/// Stale when the entry is not `Ready`, when its fingerprint differs from
/// `proposed`, or when `ttl` is set and more than `ttl` has passed since the
/// last fetch. Without a `ttl` the entry never expires by age alone.
pub fn is_stale(
    entry: &CacheEntry,
    proposed: &str,
    ttl: Option<Duration>,
    now: DateTime<Utc>,
) -> bool {
    if entry.status != EntryStatus::Ready {
        return true;
    }

    if entry.fingerprint.as_deref() != Some(proposed) {
        return true;
    }

    match (ttl, entry.fetched_at) {
        (Some(ttl), Some(fetched_at)) => age(fetched_at, now) > ttl,
        (Some(_), None) => true,
        (None, _) => false,
    }
}

/// Time elapsed since `fetched_at`. A timestamp in the future counts as expired.
fn age(fetched_at: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    now.signed_duration_since(fetched_at)
        .to_std()
        .unwrap_or(Duration::MAX)
}
