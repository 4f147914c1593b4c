// Cache module for in-memory request state.
// Stores one entry per endpoint key along with fingerprints, timestamps, and in-flight handles.

pub mod entry;
pub mod fingerprint;
pub mod staleness;
pub mod store;

pub use entry::{CacheEntry, CacheKey, EntrySnapshot, EntryStatus, ErrorRecord, Payload};
pub use fingerprint::fingerprint;
pub use staleness::{Clock, ManualClock, SystemClock, is_stale};
pub use store::{CacheEvent, CacheEventKind, CacheStore};
