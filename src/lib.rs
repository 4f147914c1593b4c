// finops-api: request coordination and caching for the cost-management API.
// Views read cached state through `ReadHook` and issue requests through `Dispatcher`.

pub mod api;
pub mod cache;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod state;

pub use api::{
    ErrorTransform, HttpTransport, Method, RequestDescriptor, SuccessTransform, Transport,
    TransportRequest,
};
pub use cache::{
    CacheEvent, CacheEventKind, CacheKey, CacheStore, Clock, EntrySnapshot, EntryStatus,
    ErrorRecord, ManualClock, Payload, SystemClock, fingerprint, is_stale,
};
pub use config::ApiConfig;
pub use dispatch::{Dispatcher, RetryPolicy};
pub use error::{ApiError, Result};
pub use state::{LoadingState, ReadHook, ReadResult};
