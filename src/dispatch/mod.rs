// Dispatch module.
// Request orchestration over the cache store, with an explicit retry policy.

pub mod dispatcher;
pub mod retry;

pub use dispatcher::Dispatcher;
pub use retry::RetryPolicy;
