// State module.
// Consumer-facing reads of cached request state.

pub mod read;

pub use read::{LoadingState, ReadHook, ReadResult};
