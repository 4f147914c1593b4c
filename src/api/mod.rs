// API module.
// Request descriptors, the transport seam, the HTTP client, and endpoint factories.

pub mod client;
pub mod descriptor;
pub mod endpoints;
pub mod transport;

pub use client::{HttpTransport, RateLimit};
pub use descriptor::{ErrorTransform, Method, RequestDescriptor, SuccessTransform};
pub use transport::{Transport, TransportRequest};
