//! Transport seam of the sitegraph runtime.
//!
//! The engine in `sitegraph-orm` produces [`RequestDescriptor`]s and consumes
//! raw [`Document`]s; everything between the two (HTTP, authentication, wire
//! batching) lives behind the [`Transport`] trait.
//!
//! - [`HttpTransport`] sends descriptors with `reqwest`, with optional per-host
//!   concurrency limiting.
//! - `MockTransport` (feature `testing`) answers from an in-memory route table.

mod descriptor;
mod err;
mod transport;

#[cfg(not(target_arch = "wasm32"))]
pub mod http;

/// In-memory transport for tests.
///
/// Enable with the `testing` feature.
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use descriptor::{CorrelationId, Document, Method, RequestDescriptor};
pub use err::{ServiceError, TransportError};
pub use transport::{BatchResponse, Transport};

#[cfg(not(target_arch = "wasm32"))]
pub use http::{ConcurrencyLimitConfig, HttpTransport};

pub use sitegraph_schema::Protocol;
