//! reqwest-backed transport.

pub mod concurrency_limiter;
mod transport;

pub use concurrency_limiter::ConcurrencyLimitConfig;
pub use transport::{HttpTransport, GRAPH_BATCH_LIMIT};
