//! Per-host concurrency limiting for [`HttpTransport`](super::HttpTransport).
//!
//! Limiters are keyed by host and shared by every transport talking to the
//! same host, so a REST transport and a Graph transport created in different
//! places still respect one budget per host.
//!
//! Reads (GET) and writes (POST/PATCH/DELETE) have separate limits. Both are
//! optional and limiting is off unless configured:
//!
//! ```bash
//! export SITEGRAPH_CONCURRENCY_LIMIT_READ=10
//! export SITEGRAPH_CONCURRENCY_LIMIT_WRITE=4
//! ```

use dashmap::DashMap;
use once_cell::sync::Lazy;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::debug;

use crate::Method;

pub const READ_LIMIT_VAR: &str = "SITEGRAPH_CONCURRENCY_LIMIT_READ";
pub const WRITE_LIMIT_VAR: &str = "SITEGRAPH_CONCURRENCY_LIMIT_WRITE";

/// Maximum in-flight requests per host. `None` means unlimited.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConcurrencyLimitConfig {
    pub max_concurrent_reads: Option<usize>,
    pub max_concurrent_writes: Option<usize>,
}

impl ConcurrencyLimitConfig {
    pub fn new(max_concurrent_reads: Option<usize>, max_concurrent_writes: Option<usize>) -> Self {
        Self {
            max_concurrent_reads,
            max_concurrent_writes,
        }
    }

    /// Read limits from `SITEGRAPH_CONCURRENCY_LIMIT_READ` / `_WRITE`.
    ///
    /// Returns `None` when neither is set to a number.
    pub fn from_env() -> Option<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Option<Self> {
        let read = lookup(READ_LIMIT_VAR).and_then(|s| s.trim().parse::<usize>().ok());
        let write = lookup(WRITE_LIMIT_VAR).and_then(|s| s.trim().parse::<usize>().ok());

        if read.is_none() && write.is_none() {
            return None;
        }

        debug!(
            "concurrency limiting configured from environment: read={:?}, write={:?}",
            read, write
        );
        Some(Self::new(read, write))
    }
}

type SharedSemaphore = Arc<Semaphore>;

#[derive(Debug, Clone, Default)]
pub struct HostLimits {
    read: Option<SharedSemaphore>,
    write: Option<SharedSemaphore>,
}

impl HostLimits {
    /// Semaphore governing requests with this method, if limited.
    pub fn for_method(&self, method: Method) -> Option<&SharedSemaphore> {
        if method.is_read() {
            self.read.as_ref()
        } else {
            self.write.as_ref()
        }
    }
}

static GLOBAL_LIMITS: Lazy<DashMap<String, HostLimits>> = Lazy::new(DashMap::new);

/// Get the limits registered for `host`, creating them from `config` on first use.
///
/// Later calls for the same host return the existing semaphores even when a
/// different config is passed. A limit of zero disables limiting.
pub fn limits_for_host(host: &str, config: &ConcurrencyLimitConfig) -> HostLimits {
    GLOBAL_LIMITS
        .entry(host.to_string())
        .or_insert_with(|| {
            debug!(
                "creating semaphores for host {}: read={:?} write={:?}",
                host, config.max_concurrent_reads, config.max_concurrent_writes
            );

            HostLimits {
                read: config
                    .max_concurrent_reads
                    .filter(|&n| n > 0)
                    .map(|n| Arc::new(Semaphore::new(n))),
                write: config
                    .max_concurrent_writes
                    .filter(|&n| n > 0)
                    .map(|n| Arc::new(Semaphore::new(n))),
            }
        })
        .value()
        .clone()
}

/// Forget every registered host. Test helper.
pub fn clear_all_limits() {
    GLOBAL_LIMITS.clear();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_from_lookup_reads_both_limits() {
        let vars: HashMap<&str, &str> = [(READ_LIMIT_VAR, "8"), (WRITE_LIMIT_VAR, " 2 ")].into();
        let config = ConcurrencyLimitConfig::from_lookup(|k| vars.get(k).map(|v| v.to_string()));
        assert_eq!(config, Some(ConcurrencyLimitConfig::new(Some(8), Some(2))));
    }

    #[test]
    fn test_from_lookup_none_when_unset_or_garbage() {
        assert_eq!(ConcurrencyLimitConfig::from_lookup(|_| None), None);
        assert_eq!(
            ConcurrencyLimitConfig::from_lookup(|_| Some("many".to_string())),
            None
        );
    }

    #[test]
    fn test_same_host_shares_semaphores() {
        let config = ConcurrencyLimitConfig::new(Some(3), Some(1));
        let first = limits_for_host("contoso.sharepoint.com-shared", &config);
        let second = limits_for_host("contoso.sharepoint.com-shared", &ConcurrencyLimitConfig::default());

        assert!(Arc::ptr_eq(
            first.for_method(Method::Get).unwrap(),
            second.for_method(Method::Get).unwrap()
        ));
        assert!(Arc::ptr_eq(
            first.for_method(Method::Delete).unwrap(),
            second.for_method(Method::Patch).unwrap()
        ));
    }

    #[test]
    fn test_zero_limit_disables() {
        let config = ConcurrencyLimitConfig::new(Some(0), None);
        let limits = limits_for_host("graph.microsoft.com-zero", &config);
        assert!(limits.for_method(Method::Get).is_none());
        assert!(limits.for_method(Method::Post).is_none());
    }
}
