//! Per-context behaviour switches.
//!
//! Defaults can be overridden from the environment:
//!
//! ```bash
//! export SITEGRAPH_GRAPH_FIRST=false
//! export SITEGRAPH_LOCAL_PAGING=exhaustive
//! export SITEGRAPH_LOCAL_PAGE_SIZE=500
//! ```

use tracing::{debug, warn};

pub const GRAPH_FIRST_VAR: &str = "SITEGRAPH_GRAPH_FIRST";
pub const LOCAL_PAGING_VAR: &str = "SITEGRAPH_LOCAL_PAGING";
pub const LOCAL_PAGE_SIZE_VAR: &str = "SITEGRAPH_LOCAL_PAGE_SIZE";

pub const DEFAULT_LOCAL_PAGE_SIZE: usize = 100;

/// What a fetch does when it would overwrite a field the caller modified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConflictPolicy {
    /// Fail the whole fetch with `Conflict`; nothing is applied.
    #[default]
    Fail,
    /// Keep the local value and apply everything else.
    KeepLocal,
    /// Drop the local change and take the server value.
    Overwrite,
}

/// How many pages a query with client-side evaluation fetches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalPaging {
    /// One page; results beyond it are not considered.
    SinglePage { page_size: usize },
    /// Follow next links until the collection is exhausted.
    Exhaustive { page_size: usize },
}

impl LocalPaging {
    pub fn page_size(&self) -> usize {
        match self {
            LocalPaging::SinglePage { page_size } | LocalPaging::Exhaustive { page_size } => {
                *page_size
            }
        }
    }

    pub fn is_exhaustive(&self) -> bool {
        matches!(self, LocalPaging::Exhaustive { .. })
    }
}

impl Default for LocalPaging {
    fn default() -> Self {
        LocalPaging::SinglePage {
            page_size: DEFAULT_LOCAL_PAGE_SIZE,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextOptions {
    /// Prefer Graph when both protocols can serve a request.
    pub graph_first: bool,
    pub conflict_policy: ConflictPolicy,
    pub local_paging: LocalPaging,
}

impl Default for ContextOptions {
    fn default() -> Self {
        Self {
            graph_first: true,
            conflict_policy: ConflictPolicy::default(),
            local_paging: LocalPaging::default(),
        }
    }
}

impl ContextOptions {
    pub fn graph_first(mut self, graph_first: bool) -> Self {
        self.graph_first = graph_first;
        self
    }

    pub fn conflict_policy(mut self, policy: ConflictPolicy) -> Self {
        self.conflict_policy = policy;
        self
    }

    pub fn local_paging(mut self, paging: LocalPaging) -> Self {
        self.local_paging = paging;
        self
    }

    /// Defaults overridden by `SITEGRAPH_*` variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut options = Self::default();

        if let Some(raw) = lookup(GRAPH_FIRST_VAR) {
            match raw.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" => options.graph_first = true,
                "0" | "false" | "no" => options.graph_first = false,
                other => warn!("ignoring {}={}: expected a boolean", GRAPH_FIRST_VAR, other),
            }
        }

        let page_size = lookup(LOCAL_PAGE_SIZE_VAR)
            .and_then(|s| s.trim().parse::<usize>().ok())
            .filter(|n| *n > 0)
            .unwrap_or(DEFAULT_LOCAL_PAGE_SIZE);

        options.local_paging = match lookup(LOCAL_PAGING_VAR).as_deref().map(str::trim) {
            Some("exhaustive") => LocalPaging::Exhaustive { page_size },
            Some("single") | None => LocalPaging::SinglePage { page_size },
            Some(other) => {
                warn!(
                    "ignoring {}={}: expected `single` or `exhaustive`",
                    LOCAL_PAGING_VAR, other
                );
                LocalPaging::SinglePage { page_size }
            }
        };

        debug!("context options: {:?}", options);
        options
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let options = ContextOptions::from_lookup(|_| None);
        assert_eq!(options, ContextOptions::default());
        assert!(options.graph_first);
        assert_eq!(options.local_paging.page_size(), 100);
    }

    #[test]
    fn test_environment_overrides() {
        let env = HashMap::from([
            (GRAPH_FIRST_VAR, "false"),
            (LOCAL_PAGING_VAR, "exhaustive"),
            (LOCAL_PAGE_SIZE_VAR, "250"),
        ]);
        let options = ContextOptions::from_lookup(|name| env.get(name).map(|v| v.to_string()));
        assert!(!options.graph_first);
        assert_eq!(options.local_paging, LocalPaging::Exhaustive { page_size: 250 });
    }

    #[test]
    fn test_invalid_values_fall_back() {
        let env = HashMap::from([(GRAPH_FIRST_VAR, "maybe"), (LOCAL_PAGE_SIZE_VAR, "0")]);
        let options = ContextOptions::from_lookup(|name| env.get(name).map(|v| v.to_string()));
        assert!(options.graph_first);
        assert_eq!(options.local_paging, LocalPaging::default());
    }
}
