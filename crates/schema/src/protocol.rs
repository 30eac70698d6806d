use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

/// The two wire protocols that expose the same resource graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Protocol {
    /// OData-style REST API (`_api/...`).
    Rest,
    /// Graph API (`sites/...`, `teams/...`).
    Graph,
}

impl Protocol {
    /// Both protocols, REST first.
    pub const ALL: [Protocol; 2] = [Protocol::Rest, Protocol::Graph];

    /// The other protocol.
    pub fn other(self) -> Protocol {
        match self {
            Protocol::Rest => Protocol::Graph,
            Protocol::Graph => Protocol::Rest,
        }
    }
}

impl Display for Protocol {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Protocol::Rest => f.write_str("REST"),
            Protocol::Graph => f.write_str("Graph"),
        }
    }
}

/// A small set of protocols.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct ProtocolSet {
    rest: bool,
    graph: bool,
}

impl ProtocolSet {
    pub const NONE: ProtocolSet = ProtocolSet {
        rest: false,
        graph: false,
    };

    pub const BOTH: ProtocolSet = ProtocolSet {
        rest: true,
        graph: true,
    };

    pub fn only(protocol: Protocol) -> Self {
        Self::NONE.with(protocol)
    }

    pub fn with(mut self, protocol: Protocol) -> Self {
        match protocol {
            Protocol::Rest => self.rest = true,
            Protocol::Graph => self.graph = true,
        }
        self
    }

    pub fn without(mut self, protocol: Protocol) -> Self {
        match protocol {
            Protocol::Rest => self.rest = false,
            Protocol::Graph => self.graph = false,
        }
        self
    }

    pub fn contains(&self, protocol: Protocol) -> bool {
        match protocol {
            Protocol::Rest => self.rest,
            Protocol::Graph => self.graph,
        }
    }

    pub fn intersect(self, other: ProtocolSet) -> ProtocolSet {
        ProtocolSet {
            rest: self.rest && other.rest,
            graph: self.graph && other.graph,
        }
    }

    pub fn is_empty(&self) -> bool {
        !self.rest && !self.graph
    }

    pub fn iter(&self) -> impl Iterator<Item = Protocol> + '_ {
        Protocol::ALL.into_iter().filter(|p| self.contains(*p))
    }
}

impl FromIterator<Protocol> for ProtocolSet {
    fn from_iter<I: IntoIterator<Item = Protocol>>(iter: I) -> Self {
        iter.into_iter().fold(ProtocolSet::NONE, ProtocolSet::with)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_operations() {
        let set = ProtocolSet::only(Protocol::Graph);
        assert!(set.contains(Protocol::Graph));
        assert!(!set.contains(Protocol::Rest));
        assert_eq!(set.intersect(ProtocolSet::BOTH), set);
        assert!(set.intersect(ProtocolSet::only(Protocol::Rest)).is_empty());
        assert_eq!(ProtocolSet::BOTH.iter().collect::<Vec<_>>(), vec![Protocol::Rest, Protocol::Graph]);
    }
}
