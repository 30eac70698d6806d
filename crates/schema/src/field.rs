//! Field definitions: semantic type plus per-protocol exposure.

use derive_getters::Getters;

use crate::{Protocol, ProtocolSet};

/// How many resources a relation points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Cardinality {
    One,
    Many,
}

/// Declared semantic type of a field. Drives response coercion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldKind {
    String,
    Integer,
    Number,
    Boolean,
    Guid,
    Timestamp,
    /// Enumeration; wire values may be the variant name or its ordinal.
    Enum(Vec<String>),
    /// Nested object without identity (e.g. team fun settings).
    Complex,
    /// Raw JSON kept as is.
    Json,
    /// Navigation property to another resource type.
    Relation {
        target: String,
        cardinality: Cardinality,
    },
}

impl FieldKind {
    pub fn enumeration<I, S>(variants: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        FieldKind::Enum(variants.into_iter().map(Into::into).collect())
    }

    pub fn one(target: impl Into<String>) -> Self {
        FieldKind::Relation {
            target: target.into(),
            cardinality: Cardinality::One,
        }
    }

    pub fn many(target: impl Into<String>) -> Self {
        FieldKind::Relation {
            target: target.into(),
            cardinality: Cardinality::Many,
        }
    }

    /// Scalars can be used in server-side filters and ordering.
    pub fn is_scalar(&self) -> bool {
        !matches!(
            self,
            FieldKind::Complex | FieldKind::Json | FieldKind::Relation { .. }
        )
    }
}

/// A field of a resource type.
///
/// A field is exposed by a protocol iff it carries a wire name for that protocol.
#[derive(Debug, Clone, PartialEq, Eq, Getters)]
pub struct FieldDef {
    name: String,
    kind: FieldKind,
    #[getter(skip)]
    rest: Option<String>,
    #[getter(skip)]
    graph: Option<String>,
}

impl FieldDef {
    /// A field not yet exposed by any protocol.
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
            rest: None,
            graph: None,
        }
    }

    /// Expose over REST using the field name as wire name.
    pub fn rest(mut self) -> Self {
        self.rest = Some(self.name.clone());
        self
    }

    /// Expose over REST under a different wire name.
    pub fn rest_as(mut self, wire: impl Into<String>) -> Self {
        self.rest = Some(wire.into());
        self
    }

    /// Expose over Graph using the lower camel case field name.
    pub fn graph(mut self) -> Self {
        self.graph = Some(lower_camel(&self.name));
        self
    }

    /// Expose over Graph under a different wire name.
    pub fn graph_as(mut self, wire: impl Into<String>) -> Self {
        self.graph = Some(wire.into());
        self
    }

    /// Expose over both protocols with the default wire names.
    pub fn both(self) -> Self {
        self.rest().graph()
    }

    pub fn wire_name(&self, protocol: Protocol) -> Option<&str> {
        match protocol {
            Protocol::Rest => self.rest.as_deref(),
            Protocol::Graph => self.graph.as_deref(),
        }
    }

    pub fn is_exposed_by(&self, protocol: Protocol) -> bool {
        self.wire_name(protocol).is_some()
    }

    pub fn protocols(&self) -> ProtocolSet {
        Protocol::ALL
            .into_iter()
            .filter(|p| self.is_exposed_by(*p))
            .collect()
    }

    pub fn is_relation(&self) -> bool {
        matches!(self.kind, FieldKind::Relation { .. })
    }

    /// Target resource type and cardinality when this field is a relation.
    pub fn relation(&self) -> Option<(&str, Cardinality)> {
        match &self.kind {
            FieldKind::Relation {
                target,
                cardinality,
            } => Some((target.as_str(), *cardinality)),
            _ => None,
        }
    }
}

fn lower_camel(name: &str) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_lowercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_names() {
        let field = FieldDef::new("Title", FieldKind::String)
            .rest()
            .graph_as("displayName");
        assert_eq!(field.wire_name(Protocol::Rest), Some("Title"));
        assert_eq!(field.wire_name(Protocol::Graph), Some("displayName"));
        assert_eq!(field.protocols(), ProtocolSet::BOTH);
    }

    #[test]
    fn test_default_graph_name_is_lower_camel() {
        let field = FieldDef::new("InternalId", FieldKind::String).graph();
        assert_eq!(field.wire_name(Protocol::Graph), Some("internalId"));
        assert!(!field.is_exposed_by(Protocol::Rest));
    }

    #[test]
    fn test_relation_kind() {
        let field = FieldDef::new("Lists", FieldKind::many("SP.List")).both();
        assert_eq!(field.relation(), Some(("SP.List", Cardinality::Many)));
        assert!(!field.kind().is_scalar());
    }
}
