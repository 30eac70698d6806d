//! Resource type descriptions.

use std::collections::HashMap;

use derive_getters::Getters;

use crate::{FieldDef, PathKind, PathTemplate, Protocol, ProtocolSet};

/// Static description of one resource type.
#[derive(Debug, Clone, Getters)]
pub struct ResourceType {
    /// Type tag as reported by the service (e.g. `SP.Web`).
    tag: String,
    /// Name of the key field. Every fetch implicitly requests it.
    key_field: String,
    /// Fields in declaration order.
    fields: Vec<FieldDef>,
    /// Fields loaded when the type is requested without an explicit field list.
    default_fields: Vec<String>,
    #[getter(skip)]
    paths: HashMap<(Protocol, PathKind), PathTemplate>,
}

impl ResourceType {
    pub fn builder(tag: impl Into<String>) -> ResourceTypeBuilder {
        ResourceTypeBuilder::new(tag)
    }

    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name() == name)
    }

    /// Look a field up by its wire name on the given protocol.
    pub fn field_by_wire_name(&self, protocol: Protocol, wire: &str) -> Option<&FieldDef> {
        self.fields
            .iter()
            .find(|f| f.wire_name(protocol) == Some(wire))
    }

    pub fn key(&self) -> Option<&FieldDef> {
        self.field(&self.key_field)
    }

    pub fn path(&self, protocol: Protocol, kind: PathKind) -> Option<&PathTemplate> {
        self.paths.get(&(protocol, kind))
    }

    /// Protocols with at least one path template for this type.
    pub fn addressable_by(&self) -> ProtocolSet {
        self.paths.keys().map(|(protocol, _)| *protocol).collect()
    }
}

/// Builder for [`ResourceType`].
#[derive(Debug, Clone)]
pub struct ResourceTypeBuilder {
    tag: String,
    key_field: Option<String>,
    fields: Vec<FieldDef>,
    default_fields: Vec<String>,
    paths: HashMap<(Protocol, PathKind), PathTemplate>,
}

impl ResourceTypeBuilder {
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            key_field: None,
            fields: Vec::new(),
            default_fields: Vec::new(),
            paths: HashMap::new(),
        }
    }

    pub fn key(mut self, field: impl Into<String>) -> Self {
        self.key_field = Some(field.into());
        self
    }

    pub fn field(mut self, field: FieldDef) -> Self {
        self.fields.retain(|f| f.name() != field.name());
        self.fields.push(field);
        self
    }

    pub fn fields(mut self, fields: impl IntoIterator<Item = FieldDef>) -> Self {
        for field in fields {
            self = self.field(field);
        }
        self
    }

    pub fn defaults<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.default_fields = fields.into_iter().map(Into::into).collect();
        self
    }

    pub fn path(
        mut self,
        protocol: Protocol,
        kind: PathKind,
        template: impl Into<PathTemplate>,
    ) -> Self {
        self.paths.insert((protocol, kind), template.into());
        self
    }

    /// Finish the type. Without an explicit key the first declared field is used.
    pub fn build(self) -> ResourceType {
        let key_field = self
            .key_field
            .or_else(|| self.fields.first().map(|f| f.name().clone()))
            .unwrap_or_default();

        ResourceType {
            tag: self.tag,
            key_field,
            fields: self.fields,
            default_fields: self.default_fields,
            paths: self.paths,
        }
    }
}
