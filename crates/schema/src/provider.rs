//! The metadata provider seam and its static implementation.

use std::collections::HashMap;

use crate::{FieldDef, PathKind, PathTemplate, Protocol, ResourceType, SchemaError};

/// Read-only access to resource type descriptions.
///
/// The runtime never embeds protocol-specific schema knowledge; everything it
/// needs about a type is asked through this trait.
pub trait ResourceMetadataProvider: Send + Sync {
    /// Full description of a resource type.
    fn resource(&self, resource_type: &str) -> Option<&ResourceType>;

    /// Like [`resource`](Self::resource) but fails with `UnknownResource`.
    fn require(&self, resource_type: &str) -> Result<&ResourceType, SchemaError> {
        self.resource(resource_type)
            .ok_or_else(|| SchemaError::UnknownResource(resource_type.to_string()))
    }

    fn fields_of(&self, resource_type: &str) -> Result<&[FieldDef], SchemaError> {
        self.require(resource_type).map(|r| r.fields().as_slice())
    }

    fn field(&self, resource_type: &str, field: &str) -> Option<&FieldDef> {
        self.resource(resource_type).and_then(|r| r.field(field))
    }

    fn path_for(
        &self,
        resource_type: &str,
        protocol: Protocol,
        kind: PathKind,
    ) -> Option<&PathTemplate> {
        self.resource(resource_type)
            .and_then(|r| r.path(protocol, kind))
    }

    fn default_fields(&self, resource_type: &str) -> Result<&[String], SchemaError> {
        self.require(resource_type)
            .map(|r| r.default_fields().as_slice())
    }

    fn key_field(&self, resource_type: &str) -> Option<&str> {
        self.resource(resource_type).map(|r| r.key_field().as_str())
    }
}

/// A catalog of resource types declared up front.
#[derive(Debug, Clone, Default)]
pub struct StaticCatalog {
    types: HashMap<String, ResourceType>,
}

impl StaticCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add (or replace) a resource type.
    pub fn with(mut self, resource_type: ResourceType) -> Self {
        self.insert(resource_type);
        self
    }

    pub fn insert(&mut self, resource_type: ResourceType) {
        tracing::trace!("registering resource type {}", resource_type.tag());
        self.types
            .insert(resource_type.tag().clone(), resource_type);
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    pub fn tags(&self) -> impl Iterator<Item = &str> {
        self.types.keys().map(|k| k.as_str())
    }
}

impl ResourceMetadataProvider for StaticCatalog {
    fn resource(&self, resource_type: &str) -> Option<&ResourceType> {
        self.types.get(resource_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FieldKind;

    #[test]
    fn test_provider_defaults() {
        let catalog = StaticCatalog::new().with(
            ResourceType::builder("SP.Web")
                .key("Id")
                .field(FieldDef::new("Id", FieldKind::Guid).rest())
                .field(FieldDef::new("Title", FieldKind::String).rest())
                .defaults(["Title"])
                .path(Protocol::Rest, PathKind::Root, "_api/web")
                .build(),
        );

        assert_eq!(catalog.key_field("SP.Web"), Some("Id"));
        assert_eq!(catalog.default_fields("SP.Web").unwrap(), ["Title".to_string()]);
        assert_eq!(catalog.fields_of("SP.Web").unwrap().len(), 2);
        assert_eq!(
            catalog
                .path_for("SP.Web", Protocol::Rest, PathKind::Root)
                .map(|p| p.as_str()),
            Some("_api/web")
        );
        assert!(catalog.path_for("SP.Web", Protocol::Graph, PathKind::Root).is_none());
    }

    #[test]
    fn test_unknown_resource() {
        let catalog = StaticCatalog::new();
        assert_eq!(
            catalog.fields_of("SP.Nope").unwrap_err(),
            SchemaError::UnknownResource("SP.Nope".to_string())
        );
    }
}
