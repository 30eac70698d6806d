//! Commonly used schema types.

pub use crate::{
    Cardinality, FieldDef, FieldKind, PathKind, PathTemplate, PathVars, Protocol, ProtocolSet,
    ResourceMetadataProvider, ResourceType, ResourceTypeBuilder, SchemaError, StaticCatalog,
    Value,
};
