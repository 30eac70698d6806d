//! Prelude for convenient imports.
//!
//! # Example
//! ```ignore
//! use sitegraph_orm::prelude::*;
//!
//! let web = context.resource("SP.Web")?;
//! context.load(&web, &[field("Title")]).await?;
//! ```

// Runtime types
pub use crate::{
    BatchItem, BatchSummary, ConflictPolicy, Context, ContextOptions, FieldState, LocalPaging,
    MappingOverrides, OrderBy, OrderDirection, OrmError, OrmResult, Query, QuerySpec,
    RelationSlot, Resource,
};

// Request building
pub use crate::{expand, expand_with, field, CompareOp, Predicate, Selector};

// Schema and transport types
pub use crate::{
    FieldDef, FieldKind, PathKind, Protocol, ResourceMetadataProvider, ResourceType,
    StaticCatalog, Transport, Value,
};
