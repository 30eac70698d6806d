//! Deferred-loading data access over SharePoint REST and Microsoft Graph.
//!
//! A [`Context`] hands out [`Resource`] handles whose fields start out
//! unloaded. Loading requests a set of [`Selector`]s; the runtime merges them
//! into a [`RequestNode`] tree, routes every field to a protocol that exposes
//! it, translates the request to OData, and maps the answers back into each
//! instance's [`PropertyBag`]. Operations issued inside a batch scope are sent
//! together and resolved independently.
//!
//! # Example
//! ```ignore
//! use sitegraph_orm::prelude::*;
//!
//! let context = Context::new(catalog, transport)
//!     .with_token("hostname", "contoso.sharepoint.com")
//!     .with_token("serverrelativepath", "/sites/dev");
//!
//! let web = context.resource("SP.Web")?;
//! context.load(&web, &[field("Title"), expand("Lists")]).await?;
//!
//! let libraries = context
//!     .query(&web, "Lists")?
//!     .where_(Predicate::eq("Hidden", false))
//!     .order_by("Title")
//!     .to_list()
//!     .await?;
//!
//! context.begin_batch()?;
//! let a = context.load_batch(&libraries[0], &[field("ItemCount")])?;
//! let b = context.load_batch(&libraries[1], &[field("ItemCount")])?;
//! context.execute_batch().await?;
//! a.await?;
//! b.await?;
//! ```

mod bag;
mod batch;
mod context;
mod error;
mod mapper;
mod mutation;
mod options;
mod predicate;
mod protocol;
mod query;
mod request;
mod resource;
pub mod selector;
mod translate;

pub mod prelude;

/// Fixture catalog and mock-backed contexts.
///
/// Enable with `#[cfg(test)]` or when the `testing` feature is enabled.
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use bag::{FieldState, InstanceMetadata, Origin, PropertyBag};
pub use batch::{BatchCoordinator, BatchItem, BatchSummary};
pub use context::Context;
pub use error::{BatchFailure, OrmError, OrmResult};
pub use mapper::{coerce, MappingOverrides};
pub use options::{
    ConflictPolicy, ContextOptions, LocalPaging, DEFAULT_LOCAL_PAGE_SIZE, GRAPH_FIRST_VAR,
    LOCAL_PAGE_SIZE_VAR, LOCAL_PAGING_VAR,
};
pub use predicate::{CompareOp, LocalPredicate, Predicate, Row};
pub use protocol::choose as choose_protocol;
pub use query::{OrderBy, OrderDirection, Query, QuerySpec};
pub use request::RequestNode;
pub use resource::{RelationSlot, Resource};
pub use selector::{expand, expand_with, field, Selector};
pub use translate::{render_projection, translate_filter, Translation};

// Re-export commonly used types from dependencies
pub use sitegraph_client::{
    CorrelationId, Document, Method, RequestDescriptor, ServiceError, Transport, TransportError,
};
pub use sitegraph_schema::{
    Cardinality, FieldDef, FieldKind, PathKind, Protocol, ProtocolSet, ResourceMetadataProvider,
    ResourceType, StaticCatalog, Value,
};
