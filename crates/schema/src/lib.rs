//! Static resource metadata for the sitegraph runtime.
//!
//! Every resource type (site, web, list, item, team, ...) is described once by a
//! [`ResourceType`]: its fields, which wire protocol exposes each field and under
//! which name, its key field, its default field set and the path templates used
//! to address it. The runtime only ever reads this information through the
//! [`ResourceMetadataProvider`] trait.
//!
//! # Example
//! ```
//! use sitegraph_schema::prelude::*;
//!
//! let web = ResourceType::builder("SP.Web")
//!     .key("Id")
//!     .field(FieldDef::new("Id", FieldKind::Guid).rest().graph_as("id"))
//!     .field(FieldDef::new("Title", FieldKind::String).rest().graph_as("displayName"))
//!     .field(FieldDef::new("WelcomePage", FieldKind::String).rest())
//!     .defaults(["Title"])
//!     .path(Protocol::Rest, PathKind::Root, "_api/web")
//!     .build();
//!
//! let catalog = StaticCatalog::new().with(web);
//! assert_eq!(catalog.key_field("SP.Web"), Some("Id"));
//! ```

mod error;
mod field;
mod path;
mod protocol;
mod provider;
mod resource;
mod value;

pub mod prelude;

pub use error::SchemaError;
pub use field::{Cardinality, FieldDef, FieldKind};
pub use path::{PathKind, PathTemplate, PathVars};
pub use protocol::{Protocol, ProtocolSet};
pub use provider::{ResourceMetadataProvider, StaticCatalog};
pub use resource::{ResourceType, ResourceTypeBuilder};
pub use value::Value;
