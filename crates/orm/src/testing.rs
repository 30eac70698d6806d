//! Fixtures for unit and integration tests.
//!
//! A small SharePoint/Teams catalog and a context wired to a
//! [`MockTransport`].
//!
//! # Example
//! ```ignore
//! use std::sync::Arc;
//! use sitegraph_client::testing::MockTransport;
//! use sitegraph_orm::testing::fixture_context;
//!
//! let mock = Arc::new(MockTransport::new());
//! let context = fixture_context(mock.clone());
//! let web = context.resource("SP.Web")?;
//! ```

use std::sync::Arc;

use serde_json::json;
use sitegraph_client::testing::MockTransport;
use sitegraph_client::Method;
use sitegraph_schema::{FieldDef, FieldKind, PathKind, Protocol, ResourceType, StaticCatalog};

use crate::context::Context;
use crate::options::ContextOptions;

pub const HOSTNAME: &str = "contoso.sharepoint.com";
pub const SERVER_RELATIVE_PATH: &str = "/sites/dev";
pub const GROUP_ID: &str = "5f1a2b3c-0000-4000-8000-00000000beef";

pub const SITE_ID: &str = "3b9c2d4e-5f60-4718-8a9b-0c1d2e3f4a5b";
pub const WEB_ID: &str = "8e1e3c1e-4f64-4a0e-9d2b-3f6f1c2a5b7d";
pub const LIST_ID: &str = "0d7f3e0c-3c8b-4f0a-9a1b-2a5d5a4e8c11";
pub const SITE_PAGES_ID: &str = "1d7f3e0c-3c8b-4f0a-9a1b-2a5d5a4e8c11";

/// Graph address of the fixture web.
pub const GRAPH_WEB: &str = "sites/contoso.sharepoint.com:/sites/dev:";

pub fn fixture_catalog() -> StaticCatalog {
    StaticCatalog::new()
        .with(site())
        .with(web())
        .with(list())
        .with(content_type())
        .with(field_link())
        .with(list_item())
        .with(team())
        .with(team_channel())
        .with(team_app())
        .with(team_member())
}

/// A context over [`fixture_catalog`] with default options and the fixture
/// site's path tokens.
///
/// The site and web keys are REST only, so the mock also answers the
/// key-only REST requests that accompany Graph loads of a fresh site or web.
pub fn fixture_context(transport: Arc<MockTransport>) -> Context {
    transport
        .route(Protocol::Rest, Method::Get, "_api/web")
        .with_param("$select", "Id")
        .reply(json!({ "Id": WEB_ID }));
    transport
        .route(Protocol::Rest, Method::Get, "_api/site")
        .with_param("$select", "Id")
        .reply(json!({ "Id": SITE_ID }));
    Context::new(Arc::new(fixture_catalog()), transport)
        .with_options(ContextOptions::default())
        .with_token("hostname", HOSTNAME)
        .with_token("serverrelativepath", SERVER_RELATIVE_PATH)
        .with_token("groupId", GROUP_ID)
}

fn site() -> ResourceType {
    ResourceType::builder("SP.Site")
        .key("Id")
        .field(FieldDef::new("Id", FieldKind::Guid).rest())
        .field(FieldDef::new("Url", FieldKind::String).rest().graph_as("webUrl"))
        .field(FieldDef::new("RootWeb", FieldKind::one("SP.Web")).rest())
        .defaults(["Url"])
        .path(Protocol::Rest, PathKind::Root, "_api/site")
        .path(Protocol::Graph, PathKind::Root, "sites/{hostname}:{serverrelativepath}:")
        .build()
}

fn web() -> ResourceType {
    ResourceType::builder("SP.Web")
        .key("Id")
        .fields([
            // Graph identifies sites by a composite id, reported as metadata
            FieldDef::new("Id", FieldKind::Guid).rest(),
            FieldDef::new("Title", FieldKind::String).rest().graph_as("displayName"),
            FieldDef::new("Description", FieldKind::String).both(),
            FieldDef::new("Url", FieldKind::String).rest().graph_as("webUrl"),
            FieldDef::new("WelcomePage", FieldKind::String).rest(),
            FieldDef::new("NoCrawl", FieldKind::Boolean).rest(),
            FieldDef::new("Created", FieldKind::Timestamp).rest().graph_as("createdDateTime"),
            FieldDef::new("SharepointIds", FieldKind::Complex).graph_as("sharepointIds"),
            FieldDef::new("Lists", FieldKind::many("SP.List")).rest().graph_as("lists"),
            FieldDef::new("ContentTypes", FieldKind::many("SP.ContentType"))
                .rest()
                .graph_as("contentTypes"),
        ])
        .defaults(["Title", "Url"])
        .path(Protocol::Rest, PathKind::Root, "_api/web")
        .path(Protocol::Graph, PathKind::Root, "sites/{hostname}:{serverrelativepath}:")
        .build()
}

fn list() -> ResourceType {
    ResourceType::builder("SP.List")
        .key("Id")
        .fields([
            FieldDef::new("Id", FieldKind::Guid).rest().graph_as("id"),
            FieldDef::new("Title", FieldKind::String).rest().graph_as("displayName"),
            FieldDef::new("Description", FieldKind::String).both(),
            FieldDef::new(
                "TemplateType",
                FieldKind::enumeration(["GenericList", "DocumentLibrary", "Survey"]),
            )
            .rest_as("BaseTemplate"),
            FieldDef::new("Hidden", FieldKind::Boolean).rest(),
            FieldDef::new("ItemCount", FieldKind::Integer).rest(),
            FieldDef::new("Created", FieldKind::Timestamp).rest().graph_as("createdDateTime"),
            FieldDef::new("SystemFacet", FieldKind::Complex).graph_as("system"),
            FieldDef::new("ContentTypes", FieldKind::many("SP.ContentType"))
                .rest()
                .graph_as("contentTypes"),
            FieldDef::new("Items", FieldKind::many("SP.ListItem")).rest().graph_as("items"),
        ])
        .defaults(["Title"])
        .path(Protocol::Rest, PathKind::ByKey, "{parent}/lists(guid'{key}')")
        .path(Protocol::Rest, PathKind::Collection, "{parent}/lists")
        .path(Protocol::Graph, PathKind::ByKey, "{parent}/lists/{key}")
        .path(Protocol::Graph, PathKind::Collection, "{parent}/lists")
        .build()
}

fn content_type() -> ResourceType {
    ResourceType::builder("SP.ContentType")
        .key("StringId")
        .fields([
            FieldDef::new("StringId", FieldKind::String).rest().graph_as("id"),
            FieldDef::new("Name", FieldKind::String).rest().graph_as("name"),
            FieldDef::new("Description", FieldKind::String).both(),
            FieldDef::new("Group", FieldKind::String).rest().graph_as("group"),
            FieldDef::new("Hidden", FieldKind::Boolean).rest().graph_as("hidden"),
            FieldDef::new("FieldLinks", FieldKind::many("SP.FieldLink")).rest(),
        ])
        .defaults(["Name"])
        .path(Protocol::Rest, PathKind::ByKey, "{parent}/contenttypes('{key}')")
        .path(Protocol::Rest, PathKind::Collection, "{parent}/contenttypes")
        .path(Protocol::Graph, PathKind::ByKey, "{parent}/contentTypes/{key}")
        .path(Protocol::Graph, PathKind::Collection, "{parent}/contentTypes")
        .build()
}

fn field_link() -> ResourceType {
    ResourceType::builder("SP.FieldLink")
        .key("Id")
        .fields([
            FieldDef::new("Id", FieldKind::Guid).rest(),
            FieldDef::new("Name", FieldKind::String).rest(),
            FieldDef::new("Hidden", FieldKind::Boolean).rest(),
        ])
        .defaults(["Name"])
        .path(Protocol::Rest, PathKind::ByKey, "{parent}/fieldlinks(guid'{key}')")
        .path(Protocol::Rest, PathKind::Collection, "{parent}/fieldlinks")
        .build()
}

fn list_item() -> ResourceType {
    ResourceType::builder("SP.ListItem")
        .key("Id")
        .fields([
            FieldDef::new("Id", FieldKind::Integer).rest().graph_as("id"),
            FieldDef::new("Title", FieldKind::String).rest(),
            FieldDef::new("Created", FieldKind::Timestamp).rest().graph_as("createdDateTime"),
        ])
        .defaults(["Title"])
        .path(Protocol::Rest, PathKind::ByKey, "{parent}/items({key})")
        .path(Protocol::Rest, PathKind::Collection, "{parent}/items")
        .path(Protocol::Graph, PathKind::ByKey, "{parent}/items/{key}")
        .path(Protocol::Graph, PathKind::Collection, "{parent}/items")
        .build()
}

fn team() -> ResourceType {
    ResourceType::builder("Microsoft.Teams.Team")
        .key("Id")
        .fields([
            FieldDef::new("Id", FieldKind::String).graph_as("id"),
            FieldDef::new("DisplayName", FieldKind::String).graph_as("displayName"),
            FieldDef::new("Description", FieldKind::String).graph_as("description"),
            FieldDef::new("InternalId", FieldKind::String).graph_as("internalId"),
            FieldDef::new("IsArchived", FieldKind::Boolean).graph_as("isArchived"),
            FieldDef::new(
                "Visibility",
                FieldKind::enumeration(["Private", "Public", "HiddenMembership"]),
            )
            .graph_as("visibility"),
            FieldDef::new("FunSettings", FieldKind::Complex).graph_as("funSettings"),
            FieldDef::new("Channels", FieldKind::many("Microsoft.Teams.TeamChannel"))
                .graph_as("channels"),
            FieldDef::new("InstalledApps", FieldKind::many("Microsoft.Teams.TeamApp"))
                .graph_as("installedApps"),
            FieldDef::new("Members", FieldKind::many("Microsoft.Teams.TeamMember"))
                .graph_as("members"),
        ])
        .defaults(["DisplayName"])
        .path(Protocol::Graph, PathKind::Root, "teams/{groupId}")
        .path(Protocol::Graph, PathKind::ByKey, "teams/{key}")
        .path(Protocol::Graph, PathKind::Collection, "teams")
        .build()
}

fn team_channel() -> ResourceType {
    ResourceType::builder("Microsoft.Teams.TeamChannel")
        .key("Id")
        .fields([
            FieldDef::new("Id", FieldKind::String).graph_as("id"),
            FieldDef::new("DisplayName", FieldKind::String).graph_as("displayName"),
            FieldDef::new("Description", FieldKind::String).graph_as("description"),
            FieldDef::new(
                "MembershipType",
                FieldKind::enumeration(["Standard", "Private", "Shared"]),
            )
            .graph_as("membershipType"),
        ])
        .defaults(["DisplayName"])
        .path(Protocol::Graph, PathKind::ByKey, "{parent}/channels/{key}")
        .path(Protocol::Graph, PathKind::Collection, "{parent}/channels")
        .build()
}

fn team_app() -> ResourceType {
    ResourceType::builder("Microsoft.Teams.TeamApp")
        .key("Id")
        .fields([
            FieldDef::new("Id", FieldKind::String).graph_as("id"),
            FieldDef::new("TeamsApp", FieldKind::Complex).graph_as("teamsApp"),
            FieldDef::new("TeamsAppDefinition", FieldKind::Complex).graph_as("teamsAppDefinition"),
        ])
        .defaults(["TeamsApp"])
        .path(Protocol::Graph, PathKind::ByKey, "{parent}/installedApps/{key}")
        .path(Protocol::Graph, PathKind::Collection, "{parent}/installedApps")
        .build()
}

fn team_member() -> ResourceType {
    ResourceType::builder("Microsoft.Teams.TeamMember")
        .key("Id")
        .fields([
            FieldDef::new("Id", FieldKind::String).graph_as("id"),
            FieldDef::new("DisplayName", FieldKind::String).graph_as("displayName"),
            FieldDef::new("Roles", FieldKind::Json).graph_as("roles"),
        ])
        .defaults(["DisplayName"])
        .path(Protocol::Graph, PathKind::Collection, "{parent}/members")
        .build()
}
