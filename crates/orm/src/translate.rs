//! Rendering request trees and query specs into protocol requests.
//!
//! REST follows the OData v3 conventions of the SharePoint API
//! (`$select=Id,Lists/Title&$expand=Lists`, `substringof`, `guid'…'`
//! literals). Graph follows OData v4 (`$expand=lists($select=id)`, no
//! `contains`).

use itertools::Itertools;
use sitegraph_client::{CorrelationId, RequestDescriptor};
use sitegraph_schema::{Protocol, ResourceMetadataProvider, Value};
use tracing::debug;

use crate::options::LocalPaging;
use crate::predicate::Predicate;
use crate::query::{OrderBy, OrderDirection, QuerySpec};
use crate::request::RequestNode;

/// `$select` and `$expand` parameters for `node`.
pub fn render_projection(
    catalog: &dyn ResourceMetadataProvider,
    node: &RequestNode,
    protocol: Protocol,
) -> Vec<(String, String)> {
    let mut params = Vec::new();
    match protocol {
        Protocol::Rest => {
            let mut select = Vec::new();
            let mut expand = Vec::new();
            rest_projection(catalog, node, "", &mut select, &mut expand);
            if !select.is_empty() {
                params.push(("$select".to_string(), select.join(",")));
            }
            if !expand.is_empty() {
                params.push(("$expand".to_string(), expand.join(",")));
            }
        }
        Protocol::Graph => {
            let select = graph_select(catalog, node);
            if !select.is_empty() {
                params.push(("$select".to_string(), select.join(",")));
            }
            let expand = graph_expand(catalog, node);
            if !expand.is_empty() {
                params.push(("$expand".to_string(), expand.join(",")));
            }
        }
    }
    params
}

fn wire_name<'a>(
    catalog: &'a dyn ResourceMetadataProvider,
    resource_type: &str,
    field: &str,
    protocol: Protocol,
) -> Option<&'a str> {
    catalog
        .field(resource_type, field)
        .and_then(|def| def.wire_name(protocol))
}

fn rest_projection(
    catalog: &dyn ResourceMetadataProvider,
    node: &RequestNode,
    prefix: &str,
    select: &mut Vec<String>,
    expand: &mut Vec<String>,
) {
    for field in node.fields() {
        if let Some(wire) = wire_name(catalog, node.resource_type(), field, Protocol::Rest) {
            select.push(format!("{}{}", prefix, wire));
        }
    }
    for (name, child) in node.relations() {
        let Some(wire) = wire_name(catalog, node.resource_type(), name, Protocol::Rest) else {
            continue;
        };
        let path = format!("{}{}", prefix, wire);
        expand.push(path.clone());
        rest_projection(catalog, child, &format!("{}/", path), select, expand);
    }
}

fn graph_select(catalog: &dyn ResourceMetadataProvider, node: &RequestNode) -> Vec<String> {
    node.fields()
        .iter()
        .filter_map(|f| wire_name(catalog, node.resource_type(), f, Protocol::Graph))
        .map(str::to_string)
        .collect()
}

fn graph_expand(catalog: &dyn ResourceMetadataProvider, node: &RequestNode) -> Vec<String> {
    node.relations()
        .iter()
        .filter_map(|(name, child)| {
            let wire = wire_name(catalog, node.resource_type(), name, Protocol::Graph)?;
            let mut options = Vec::new();
            let select = graph_select(catalog, child);
            if !select.is_empty() {
                options.push(format!("$select={}", select.join(",")));
            }
            let nested = graph_expand(catalog, child);
            if !nested.is_empty() {
                options.push(format!("$expand={}", nested.join(",")));
            }
            Some(if options.is_empty() {
                wire.to_string()
            } else {
                format!("{}({})", wire, options.join(";"))
            })
        })
        .collect()
}

/// Server-side filter text, or `None` when any part must run locally.
///
/// A predicate translates iff every leaf compares a scalar field exposed by
/// the protocol and every string function is available on it.
pub fn translate_filter(
    catalog: &dyn ResourceMetadataProvider,
    resource_type: &str,
    predicate: &Predicate,
    protocol: Protocol,
) -> Option<String> {
    let scalar_wire = |field: &str| -> Option<&str> {
        let def = catalog.field(resource_type, field)?;
        if !def.kind().is_scalar() {
            return None;
        }
        def.wire_name(protocol)
    };

    match predicate {
        Predicate::Compare { field, op, value } => {
            let wire = scalar_wire(field)?;
            let literal = value.to_literal(protocol)?;
            Some(format!("{} {} {}", wire, op.as_odata(), literal))
        }
        Predicate::StartsWith { field, prefix } => {
            let wire = scalar_wire(field)?;
            let literal = Value::from(prefix.as_str()).to_literal(protocol)?;
            Some(format!("startswith({},{})", wire, literal))
        }
        Predicate::Contains { field, fragment } => match protocol {
            Protocol::Rest => {
                let wire = scalar_wire(field)?;
                let literal = Value::from(fragment.as_str()).to_literal(protocol)?;
                Some(format!("substringof({},{})", literal, wire))
            }
            Protocol::Graph => None,
        },
        Predicate::And(children) => join_filters(catalog, resource_type, children, protocol, "and"),
        Predicate::Or(children) => join_filters(catalog, resource_type, children, protocol, "or"),
        Predicate::Not(inner) => {
            let inner = translate_filter(catalog, resource_type, inner, protocol)?;
            Some(format!("not ({})", inner))
        }
        Predicate::Local(_) => None,
    }
}

fn join_filters(
    catalog: &dyn ResourceMetadataProvider,
    resource_type: &str,
    children: &[Predicate],
    protocol: Protocol,
    operator: &str,
) -> Option<String> {
    let parts: Option<Vec<String>> = children
        .iter()
        .map(|child| {
            let text = translate_filter(catalog, resource_type, child, protocol)?;
            Some(match child {
                Predicate::And(_) | Predicate::Or(_) => format!("({})", text),
                _ => text,
            })
        })
        .collect();
    let parts = parts?;
    match parts.len() {
        0 => None,
        _ => Some(parts.join(&format!(" {} ", operator))),
    }
}

/// `$orderby` text, or `None` when a field cannot be ordered on the server.
pub fn render_order(
    catalog: &dyn ResourceMetadataProvider,
    resource_type: &str,
    order: &[OrderBy],
    protocol: Protocol,
) -> Option<String> {
    order
        .iter()
        .map(|o| {
            let def = catalog.field(resource_type, &o.field)?;
            if !def.kind().is_scalar() {
                return None;
            }
            let wire = def.wire_name(protocol)?;
            Some(match o.direction {
                OrderDirection::Asc => wire.to_string(),
                OrderDirection::Desc => format!("{} desc", wire),
            })
        })
        .collect::<Option<Vec<_>>>()
        .map(|parts| parts.join(","))
}

/// A collection request plus whatever the server cannot do for it.
#[derive(Debug, Clone)]
pub struct Translation {
    pub descriptor: RequestDescriptor,
    /// Predicate to evaluate client side over the fetched page.
    pub local_filter: Option<Predicate>,
    /// Ordering to apply client side.
    pub local_order: bool,
    /// `$skip`/`$top` could not be pushed down and apply client side.
    pub local_window: bool,
    /// Page size requested because the window is applied locally.
    pub page_size: Option<usize>,
}

impl Translation {
    pub fn requires_local_evaluation(&self) -> bool {
        self.local_filter.is_some() || self.local_order || self.local_window
    }
}

/// Render a collection request.
///
/// Parameters are appended as `$select`, `$expand`, `$filter`, `$orderby`,
/// `$top`, `$skip`. When the filter or ordering must run locally no `$filter`
/// is sent for the untranslatable predicate and the window is applied after
/// local evaluation, on a page of `paging.page_size()` items.
#[allow(clippy::too_many_arguments)]
pub fn translate_collection(
    catalog: &dyn ResourceMetadataProvider,
    correlation_id: CorrelationId,
    protocol: Protocol,
    path: &str,
    node: &RequestNode,
    spec: &QuerySpec,
    paging: LocalPaging,
) -> Translation {
    let resource_type = node.resource_type();
    let mut descriptor = RequestDescriptor::get(correlation_id, protocol, path);
    for (name, value) in render_projection(catalog, node, protocol) {
        descriptor = descriptor.with_param(name, value);
    }

    let mut local_filter = None;
    if let Some(predicate) = &spec.predicate {
        match translate_filter(catalog, resource_type, predicate, protocol) {
            Some(filter) => descriptor = descriptor.with_param("$filter", filter),
            None => {
                debug!(
                    "filter on {} cannot be expressed in {}; evaluating locally",
                    resource_type, protocol
                );
                local_filter = Some(predicate.clone());
            }
        }
    }

    let mut local_order = false;
    if !spec.order.is_empty() {
        match render_order(catalog, resource_type, &spec.order, protocol) {
            Some(order) => descriptor = descriptor.with_param("$orderby", order),
            None => local_order = true,
        }
    }

    let local = local_filter.is_some() || local_order;
    let mut page_size = None;
    let mut local_window = false;
    if local {
        local_window = spec.top.is_some() || spec.skip.is_some();
        let size = paging.page_size();
        descriptor = descriptor.with_param("$top", size.to_string());
        page_size = Some(size);
    } else {
        if let Some(top) = spec.top {
            descriptor = descriptor.with_param("$top", top.to_string());
        }
        if let Some(skip) = spec.skip.filter(|s| *s > 0) {
            descriptor = descriptor.with_param("$skip", skip.to_string());
        }
    }

    Translation {
        descriptor,
        local_filter,
        local_order,
        local_window,
        page_size,
    }
}

/// Filter selecting one member by key, for collections without a by-key path.
pub fn key_filter(
    catalog: &dyn ResourceMetadataProvider,
    resource_type: &str,
    key_field: &str,
    key: &Value,
    protocol: Protocol,
) -> Option<String> {
    translate_filter(catalog, resource_type, &Predicate::eq(key_field, key.clone()), protocol)
}

/// Rendered `name=value` list, for logs.
pub fn describe(params: &[(String, String)]) -> String {
    params.iter().map(|(k, v)| format!("{}={}", k, v)).join("&")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::QuerySpec;
    use crate::selector::{expand_with, field};
    use crate::testing::fixture_catalog;
    use pretty_assertions::assert_eq;
    use uuid::Uuid;

    fn node(resource_type: &str, selectors: &[crate::selector::Selector]) -> RequestNode {
        RequestNode::build(&fixture_catalog(), resource_type, selectors).unwrap()
    }

    #[test]
    fn test_rest_projection_nests_paths() {
        let catalog = fixture_catalog();
        let web = node(
            "SP.Web",
            &[
                field("Title"),
                expand_with("Lists", [field("Title"), expand_with("ContentTypes", [field("Name")])]),
            ],
        );
        let params = render_projection(&catalog, &web, Protocol::Rest);
        assert_eq!(
            describe(&params),
            "$select=Id,Title,Lists/Id,Lists/Title,Lists/ContentTypes/StringId,Lists/ContentTypes/Name\
             &$expand=Lists,Lists/ContentTypes"
        );
    }

    #[test]
    fn test_graph_projection_nests_options() {
        let catalog = fixture_catalog();
        let web = node(
            "SP.Web",
            &[
                field("Title"),
                expand_with("Lists", [field("Title"), expand_with("ContentTypes", [field("Name")])]),
            ],
        );
        let params = render_projection(&catalog, &web, Protocol::Graph);
        assert_eq!(
            describe(&params),
            "$select=displayName\
             &$expand=lists($select=id,displayName;$expand=contentTypes($select=id,name))"
        );
    }

    #[test]
    fn test_filter_literals_per_protocol() {
        let catalog = fixture_catalog();
        let id = Uuid::parse_str("8e1e3c1e-4f64-4a0e-9d2b-3f6f1c2a5b7d").unwrap();
        let p = Predicate::eq("Title", "O'Neil's").and(Predicate::ne("Id", id));

        assert_eq!(
            translate_filter(&catalog, "SP.List", &p, Protocol::Rest).unwrap(),
            "Title eq 'O''Neil''s' and Id ne guid'8e1e3c1e-4f64-4a0e-9d2b-3f6f1c2a5b7d'"
        );
        assert_eq!(
            translate_filter(&catalog, "SP.List", &p, Protocol::Graph).unwrap(),
            "displayName eq 'O''Neil''s' and id ne 8e1e3c1e-4f64-4a0e-9d2b-3f6f1c2a5b7d"
        );
    }

    #[test]
    fn test_string_functions() {
        let catalog = fixture_catalog();
        let contains = Predicate::contains("Title", "Doc");
        assert_eq!(
            translate_filter(&catalog, "SP.List", &contains, Protocol::Rest).unwrap(),
            "substringof('Doc',Title)"
        );
        assert_eq!(translate_filter(&catalog, "SP.List", &contains, Protocol::Graph), None);

        let starts = Predicate::starts_with("Title", "Doc");
        assert_eq!(
            translate_filter(&catalog, "SP.List", &starts, Protocol::Graph).unwrap(),
            "startswith(displayName,'Doc')"
        );
    }

    #[test]
    fn test_or_of_translatable_terms_is_parenthesized() {
        let catalog = fixture_catalog();
        let p = Predicate::eq("Hidden", false)
            .and(Predicate::eq("Title", "A").or(Predicate::eq("Title", "B")));
        assert_eq!(
            translate_filter(&catalog, "SP.List", &p, Protocol::Rest).unwrap(),
            "Hidden eq false and (Title eq 'A' or Title eq 'B')"
        );
    }

    #[test]
    fn test_any_untranslatable_leaf_defers_everything() {
        let catalog = fixture_catalog();
        let p = Predicate::eq("Title", "A").or(Predicate::local("odd", ["ItemCount"], |_| true));
        assert_eq!(translate_filter(&catalog, "SP.List", &p, Protocol::Rest), None);

        // relations are not filterable
        let p = Predicate::eq("ContentTypes", "x");
        assert_eq!(translate_filter(&catalog, "SP.List", &p, Protocol::Rest), None);
    }

    #[test]
    fn test_collection_parameter_order() {
        let catalog = fixture_catalog();
        let lists = node("SP.List", &[field("Title")]);
        let spec = QuerySpec {
            predicate: Some(Predicate::eq("Title", "Documents")),
            order: vec![OrderBy::desc("Title")],
            top: Some(5),
            skip: Some(10),
        };

        let translation = translate_collection(
            &catalog,
            CorrelationId::new(),
            Protocol::Rest,
            "_api/web/lists",
            &lists,
            &spec,
            LocalPaging::default(),
        );
        assert!(!translation.requires_local_evaluation());
        assert_eq!(
            translation.descriptor.query_string(),
            "$select=Id,Title&$filter=Title eq 'Documents'&$orderby=Title desc&$top=5&$skip=10"
        );
    }

    #[test]
    fn test_local_filter_fetches_a_page_without_filter() {
        let catalog = fixture_catalog();
        let lists = node("SP.List", &[field("Title")]);
        let spec = QuerySpec {
            predicate: Some(Predicate::contains("Title", "Doc")),
            top: Some(1),
            ..Default::default()
        };

        let translation = translate_collection(
            &catalog,
            CorrelationId::new(),
            Protocol::Graph,
            "sites/root/lists",
            &lists,
            &spec,
            LocalPaging::SinglePage { page_size: 50 },
        );
        assert!(translation.local_filter.is_some());
        assert!(translation.local_window);
        assert_eq!(translation.descriptor.param("$filter"), None);
        assert_eq!(translation.descriptor.param("$top"), Some("50"));
    }
}
