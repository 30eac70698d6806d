//! Choosing REST or Graph for each member of a request tree.

use sitegraph_schema::{Protocol, ProtocolSet, ResourceMetadataProvider};
use tracing::trace;

use crate::request::RequestNode;
use crate::{OrmError, OrmResult};

/// Preferred protocol among `candidates`, or `None` when empty.
pub fn choose(candidates: ProtocolSet, graph_first: bool) -> Option<Protocol> {
    if graph_first && candidates.contains(Protocol::Graph) {
        Some(Protocol::Graph)
    } else if candidates.contains(Protocol::Rest) {
        Some(Protocol::Rest)
    } else if candidates.contains(Protocol::Graph) {
        Some(Protocol::Graph)
    } else {
        None
    }
}

/// Protocols able to serve `node` and everything beneath it.
///
/// On failure names the first member no protocol in `within` exposes.
pub fn exposing(
    catalog: &dyn ResourceMetadataProvider,
    node: &RequestNode,
    within: ProtocolSet,
) -> Result<ProtocolSet, (String, String)> {
    let mut set = within;
    for field in node.fields() {
        let protocols = catalog
            .field(node.resource_type(), field)
            .map(|def| def.protocols())
            .unwrap_or(ProtocolSet::NONE);
        set = narrow(set, protocols, node.resource_type(), field)?;
    }
    for (name, child) in node.relations() {
        let protocols = catalog
            .field(node.resource_type(), name)
            .map(|def| def.protocols())
            .unwrap_or(ProtocolSet::NONE);
        set = narrow(set, protocols, node.resource_type(), name)?;
        set = exposing(catalog, child, set)?;
    }
    Ok(set)
}

fn narrow(
    set: ProtocolSet,
    protocols: ProtocolSet,
    resource_type: &str,
    member: &str,
) -> Result<ProtocolSet, (String, String)> {
    let narrowed = set.intersect(protocols);
    if narrowed.is_empty() {
        Err((resource_type.to_string(), member.to_string()))
    } else {
        Ok(narrowed)
    }
}

fn unsupported((resource_type, field): (String, String)) -> OrmError {
    OrmError::UnsupportedField {
        resource_type,
        field,
    }
}

/// Split `node` by protocol for an instance reachable over `addressable`.
///
/// Scalar fields are routed one by one and each relation subtree is routed as
/// a unit. Every part carries the key (when its protocol exposes it). Unless
/// `key_loaded`, a key-only part is added when no routed protocol exposes the
/// key. Parts are returned preferred protocol first.
pub fn split(
    catalog: &dyn ResourceMetadataProvider,
    node: &RequestNode,
    graph_first: bool,
    addressable: ProtocolSet,
    key_loaded: bool,
) -> OrmResult<Vec<(Protocol, RequestNode)>> {
    let resource_type = node.resource_type();
    let key = node.key_field();

    let mut fields: [Vec<String>; 2] = [Vec::new(), Vec::new()];
    let mut relations: [Vec<String>; 2] = [Vec::new(), Vec::new()];
    let slot = |protocol: Protocol| match protocol {
        Protocol::Rest => 0,
        Protocol::Graph => 1,
    };

    for field in node.fields().iter().filter(|f| f.as_str() != key) {
        let exposed = catalog
            .field(resource_type, field)
            .map(|def| def.protocols())
            .unwrap_or(ProtocolSet::NONE)
            .intersect(addressable);
        let protocol = choose(exposed, graph_first)
            .ok_or_else(|| unsupported((resource_type.to_string(), field.clone())))?;
        fields[slot(protocol)].push(field.clone());
    }

    for (name, child) in node.relations() {
        let relation_protocols = catalog
            .field(resource_type, name)
            .map(|def| def.protocols())
            .unwrap_or(ProtocolSet::NONE);
        let exposed = narrow(addressable, relation_protocols, resource_type, name)
            .and_then(|set| exposing(catalog, child, set))
            .map_err(unsupported)?;
        let protocol = choose(exposed, graph_first)
            .ok_or_else(|| unsupported((resource_type.to_string(), name.clone())))?;
        trace!("routing {}.{} to {}", resource_type, name, protocol);
        relations[slot(protocol)].push(name.clone());
    }

    let key_protocols = catalog
        .field(resource_type, key)
        .map(|def| def.protocols())
        .unwrap_or(ProtocolSet::NONE)
        .intersect(addressable);

    let order = if graph_first {
        [Protocol::Graph, Protocol::Rest]
    } else {
        [Protocol::Rest, Protocol::Graph]
    };

    let mut parts: Vec<(Protocol, RequestNode)> = order
        .into_iter()
        .filter(|p| !fields[slot(*p)].is_empty() || !relations[slot(*p)].is_empty())
        .map(|p| (p, node.subset(&fields[slot(p)], &relations[slot(p)])))
        .collect();

    // nothing but the key was asked for
    if parts.is_empty() {
        let protocol = choose(key_protocols, graph_first)
            .ok_or_else(|| unsupported((resource_type.to_string(), key.to_string())))?;
        parts.push((protocol, node.subset(&[], &[])));
    }

    if !key_loaded && !parts.iter().any(|(p, _)| key_protocols.contains(*p)) {
        if let Some(protocol) = choose(key_protocols, graph_first) {
            trace!("fetching key {}.{} over {}", resource_type, key, protocol);
            parts.push((protocol, node.subset(&[], &[])));
        }
    }

    Ok(parts)
}

/// Single protocol serving the whole tree, for collection requests.
pub fn single(
    catalog: &dyn ResourceMetadataProvider,
    node: &RequestNode,
    graph_first: bool,
    addressable: ProtocolSet,
) -> OrmResult<Protocol> {
    let exposed = exposing(catalog, node, addressable).map_err(unsupported)?;
    choose(exposed, graph_first).ok_or_else(|| {
        unsupported((node.resource_type().to_string(), node.key_field().to_string()))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::selector::{expand_with, field};
    use crate::testing::fixture_catalog;
    use pretty_assertions::assert_eq;

    fn build(resource_type: &str, selectors: &[crate::selector::Selector]) -> RequestNode {
        RequestNode::build(&fixture_catalog(), resource_type, selectors).unwrap()
    }

    #[test]
    fn test_choose_prefers_graph_only_when_asked() {
        assert_eq!(choose(ProtocolSet::BOTH, true), Some(Protocol::Graph));
        assert_eq!(choose(ProtocolSet::BOTH, false), Some(Protocol::Rest));
        assert_eq!(choose(ProtocolSet::only(Protocol::Graph), false), Some(Protocol::Graph));
        assert_eq!(choose(ProtocolSet::NONE, true), None);
    }

    #[test]
    fn test_mixed_node_splits_in_two() {
        let catalog = fixture_catalog();
        let node = build("SP.Web", &[field("Title"), field("WelcomePage"), field("SharepointIds")]);

        let parts = split(&catalog, &node, true, ProtocolSet::BOTH, false).unwrap();
        assert_eq!(parts.len(), 2);

        let (graph, graph_node) = &parts[0];
        assert_eq!(*graph, Protocol::Graph);
        assert_eq!(
            graph_node.fields(),
            ["Id".to_string(), "Title".to_string(), "SharepointIds".to_string()]
        );

        let (rest, rest_node) = &parts[1];
        assert_eq!(*rest, Protocol::Rest);
        assert_eq!(rest_node.fields(), ["Id".to_string(), "WelcomePage".to_string()]);
    }

    #[test]
    fn test_key_fetched_over_protocol_exposing_it() {
        let catalog = fixture_catalog();
        // SP.Web's key is REST only
        let node = build("SP.Web", &[field("Title")]);

        let parts = split(&catalog, &node, true, ProtocolSet::BOTH, false).unwrap();
        let protocols: Vec<Protocol> = parts.iter().map(|(p, _)| *p).collect();
        assert_eq!(protocols, vec![Protocol::Graph, Protocol::Rest]);
        assert_eq!(parts[1].1.fields(), ["Id".to_string()]);
        assert!(parts[1].1.relations().is_empty());

        let parts = split(&catalog, &node, true, ProtocolSet::BOTH, true).unwrap();
        assert_eq!(parts.len(), 1);

        // the list key is exposed by Graph, no extra part
        let node = build("SP.List", &[field("Title")]);
        let parts = split(&catalog, &node, true, ProtocolSet::BOTH, false).unwrap();
        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0].0, Protocol::Graph);
    }

    #[test]
    fn test_graph_only_field_goes_to_graph_without_preference() {
        let catalog = fixture_catalog();
        let node = build("SP.Web", &[field("Title"), field("SharepointIds")]);

        let parts = split(&catalog, &node, false, ProtocolSet::BOTH, false).unwrap();
        let protocols: Vec<Protocol> = parts.iter().map(|(p, _)| *p).collect();
        assert_eq!(protocols, vec![Protocol::Rest, Protocol::Graph]);
    }

    #[test]
    fn test_relation_subtree_routed_as_unit() {
        let catalog = fixture_catalog();
        // FieldLinks is REST only, so the whole ContentTypes subtree goes to REST
        let node = build(
            "SP.List",
            &[expand_with("ContentTypes", [field("Name"), expand_with("FieldLinks", [field("Name")])])],
        );
        let parts = split(&catalog, &node, true, ProtocolSet::BOTH, false).unwrap();
        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0].0, Protocol::Rest);
        assert!(parts[0].1.relation("ContentTypes").is_some());
    }

    #[test]
    fn test_unaddressable_protocol_is_ignored() {
        let catalog = fixture_catalog();
        let node = build("SP.Web", &[field("SharepointIds")]);
        let err = split(&catalog, &node, true, ProtocolSet::only(Protocol::Rest), false).unwrap_err();
        assert!(matches!(
            err,
            OrmError::UnsupportedField { field, .. } if field == "SharepointIds"
        ));
    }

    #[test]
    fn test_single_protocol_for_collections() {
        let catalog = fixture_catalog();
        let node = build("SP.List", &[field("Title"), field("Hidden")]);
        assert_eq!(
            single(&catalog, &node, true, ProtocolSet::BOTH).unwrap(),
            Protocol::Rest
        );
        let node = build("SP.List", &[field("Title")]);
        assert_eq!(
            single(&catalog, &node, true, ProtocolSet::BOTH).unwrap(),
            Protocol::Graph
        );
    }
}
