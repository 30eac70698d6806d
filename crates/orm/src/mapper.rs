//! Mapping response documents onto resource instances.
//!
//! Mapping runs in two phases. Staging walks a document against the
//! [`RequestNode`] that produced it and builds [`StagedInstance`]s without
//! touching any instance, so a staging failure leaves the graph unchanged.
//! Applying writes staged values into instances under the context's
//! [`ConflictPolicy`].

use std::collections::{HashMap, HashSet};
use std::fmt::{Debug, Formatter};
use std::sync::Arc;

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde_json::{Map, Value as JsonValue};
use sitegraph_schema::{
    Cardinality, FieldDef, FieldKind, Protocol, ResourceMetadataProvider, Value,
};
use tracing::{debug, trace};
use uuid::Uuid;

use crate::bag::{FieldState, InstanceMetadata, Origin};
use crate::options::ConflictPolicy;
use crate::request::RequestNode;
use crate::resource::{RelationSlot, Resource};
use crate::{OrmError, OrmResult};

type MappingFn = dyn Fn(&JsonValue) -> Result<Value, String> + Send + Sync;

/// Per-field coercion functions consulted before the default coercion.
///
/// Useful for fields whose wire form does not follow their declared kind,
/// such as list templates reported by numeric id.
#[derive(Clone, Default)]
pub struct MappingOverrides {
    handlers: HashMap<(String, String), Arc<MappingFn>>,
}

impl MappingOverrides {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with<F>(mut self, resource_type: &str, field: &str, handler: F) -> Self
    where
        F: Fn(&JsonValue) -> Result<Value, String> + Send + Sync + 'static,
    {
        self.register(resource_type, field, handler);
        self
    }

    pub fn register<F>(&mut self, resource_type: &str, field: &str, handler: F)
    where
        F: Fn(&JsonValue) -> Result<Value, String> + Send + Sync + 'static,
    {
        self.handlers.insert(
            (resource_type.to_string(), field.to_string()),
            Arc::new(handler),
        );
    }

    fn get(&self, resource_type: &str, field: &str) -> Option<&Arc<MappingFn>> {
        self.handlers
            .get(&(resource_type.to_string(), field.to_string()))
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl Debug for MappingOverrides {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.handlers.keys()).finish()
    }
}

/// Values for one instance, ready to apply.
#[derive(Debug, Clone)]
pub struct StagedInstance {
    pub resource_type: String,
    pub key_field: String,
    pub key: Option<Value>,
    /// Fields present in the document.
    pub fields: Vec<(String, Value)>,
    /// Every requested field the protocol exposes; omitted ones resolve to null.
    pub resolved: Vec<String>,
    pub relations: Vec<(String, StagedRelation)>,
    pub metadata: InstanceMetadata,
    /// Expanded collection items that could not be mapped, one `ItemMapping`
    /// per relation. Their siblings are staged.
    pub failures: Vec<OrmError>,
}

#[derive(Debug, Clone)]
pub enum StagedRelation {
    One(Option<Box<StagedInstance>>),
    Many(Vec<StagedInstance>),
}

impl StagedInstance {
    fn key_string(&self) -> Option<String> {
        self.key.as_ref().and_then(Value::key_string)
    }

    /// Item failures of this instance and every staged instance below it.
    pub fn item_failures(&self) -> Vec<OrmError> {
        let mut out = self.failures.clone();
        for (_, relation) in &self.relations {
            match relation {
                StagedRelation::One(Some(child)) => out.extend(child.item_failures()),
                StagedRelation::One(None) => {}
                StagedRelation::Many(items) => out.extend(items.iter().flat_map(StagedInstance::item_failures)),
            }
        }
        out
    }
}

/// Fail with the item failures collected under `staged`, once they are applied.
///
/// A single failure is returned as is; several are grouped under `resource_type`.
pub(crate) fn surface_item_failures<'s>(
    resource_type: &str,
    staged: impl IntoIterator<Item = &'s StagedInstance>,
) -> OrmResult<()> {
    let mut failures: Vec<OrmError> = staged.into_iter().flat_map(StagedInstance::item_failures).collect();
    match failures.len() {
        0 => Ok(()),
        1 => Err(failures.remove(0)),
        _ => Err(OrmError::ItemMapping {
            resource_type: resource_type.to_string(),
            failures,
        }),
    }
}

/// The payload of a response, without the verbose-REST `d` wrapper.
pub fn unwrap_envelope(doc: &JsonValue) -> &JsonValue {
    match doc.get("d") {
        Some(inner) => inner,
        None => doc,
    }
}

/// Items of a collection response (`value`, `results`, or a bare array).
pub fn collection_items(doc: &JsonValue) -> Option<&Vec<JsonValue>> {
    let doc = unwrap_envelope(doc);
    match doc {
        JsonValue::Array(items) => Some(items),
        JsonValue::Object(map) => map
            .get("value")
            .or_else(|| map.get("results"))
            .and_then(JsonValue::as_array),
        _ => None,
    }
}

/// Continuation link of a paged collection response.
pub fn next_link(doc: &JsonValue) -> Option<String> {
    doc.get("@odata.nextLink")
        .or_else(|| doc.get("odata.nextLink"))
        .or_else(|| doc.get("d").and_then(|d| d.get("__next")))
        .and_then(JsonValue::as_str)
        .map(str::to_string)
}

pub struct Mapper<'a> {
    catalog: &'a dyn ResourceMetadataProvider,
    overrides: &'a MappingOverrides,
    protocol: Protocol,
}

impl<'a> Mapper<'a> {
    pub fn new(
        catalog: &'a dyn ResourceMetadataProvider,
        overrides: &'a MappingOverrides,
        protocol: Protocol,
    ) -> Self {
        Self {
            catalog,
            overrides,
            protocol,
        }
    }

    /// Stage a single-instance response.
    pub fn stage_instance(&self, node: &RequestNode, doc: &JsonValue) -> OrmResult<StagedInstance> {
        let object = unwrap_envelope(doc).as_object().ok_or_else(|| OrmError::Mapping {
            resource_type: node.resource_type().to_string(),
            field: node.key_field().to_string(),
            message: "expected an object".to_string(),
        })?;
        self.stage_object(node, object)
    }

    /// Stage a collection response item by item.
    ///
    /// Items that fail to map are reported separately; the others are staged.
    pub fn stage_collection(
        &self,
        node: &RequestNode,
        doc: &JsonValue,
    ) -> OrmResult<(Vec<StagedInstance>, Vec<OrmError>)> {
        let items = collection_items(doc).ok_or_else(|| OrmError::Mapping {
            resource_type: node.resource_type().to_string(),
            field: node.key_field().to_string(),
            message: "expected a collection".to_string(),
        })?;

        let mut staged = Vec::with_capacity(items.len());
        let mut failures = Vec::new();
        for item in items {
            match self.stage_instance(node, item) {
                Ok(instance) => staged.push(instance),
                Err(err) => failures.push(err),
            }
        }
        Ok((staged, failures))
    }

    fn stage_object(&self, node: &RequestNode, object: &Map<String, JsonValue>) -> OrmResult<StagedInstance> {
        let resource_type = node.resource_type();
        let mut staged = StagedInstance {
            resource_type: resource_type.to_string(),
            key_field: node.key_field().to_string(),
            key: None,
            fields: Vec::new(),
            resolved: Vec::new(),
            relations: Vec::new(),
            metadata: self.metadata(object),
            failures: Vec::new(),
        };
        let mut consumed: HashSet<&str> = HashSet::new();

        for field in node.fields() {
            let Some(def) = self.catalog.field(resource_type, field) else {
                continue;
            };
            let Some(wire) = def.wire_name(self.protocol) else {
                continue;
            };
            consumed.insert(wire);
            staged.resolved.push(field.clone());
            if let Some(raw) = object.get(wire) {
                let value = self.coerce(resource_type, def, raw)?;
                staged.fields.push((field.clone(), value));
            }
        }

        for (name, child) in node.relations() {
            let Some(def) = self.catalog.field(resource_type, name) else {
                continue;
            };
            let (Some(wire), Some((_, cardinality))) = (def.wire_name(self.protocol), def.relation())
            else {
                continue;
            };
            consumed.insert(wire);
            let raw = object.get(wire).unwrap_or(&JsonValue::Null);
            let relation = match cardinality {
                Cardinality::One => StagedRelation::One(match raw {
                    JsonValue::Object(map) if !is_deferred(map) => {
                        Some(Box::new(self.stage_object(child, map)?))
                    }
                    _ => None,
                }),
                Cardinality::Many => {
                    let items = match raw {
                        JsonValue::Array(items) => items.as_slice(),
                        JsonValue::Object(map) => map
                            .get("results")
                            .and_then(JsonValue::as_array)
                            .map(Vec::as_slice)
                            .unwrap_or_default(),
                        _ => &[],
                    };
                    let mut staged_items = Vec::with_capacity(items.len());
                    let mut failures = Vec::new();
                    for item in items.iter().filter_map(JsonValue::as_object) {
                        match self.stage_object(child, item) {
                            Ok(instance) => staged_items.push(instance),
                            Err(err) => failures.push(err),
                        }
                    }
                    if !failures.is_empty() {
                        debug!(
                            "{} item(s) of {}.{} could not be mapped",
                            failures.len(),
                            resource_type,
                            name
                        );
                        staged.failures.push(OrmError::ItemMapping {
                            resource_type: child.resource_type().to_string(),
                            failures,
                        });
                    }
                    StagedRelation::Many(staged_items)
                }
            };
            staged.relations.push((name.clone(), relation));
        }

        staged.key = staged
            .fields
            .iter()
            .find(|(f, _)| f == &staged.key_field)
            .map(|(_, v)| v.clone())
            .filter(|v| !v.is_null());
        if self.protocol == Protocol::Rest {
            staged.metadata.rest_id = staged.key_string();
        }

        for name in object.keys() {
            if !consumed.contains(name.as_str()) && !is_annotation(name) {
                trace!("ignoring unmapped field {}.{}", resource_type, name);
            }
        }

        Ok(staged)
    }

    fn metadata(&self, object: &Map<String, JsonValue>) -> InstanceMetadata {
        let text = |v: Option<&JsonValue>| v.and_then(JsonValue::as_str).map(str::to_string);
        match self.protocol {
            Protocol::Rest => {
                let verbose = object.get("__metadata");
                InstanceMetadata {
                    type_name: text(object.get("odata.type"))
                        .or_else(|| text(verbose.and_then(|m| m.get("type")))),
                    uri: text(object.get("odata.id"))
                        .or_else(|| text(verbose.and_then(|m| m.get("uri")))),
                    rest_etag: text(object.get("odata.etag"))
                        .or_else(|| text(verbose.and_then(|m| m.get("etag")))),
                    ..Default::default()
                }
            }
            Protocol::Graph => InstanceMetadata {
                type_name: text(object.get("@odata.type"))
                    .map(|t| t.trim_start_matches('#').to_string()),
                graph_id: match object.get("id") {
                    Some(JsonValue::String(id)) => Some(id.clone()),
                    Some(JsonValue::Number(id)) => Some(id.to_string()),
                    _ => None,
                },
                graph_etag: text(object.get("@odata.etag")),
                ..Default::default()
            },
        }
    }

    fn coerce(&self, resource_type: &str, def: &FieldDef, raw: &JsonValue) -> OrmResult<Value> {
        let field = def.name();
        if let Some(handler) = self.overrides.get(resource_type, field) {
            return handler(raw).map_err(|message| OrmError::Mapping {
                resource_type: resource_type.to_string(),
                field: field.clone(),
                message,
            });
        }
        coerce(def.kind(), raw).map_err(|message| {
            debug!(
                "no mapping handler for {}.{}; default coercion failed: {}",
                resource_type, field, message
            );
            OrmError::Mapping {
                resource_type: resource_type.to_string(),
                field: field.clone(),
                message,
            }
        })
    }
}

fn is_annotation(name: &str) -> bool {
    name.starts_with("odata.") || name.starts_with('@') || name.starts_with("__") || name.contains("@odata.")
}

fn is_deferred(map: &Map<String, JsonValue>) -> bool {
    map.len() == 1 && map.contains_key("__deferred")
}

/// Default coercion of a wire value to a declared kind.
pub fn coerce(kind: &FieldKind, raw: &JsonValue) -> Result<Value, String> {
    if raw.is_null() {
        return Ok(Value::Null);
    }
    let mismatch = || format!("cannot read {} as {:?}", raw, kind);
    match kind {
        FieldKind::String => match raw {
            JsonValue::String(s) => Ok(Value::String(s.clone())),
            JsonValue::Number(n) => Ok(Value::String(n.to_string())),
            _ => Err(mismatch()),
        },
        FieldKind::Integer => match raw {
            JsonValue::Number(n) => n.as_i64().map(Value::Integer).ok_or_else(mismatch),
            // Edm.Int64 is serialized as a string by REST
            JsonValue::String(s) => s.parse().map(Value::Integer).map_err(|_| mismatch()),
            _ => Err(mismatch()),
        },
        FieldKind::Number => match raw {
            JsonValue::Number(n) => n.as_f64().map(Value::Number).ok_or_else(mismatch),
            JsonValue::String(s) => s.parse().map(Value::Number).map_err(|_| mismatch()),
            _ => Err(mismatch()),
        },
        FieldKind::Boolean => match raw {
            JsonValue::Bool(b) => Ok(Value::Boolean(*b)),
            JsonValue::String(s) if s.eq_ignore_ascii_case("true") => Ok(Value::Boolean(true)),
            JsonValue::String(s) if s.eq_ignore_ascii_case("false") => Ok(Value::Boolean(false)),
            _ => Err(mismatch()),
        },
        FieldKind::Guid => raw
            .as_str()
            .and_then(|s| Uuid::parse_str(s).ok())
            .map(Value::Guid)
            .ok_or_else(mismatch),
        FieldKind::Timestamp => raw
            .as_str()
            .and_then(parse_timestamp)
            .map(Value::Timestamp)
            .ok_or_else(mismatch),
        FieldKind::Enum(variants) => match raw {
            JsonValue::String(s) => variants
                .iter()
                .find(|v| v.eq_ignore_ascii_case(s))
                .map(|v| Value::Enum(v.clone()))
                .ok_or_else(|| format!("`{}` is not one of {:?}", s, variants)),
            JsonValue::Number(n) => n
                .as_u64()
                .and_then(|i| variants.get(i as usize))
                .map(|v| Value::Enum(v.clone()))
                .ok_or_else(|| format!("ordinal {} is out of range for {:?}", n, variants)),
            _ => Err(mismatch()),
        },
        FieldKind::Complex => match raw {
            JsonValue::Object(_) => Ok(loose(raw)),
            _ => Err(mismatch()),
        },
        FieldKind::Json => Ok(Value::Json(raw.clone())),
        FieldKind::Relation { .. } => Err("relations are not scalar values".to_string()),
    }
}

fn loose(raw: &JsonValue) -> Value {
    match raw {
        JsonValue::Null => Value::Null,
        JsonValue::Bool(b) => Value::Boolean(*b),
        JsonValue::Number(n) => match n.as_i64() {
            Some(i) => Value::Integer(i),
            None => n.as_f64().map(Value::Number).unwrap_or(Value::Null),
        },
        JsonValue::String(s) => Value::String(s.clone()),
        JsonValue::Object(map) => Value::Complex(
            map.iter()
                .filter(|(k, _)| !is_annotation(k))
                .map(|(k, v)| (k.clone(), loose(v)))
                .collect(),
        ),
        JsonValue::Array(_) => Value::Json(raw.clone()),
    }
}

/// RFC 3339, zone-less ISO 8601 (taken as UTC) or the `/Date(ms)/` form.
fn parse_timestamp(text: &str) -> Option<DateTime<Utc>> {
    if let Some(ms) = text
        .strip_prefix("/Date(")
        .and_then(|rest| rest.strip_suffix(")/"))
    {
        let ms: i64 = ms.split(['+', '-']).next()?.parse().ok()?;
        return Utc.timestamp_millis_opt(ms).single();
    }
    if let Ok(parsed) = DateTime::parse_from_rfc3339(text) {
        return Some(parsed.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

/// Modified fields a staged instance would overwrite, per instance.
fn collect_conflicts(resource: &Resource, staged: &StagedInstance, out: &mut Vec<(String, Vec<String>)>) {
    let state = resource.lock();
    let fields: Vec<String> = staged
        .fields
        .iter()
        .map(|(f, _)| f)
        .chain(staged.resolved.iter())
        .filter(|f| state.bag.state(f) == FieldState::Modified)
        .cloned()
        .collect::<Vec<_>>();
    if !fields.is_empty() {
        let mut fields = fields;
        fields.sort();
        fields.dedup();
        out.push((staged.resource_type.clone(), fields));
    }

    let children: Vec<(Vec<Resource>, &StagedRelation)> = staged
        .relations
        .iter()
        .filter_map(|(name, relation)| {
            state
                .relations
                .get(name)
                .map(|slot| (slot.resources(), relation))
        })
        .collect();
    drop(state);

    for (existing, relation) in children {
        let staged_children: Vec<&StagedInstance> = match relation {
            StagedRelation::One(child) => child.iter().map(|c| c.as_ref()).collect(),
            StagedRelation::Many(items) => items.iter().collect(),
        };
        for child in staged_children {
            if let Some(instance) = find_by_key(&existing, child) {
                collect_conflicts(&instance, child, out);
            }
        }
    }
}

fn find_by_key(candidates: &[Resource], staged: &StagedInstance) -> Option<Resource> {
    let key = staged.key_string()?;
    candidates
        .iter()
        .find(|r| r.key().and_then(|k| k.key_string()).as_deref() == Some(key.as_str()))
        .cloned()
}

/// Fail with `Conflict` when the policy forbids overwriting modified fields.
pub(crate) fn check_conflicts<'s>(
    targets: impl IntoIterator<Item = (&'s Resource, &'s StagedInstance)>,
    policy: ConflictPolicy,
) -> OrmResult<()> {
    if policy != ConflictPolicy::Fail {
        return Ok(());
    }
    let mut conflicts = Vec::new();
    for (resource, staged) in targets {
        collect_conflicts(resource, staged, &mut conflicts);
    }
    match conflicts.into_iter().next() {
        None => Ok(()),
        Some((resource_type, fields)) => Err(OrmError::Conflict {
            resource_type,
            fields,
        }),
    }
}

/// Write a staged instance into `resource`.
///
/// Keyed collection expansions are authoritative: the slot is rebuilt in
/// server order, reusing existing instances with the same key.
pub(crate) fn apply(resource: &Resource, staged: &StagedInstance, policy: ConflictPolicy) -> OrmResult<()> {
    {
        let mut state = resource.lock();
        state.bag.metadata_mut().merge(staged.metadata.clone());
        for (field, value) in &staged.fields {
            if state.bag.state(field) == FieldState::Modified {
                match policy {
                    ConflictPolicy::KeepLocal | ConflictPolicy::Fail => continue,
                    ConflictPolicy::Overwrite => state.bag.discard_field(field),
                }
            }
            state.bag.set(field, value.clone(), Origin::FromServer)?;
        }
        let present: HashSet<&str> = staged.fields.iter().map(|(f, _)| f.as_str()).collect();
        let mut omitted = Vec::new();
        for field in staged.resolved.iter().filter(|f| !present.contains(f.as_str())) {
            if state.bag.state(field) == FieldState::Modified {
                if policy != ConflictPolicy::Overwrite {
                    continue;
                }
                state.bag.discard_field(field);
            }
            omitted.push(field);
        }
        state.bag.resolve_omitted(omitted);
    }

    for (name, relation) in &staged.relations {
        let existing = resource
            .lock()
            .relations
            .get(name)
            .map(RelationSlot::resources)
            .unwrap_or_default();

        let slot = match relation {
            StagedRelation::One(None) => RelationSlot::One {
                requested: true,
                value: None,
            },
            StagedRelation::One(Some(child)) => {
                let instance = find_by_key(&existing, child)
                    .or_else(|| existing.first().filter(|_| child.key.is_none()).cloned())
                    .unwrap_or_else(|| Resource::new(&child.resource_type, &child.key_field, Some((resource, name))));
                apply(&instance, child, policy)?;
                RelationSlot::One {
                    requested: true,
                    value: Some(instance),
                }
            }
            StagedRelation::Many(items) => {
                let mut rebuilt = Vec::with_capacity(items.len());
                for child in items {
                    let instance = find_by_key(&existing, child).unwrap_or_else(|| {
                        Resource::new(&child.resource_type, &child.key_field, Some((resource, name)))
                    });
                    apply(&instance, child, policy)?;
                    rebuilt.push(instance);
                }
                RelationSlot::Many {
                    requested: true,
                    items: rebuilt,
                }
            }
        };
        resource.lock().relations.insert(name.clone(), slot);
    }
    Ok(())
}

/// Merge query results into a parent's collection slot.
///
/// Existing instances are updated in place by key; new ones are appended and
/// nothing is removed, since a filtered query sees only part of the collection.
/// Returns the instances matching `items`, in result order.
pub(crate) fn merge_into_collection(
    parent: &Resource,
    relation: &str,
    items: &[StagedInstance],
    policy: ConflictPolicy,
) -> OrmResult<Vec<Resource>> {
    let mut current = match parent.lock().relations.get(relation) {
        Some(RelationSlot::Many { items, .. }) => items.clone(),
        _ => Vec::new(),
    };

    let targets: Vec<(Resource, &StagedInstance)> = items
        .iter()
        .filter_map(|staged| find_by_key(&current, staged).map(|r| (r, staged)))
        .collect();
    check_conflicts(targets.iter().map(|(r, s)| (r, *s)), policy)?;

    let mut matched = Vec::with_capacity(items.len());
    for staged in items {
        let instance = match find_by_key(&current, staged) {
            Some(instance) => instance,
            None => {
                let instance = Resource::new(&staged.resource_type, &staged.key_field, Some((parent, relation)));
                current.push(instance.clone());
                instance
            }
        };
        apply(&instance, staged, policy)?;
        matched.push(instance);
    }

    let mut state = parent.lock();
    let requested = state
        .relations
        .get(relation)
        .is_some_and(RelationSlot::is_requested);
    state.relations.insert(
        relation.to_string(),
        RelationSlot::Many {
            requested,
            items: current,
        },
    );
    Ok(matched)
}

/// Fresh instances for staged items that have no parent slot.
pub(crate) fn materialize(items: &[StagedInstance], policy: ConflictPolicy) -> OrmResult<Vec<Resource>> {
    items
        .iter()
        .map(|staged| {
            let instance = Resource::new(&staged.resource_type, &staged.key_field, None);
            apply(&instance, staged, policy)?;
            Ok(instance)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::selector::{expand_with, field};
    use crate::testing::fixture_catalog;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn node(resource_type: &str, selectors: &[crate::selector::Selector]) -> RequestNode {
        RequestNode::build(&fixture_catalog(), resource_type, selectors).unwrap()
    }

    #[test]
    fn test_rest_document_with_expansion() {
        let catalog = fixture_catalog();
        let overrides = MappingOverrides::new();
        let mapper = Mapper::new(&catalog, &overrides, Protocol::Rest);
        let web = node(
            "SP.Web",
            &[field("Title"), field("Description"), expand_with("Lists", [field("Title")])],
        );
        let doc = json!({
            "odata.type": "SP.Web",
            "odata.etag": "\"7\"",
            "Id": "8e1e3c1e-4f64-4a0e-9d2b-3f6f1c2a5b7d",
            "Title": "Dev",
            "Unexpected": 1,
            "Lists": [
                {"Id": "0d7f3e0c-3c8b-4f0a-9a1b-2a5d5a4e8c11", "Title": "Documents"},
            ]
        });

        let staged = mapper.stage_instance(&web, &doc).unwrap();
        assert_eq!(staged.metadata.type_name.as_deref(), Some("SP.Web"));
        assert_eq!(staged.metadata.rest_etag.as_deref(), Some("\"7\""));
        assert_eq!(
            staged.metadata.rest_id.as_deref(),
            Some("8e1e3c1e-4f64-4a0e-9d2b-3f6f1c2a5b7d")
        );
        assert_eq!(staged.resolved, vec!["Id", "Title", "Description"]);
        assert_eq!(staged.fields.len(), 2);

        let instance = Resource::new("SP.Web", "Id", None);
        apply(&instance, &staged, ConflictPolicy::Fail).unwrap();
        // omitted by the server, still resolved
        assert_eq!(instance.get("Description").unwrap(), Value::Null);
        let lists = instance.many("Lists").unwrap();
        assert_eq!(lists.len(), 1);
        assert_eq!(lists[0].get("Title").unwrap(), Value::from("Documents"));
        assert!(lists[0].parent().is_some_and(|p| p.ptr_eq(&instance)));
    }

    #[test]
    fn test_graph_document_and_empty_relation() {
        let catalog = fixture_catalog();
        let overrides = MappingOverrides::new();
        let mapper = Mapper::new(&catalog, &overrides, Protocol::Graph);
        let web = node("SP.Web", &[field("Title"), expand_with("Lists", [field("Title")])]);
        let doc = json!({
            "@odata.type": "#microsoft.graph.site",
            "id": "contoso.sharepoint.com,1,2",
            "displayName": "Dev",
        });

        let staged = mapper.stage_instance(&web, &doc).unwrap();
        assert_eq!(staged.metadata.type_name.as_deref(), Some("microsoft.graph.site"));
        assert_eq!(staged.metadata.graph_id.as_deref(), Some("contoso.sharepoint.com,1,2"));

        let instance = Resource::new("SP.Web", "Id", None);
        apply(&instance, &staged, ConflictPolicy::Fail).unwrap();
        assert!(instance.is_requested("Lists"));
        assert!(instance.many("Lists").unwrap().is_empty());
    }

    #[test]
    fn test_default_coercions() {
        assert_eq!(coerce(&FieldKind::Integer, &json!("42")).unwrap(), Value::Integer(42));
        assert_eq!(
            coerce(&FieldKind::enumeration(["Private", "Public"]), &json!("public")).unwrap(),
            Value::Enum("Public".to_string())
        );
        assert_eq!(
            coerce(&FieldKind::enumeration(["Private", "Public"]), &json!(0)).unwrap(),
            Value::Enum("Private".to_string())
        );
        assert_eq!(
            coerce(&FieldKind::Timestamp, &json!("/Date(1700000000000)/")).unwrap(),
            coerce(&FieldKind::Timestamp, &json!("2023-11-14T22:13:20Z")).unwrap()
        );
        assert!(coerce(&FieldKind::Guid, &json!("not-a-guid")).is_err());
        assert_eq!(coerce(&FieldKind::Boolean, &JsonValue::Null).unwrap(), Value::Null);

        let complex = coerce(&FieldKind::Complex, &json!({"allowGiphy": true, "rating": "moderate"})).unwrap();
        assert_eq!(
            complex.as_complex().unwrap().get("allowGiphy"),
            Some(&Value::Boolean(true))
        );
    }

    #[test]
    fn test_override_is_consulted_first() {
        let catalog = fixture_catalog();
        let overrides = MappingOverrides::new().with("SP.List", "TemplateType", |raw| match raw.as_i64() {
            Some(101) => Ok(Value::Enum("DocumentLibrary".to_string())),
            Some(100) => Ok(Value::Enum("GenericList".to_string())),
            _ => Err(format!("unknown template {}", raw)),
        });
        let list = node("SP.List", &[field("TemplateType")]);
        let doc = json!({"Id": "0d7f3e0c-3c8b-4f0a-9a1b-2a5d5a4e8c11", "BaseTemplate": 101});

        let staged = Mapper::new(&catalog, &overrides, Protocol::Rest)
            .stage_instance(&list, &doc)
            .unwrap();
        assert_eq!(
            staged.fields[1],
            ("TemplateType".to_string(), Value::Enum("DocumentLibrary".to_string()))
        );

        // without the override the ordinal is out of range
        let plain = MappingOverrides::new();
        let err = Mapper::new(&catalog, &plain, Protocol::Rest)
            .stage_instance(&list, &doc)
            .unwrap_err();
        assert!(matches!(err, OrmError::Mapping { field, .. } if field == "TemplateType"));
    }

    #[test]
    fn test_collection_isolates_bad_items() {
        let catalog = fixture_catalog();
        let overrides = MappingOverrides::new();
        let mapper = Mapper::new(&catalog, &overrides, Protocol::Rest);
        let lists = node("SP.List", &[field("Title"), field("ItemCount")]);
        let doc = json!({"value": [
            {"Id": "0d7f3e0c-3c8b-4f0a-9a1b-2a5d5a4e8c11", "Title": "Documents", "ItemCount": 3},
            {"Id": "1d7f3e0c-3c8b-4f0a-9a1b-2a5d5a4e8c11", "Title": "Broken", "ItemCount": "many"},
        ]});

        let (staged, failures) = mapper.stage_collection(&lists, &doc).unwrap();
        assert_eq!(staged.len(), 1);
        assert_eq!(failures.len(), 1);
    }

    #[test]
    fn test_keyed_expansion_reuses_instances() {
        let catalog = fixture_catalog();
        let overrides = MappingOverrides::new();
        let mapper = Mapper::new(&catalog, &overrides, Protocol::Rest);
        let web = node("SP.Web", &[expand_with("Lists", [field("Title")])]);
        let instance = Resource::new("SP.Web", "Id", None);

        let first = json!({"Id": "8e1e3c1e-4f64-4a0e-9d2b-3f6f1c2a5b7d", "Lists": [
            {"Id": "0d7f3e0c-3c8b-4f0a-9a1b-2a5d5a4e8c11", "Title": "Documents"},
        ]});
        apply(&instance, &mapper.stage_instance(&web, &first).unwrap(), ConflictPolicy::Fail).unwrap();
        let documents = instance.many("Lists").unwrap()[0].clone();

        let second = json!({"Id": "8e1e3c1e-4f64-4a0e-9d2b-3f6f1c2a5b7d", "Lists": [
            {"Id": "1d7f3e0c-3c8b-4f0a-9a1b-2a5d5a4e8c11", "Title": "Site Pages"},
            {"Id": "0d7f3e0c-3c8b-4f0a-9a1b-2a5d5a4e8c11", "Title": "Shared Documents"},
        ]});
        apply(&instance, &mapper.stage_instance(&web, &second).unwrap(), ConflictPolicy::Fail).unwrap();

        let lists = instance.many("Lists").unwrap();
        assert_eq!(lists.len(), 2);
        assert!(lists[1].ptr_eq(&documents));
        assert_eq!(documents.get("Title").unwrap(), Value::from("Shared Documents"));
    }

    #[test]
    fn test_field_omitted_on_reload_becomes_null() {
        let catalog = fixture_catalog();
        let overrides = MappingOverrides::new();
        let mapper = Mapper::new(&catalog, &overrides, Protocol::Rest);
        let list = node("SP.List", &[field("Title"), field("Description")]);
        let instance = Resource::new("SP.List", "Id", None);

        let first = json!({"Id": "0d7f3e0c-3c8b-4f0a-9a1b-2a5d5a4e8c11", "Title": "Documents", "Description": "Shared"});
        apply(&instance, &mapper.stage_instance(&list, &first).unwrap(), ConflictPolicy::Fail).unwrap();
        assert_eq!(instance.get("Description").unwrap(), Value::from("Shared"));

        let second = json!({"Id": "0d7f3e0c-3c8b-4f0a-9a1b-2a5d5a4e8c11", "Title": "Documents"});
        apply(&instance, &mapper.stage_instance(&list, &second).unwrap(), ConflictPolicy::Fail).unwrap();
        assert_eq!(instance.get("Description").unwrap(), Value::Null);
        assert_eq!(instance.state("Description"), FieldState::Loaded);
        assert_eq!(instance.get("Title").unwrap(), Value::from("Documents"));
    }

    #[test]
    fn test_bad_nested_item_is_isolated() {
        let catalog = fixture_catalog();
        let overrides = MappingOverrides::new();
        let mapper = Mapper::new(&catalog, &overrides, Protocol::Rest);
        let web = node("SP.Web", &[expand_with("Lists", [field("ItemCount")])]);
        let doc = json!({"Id": "8e1e3c1e-4f64-4a0e-9d2b-3f6f1c2a5b7d", "Lists": [
            {"Id": "0d7f3e0c-3c8b-4f0a-9a1b-2a5d5a4e8c11", "ItemCount": 3},
            {"Id": "1d7f3e0c-3c8b-4f0a-9a1b-2a5d5a4e8c11", "ItemCount": "many"},
        ]});

        let staged = mapper.stage_instance(&web, &doc).unwrap();
        let failures = staged.item_failures();
        assert_eq!(failures.len(), 1);
        assert!(matches!(&failures[0], OrmError::ItemMapping { resource_type, .. } if resource_type == "SP.List"));

        let instance = Resource::new("SP.Web", "Id", None);
        apply(&instance, &staged, ConflictPolicy::Fail).unwrap();
        assert!(instance.is_requested("Lists"));
        assert_eq!(instance.many("Lists").unwrap().len(), 1);
        assert!(surface_item_failures("SP.Web", [&staged]).is_err());
    }

    #[test]
    fn test_conflict_policies() {
        let catalog = fixture_catalog();
        let overrides = MappingOverrides::new();
        let mapper = Mapper::new(&catalog, &overrides, Protocol::Rest);
        let list = node("SP.List", &[field("Title")]);
        let doc = json!({"Id": "0d7f3e0c-3c8b-4f0a-9a1b-2a5d5a4e8c11", "Title": "Remote"});
        let staged = mapper.stage_instance(&list, &doc).unwrap();

        let instance = Resource::new("SP.List", "Id", None);
        instance.set("Title", "Local").unwrap();

        let err = check_conflicts([(&instance, &staged)], ConflictPolicy::Fail).unwrap_err();
        assert!(matches!(err, OrmError::Conflict { ref fields, .. } if fields == &["Title".to_string()]));

        apply(&instance, &staged, ConflictPolicy::KeepLocal).unwrap();
        assert_eq!(instance.get("Title").unwrap(), Value::from("Local"));
        assert!(instance.key().is_some());

        apply(&instance, &staged, ConflictPolicy::Overwrite).unwrap();
        assert_eq!(instance.get("Title").unwrap(), Value::from("Remote"));
        assert!(!instance.is_dirty());
    }
}
