//! Writes: update, delete and create.

use std::collections::BTreeMap;

use serde_json::{Map, Value as JsonValue};
use sitegraph_client::{CorrelationId, Method, RequestDescriptor};
use sitegraph_schema::{Cardinality, Protocol, ProtocolSet, Value};
use tracing::{debug, instrument};

use crate::bag::Origin;
use crate::batch::{BatchItem, Commit, Operation, Stage};
use crate::context::Context;
use crate::mapper::{apply, Mapper};
use crate::protocol::choose;
use crate::request::RequestNode;
use crate::resource::{RelationSlot, Resource};
use crate::{OrmError, OrmResult};

/// `If-Match` value for a write over `protocol`.
fn if_match(resource: &Resource, protocol: Protocol) -> String {
    resource
        .metadata()
        .etag(protocol)
        .map_or_else(|| "*".to_string(), str::to_string)
}

impl Context {
    fn update_operation(&self, resource: &Resource) -> OrmResult<Option<Operation<()>>> {
        resource.lock().ensure_live()?;
        let resource_type = resource.resource_type();
        let modified = resource.lock().bag.modified();
        if modified.is_empty() {
            return Ok(None);
        }

        let addresses = self.addresses(resource);
        let addressable: ProtocolSet = addresses.keys().copied().collect();

        let mut groups: BTreeMap<Protocol, Vec<(String, Value)>> = BTreeMap::new();
        for (field, value) in modified {
            let exposed = self
                .catalog
                .field(&resource_type, &field)
                .map(|def| def.protocols())
                .unwrap_or(ProtocolSet::NONE)
                .intersect(addressable);
            let protocol = choose(exposed, self.options.graph_first).ok_or_else(|| {
                OrmError::UnsupportedField {
                    resource_type: resource_type.clone(),
                    field: field.clone(),
                }
            })?;
            groups.entry(protocol).or_default().push((field, value));
        }

        let correlation_id = CorrelationId::new();
        let mut descriptors = Vec::with_capacity(groups.len());
        let mut parts = Vec::with_capacity(groups.len());
        for (protocol, fields) in groups {
            let mut body = Map::new();
            for (field, value) in &fields {
                if let Some(wire) = self
                    .catalog
                    .field(&resource_type, field)
                    .and_then(|def| def.wire_name(protocol))
                {
                    body.insert(wire.to_string(), value.to_json());
                }
            }
            descriptors.push(
                RequestDescriptor::new(correlation_id, protocol, Method::Patch, &addresses[&protocol])
                    .with_header("If-Match", if_match(resource, protocol))
                    .with_body(JsonValue::Object(body)),
            );
            parts.push(fields.into_iter().map(|(f, _)| f).collect::<Vec<_>>());
        }

        let target = resource.clone();
        let stage: Stage<()> = Box::new(move |results| {
            let mut accepted = Vec::new();
            let mut first_error = None;
            for (fields, result) in parts.into_iter().zip(results) {
                match result {
                    Ok(_) => accepted.extend(fields),
                    Err(err) => {
                        first_error.get_or_insert(OrmError::from(err));
                    }
                }
            }
            let commit: Commit<()> = Box::new(move || {
                target.lock().bag.commit_modified(&accepted);
                match first_error {
                    Some(err) => Err(err),
                    None => Ok(()),
                }
            });
            Ok(commit)
        });

        Ok(Some(Operation::new(
            format!("update {}", resource_type),
            descriptors,
            stage,
        )))
    }

    /// Send the modified fields of `resource`.
    ///
    /// Fields are routed to the preferred protocol exposing them. Accepted
    /// fields return to `Loaded`; nothing is sent when nothing changed.
    #[instrument(
        name = "sitegraph.context.update",
        skip(self, resource),
        fields(resource_type = %resource.resource_type()),
        err
    )]
    pub async fn update(&self, resource: &Resource) -> OrmResult<()> {
        match self.update_operation(resource)? {
            Some(operation) => self.batch.run(operation).await,
            None => {
                debug!("nothing to update");
                Ok(())
            }
        }
    }

    pub fn update_batch(&self, resource: &Resource) -> OrmResult<BatchItem<()>> {
        match self.update_operation(resource)? {
            Some(operation) => self.batch.enqueue(operation),
            None => Ok(BatchItem::ready("update (no changes)", Ok(()))),
        }
    }

    fn delete_operation(&self, resource: &Resource) -> OrmResult<Operation<()>> {
        resource.lock().ensure_live()?;
        let resource_type = resource.resource_type();
        let addresses = self.addresses(resource);
        let addressable: ProtocolSet = addresses.keys().copied().collect();
        let protocol = choose(addressable, self.options.graph_first).ok_or_else(|| {
            OrmError::usage(format!("{} instance has no address to delete", resource_type))
        })?;

        let descriptor = RequestDescriptor::new(
            CorrelationId::new(),
            protocol,
            Method::Delete,
            &addresses[&protocol],
        )
        .with_header("If-Match", if_match(resource, protocol));

        let target = resource.clone();
        let stage: Stage<()> = Box::new(move |mut results| {
            results.remove(0)?;
            let commit: Commit<()> = Box::new(move || {
                target.lock().deleted = true;
                if let Some(parent) = target.parent() {
                    let relation = target.lock().parent.as_ref().map(|l| l.relation.clone());
                    if let Some(relation) = relation {
                        detach(&parent, &relation, &target);
                    }
                }
                Ok(())
            });
            Ok(commit)
        });

        Ok(Operation::new(format!("delete {}", resource_type), vec![descriptor], stage))
    }

    /// Delete `resource` on the service and detach it from its parent.
    ///
    /// The instance accepts no further operations afterwards.
    #[instrument(
        name = "sitegraph.context.delete",
        skip(self, resource),
        fields(resource_type = %resource.resource_type()),
        err
    )]
    pub async fn delete(&self, resource: &Resource) -> OrmResult<()> {
        let operation = self.delete_operation(resource)?;
        self.batch.run(operation).await
    }

    pub fn delete_batch(&self, resource: &Resource) -> OrmResult<BatchItem<()>> {
        let operation = self.delete_operation(resource)?;
        self.batch.enqueue(operation)
    }

    fn create_operation(
        &self,
        parent: &Resource,
        relation: &str,
        values: Vec<(String, Value)>,
    ) -> OrmResult<Operation<Resource>> {
        parent.lock().ensure_live()?;
        let parent_type = parent.resource_type();
        let target = match self.catalog.field(&parent_type, relation).and_then(|d| d.relation()) {
            Some((target, Cardinality::Many)) => target.to_string(),
            _ => {
                return Err(OrmError::usage(format!(
                    "`{}` of {} is not a collection relation",
                    relation, parent_type
                )))
            }
        };

        let mut candidates: ProtocolSet = Protocol::ALL
            .into_iter()
            .filter(|p| self.collection_path(parent, relation, *p).is_some())
            .collect();
        for (field, _) in &values {
            let def = self.catalog.field(&target, field).ok_or_else(|| {
                OrmError::usage(format!("{} has no field `{}`", target, field))
            })?;
            if def.is_relation() {
                return Err(OrmError::usage(format!(
                    "relation `{}` cannot be set on create",
                    field
                )));
            }
            candidates = candidates.intersect(def.protocols());
        }
        let protocol = choose(candidates, self.options.graph_first).ok_or_else(|| {
            OrmError::UnsupportedField {
                resource_type: target.clone(),
                field: values
                    .first()
                    .map(|(f, _)| f.clone())
                    .unwrap_or_else(|| relation.to_string()),
            }
        })?;
        let path = self
            .collection_path(parent, relation, protocol)
            .ok_or_else(|| OrmError::usage(format!("no {} path for {}", protocol, relation)))?;

        let mut body = Map::new();
        for (field, value) in &values {
            if let Some(wire) = self.catalog.field(&target, field).and_then(|d| d.wire_name(protocol)) {
                body.insert(wire.to_string(), value.to_json());
            }
        }
        let descriptor = RequestDescriptor::new(CorrelationId::new(), protocol, Method::Post, path)
            .with_body(JsonValue::Object(body));

        let mut node = RequestNode::key_only(self.catalog.as_ref(), &target)?;
        for (field, _) in &values {
            node.push_field(field);
        }

        let context = self.clone();
        let parent = parent.clone();
        let relation = relation.to_string();
        let stage: Stage<Resource> = Box::new(move |mut results| {
            let doc = results.remove(0)?;
            let mapper = Mapper::new(context.catalog.as_ref(), &context.overrides, protocol);
            let staged = mapper.stage_instance(&node, &doc)?;
            let policy = context.options.conflict_policy;
            let commit: Commit<Resource> = Box::new(move || {
                let created = Resource::new(&staged.resource_type, &staged.key_field, Some((&parent, &relation)));
                apply(&created, &staged, policy)?;
                {
                    // values the service did not echo back keep what was sent
                    let mut state = created.lock();
                    for (field, value) in values {
                        if !staged.fields.iter().any(|(f, _)| *f == field) {
                            state.bag.set(&field, value, Origin::FromServer)?;
                        }
                    }
                }
                attach(&parent, &relation, &created);
                Ok(created)
            });
            Ok(commit)
        });

        Ok(Operation::new(format!("create {}", target), vec![descriptor], stage))
    }

    /// Create a member of `relation` under `parent` and return it.
    #[instrument(
        name = "sitegraph.context.create",
        skip(self, parent, values),
        fields(relation = %relation),
        err
    )]
    pub async fn create<I, K, V>(&self, parent: &Resource, relation: &str, values: I) -> OrmResult<Resource>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        let values = values.into_iter().map(|(k, v)| (k.into(), v.into())).collect();
        let operation = self.create_operation(parent, relation, values)?;
        self.batch.run(operation).await
    }

    pub fn create_batch<I, K, V>(&self, parent: &Resource, relation: &str, values: I) -> OrmResult<BatchItem<Resource>>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        let values = values.into_iter().map(|(k, v)| (k.into(), v.into())).collect();
        let operation = self.create_operation(parent, relation, values)?;
        self.batch.enqueue(operation)
    }
}

fn detach(parent: &Resource, relation: &str, child: &Resource) {
    let mut state = parent.lock();
    match state.relations.get_mut(relation) {
        Some(RelationSlot::Many { items, .. }) => items.retain(|item| !item.ptr_eq(child)),
        Some(RelationSlot::One { value, .. }) => {
            if value.as_ref().is_some_and(|v| v.ptr_eq(child)) {
                *value = None;
            }
        }
        None => {}
    }
}

fn attach(parent: &Resource, relation: &str, child: &Resource) {
    let mut state = parent.lock();
    match state.relations.get_mut(relation) {
        Some(RelationSlot::Many { items, .. }) => items.push(child.clone()),
        _ => {
            state.relations.insert(
                relation.to_string(),
                RelationSlot::Many {
                    requested: false,
                    items: vec![child.clone()],
                },
            );
        }
    }
}
