//! Resource instances and their navigation properties.

use std::collections::HashMap;
use std::fmt::{Debug, Formatter};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use sitegraph_schema::{Protocol, Value};

use crate::bag::{FieldState, InstanceMetadata, Origin, PropertyBag};
use crate::{OrmError, OrmResult};

/// A navigation property of one instance.
///
/// `requested` distinguishes "never asked for" from "fetched and legitimately empty".
#[derive(Debug, Clone)]
pub enum RelationSlot {
    One {
        requested: bool,
        value: Option<Resource>,
    },
    Many {
        requested: bool,
        items: Vec<Resource>,
    },
}

impl RelationSlot {
    pub fn is_requested(&self) -> bool {
        match self {
            RelationSlot::One { requested, .. } | RelationSlot::Many { requested, .. } => *requested,
        }
    }

    pub fn resources(&self) -> Vec<Resource> {
        match self {
            RelationSlot::One { value, .. } => value.iter().cloned().collect(),
            RelationSlot::Many { items, .. } => items.clone(),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            RelationSlot::One { value, .. } => usize::from(value.is_some()),
            RelationSlot::Many { items, .. } => items.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone)]
pub(crate) struct ParentLink {
    pub(crate) resource: Weak<Mutex<ResourceState>>,
    pub(crate) relation: String,
}

#[derive(Debug)]
pub(crate) struct ResourceState {
    pub(crate) bag: PropertyBag,
    pub(crate) key_field: String,
    pub(crate) relations: HashMap<String, RelationSlot>,
    pub(crate) parent: Option<ParentLink>,
    /// Addresses assigned up front (root handles built from explicit paths).
    pub(crate) addresses: HashMap<Protocol, String>,
    pub(crate) deleted: bool,
}

impl ResourceState {
    pub(crate) fn key(&self) -> Option<Value> {
        self.bag
            .get(&self.key_field)
            .ok()
            .filter(|v| !v.is_null())
            .cloned()
    }

    pub(crate) fn ensure_live(&self) -> OrmResult<()> {
        if self.deleted {
            return Err(OrmError::Deleted {
                resource_type: self.bag.resource_type().to_string(),
            });
        }
        Ok(())
    }
}

/// Shared handle to one resource instance.
///
/// Clones point at the same instance: a list reached through `web.many("Lists")`
/// and the handle returned by a query are the same object. Mutation is not
/// coordinated between tasks; one caller is expected to drive a given
/// instance at a time.
#[derive(Clone)]
pub struct Resource(Arc<Mutex<ResourceState>>);

impl Resource {
    pub(crate) fn new(resource_type: &str, key_field: &str, parent: Option<(&Resource, &str)>) -> Self {
        Self(Arc::new(Mutex::new(ResourceState {
            bag: PropertyBag::new(resource_type),
            key_field: key_field.to_string(),
            relations: HashMap::new(),
            parent: parent.map(|(resource, relation)| ParentLink {
                resource: Arc::downgrade(&resource.0),
                relation: relation.to_string(),
            }),
            addresses: HashMap::new(),
            deleted: false,
        })))
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, ResourceState> {
        self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub(crate) fn from_weak(weak: &Weak<Mutex<ResourceState>>) -> Option<Resource> {
        weak.upgrade().map(Resource)
    }

    pub fn resource_type(&self) -> String {
        self.lock().bag.resource_type().to_string()
    }

    /// Loaded, non-null key value.
    pub fn key(&self) -> Option<Value> {
        self.lock().key()
    }

    /// True when the field has been loaded or set, or the relation has been requested.
    ///
    /// Never triggers a fetch.
    pub fn is_property_available(&self, name: &str) -> bool {
        let state = self.lock();
        state.bag.is_available(name)
            || state
                .relations
                .get(name)
                .is_some_and(|slot| slot.is_requested())
    }

    pub fn state(&self, field: &str) -> FieldState {
        self.lock().bag.state(field)
    }

    pub fn get(&self, field: &str) -> OrmResult<Value> {
        self.lock().bag.get(field).cloned()
    }

    /// Change a field locally. The change is sent by `Context::update`.
    pub fn set(&self, field: &str, value: impl Into<Value>) -> OrmResult<()> {
        let mut state = self.lock();
        state.ensure_live()?;
        if state
            .relations
            .get(field)
            .is_some()
        {
            return Err(OrmError::usage(format!(
                "`{}` is a relation and cannot be assigned",
                field
            )));
        }
        state.bag.set(field, value.into(), Origin::FromCaller)
    }

    fn slot(&self, relation: &str) -> OrmResult<RelationSlot> {
        let state = self.lock();
        match state.relations.get(relation) {
            Some(slot) if slot.is_requested() => Ok(slot.clone()),
            _ => Err(OrmError::FieldNotLoaded {
                resource_type: state.bag.resource_type().to_string(),
                field: relation.to_string(),
            }),
        }
    }

    /// Single-valued relation. Fails with `FieldNotLoaded` until requested.
    pub fn one(&self, relation: &str) -> OrmResult<Option<Resource>> {
        match self.slot(relation)? {
            RelationSlot::One { value, .. } => Ok(value),
            RelationSlot::Many { .. } => Err(OrmError::usage(format!(
                "`{}` is a collection; use `many`",
                relation
            ))),
        }
    }

    /// Collection relation. Fails with `FieldNotLoaded` until requested.
    pub fn many(&self, relation: &str) -> OrmResult<Vec<Resource>> {
        match self.slot(relation)? {
            RelationSlot::Many { items, .. } => Ok(items),
            RelationSlot::One { .. } => Err(OrmError::usage(format!(
                "`{}` is single-valued; use `one`",
                relation
            ))),
        }
    }

    pub fn is_requested(&self, relation: &str) -> bool {
        self.lock()
            .relations
            .get(relation)
            .is_some_and(|slot| slot.is_requested())
    }

    pub fn metadata(&self) -> InstanceMetadata {
        self.lock().bag.metadata().clone()
    }

    pub fn is_deleted(&self) -> bool {
        self.lock().deleted
    }

    pub fn is_dirty(&self) -> bool {
        self.lock().bag.is_dirty()
    }

    /// Revert every modified field to its last server value.
    pub fn discard_changes(&self) {
        self.lock().bag.discard_changes();
    }

    /// Available fields and requested relations, sorted.
    pub fn available_fields(&self) -> Vec<String> {
        let state = self.lock();
        let mut names = state.bag.available();
        names.extend(
            state
                .relations
                .iter()
                .filter(|(_, slot)| slot.is_requested())
                .map(|(name, _)| name.clone()),
        );
        names.sort();
        names.dedup();
        names
    }

    pub fn parent(&self) -> Option<Resource> {
        let link = self.lock().parent.clone()?;
        Resource::from_weak(&link.resource)
    }

    /// Same instance (not merely equal contents).
    pub fn ptr_eq(&self, other: &Resource) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Debug for Resource {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("Resource")
            .field("type", &state.bag.resource_type())
            .field("key", &state.key())
            .field("fields", &state.bag.available())
            .field("deleted", &state.deleted)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clones_share_state() {
        let web = Resource::new("SP.Web", "Id", None);
        let alias = web.clone();
        web.lock()
            .bag
            .set("Title", "Dev".into(), Origin::FromServer)
            .unwrap();

        assert!(alias.ptr_eq(&web));
        assert_eq!(alias.get("Title").unwrap(), Value::from("Dev"));
    }

    #[test]
    fn test_relation_not_requested_is_not_available() {
        let web = Resource::new("SP.Web", "Id", None);
        assert!(!web.is_property_available("Lists"));
        assert!(matches!(
            web.many("Lists"),
            Err(OrmError::FieldNotLoaded { .. })
        ));

        web.lock().relations.insert(
            "Lists".to_string(),
            RelationSlot::Many {
                requested: true,
                items: vec![],
            },
        );
        assert!(web.is_property_available("Lists"));
        assert_eq!(web.many("Lists").unwrap().len(), 0);
        assert!(web.one("Lists").is_err());
    }

    #[test]
    fn test_parent_link_is_weak() {
        let web = Resource::new("SP.Web", "Id", None);
        let list = Resource::new("SP.List", "Id", Some((&web, "Lists")));
        assert!(list.parent().is_some_and(|p| p.ptr_eq(&web)));

        drop(web);
        assert!(list.parent().is_none());
    }

    #[test]
    fn test_deleted_instance_rejects_changes() {
        let list = Resource::new("SP.List", "Id", None);
        list.lock().deleted = true;
        assert!(matches!(
            list.set("Title", "x"),
            Err(OrmError::Deleted { .. })
        ));
    }
}
