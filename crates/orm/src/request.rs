//! Request trees: the merged set of fields and nested relations to fetch.

use std::collections::{BTreeMap, BTreeSet};

use sitegraph_schema::{FieldKind, ResourceMetadataProvider};

use crate::selector::Selector;
use crate::{OrmError, OrmResult};

/// Fields and relations requested for one resource type.
///
/// The key field is always the first field. Equality ignores the order in
/// which members were requested; rendering keeps first-seen order.
#[derive(Debug, Clone)]
pub struct RequestNode {
    resource_type: String,
    fields: Vec<String>,
    relations: Vec<(String, RequestNode)>,
}

impl PartialEq for RequestNode {
    fn eq(&self, other: &Self) -> bool {
        let relations = |node: &RequestNode| -> BTreeMap<String, RequestNode> {
            node.relations.iter().cloned().collect()
        };
        self.resource_type == other.resource_type
            && self.fields.iter().collect::<BTreeSet<_>>() == other.fields.iter().collect::<BTreeSet<_>>()
            && relations(self) == relations(other)
    }
}

impl Eq for RequestNode {}

impl RequestNode {
    /// A node holding only the key of `resource_type`.
    pub fn key_only(catalog: &dyn ResourceMetadataProvider, resource_type: &str) -> OrmResult<Self> {
        let ty = catalog.require(resource_type)?;
        Ok(Self {
            resource_type: resource_type.to_string(),
            fields: vec![ty.key_field().clone()],
            relations: Vec::new(),
        })
    }

    /// Build the merged tree for `selectors`. No selectors means the type's default fields.
    pub fn build(
        catalog: &dyn ResourceMetadataProvider,
        resource_type: &str,
        selectors: &[Selector],
    ) -> OrmResult<Self> {
        let mut node = Self::key_only(catalog, resource_type)?;
        if selectors.is_empty() {
            node.add_defaults(catalog)?;
        } else {
            for selector in selectors {
                node.add(catalog, selector)?;
            }
        }
        Ok(node)
    }

    fn add_defaults(&mut self, catalog: &dyn ResourceMetadataProvider) -> OrmResult<()> {
        let defaults = catalog.default_fields(&self.resource_type)?.to_vec();
        for name in defaults {
            let def = catalog
                .field(&self.resource_type, &name)
                .ok_or_else(|| unknown_field(&self.resource_type, &name))?;
            match def.kind() {
                // default relations come with their key only
                FieldKind::Relation { target, .. } => {
                    let child = Self::key_only(catalog, target)?;
                    self.merge_relation(&name, child);
                }
                _ => self.push_field(&name),
            }
        }
        Ok(())
    }

    /// Add one selector, unioning with what is already requested.
    pub fn add(&mut self, catalog: &dyn ResourceMetadataProvider, selector: &Selector) -> OrmResult<()> {
        let name = selector.name();
        let def = catalog
            .field(&self.resource_type, name)
            .ok_or_else(|| unknown_field(&self.resource_type, name))?;

        match (selector, def.kind()) {
            (Selector::Field(_), FieldKind::Relation { target, .. }) => {
                let child = Self::build(catalog, target, &[])?;
                self.merge_relation(name, child);
            }
            (Selector::Field(_), _) => self.push_field(name),
            (Selector::Relation { include, .. }, FieldKind::Relation { target, .. }) => {
                let child = Self::build(catalog, target, include)?;
                self.merge_relation(name, child);
            }
            (Selector::Relation { .. }, _) => {
                return Err(OrmError::usage(format!(
                    "`{}` of {} is not a relation and cannot be expanded",
                    name, self.resource_type
                )))
            }
        }
        Ok(())
    }

    pub(crate) fn push_field(&mut self, name: &str) {
        if !self.fields.iter().any(|f| f == name) {
            self.fields.push(name.to_string());
        }
    }

    fn merge_relation(&mut self, name: &str, child: RequestNode) {
        match self.relations.iter_mut().find(|(n, _)| n == name) {
            Some((_, existing)) => existing.merge(child),
            None => self.relations.push((name.to_string(), child)),
        }
    }

    /// Union `other` into this node.
    pub fn merge(&mut self, other: RequestNode) {
        for field in &other.fields {
            self.push_field(field);
        }
        for (name, child) in other.relations {
            self.merge_relation(&name, child);
        }
    }

    pub fn resource_type(&self) -> &str {
        &self.resource_type
    }

    /// Key first, then fields in first-seen order.
    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    pub fn key_field(&self) -> &str {
        &self.fields[0]
    }

    pub fn relations(&self) -> &[(String, RequestNode)] {
        &self.relations
    }

    pub fn relation(&self, name: &str) -> Option<&RequestNode> {
        self.relations
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, node)| node)
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.fields.iter().any(|f| f == name)
    }

    /// Fields and relation names of this level.
    pub fn members(&self) -> impl Iterator<Item = &str> {
        self.fields
            .iter()
            .map(|f| f.as_str())
            .chain(self.relations.iter().map(|(n, _)| n.as_str()))
    }

    /// A node with the same type and key but only the given members of this one.
    pub(crate) fn subset(&self, fields: &[String], relations: &[String]) -> RequestNode {
        let mut node = RequestNode {
            resource_type: self.resource_type.clone(),
            fields: vec![self.key_field().to_string()],
            relations: Vec::new(),
        };
        for field in fields {
            node.push_field(field);
        }
        for (name, child) in &self.relations {
            if relations.contains(name) {
                node.relations.push((name.clone(), child.clone()));
            }
        }
        node
    }
}

fn unknown_field(resource_type: &str, name: &str) -> OrmError {
    OrmError::usage(format!("{} has no field `{}`", resource_type, name))
}
