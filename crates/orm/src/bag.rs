//! Per-instance field state.
//!
//! A [`PropertyBag`] records, for every field of one resource instance, the
//! current value and whether it is unset, loaded from the server or modified
//! by the caller. Server writes never clobber a modified field; the caller has
//! to discard or flush local changes first.

use std::collections::HashMap;

use serde_json::Value as JsonValue;
use sitegraph_schema::{Protocol, Value};

use crate::{OrmError, OrmResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FieldState {
    #[default]
    Unset,
    Loaded,
    Modified,
}

/// Who is writing a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    FromServer,
    FromCaller,
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    state: FieldState,
    /// Last value received from the server, restored by `discard_changes`.
    server_value: Option<Value>,
}

/// Identity and bookkeeping data returned alongside an instance.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InstanceMetadata {
    /// Type reported by the service (`SP.List`, `#microsoft.graph.list`, ...).
    pub type_name: Option<String>,
    /// REST identity URI.
    pub uri: Option<String>,
    /// Key as reported by REST, in canonical string form.
    pub rest_id: Option<String>,
    /// Identifier used by Graph to address the instance.
    pub graph_id: Option<String>,
    /// Version tags; REST and Graph each track their own.
    pub rest_etag: Option<String>,
    pub graph_etag: Option<String>,
}

impl InstanceMetadata {
    /// Fill in values from `other` without dropping what is already known.
    pub fn merge(&mut self, other: InstanceMetadata) {
        if other.type_name.is_some() {
            self.type_name = other.type_name;
        }
        if other.uri.is_some() {
            self.uri = other.uri;
        }
        if other.rest_id.is_some() {
            self.rest_id = other.rest_id;
        }
        if other.graph_id.is_some() {
            self.graph_id = other.graph_id;
        }
        if other.rest_etag.is_some() {
            self.rest_etag = other.rest_etag;
        }
        if other.graph_etag.is_some() {
            self.graph_etag = other.graph_etag;
        }
    }

    /// Version tag last reported by `protocol`.
    pub fn etag(&self, protocol: Protocol) -> Option<&str> {
        match protocol {
            Protocol::Rest => self.rest_etag.as_deref(),
            Protocol::Graph => self.graph_etag.as_deref(),
        }
    }

    pub fn to_json(&self) -> JsonValue {
        let mut map = serde_json::Map::new();
        let entries = [
            ("type", &self.type_name),
            ("uri", &self.uri),
            ("restId", &self.rest_id),
            ("graphId", &self.graph_id),
            ("restEtag", &self.rest_etag),
            ("graphEtag", &self.graph_etag),
        ];
        for (name, value) in entries {
            if let Some(value) = value {
                map.insert(name.to_string(), JsonValue::String(value.clone()));
            }
        }
        JsonValue::Object(map)
    }
}

#[derive(Debug, Clone)]
pub struct PropertyBag {
    resource_type: String,
    entries: HashMap<String, Entry>,
    metadata: InstanceMetadata,
}

impl PropertyBag {
    pub fn new(resource_type: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            entries: HashMap::new(),
            metadata: InstanceMetadata::default(),
        }
    }

    pub fn resource_type(&self) -> &str {
        &self.resource_type
    }

    pub fn state(&self, field: &str) -> FieldState {
        self.entries
            .get(field)
            .map(|e| e.state)
            .unwrap_or_default()
    }

    pub fn is_available(&self, field: &str) -> bool {
        self.state(field) != FieldState::Unset
    }

    pub fn get(&self, field: &str) -> OrmResult<&Value> {
        match self.entries.get(field) {
            Some(entry) if entry.state != FieldState::Unset => Ok(&entry.value),
            _ => Err(OrmError::FieldNotLoaded {
                resource_type: self.resource_type.clone(),
                field: field.to_string(),
            }),
        }
    }

    /// Write a value.
    ///
    /// `FromCaller` moves the field to `Modified`. `FromServer` moves it to
    /// `Loaded` and fails with `Conflict` when the field is `Modified`.
    pub fn set(&mut self, field: &str, value: Value, origin: Origin) -> OrmResult<()> {
        let entry = self
            .entries
            .entry(field.to_string())
            .or_insert_with(|| Entry {
                value: Value::Null,
                state: FieldState::Unset,
                server_value: None,
            });

        match origin {
            Origin::FromCaller => {
                entry.value = value;
                entry.state = FieldState::Modified;
            }
            Origin::FromServer => {
                if entry.state == FieldState::Modified {
                    return Err(OrmError::Conflict {
                        resource_type: self.resource_type.clone(),
                        fields: vec![field.to_string()],
                    });
                }
                entry.server_value = Some(value.clone());
                entry.value = value;
                entry.state = FieldState::Loaded;
            }
        }
        Ok(())
    }

    /// Resolve fields the server was asked for but omitted to null.
    ///
    /// Earlier server values are replaced; modified fields are left alone.
    pub fn resolve_omitted<I, S>(&mut self, fields: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for field in fields {
            let entry = self
                .entries
                .entry(field.as_ref().to_string())
                .or_insert_with(|| Entry {
                    value: Value::Null,
                    state: FieldState::Unset,
                    server_value: None,
                });
            if entry.state != FieldState::Modified {
                entry.value = Value::Null;
                entry.state = FieldState::Loaded;
                entry.server_value = Some(Value::Null);
            }
        }
    }

    /// Modified fields with their pending values, sorted by name.
    pub fn modified(&self) -> Vec<(String, Value)> {
        let mut fields: Vec<(String, Value)> = self
            .entries
            .iter()
            .filter(|(_, e)| e.state == FieldState::Modified)
            .map(|(name, e)| (name.clone(), e.value.clone()))
            .collect();
        fields.sort_by(|a, b| a.0.cmp(&b.0));
        fields
    }

    pub fn is_dirty(&self) -> bool {
        self.entries
            .values()
            .any(|e| e.state == FieldState::Modified)
    }

    /// The server accepted the pending values of `fields`.
    pub fn commit_modified<I, S>(&mut self, fields: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for field in fields {
            if let Some(entry) = self.entries.get_mut(field.as_ref()) {
                if entry.state == FieldState::Modified {
                    entry.state = FieldState::Loaded;
                    entry.server_value = Some(entry.value.clone());
                }
            }
        }
    }

    /// Revert a modified field to its last server value (or to unset).
    pub fn discard_field(&mut self, field: &str) {
        if let Some(entry) = self.entries.get_mut(field) {
            if entry.state != FieldState::Modified {
                return;
            }
            match entry.server_value.clone() {
                Some(value) => {
                    entry.value = value;
                    entry.state = FieldState::Loaded;
                }
                None => {
                    entry.value = Value::Null;
                    entry.state = FieldState::Unset;
                }
            }
        }
    }

    pub fn discard_changes(&mut self) {
        let modified: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, e)| e.state == FieldState::Modified)
            .map(|(name, _)| name.clone())
            .collect();
        for field in modified {
            self.discard_field(&field);
        }
    }

    /// Names of available fields, sorted.
    pub fn available(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, e)| e.state != FieldState::Unset)
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }

    pub fn metadata(&self) -> &InstanceMetadata {
        &self.metadata
    }

    pub fn metadata_mut(&mut self) -> &mut InstanceMetadata {
        &mut self.metadata
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_unset_field_is_not_loaded() {
        let bag = PropertyBag::new("SP.Web");
        assert!(!bag.is_available("Title"));
        assert!(matches!(
            bag.get("Title"),
            Err(OrmError::FieldNotLoaded { field, .. }) if field == "Title"
        ));
    }

    #[test]
    fn test_state_transitions() {
        let mut bag = PropertyBag::new("SP.Web");
        bag.set("Title", "Dev".into(), Origin::FromServer).unwrap();
        assert_eq!(bag.state("Title"), FieldState::Loaded);

        bag.set("Title", "Renamed".into(), Origin::FromCaller).unwrap();
        assert_eq!(bag.state("Title"), FieldState::Modified);
        assert_eq!(bag.modified(), vec![("Title".to_string(), Value::from("Renamed"))]);

        bag.commit_modified(["Title"]);
        assert_eq!(bag.state("Title"), FieldState::Loaded);
        assert_eq!(bag.get("Title").unwrap(), &Value::from("Renamed"));
    }

    #[test]
    fn test_server_write_does_not_clobber_modified() {
        let mut bag = PropertyBag::new("SP.List");
        bag.set("Title", "Docs".into(), Origin::FromServer).unwrap();
        bag.set("Title", "Local".into(), Origin::FromCaller).unwrap();

        let err = bag
            .set("Title", "Remote".into(), Origin::FromServer)
            .unwrap_err();
        assert!(matches!(err, OrmError::Conflict { .. }));
        assert_eq!(bag.get("Title").unwrap(), &Value::from("Local"));

        bag.discard_changes();
        assert_eq!(bag.get("Title").unwrap(), &Value::from("Docs"));
        bag.set("Title", "Remote".into(), Origin::FromServer).unwrap();
        assert_eq!(bag.get("Title").unwrap(), &Value::from("Remote"));
    }

    #[test]
    fn test_omitted_fields_resolve_to_null() {
        let mut bag = PropertyBag::new("SP.Web");
        bag.set("Id", "x".into(), Origin::FromServer).unwrap();
        bag.resolve_omitted(["Description"]);

        assert_eq!(bag.get("Id").unwrap(), &Value::from("x"));
        assert_eq!(bag.get("Description").unwrap(), &Value::Null);
        assert_eq!(bag.available(), vec!["Description".to_string(), "Id".to_string()]);
    }

    #[test]
    fn test_omission_clears_an_earlier_server_value() {
        let mut bag = PropertyBag::new("SP.Web");
        bag.set("Description", "old".into(), Origin::FromServer).unwrap();
        bag.set("Title", "Mine".into(), Origin::FromCaller).unwrap();
        bag.resolve_omitted(["Description", "Title"]);

        assert_eq!(bag.get("Description").unwrap(), &Value::Null);
        assert_eq!(bag.state("Description"), FieldState::Loaded);
        assert_eq!(bag.get("Title").unwrap(), &Value::from("Mine"));
        assert_eq!(bag.state("Title"), FieldState::Modified);
        assert_eq!(bag.modified().len(), 1);
    }

    #[test]
    fn test_discard_caller_only_field_unsets_it() {
        let mut bag = PropertyBag::new("SP.Web");
        bag.set("Description", "new".into(), Origin::FromCaller).unwrap();
        bag.discard_field("Description");
        assert!(!bag.is_available("Description"));
        assert!(!bag.is_dirty());
    }

    #[test]
    fn test_metadata_merge_keeps_known_values() {
        let mut metadata = InstanceMetadata {
            uri: Some("https://contoso/_api/web".to_string()),
            ..Default::default()
        };
        metadata.merge(InstanceMetadata {
            graph_id: Some("g1".to_string()),
            ..Default::default()
        });
        assert_eq!(metadata.uri.as_deref(), Some("https://contoso/_api/web"));
        assert_eq!(metadata.to_json()["graphId"], "g1");
    }
}
