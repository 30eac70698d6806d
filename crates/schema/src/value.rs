//! Semantic field values shared by the mapper, the query translator and the
//! local evaluator.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::json;
use uuid::Uuid;

use crate::Protocol;

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    String(String),
    Integer(i64),
    Number(f64),
    Boolean(bool),
    Guid(Uuid),
    Timestamp(DateTime<Utc>),
    /// Enumeration member, by name.
    Enum(String),
    Complex(BTreeMap<String, Value>),
    Json(serde_json::Value),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) | Value::Enum(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Integer(i) => Some(*i as f64),
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_guid(&self) -> Option<Uuid> {
        match self {
            Value::Guid(g) => Some(*g),
            Value::String(s) => Uuid::parse_str(s).ok(),
            _ => None,
        }
    }

    pub fn as_timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            Value::Timestamp(t) => Some(*t),
            _ => None,
        }
    }

    pub fn as_complex(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Complex(map) => Some(map),
            _ => None,
        }
    }

    /// Canonical string form used to compare instance identities.
    ///
    /// Returns `None` for values that cannot act as a key.
    pub fn key_string(&self) -> Option<String> {
        match self {
            Value::String(s) | Value::Enum(s) => Some(s.clone()),
            Value::Integer(i) => Some(i.to_string()),
            Value::Guid(g) => Some(g.hyphenated().to_string()),
            Value::Boolean(b) => Some(b.to_string()),
            Value::Timestamp(t) => Some(t.to_rfc3339_opts(SecondsFormat::Secs, true)),
            Value::Null | Value::Number(_) | Value::Complex(_) | Value::Json(_) => None,
        }
    }

    /// Render as a filter literal for the given protocol.
    ///
    /// Complex and raw JSON values have no literal form.
    pub fn to_literal(&self, protocol: Protocol) -> Option<String> {
        let literal = match (self, protocol) {
            (Value::Null, _) => "null".to_string(),
            (Value::String(s), _) | (Value::Enum(s), _) => quote(s),
            (Value::Integer(i), _) => i.to_string(),
            (Value::Number(n), _) => n.to_string(),
            (Value::Boolean(b), _) => b.to_string(),
            (Value::Guid(g), Protocol::Rest) => format!("guid'{}'", g.hyphenated()),
            (Value::Guid(g), Protocol::Graph) => g.hyphenated().to_string(),
            (Value::Timestamp(t), Protocol::Rest) => {
                format!("datetime'{}'", t.to_rfc3339_opts(SecondsFormat::Secs, true))
            }
            (Value::Timestamp(t), Protocol::Graph) => {
                t.to_rfc3339_opts(SecondsFormat::Secs, true)
            }
            (Value::Complex(_), _) | (Value::Json(_), _) => return None,
        };
        Some(literal)
    }

    /// JSON form used in create/update request bodies.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::String(s) | Value::Enum(s) => json!(s),
            Value::Integer(i) => json!(i),
            Value::Number(n) => json!(n),
            Value::Boolean(b) => json!(b),
            Value::Guid(g) => json!(g.hyphenated().to_string()),
            Value::Timestamp(t) => json!(t.to_rfc3339_opts(SecondsFormat::Secs, true)),
            Value::Complex(map) => serde_json::Value::Object(
                map.iter().map(|(k, v)| (k.clone(), v.to_json())).collect(),
            ),
            Value::Json(raw) => raw.clone(),
        }
    }

    /// Equality with the coercions the services apply when filtering:
    /// integers compare with numbers, enum names and GUID strings compare
    /// case-insensitively.
    pub fn loose_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Enum(a), Value::Enum(b))
            | (Value::Enum(a), Value::String(b))
            | (Value::String(a), Value::Enum(b)) => a.eq_ignore_ascii_case(b),
            (Value::Guid(_), Value::String(_)) | (Value::String(_), Value::Guid(_)) => {
                self.as_guid().is_some() && self.as_guid() == other.as_guid()
            }
            (Value::Integer(_), Value::Number(_)) | (Value::Number(_), Value::Integer(_)) => {
                self.as_f64() == other.as_f64()
            }
            _ => self == other,
        }
    }

    /// Ordering between comparable values; `None` when the kinds differ.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
            (Value::Enum(a), Value::Enum(b)) => Some(a.cmp(b)),
            (Value::Integer(a), Value::Integer(b)) => Some(a.cmp(b)),
            (Value::Integer(_) | Value::Number(_), Value::Integer(_) | Value::Number(_)) => {
                self.as_f64()?.partial_cmp(&other.as_f64()?)
            }
            (Value::Boolean(a), Value::Boolean(b)) => Some(a.cmp(b)),
            (Value::Guid(a), Value::Guid(b)) => Some(a.cmp(b)),
            (Value::Timestamp(a), Value::Timestamp(b)) => Some(a.cmp(b)),
            (Value::Null, Value::Null) => Some(Ordering::Equal),
            // nulls sort first, as on the services
            (Value::Null, _) => Some(Ordering::Less),
            (_, Value::Null) => Some(Ordering::Greater),
            _ => None,
        }
    }
}

fn quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

impl Display for Value {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::String(s) | Value::Enum(s) => f.write_str(s),
            Value::Integer(i) => write!(f, "{}", i),
            Value::Number(n) => write!(f, "{}", n),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::Guid(g) => write!(f, "{}", g.hyphenated()),
            Value::Timestamp(t) => f.write_str(&t.to_rfc3339_opts(SecondsFormat::Secs, true)),
            Value::Complex(_) | Value::Json(_) => write!(f, "{}", self.to_json()),
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Integer(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Integer(value.into())
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Number(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Boolean(value)
    }
}

impl From<Uuid> for Value {
    fn from(value: Uuid) -> Self {
        Value::Guid(value)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(value: DateTime<Utc>) -> Self {
        Value::Timestamp(value)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Value::Null)
    }
}
