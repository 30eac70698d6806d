//! Fully resolved, protocol-tagged requests.

use std::fmt::{Display, Formatter};

use itertools::Itertools;
use serde::{Deserialize, Serialize};
use sitegraph_schema::Protocol;
use uuid::Uuid;

/// A raw response document as returned by the service.
///
/// Requests without a response body (e.g. DELETE) yield `Value::Null`.
pub type Document = serde_json::Value;

/// Ties every descriptor of one logical operation together.
///
/// A load split across both protocols produces two descriptors with the same id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CorrelationId(Uuid);

impl CorrelationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for CorrelationId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Method {
    Get,
    Post,
    Patch,
    Delete,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
        }
    }

    pub fn is_read(&self) -> bool {
        matches!(self, Method::Get)
    }
}

impl Display for Method {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A request ready for the transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestDescriptor {
    pub correlation_id: CorrelationId,
    pub protocol: Protocol,
    pub method: Method,
    /// Path relative to the protocol's base address (e.g. `_api/web/lists`).
    pub path: String,
    /// Query parameters in rendering order (`$select`, `$expand`, `$filter`, ...).
    pub query: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
    pub body: Option<serde_json::Value>,
}

impl RequestDescriptor {
    pub fn new(
        correlation_id: CorrelationId,
        protocol: Protocol,
        method: Method,
        path: impl Into<String>,
    ) -> Self {
        Self {
            correlation_id,
            protocol,
            method,
            path: path.into(),
            query: Vec::new(),
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn get(correlation_id: CorrelationId, protocol: Protocol, path: impl Into<String>) -> Self {
        Self::new(correlation_id, protocol, Method::Get, path)
    }

    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((name.into(), value.into()));
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_body(mut self, body: serde_json::Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Value of a query parameter, if set.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Human readable query string (not percent-encoded).
    pub fn query_string(&self) -> String {
        self.query
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .join("&")
    }

    /// Percent-encoded query string for the wire.
    pub fn encoded_query_string(&self) -> String {
        self.query
            .iter()
            .map(|(k, v)| format!("{}={}", k, urlencoding::encode(v)))
            .join("&")
    }

    /// Path plus encoded query string.
    pub fn target(&self) -> String {
        if self.query.is_empty() {
            self.path.clone()
        } else {
            format!("{}?{}", self.path, self.encoded_query_string())
        }
    }
}

impl Display for RequestDescriptor {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if self.query.is_empty() {
            write!(f, "[{}] {} {}", self.protocol, self.method, self.path)
        } else {
            write!(
                f,
                "[{}] {} {}?{}",
                self.protocol,
                self.method,
                self.path,
                self.query_string()
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_rendering() {
        let request = RequestDescriptor::get(CorrelationId::new(), Protocol::Rest, "_api/web/lists")
            .with_param("$select", "Id,Title")
            .with_param("$filter", "Title eq 'Site Pages'");

        assert_eq!(
            request.query_string(),
            "$select=Id,Title&$filter=Title eq 'Site Pages'"
        );
        assert_eq!(
            request.target(),
            "_api/web/lists?$select=Id%2CTitle&$filter=Title%20eq%20%27Site%20Pages%27"
        );
        assert_eq!(request.param("$select"), Some("Id,Title"));
        assert_eq!(request.param("$top"), None);
    }

    #[test]
    fn test_display() {
        let request = RequestDescriptor::get(CorrelationId::new(), Protocol::Graph, "sites/root");
        assert_eq!(request.to_string(), "[Graph] GET sites/root");
    }
}
