//! Errors reported by the remote APIs.

use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sitegraph_schema::Protocol;

/// The remote API rejected a request.
///
/// Carries the protocol-specific code and message verbatim; never retried by
/// the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceError {
    pub protocol: Protocol,
    pub http_response_code: u16,
    /// Service error code (e.g. `Microsoft.SharePoint.SPException`, `itemNotFound`).
    pub code: String,
    /// Numeric server code that REST prefixes to `code` (e.g. `-2130575338`).
    pub server_error_code: Option<i64>,
    pub message: String,
    pub client_request_id: Option<String>,
    pub additional_data: BTreeMap<String, String>,
}

impl ServiceError {
    pub fn new(
        protocol: Protocol,
        http_response_code: u16,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            protocol,
            http_response_code,
            code: code.into(),
            server_error_code: None,
            message: message.into(),
            client_request_id: None,
            additional_data: BTreeMap::new(),
        }
    }

    /// Parse an error response body.
    ///
    /// Bodies that are not JSON objects become the message as is.
    pub fn parse(protocol: Protocol, http_response_code: u16, body: &str) -> Self {
        let mut error = Self::new(protocol, http_response_code, "", "");
        let trimmed = body.trim();
        if trimmed.is_empty() {
            return error;
        }

        let parsed = if trimmed.starts_with('{') {
            serde_json::from_str::<Value>(trimmed).ok()
        } else {
            None
        };

        match parsed {
            Some(json) => match protocol {
                Protocol::Rest => error.parse_rest(&json),
                Protocol::Graph => error.parse_graph(&json),
            },
            None => error.message = trimmed.to_string(),
        }

        error
    }

    fn parse_rest(&mut self, json: &Value) {
        let error_data = json
            .get("odata.error")
            .or_else(|| json.get("error"))
            .unwrap_or(json);

        let Some(fields) = error_data.as_object() else {
            self.message = json.to_string();
            return;
        };

        for (name, value) in fields {
            match name.as_str() {
                "code" => self.set_rest_code(value.as_str().unwrap_or_default()),
                "message" => {
                    self.message = match value {
                        Value::String(s) => s.clone(),
                        other => other
                            .get("value")
                            .and_then(|v| v.as_str())
                            .map(|s| s.to_string())
                            .unwrap_or_else(|| other.to_string()),
                    }
                }
                other => {
                    self.additional_data
                        .insert(other.to_string(), stringify(value));
                }
            }
        }
    }

    /// REST codes look like `-2130575338, Microsoft.SharePoint.SPException`.
    fn set_rest_code(&mut self, code: &str) {
        match code.split_once(',') {
            Some((number, name)) => {
                self.code = name.trim().to_string();
                self.server_error_code = number.trim().parse::<i64>().ok();
            }
            None => self.code = code.to_string(),
        }
    }

    fn parse_graph(&mut self, json: &Value) {
        let error_data = json.get("error").unwrap_or(json);
        let Some(fields) = error_data.as_object() else {
            self.message = json.to_string();
            return;
        };

        for (name, value) in fields {
            match name.as_str() {
                "code" => self.code = value.as_str().unwrap_or_default().to_string(),
                "message" => self.message = stringify(value),
                "innerError" | "innererror" => {
                    if let Some(inner) = value.as_object() {
                        for (key, inner_value) in inner {
                            if key == "client-request-id" || key == "request-id" {
                                if self.client_request_id.is_none() || key == "client-request-id" {
                                    self.client_request_id = Some(stringify(inner_value));
                                }
                            } else {
                                self.additional_data
                                    .insert(key.clone(), stringify(inner_value));
                            }
                        }
                    }
                }
                other => {
                    self.additional_data
                        .insert(other.to_string(), stringify(value));
                }
            }
        }
    }

    /// 404 responses.
    pub fn is_not_found(&self) -> bool {
        self.http_response_code == 404
    }
}

fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

impl Display for ServiceError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "HttpResponseCode: {}", self.http_response_code)?;
        writeln!(f, "Code: {}", self.code)?;
        writeln!(f, "Message: {}", self.message)?;
        writeln!(
            f,
            "ClientRequestId: {}",
            self.client_request_id.as_deref().unwrap_or_default()
        )?;
        for (key, value) in &self.additional_data {
            writeln!(f, "{}: {}", key, value)?;
        }
        Ok(())
    }
}

impl std::error::Error for ServiceError {}
