use std::time::Duration;

use thiserror::Error;

use super::ServiceError;

/// Failure of a single transport call (or of one item in a batch).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    /// The remote API answered with an error document.
    #[error("service error ({}): {}", .0.http_response_code, .0.message)]
    Service(ServiceError),

    /// The request did not complete in time. Retrying is left to the caller.
    #[error("request timed out{}", .after.map(|d| format!(" after {:?}", d)).unwrap_or_default())]
    Timeout { after: Option<Duration> },

    #[error("connection failed: {0}")]
    Connection(String),

    /// The response body could not be decoded as a document.
    #[error("could not decode response: {0}")]
    Decode(String),

    #[error("{0}")]
    Other(String),
}

impl TransportError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, TransportError::Timeout { .. })
    }

    pub fn service_error(&self) -> Option<&ServiceError> {
        match self {
            TransportError::Service(err) => Some(err),
            _ => None,
        }
    }
}

impl From<ServiceError> for TransportError {
    fn from(err: ServiceError) -> Self {
        TransportError::Service(err)
    }
}

#[cfg(not(target_arch = "wasm32"))]
impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            TransportError::Timeout { after: None }
        } else if err.is_connect() {
            TransportError::Connection(err.to_string())
        } else if err.is_decode() {
            TransportError::Decode(err.to_string())
        } else {
            TransportError::Other(err.to_string())
        }
    }
}

impl From<serde_json::Error> for TransportError {
    fn from(err: serde_json::Error) -> Self {
        TransportError::Decode(err.to_string())
    }
}
