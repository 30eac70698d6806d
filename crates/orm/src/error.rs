//! Error taxonomy of the runtime.

use sitegraph_client::{ServiceError, TransportError};
use sitegraph_schema::SchemaError;
use thiserror::Error;

pub type OrmResult<T> = Result<T, OrmError>;

/// One failed operation inside an executed batch.
#[derive(Debug, Clone)]
pub struct BatchFailure {
    /// Position of the operation in enqueue order.
    pub index: usize,
    /// Short description of the operation (e.g. `load SP.List`).
    pub label: String,
    pub error: OrmError,
}

#[derive(Debug, Clone, Error)]
pub enum OrmError {
    /// A field was read before it was requested.
    #[error("field `{field}` of {resource_type} has not been loaded")]
    FieldNotLoaded {
        resource_type: String,
        field: String,
    },

    /// Neither protocol exposes the requested field or relation.
    #[error("field `{field}` of {resource_type} is not exposed by REST or Graph")]
    UnsupportedField {
        resource_type: String,
        field: String,
    },

    /// The remote API rejected the request. Surfaced verbatim, never retried.
    #[error("{} service error {} ({}): {}", .0.protocol, .0.http_response_code, .0.code, .0.message)]
    Service(ServiceError),

    /// Some operations of an executed batch failed. Each waiter still received
    /// its own result.
    #[error("{failed} batch operation(s) failed, {succeeded} succeeded")]
    BatchPartialFailure {
        failed: usize,
        succeeded: usize,
        failures: Vec<BatchFailure>,
    },

    /// A fetch would overwrite fields modified by the caller.
    #[error("fetch of {resource_type} would overwrite modified fields {fields:?}")]
    Conflict {
        resource_type: String,
        fields: Vec<String>,
    },

    /// API misuse: overlapping batch scopes, malformed selectors, unknown names.
    #[error("usage error: {0}")]
    Usage(String),

    /// The request never produced a service answer (timeout, connection, decoding).
    #[error("transport error: {0}")]
    Transport(TransportError),

    #[error("could not map field `{field}` of {resource_type}: {message}")]
    Mapping {
        resource_type: String,
        field: String,
        message: String,
    },

    /// Some items of a collection could not be mapped; their siblings were applied.
    #[error("{} item(s) of {resource_type} could not be mapped", .failures.len())]
    ItemMapping {
        resource_type: String,
        failures: Vec<OrmError>,
    },

    /// The batch carrying this operation was cancelled before it completed.
    #[error("operation cancelled")]
    Cancelled,

    /// The instance was deleted; it accepts no further operations.
    #[error("{resource_type} instance has been deleted")]
    Deleted { resource_type: String },
}

impl OrmError {
    pub fn usage(message: impl Into<String>) -> Self {
        OrmError::Usage(message.into())
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, OrmError::Transport(err) if err.is_timeout())
    }

    pub fn service_error(&self) -> Option<&ServiceError> {
        match self {
            OrmError::Service(err) => Some(err),
            _ => None,
        }
    }
}

impl From<TransportError> for OrmError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Service(service) => OrmError::Service(service),
            other => OrmError::Transport(other),
        }
    }
}

impl From<ServiceError> for OrmError {
    fn from(err: ServiceError) -> Self {
        OrmError::Service(err)
    }
}

impl From<SchemaError> for OrmError {
    fn from(err: SchemaError) -> Self {
        OrmError::Usage(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sitegraph_schema::Protocol;
    use std::time::Duration;

    #[test]
    fn test_transport_errors_split_into_service_and_transport() {
        let service = ServiceError::new(Protocol::Rest, 404, "itemNotFound", "gone");
        assert!(matches!(
            OrmError::from(TransportError::Service(service)),
            OrmError::Service(_)
        ));

        let timeout = OrmError::from(TransportError::Timeout {
            after: Some(Duration::from_secs(5)),
        });
        assert!(timeout.is_timeout());
        assert!(!OrmError::Cancelled.is_timeout());
    }

    #[test]
    fn test_partial_failure_message() {
        let err = OrmError::BatchPartialFailure {
            failed: 1,
            succeeded: 2,
            failures: vec![BatchFailure {
                index: 1,
                label: "load SP.List".to_string(),
                error: OrmError::Cancelled,
            }],
        };
        assert_eq!(err.to_string(), "1 batch operation(s) failed, 2 succeeded");
    }
}
