use thiserror::Error;

use crate::Protocol;

/// Errors raised while reading resource metadata or rendering paths.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SchemaError {
    #[error("Unknown resource type: {0}")]
    UnknownResource(String),

    #[error("Resource type {resource_type} has no {protocol} path for {kind}")]
    NoPath {
        resource_type: String,
        protocol: Protocol,
        kind: String,
    },

    #[error("Path template `{template}` needs token `{token}` which is not available")]
    MissingToken { template: String, token: String },

    #[error("Path template `{0}` has an unterminated token")]
    MalformedTemplate(String),
}
