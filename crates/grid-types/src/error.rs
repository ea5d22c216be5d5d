//! Data model error types.

use thiserror::Error;

/// Errors raised while parsing, validating, or signing grid objects.
#[derive(Debug, Error)]
pub enum TypesError {
    #[error("invalid ip network '{0}'")]
    InvalidIpNet(String),

    #[error("workload '{0}' not found")]
    WorkloadNotFound(String),

    #[error("invalid deployment: {0}")]
    InvalidDeployment(String),

    #[error("invalid workload '{name}': {reason}")]
    InvalidWorkload { name: String, reason: String },

    #[error("unexpected workload type for '{name}': expected {expected}")]
    UnexpectedType { name: String, expected: &'static str },

    #[error("invalid metadata: {0}")]
    InvalidMetadata(String),

    #[error("signature error: {0}")]
    Signature(#[from] grid_core::CoreError),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type TypesResult<T> = Result<T, TypesError>;
