//! Resource client errors

use std::sync::Arc;
use thiserror::Error;

/// Errors that can occur when talking to the cluster API
#[derive(Debug, Error)]
pub enum ResourceClientError {
    /// Transport or API error reported by kube
    #[error("Kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A qualified resource type could not be parsed
    #[error("Invalid resource type: {0}")]
    InvalidResourceType(String),

    /// API call failed without a kube error (e.g. injected by the mock client)
    #[error("API error: {0}")]
    Api(String),

    /// An error observed once and handed to several waiters
    #[error("{0}")]
    Shared(Arc<ResourceClientError>),
}

impl ResourceClientError {
    /// Whether this error means the requested object does not exist.
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::NotFound(_) => true,
            Self::Kube(kube::Error::Api(response)) => response.code == 404,
            Self::Shared(inner) => inner.is_not_found(),
            _ => false,
        }
    }
}
