//! Controller-specific error types.
//!
//! This module defines error types specific to the Reloader Controller
//! that are not covered by upstream library errors.

use resource_client::ResourceClientError;
use thiserror::Error;

/// Errors that can occur in the Reloader Controller.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Kubernetes client construction error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// Error from a resource client call
    #[error("Resource client error: {0}")]
    Client(#[from] ResourceClientError),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Cluster connectivity could not be configured
    #[error("Kubeconfig error: {0}")]
    Kubeconfig(String),

    /// Resource watch failed
    #[error("Resource watch failed: {0}")]
    Watch(String),

    /// Hash store cannot be read or written
    #[error("Hash store error: {0}")]
    HashStore(String),

    /// Target of a rollout is not a supported workload kind
    #[error("Unrecognized target resource {0}")]
    UnsupportedTarget(String),

    /// Target of a rollout has no usable pod template
    #[error("Invalid target resource {0}: {1}")]
    InvalidTarget(String, String),

    /// Metrics listener error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Metrics registration or encoding error
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),
}
