//! ResourceClient trait for mocking
//!
//! This trait abstracts access to one resource type in one namespace, so the
//! controller can run against the kube-backed client in production and against
//! an in-memory mock in unit tests.

use crate::error::ResourceClientError;
use crate::models::*;
use futures::stream::BoxStream;

/// Stream of watch events as returned by [`ResourceClient::watch`].
pub type WatchStream = BoxStream<'static, Result<WatchEvent, ResourceClientError>>;

/// Trait for cluster API operations on one resource type.
///
/// The namespace scope is fixed when the client is constructed.
/// All async methods must be `Send` to work with Tokio's work-stealing runtime.
#[async_trait::async_trait]
pub trait ResourceClient: Send + Sync {
    /// The resource type served by this client
    fn resource_type(&self) -> &ResourceType;

    /// List all resources of this type
    async fn list(&self) -> Result<ResourceList, ResourceClientError>;

    /// Get one resource by name, failing with `NotFound` if absent
    async fn get(&self, name: &str) -> Result<Resource, ResourceClientError>;

    async fn create(&self, resource: &Resource) -> Result<Resource, ResourceClientError>;

    async fn patch(&self, name: &str, patch: ResourcePatch) -> Result<(), ResourceClientError>;

    /// Open a watch, starting after `resource_version` if given.
    ///
    /// The stream ends when the server or the network closes it.
    async fn watch(&self, resource_version: Option<&str>) -> Result<WatchStream, ResourceClientError>;
}
