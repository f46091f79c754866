//! Kubernetes-backed resource client
//!
//! Implements [`ResourceClient`] over `kube::Api<DynamicObject>`, scoped to a
//! single namespace.

use crate::error::ResourceClientError;
use crate::models::*;
use crate::resource_trait::{ResourceClient, WatchStream};
use futures::StreamExt;
use kube::api::{Api, DynamicObject, ListParams, Patch, PatchParams, PostParams, WatchParams};
use kube::Client;
use tracing::debug;

/// Resource client for one resource type in one namespace
pub struct KubeResourceClient {
    api: Api<DynamicObject>,
    resource_type: ResourceType,
    namespace: String,
}

impl KubeResourceClient {
    /// Create a new client
    ///
    /// # Arguments
    /// * `client` - Connected kube client
    /// * `resource_type` - Type to operate on (e.g. `apps/v1.Deployment`)
    /// * `namespace` - Namespace all calls are scoped to
    pub fn new(client: Client, resource_type: ResourceType, namespace: &str) -> Self {
        let api = Api::namespaced_with(client, namespace, &resource_type.api_resource());
        Self {
            api,
            resource_type,
            namespace: namespace.to_string(),
        }
    }

    /// Get the namespace
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    fn map_error(&self, name: &str, error: kube::Error) -> ResourceClientError {
        let error = ResourceClientError::Kube(error);
        if error.is_not_found() {
            ResourceClientError::NotFound(format!(
                "{} {}/{}",
                self.resource_type, self.namespace, name
            ))
        } else {
            error
        }
    }
}

#[async_trait::async_trait]
impl ResourceClient for KubeResourceClient {
    fn resource_type(&self) -> &ResourceType {
        &self.resource_type
    }

    async fn list(&self) -> Result<ResourceList, ResourceClientError> {
        debug!("Listing {} in {}", self.resource_type, self.namespace);
        let list = self.api.list(&ListParams::default()).await?;
        Ok(ResourceList {
            types: list.types,
            metadata: list.metadata,
            items: list.items,
        })
    }

    async fn get(&self, name: &str) -> Result<Resource, ResourceClientError> {
        self.api.get(name).await.map_err(|e| self.map_error(name, e))
    }

    async fn create(&self, resource: &Resource) -> Result<Resource, ResourceClientError> {
        let created = self.api.create(&PostParams::default(), resource).await?;
        Ok(created)
    }

    async fn patch(&self, name: &str, patch: ResourcePatch) -> Result<(), ResourceClientError> {
        let params = PatchParams::default();
        let result = match patch {
            ResourcePatch::Merge(document) => {
                self.api.patch(name, &params, &Patch::Merge(&document)).await
            }
            ResourcePatch::Strategic(document) => {
                self.api.patch(name, &params, &Patch::Strategic(&document)).await
            }
            ResourcePatch::Json(ops) => {
                let ops: json_patch::Patch = serde_json::from_value(serde_json::to_value(&ops)?)?;
                self.api.patch(name, &params, &Patch::<()>::Json(ops)).await
            }
        };
        result.map(|_| ()).map_err(|e| self.map_error(name, e))
    }

    async fn watch(&self, resource_version: Option<&str>) -> Result<WatchStream, ResourceClientError> {
        let version = resource_version.unwrap_or("0");
        debug!("Watching {} in {} from {}", self.resource_type, self.namespace, version);
        let stream = self.api.watch(&WatchParams::default(), version).await?;
        Ok(stream
            .map(|event| event.map(WatchEvent::from).map_err(ResourceClientError::from))
            .boxed())
    }
}
