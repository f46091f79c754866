//! Resource client serving `list()` from a watched cache.
//!
//! Wraps another [`ResourceClient`] of the same type. A watch loop keeps an
//! in-memory map of all resources current, so listing workloads for every
//! config change costs no network round-trip.

use crate::error::ControllerError;
use crate::metrics::Metrics;
use crate::resource_loop::{run_resource_loop, ResourceUpdate, ResourceUpdateHandler};
use async_trait::async_trait;
use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ListMeta;
use kube::ResourceExt;
use resource_client::{
    Resource, ResourceClient, ResourceClientError, ResourceList, ResourcePatch, ResourceType, WatchStream,
};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use tokio::task::JoinHandle;
use tracing::debug;

type SeedFuture = Shared<BoxFuture<'static, Result<ResourceList, Arc<ResourceClientError>>>>;

#[derive(Debug, Default)]
struct CacheState {
    items: HashMap<String, Resource>,
    resource_version: Option<String>,
}

/// Applies watch loop updates to the cache
struct CacheUpdater {
    state: Arc<RwLock<CacheState>>,
}

#[async_trait]
impl ResourceUpdateHandler for CacheUpdater {
    async fn on_update(&self, update: ResourceUpdate) -> Result<(), ControllerError> {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        match (update.new, update.old) {
            (Some(new), _) => {
                state.items.insert(new.name_any(), new);
            }
            (None, Some(old)) => {
                state.items.remove(&old.name_any());
            }
            (None, None) => {}
        }
        if update.resource_version.is_some() {
            state.resource_version = update.resource_version;
        }
        Ok(())
    }
}

/// Caching wrapper around a [`ResourceClient`]
pub struct CachedResourceClient {
    client: Arc<dyn ResourceClient>,
    seed: SeedFuture,
    state: Arc<RwLock<CacheState>>,
}

impl CachedResourceClient {
    /// Wrap `client`, issuing the seed list and starting the watch loop right away.
    ///
    /// The returned handle is the watch loop; it only finishes on a fatal error.
    pub fn new(
        client: Arc<dyn ResourceClient>,
        metrics: Arc<Metrics>,
    ) -> (Arc<Self>, JoinHandle<Result<(), ControllerError>>) {
        let state = Arc::new(RwLock::new(CacheState::default()));

        let seed = {
            let client = Arc::clone(&client);
            let state = Arc::clone(&state);
            async move {
                let list = client.list().await.map_err(Arc::new)?;
                let resource_type = client.resource_type().clone();
                let mut state = state.write().unwrap_or_else(PoisonError::into_inner);
                // Entries seen by the watch loop are fresher than the seed
                for item in &list.items {
                    let item = resource_type.attach(item.clone());
                    state.items.entry(item.name_any()).or_insert(item);
                }
                if state.resource_version.is_none() {
                    state.resource_version = list.metadata.resource_version.clone();
                }
                debug!("Seeded {} cache with {} items", resource_type, list.items.len());
                Ok(list)
            }
            .boxed()
            .shared()
        };
        tokio::spawn(seed.clone());

        let updater = Arc::new(CacheUpdater {
            state: Arc::clone(&state),
        });
        let handle = tokio::spawn(run_resource_loop(Arc::clone(&client), updater, metrics));

        (Arc::new(Self { client, seed, state }), handle)
    }
}

#[async_trait]
impl ResourceClient for CachedResourceClient {
    fn resource_type(&self) -> &ResourceType {
        self.client.resource_type()
    }

    async fn list(&self) -> Result<ResourceList, ResourceClientError> {
        let seed = self.seed.clone().await.map_err(ResourceClientError::Shared)?;
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        Ok(ResourceList {
            types: seed.types,
            metadata: ListMeta {
                resource_version: state.resource_version.clone(),
                ..Default::default()
            },
            items: state.items.values().cloned().collect(),
        })
    }

    async fn get(&self, name: &str) -> Result<Resource, ResourceClientError> {
        self.client.get(name).await
    }

    async fn create(&self, resource: &Resource) -> Result<Resource, ResourceClientError> {
        self.client.create(resource).await
    }

    async fn patch(&self, name: &str, patch: ResourcePatch) -> Result<(), ResourceClientError> {
        self.client.patch(name, patch).await
    }

    async fn watch(&self, resource_version: Option<&str>) -> Result<WatchStream, ResourceClientError> {
        self.client.watch(resource_version).await
    }
}
