//! Durable store of the last applied content hash per config resource.
//!
//! Hashes live in the `data` of one designated config map, so they survive
//! controller restarts. Writes are staged in memory first and only move to the
//! committed baseline once the cluster acknowledged them.

use crate::error::ControllerError;
use crate::hash::content_data;
use crate::metrics::Metrics;
use async_trait::async_trait;
use kube::api::DynamicObject;
use kube::ResourceExt;
use regex::Regex;
use resource_client::{Resource, ResourceClient, ResourcePatch, ResourceType};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::{Arc, LazyLock, Mutex, PoisonError};
use tokio::sync::OnceCell;
use tracing::{debug, error, info, warn};

static INVALID_KEY_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^-._a-zA-Z0-9]+").expect("hardcoded regex pattern is valid"));

/// Config map key for the hash of `name` of the given type.
pub fn entry_key(api_version: &str, kind: &str, name: &str) -> String {
    INVALID_KEY_CHARS
        .replace_all(&format!("{api_version}.{kind}_{name}"), "_")
        .into_owned()
}

fn resource_entry_key(resource: &Resource) -> String {
    let (api_version, kind) = resource
        .types
        .as_ref()
        .map(|types| (types.api_version.as_str(), types.kind.as_str()))
        .unwrap_or_default();
    entry_key(api_version, kind, &resource.name_any())
}

/// Last-known content hashes of config resources.
#[async_trait]
pub trait HashStore: Send + Sync {
    /// Whether `resource` is the store's own backing resource
    fn is_self(&self, resource: &Resource) -> bool;

    async fn get(&self, resource: &Resource) -> Option<String>;

    /// Record `hash` for `resource` in memory, visible to `get` right away.
    fn stage(&self, resource: &Resource, hash: &str);

    /// Persist a previously staged `hash` for `resource`.
    async fn persist(&self, resource: &Resource, hash: &str) -> Result<(), ControllerError>;

    /// Stage and persist `hash` for `resource`.
    ///
    /// The value stays visible to `get` even when persisting it fails.
    #[cfg(test)]
    async fn update(&self, resource: &Resource, hash: &str) -> Result<(), ControllerError> {
        self.stage(resource, hash);
        self.persist(resource, hash).await
    }
}

/// [`HashStore`] backed by a config map in the watched namespace.
pub struct ConfigMapHashStore {
    client: Arc<dyn ResourceClient>,
    name: String,
    // None when the backing config map could neither be read nor created
    committed: OnceCell<Option<Mutex<HashMap<String, String>>>>,
    uncommitted: Mutex<HashMap<String, String>>,
    metrics: Arc<Metrics>,
}

impl ConfigMapHashStore {
    /// Create a store on config map `name`, using a `v1.ConfigMap` client.
    ///
    /// The config map is loaded (or created) on first use.
    pub fn new(client: Arc<dyn ResourceClient>, name: impl Into<String>, metrics: Arc<Metrics>) -> Self {
        Self {
            client,
            name: name.into(),
            committed: OnceCell::new(),
            uncommitted: Mutex::new(HashMap::new()),
            metrics,
        }
    }

    async fn committed(&self) -> Option<&Mutex<HashMap<String, String>>> {
        self.committed.get_or_init(|| self.bootstrap()).await.as_ref()
    }

    async fn bootstrap(&self) -> Option<Mutex<HashMap<String, String>>> {
        match self.client.get(&self.name).await {
            Ok(resource) => {
                let data = content_data(&resource);
                info!("Loaded {} known hashes from config map {}", data.len(), self.name);
                Some(Mutex::new(data.into_iter().collect()))
            }
            Err(e) if e.is_not_found() => {
                info!("Creating hash store config map {}", self.name);
                let api_resource = ResourceType::new("v1", "ConfigMap").api_resource();
                let resource = DynamicObject::new(&self.name, &api_resource).data(json!({ "data": {} }));
                match self.client.create(&resource).await {
                    Ok(_) => Some(Mutex::new(HashMap::new())),
                    Err(e) => {
                        error!("Cannot create hash store config map {}: {}", self.name, e);
                        None
                    }
                }
            }
            Err(e) => {
                error!("Cannot load hash store config map {}: {}", self.name, e);
                None
            }
        }
    }

    /// Bootstrap now, failing if the backing config map can neither be read nor created.
    pub async fn load(&self) -> Result<(), ControllerError> {
        match self.committed().await {
            Some(_) => Ok(()),
            None => Err(ControllerError::HashStore(format!(
                "config map {} is unavailable",
                self.name
            ))),
        }
    }

    fn uncommitted(&self) -> std::sync::MutexGuard<'_, HashMap<String, String>> {
        self.uncommitted.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl HashStore for ConfigMapHashStore {
    fn is_self(&self, resource: &Resource) -> bool {
        ResourceType::of(resource).is_some_and(|t| t.api_version == "v1" && t.kind == "ConfigMap")
            && resource.name_any() == self.name
    }

    async fn get(&self, resource: &Resource) -> Option<String> {
        let key = resource_entry_key(resource);
        let committed = self.committed().await;
        if let Some(hash) = self.uncommitted().get(&key) {
            return Some(hash.clone());
        }
        committed.and_then(|committed| {
            committed
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .get(&key)
                .cloned()
        })
    }

    fn stage(&self, resource: &Resource, hash: &str) {
        self.uncommitted().insert(resource_entry_key(resource), hash.to_string());
    }

    async fn persist(&self, resource: &Resource, hash: &str) -> Result<(), ControllerError> {
        let key = resource_entry_key(resource);
        let Some(committed) = self.committed().await else {
            self.metrics.hash_store_writes.with_label_values(&["failure"]).inc();
            return Err(ControllerError::HashStore(format!(
                "config map {} is unavailable",
                self.name
            )));
        };

        let mut data = Map::new();
        data.insert(key.clone(), Value::String(hash.to_string()));
        let patch = ResourcePatch::Merge(json!({ "data": data }));
        match self.client.patch(&self.name, patch).await {
            Ok(()) => {
                committed
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .insert(key.clone(), hash.to_string());
                // A newer write for the same key may have been staged meanwhile
                let mut uncommitted = self.uncommitted();
                if uncommitted.get(&key).is_some_and(|staged| staged == hash) {
                    uncommitted.remove(&key);
                }
                self.metrics.hash_store_writes.with_label_values(&["success"]).inc();
                debug!("Stored hash {} for {}", hash, key);
                Ok(())
            }
            Err(e) => {
                warn!("Cannot store hash {} for {} in {}: {}", hash, key, self.name, e);
                self.metrics.hash_store_writes.with_label_values(&["failure"]).inc();
                Err(e.into())
            }
        }
    }
}

#[cfg(test)]
#[path = "hash_store_test.rs"]
mod tests;
