//! Reconciliation of config resource changes.
//!
//! The [`Reloader`] receives the updates of the config resource watch loops,
//! skips content it has already rolled out, finds the workloads depending on
//! the changed resource and schedules their update.

use crate::coalesce::Coalescer;
use crate::config::DependencyTable;
use crate::error::ControllerError;
use crate::hash::resource_hash;
use crate::hash_store::HashStore;
use crate::resource_loop::{ResourceUpdate, ResourceUpdateHandler};
use async_trait::async_trait;
use kube::ResourceExt;
use resource_client::{qualified_name, Resource, ResourceClient, ResourceType};
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

/// Whether `workload` declares a dependency on the `resource_type` named `name`.
///
/// The first non-empty annotation configured for the type holds a
/// comma-separated list of names.
pub fn depends_on(table: &DependencyTable, resource_type: &ResourceType, workload: &Resource, name: &str) -> bool {
    let Some(annotation_names) = table.get(resource_type) else {
        warn!("No dependency annotations configured for {}", resource_type);
        return false;
    };
    let Some(annotations) = workload.metadata.annotations.as_ref() else {
        return false;
    };
    annotation_names
        .iter()
        .filter_map(|annotation| annotations.get(annotation))
        .find(|value| !value.is_empty())
        .is_some_and(|value| value.split(',').any(|dependency| dependency == name))
}

/// Handler for config resource updates
pub struct Reloader {
    dependencies: DependencyTable,
    hash_store: Arc<dyn HashStore>,
    workloads: Vec<Arc<dyn ResourceClient>>,
    coalescer: Coalescer,
}

impl Reloader {
    /// # Arguments
    /// * `dependencies` - Dependency annotations per config resource type
    /// * `hash_store` - Known content hashes
    /// * `workloads` - Clients (usually cached) for every workload type that can be rolled
    /// * `coalescer` - Scheduler for the workload updates
    pub fn new(
        dependencies: DependencyTable,
        hash_store: Arc<dyn HashStore>,
        workloads: Vec<Arc<dyn ResourceClient>>,
        coalescer: Coalescer,
    ) -> Self {
        Self {
            dependencies,
            hash_store,
            workloads,
            coalescer,
        }
    }

    #[cfg(test)]
    pub fn coalescer(&self) -> &Coalescer {
        &self.coalescer
    }
}

#[async_trait]
impl ResourceUpdateHandler for Reloader {
    async fn on_update(&self, update: ResourceUpdate) -> Result<(), ControllerError> {
        let Some(changed) = update.changed() else {
            return Ok(());
        };
        let changed_name = qualified_name(changed);
        if self.hash_store.is_self(changed) {
            trace!("Ignoring update of the hash store {}", changed_name);
            return Ok(());
        }

        let updated_hash = resource_hash(changed);
        if self.hash_store.get(changed).await.as_deref() == Some(updated_hash.as_str()) {
            debug!("{} is unchanged ({})", changed_name, updated_hash);
            return Ok(());
        }

        let name = changed.name_any();
        let mut dependents = 0;
        for client in &self.workloads {
            let workload_type = client.resource_type().clone();
            for workload in client.list().await?.items {
                let workload = workload_type.attach(workload);
                if depends_on(&self.dependencies, &update.resource_type, &workload, &name) {
                    info!("{} changed, scheduling update of {}", changed_name, qualified_name(&workload));
                    self.coalescer.schedule(Arc::clone(client), workload, changed.clone());
                    dependents += 1;
                }
            }
        }

        if dependents == 0 {
            debug!("No workloads depend on {}", changed_name);
            return Ok(());
        }
        // Staged synchronously so a redelivery of the same content is skipped.
        // A lost write only means a redundant rollout later.
        self.hash_store.stage(changed, &updated_hash);
        let hash_store = Arc::clone(&self.hash_store);
        let changed = changed.clone();
        tokio::spawn(async move {
            if let Err(e) = hash_store.persist(&changed, &updated_hash).await {
                warn!("Cannot remember hash of {}: {}", changed_name, e);
            }
        });
        Ok(())
    }
}

#[cfg(test)]
#[path = "reloader_test.rs"]
mod tests;
