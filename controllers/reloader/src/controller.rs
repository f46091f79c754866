//! Main controller implementation.
//!
//! This module contains the `Controller` struct that wires the resource
//! clients, the hash store and the reloader together and supervises all
//! background loops:
//! - one watch loop per monitored config resource type (ConfigMap, Secret)
//! - one cache loop per workload type (Deployment, DaemonSet, StatefulSet)
//! - the metrics and health endpoint

use crate::cached_client::CachedResourceClient;
use crate::cluster::create_client;
use crate::coalesce::Coalescer;
use crate::config::{dependency_annotations, workload_types, Config};
use crate::error::ControllerError;
use crate::hash_store::ConfigMapHashStore;
use crate::metrics::{self, Metrics};
use crate::reloader::Reloader;
use crate::resource_loop::run_resource_loop;
use resource_client::{KubeResourceClient, ResourceClient, ResourceType};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::info;

/// Main controller for config-driven rollouts.
pub struct Controller {
    // Loop name and task; every one of them should run forever
    loops: Vec<(String, JoinHandle<Result<(), ControllerError>>)>,
}

impl Controller {
    /// Creates a new controller instance and starts all loops.
    pub async fn new(config: Config) -> Result<Self, ControllerError> {
        info!("Initializing Reloader Controller");

        let kube_client = create_client(&config.cluster).await?;
        let metrics = Arc::new(Metrics::new()?);
        let dependencies = dependency_annotations();
        let monitored = config.monitored_config_types(&dependencies)?;
        let namespace = config.namespace.as_str();
        let mut loops = Vec::new();

        let hash_store_client = Arc::new(KubeResourceClient::new(
            kube_client.clone(),
            ResourceType::new("v1", "ConfigMap"),
            namespace,
        ));
        let hash_store = Arc::new(ConfigMapHashStore::new(
            hash_store_client,
            &config.hash_store_configmap,
            Arc::clone(&metrics),
        ));
        hash_store.load().await?;

        let mut workloads: Vec<Arc<dyn ResourceClient>> = Vec::new();
        for workload_type in workload_types() {
            let client = Arc::new(KubeResourceClient::new(kube_client.clone(), workload_type.clone(), namespace));
            let (cached, handle) = CachedResourceClient::new(client, Arc::clone(&metrics));
            workloads.push(cached);
            loops.push((format!("{workload_type} cache"), handle));
        }

        let reloader = Arc::new(Reloader::new(
            dependencies,
            hash_store,
            workloads,
            Coalescer::new(config.coalesce_period(), Arc::clone(&metrics)),
        ));

        for resource_type in monitored {
            info!("Watching {} in {}", resource_type, namespace);
            let client = Arc::new(KubeResourceClient::new(kube_client.clone(), resource_type.clone(), namespace));
            let handle = tokio::spawn(run_resource_loop(client, reloader.clone(), Arc::clone(&metrics)));
            loops.push((format!("{resource_type} watcher"), handle));
        }

        let server = tokio::spawn(metrics::serve(config.port, metrics));
        loops.push(("metrics server".to_string(), server));

        Ok(Self { loops })
    }

    /// Runs the controller until the first loop exits.
    ///
    /// Loops are not expected to finish, so any exit is reported as an error.
    pub async fn run(self) -> Result<(), ControllerError> {
        info!("Reloader Controller running");

        let (names, handles): (Vec<String>, Vec<_>) = self.loops.into_iter().unzip();
        let (result, index, _remaining) = futures::future::select_all(handles).await;
        let name = &names[index];
        match result {
            Ok(Ok(())) => Err(ControllerError::Watch(format!("{name} exited"))),
            Ok(Err(e)) => Err(ControllerError::Watch(format!("{name} error: {e}"))),
            Err(e) => Err(ControllerError::Watch(format!("{name} panicked: {e}"))),
        }
    }
}
