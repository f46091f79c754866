//! Reloader Controller
//!
//! Watches config maps and secrets in one namespace and rolls the workloads
//! that declare a dependency on them through annotations:
//! - `reloader.k8s.collaborne.com/configmap` / `configmap.reloader.stakater.com/reload`
//! - `reloader.k8s.collaborne.com/secret` / `secret.reloader.stakater.com/reload`
//!
//! A rollout is forced by setting an environment variable holding the content
//! hash of the changed resource on the workload's pod template.

mod cached_client;
mod cluster;
mod coalesce;
mod config;
mod controller;
mod error;
mod hash;
mod hash_store;
mod metrics;
mod reloader;
mod resource_loop;
mod rollout;
#[cfg(test)]
mod test_utils;

use clap::Parser;
use controller::Controller;
use crate::config::Config;
use crate::error::ControllerError;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), ControllerError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // kube talks TLS through rustls, which needs a process-wide crypto provider
    let _ = rustls::crypto::ring::default_provider().install_default();

    info!("Starting Reloader Controller");

    let config = Config::parse();

    info!("Configuration:");
    info!("  Namespace: {}", config.namespace);
    info!("  Hash store config map: {}", config.hash_store_configmap);
    info!("  Coalescing period: {}ms", config.coalesce_period);
    info!("  API server: {}", config.cluster.server.as_deref().unwrap_or("inferred"));

    // Initialize and run controller
    let controller = Controller::new(config).await?;
    controller.run().await?;

    Ok(())
}
