//! Resource watch loop.
//!
//! Turns the list and watch calls of a [`ResourceClient`] into an ordered
//! stream of updates delivered to a [`ResourceUpdateHandler`], while keeping a
//! snapshot of the last known state of every resource.
//!
//! Every (re)start lists all resources and replays them against the snapshot,
//! so changes made while no watch was open are still observed. Watches are
//! never resumed from an older resourceVersion: when a watch ends for any
//! reason the loop starts over with a full list.

use crate::error::ControllerError;
use crate::metrics::Metrics;
use async_trait::async_trait;
use futures::StreamExt;
use kube::ResourceExt;
use resource_client::{Resource, ResourceClient, ResourceType, WatchEvent};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// One observed change of a resource.
#[derive(Debug, Clone)]
pub struct ResourceUpdate {
    pub resource_type: ResourceType,
    /// Last known state, if the resource was seen before
    pub old: Option<Resource>,
    /// New state, `None` for deletions
    pub new: Option<Resource>,
    pub resource_version: Option<String>,
}

impl ResourceUpdate {
    /// The resource this update is about: the new state, or the old one for deletions
    pub fn changed(&self) -> Option<&Resource> {
        self.new.as_ref().or(self.old.as_ref())
    }
}

/// Receiver of the updates of a watch loop.
#[async_trait]
pub trait ResourceUpdateHandler: Send + Sync {
    /// Handle one update; an error ends the loop.
    async fn on_update(&self, update: ResourceUpdate) -> Result<(), ControllerError>;
}

/// Runs the list/watch loop for the client's resource type.
///
/// Only returns on a failed list or a failed handler; a watch that cannot be
/// opened, ends, or fails mid-stream leads to a fresh list.
pub async fn run_resource_loop(
    client: Arc<dyn ResourceClient>,
    handler: Arc<dyn ResourceUpdateHandler>,
    metrics: Arc<Metrics>,
) -> Result<(), ControllerError> {
    let resource_type = client.resource_type().clone();
    let label = resource_type.to_string();
    let mut snapshot: HashMap<String, Resource> = HashMap::new();

    let deliver = |old: Option<Resource>, new: Option<Resource>, resource_version: Option<String>| {
        handler.on_update(ResourceUpdate {
            resource_type: resource_type.clone(),
            old,
            new,
            resource_version,
        })
    };

    loop {
        metrics.watch_restarts.with_label_values(&[label.as_str()]).inc();
        let list = client.list().await?;
        let resource_version = list.resource_version().map(str::to_string);
        info!(
            "Listed {} {} resources at version {}",
            list.items.len(),
            label,
            resource_version.as_deref().unwrap_or("<none>")
        );

        let mut listed = HashSet::with_capacity(list.items.len());
        for item in list.items {
            // List items come without apiVersion/kind
            let item = resource_type.attach(item);
            let name = item.name_any();
            listed.insert(name.clone());
            let old = snapshot.insert(name, item.clone());
            metrics.watch_events.with_label_values(&[label.as_str(), "sync"]).inc();
            deliver(old, Some(item), resource_version.clone()).await?;
        }

        let vanished: Vec<String> = snapshot
            .keys()
            .filter(|name| !listed.contains(*name))
            .cloned()
            .collect();
        for name in vanished {
            if let Some(old) = snapshot.remove(&name) {
                debug!("{} {} disappeared while not watching", label, name);
                metrics.watch_events.with_label_values(&[label.as_str(), "deleted"]).inc();
                deliver(Some(old), None, resource_version.clone()).await?;
            }
        }

        let mut stream = match client.watch(resource_version.as_deref()).await {
            Ok(stream) => stream,
            Err(e) => {
                warn!("Cannot watch {}: {}", label, e);
                continue;
            }
        };

        while let Some(event) = stream.next().await {
            match event {
                Ok(WatchEvent::Added(resource)) | Ok(WatchEvent::Modified(resource)) => {
                    let resource = resource_type.attach(resource);
                    let version = resource.resource_version();
                    let old = snapshot.insert(resource.name_any(), resource.clone());
                    let event_type = if old.is_some() { "modified" } else { "added" };
                    debug!("{} {} {} at {:?}", label, resource.name_any(), event_type, version);
                    metrics.watch_events.with_label_values(&[label.as_str(), event_type]).inc();
                    deliver(old, Some(resource), version).await?;
                }
                Ok(WatchEvent::Deleted(resource)) => {
                    let name = resource.name_any();
                    let version = resource.resource_version();
                    let old = snapshot.remove(&name);
                    debug!("{} {} deleted at {:?}", label, name, version);
                    metrics.watch_events.with_label_values(&[label.as_str(), "deleted"]).inc();
                    deliver(old, None, version).await?;
                }
                Ok(WatchEvent::Error(message)) => {
                    metrics.watch_events.with_label_values(&[label.as_str(), "error"]).inc();
                    warn!("Error event while watching {}: {}", label, message);
                }
                Ok(WatchEvent::Other(event_type)) => {
                    debug!("Ignoring {} event while watching {}", event_type, label);
                }
                Err(e) => {
                    warn!("Watch of {} failed: {}", label, e);
                    break;
                }
            }
        }
        info!("Watch of {} ended, resyncing", label);
    }
}
