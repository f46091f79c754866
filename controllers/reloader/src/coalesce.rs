//! Per-target debouncing of workload updates.
//!
//! Triggers for the same target arriving within the coalescing period are
//! collected into one pending update, so a burst of config changes rolls a
//! workload only once.

use crate::metrics::Metrics;
use crate::rollout::build_patch;
use kube::ResourceExt;
use resource_client::{qualified_name, Resource, ResourceClient};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

struct PendingUpdate {
    // Identifies the timer allowed to issue this update
    generation: u64,
    timer: JoinHandle<()>,
    target: Resource,
    client: Arc<dyn ResourceClient>,
    triggers: Vec<Resource>,
}

type PendingUpdates = Arc<Mutex<HashMap<String, PendingUpdate>>>;

fn lock(pending: &Mutex<HashMap<String, PendingUpdate>>) -> MutexGuard<'_, HashMap<String, PendingUpdate>> {
    pending.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Debounces updates per target (`apiVersion.kind:name`).
pub struct Coalescer {
    period: Duration,
    pending: PendingUpdates,
    generation: AtomicU64,
    metrics: Arc<Metrics>,
}

impl Coalescer {
    pub fn new(period: Duration, metrics: Arc<Metrics>) -> Self {
        Self {
            period,
            pending: Arc::new(Mutex::new(HashMap::new())),
            generation: AtomicU64::new(0),
            metrics,
        }
    }

    /// Schedule an update of `target` (served by `client`) caused by `trigger`.
    ///
    /// Restarts the target's timer. Triggers accumulate until the timer fires;
    /// the latest `target` state is used for building the patch.
    pub fn schedule(&self, client: Arc<dyn ResourceClient>, target: Resource, trigger: Resource) {
        let key = qualified_name(&target);
        let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;

        let mut pending = lock(&self.pending);
        let mut triggers = match pending.remove(&key) {
            Some(previous) => {
                previous.timer.abort();
                debug!("Extending pending update of {}", key);
                previous.triggers
            }
            None => Vec::new(),
        };
        triggers.push(trigger);

        let timer = tokio::spawn(fire(
            Arc::clone(&self.pending),
            key.clone(),
            generation,
            self.period,
            Arc::clone(&self.metrics),
        ));
        pending.insert(
            key,
            PendingUpdate {
                generation,
                timer,
                target,
                client,
                triggers,
            },
        );
        self.metrics.pending_updates.set(pending.len() as i64);
    }

    /// Triggers collected so far for `target`
    #[cfg(test)]
    pub fn pending_triggers(&self, target: &str) -> Option<Vec<Resource>> {
        lock(&self.pending).get(target).map(|update| update.triggers.clone())
    }
}

async fn fire(pending: PendingUpdates, key: String, generation: u64, period: Duration, metrics: Arc<Metrics>) {
    tokio::time::sleep(period).await;

    let update = {
        let mut pending = lock(&pending);
        let current = pending.get(&key).is_some_and(|update| update.generation == generation);
        let update = if current { pending.remove(&key) } else { None };
        metrics.pending_updates.set(pending.len() as i64);
        update
    };
    // Superseded by a later trigger
    let Some(update) = update else { return };

    let patch = match build_patch(&update.target, &update.triggers) {
        Ok(patch) => patch,
        Err(e) => {
            error!("Dropping update of {}: {}", key, e);
            metrics.patches.with_label_values(&["dropped"]).inc();
            return;
        }
    };

    info!("Updating {} for {} changed resources", key, update.triggers.len());
    match update.client.patch(&update.target.name_any(), patch).await {
        Ok(()) => {
            metrics.patches.with_label_values(&["success"]).inc();
        }
        Err(e) => {
            error!("Cannot update {}: {}", key, e);
            metrics.patches.with_label_values(&["failure"]).inc();
        }
    }
}
