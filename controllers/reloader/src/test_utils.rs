//! Test utilities for unit testing the controller
//!
//! This module provides helpers for creating test resources and mock clients.

use async_trait::async_trait;
use kube::api::DynamicObject;
use resource_client::mock::MockOperation;
use resource_client::{
    MockResourceClient, Resource, ResourceClient, ResourceClientError, ResourceList, ResourcePatch, ResourceType,
    WatchStream,
};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Semaphore;

pub const TEST_NAMESPACE: &str = "default";

fn create_test_resource(resource_type: &ResourceType, name: &str, data: Value) -> Resource {
    let mut resource = DynamicObject::new(name, &resource_type.api_resource())
        .within(TEST_NAMESPACE)
        .data(data);
    resource.types = Some(resource_type.type_meta());
    resource
}

/// Helper to create a test ConfigMap with the given `data` map
pub fn create_test_config_map(name: &str, data: Value) -> Resource {
    create_test_resource(&ResourceType::new("v1", "ConfigMap"), name, json!({ "data": data }))
}

/// Helper to create a test Secret with the given `data` map
pub fn create_test_secret(name: &str, data: Value) -> Resource {
    create_test_resource(&ResourceType::new("v1", "Secret"), name, json!({ "data": data }))
}

/// Helper to create a container spec with plain env vars
pub fn create_test_container(name: &str, env: &[(&str, &str)]) -> Value {
    let env: Vec<Value> = env
        .iter()
        .map(|(name, value)| json!({ "name": name, "value": value }))
        .collect();
    json!({ "name": name, "image": format!("{name}:latest"), "env": env })
}

/// Helper to create a test workload of `kind` (apps/v1) with a pod template
pub fn create_test_workload(
    kind: &str,
    name: &str,
    annotations: &[(&str, &str)],
    containers: Vec<Value>,
) -> Resource {
    let mut resource = create_test_resource(
        &ResourceType::new("apps/v1", kind),
        name,
        json!({
            "spec": {
                "template": {
                    "metadata": { "labels": { "app": name } },
                    "spec": { "containers": containers }
                }
            }
        }),
    );
    if !annotations.is_empty() {
        resource.metadata.annotations = Some(
            annotations
                .iter()
                .map(|(key, value)| (key.to_string(), value.to_string()))
                .collect::<BTreeMap<_, _>>(),
        );
    }
    resource
}

pub fn create_test_deployment(name: &str, annotations: &[(&str, &str)], containers: Vec<Value>) -> Resource {
    create_test_workload("Deployment", name, annotations, containers)
}

/// Mock client for `api_version.kind` in the test namespace
pub fn mock_client(api_version: &str, kind: &str) -> MockResourceClient {
    MockResourceClient::new(ResourceType::new(api_version, kind), TEST_NAMESPACE)
}

/// Poll `condition` until it holds, yielding to other tasks in between
pub async fn eventually<F: Fn() -> bool>(condition: F) {
    for _ in 0..500 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}

/// Mock wrapper holding back the first `holds` calls of one operation until released.
///
/// Held calls are released in call order, one per [`GatedClient::release`].
pub struct GatedClient {
    inner: MockResourceClient,
    gated: MockOperation,
    holds: AtomicUsize,
    gate: Semaphore,
    waiting: AtomicUsize,
}

impl GatedClient {
    pub fn new(inner: MockResourceClient, gated: MockOperation, holds: usize) -> Self {
        Self {
            inner,
            gated,
            holds: AtomicUsize::new(holds),
            gate: Semaphore::new(0),
            waiting: AtomicUsize::new(0),
        }
    }

    /// Number of calls currently held
    pub fn waiting(&self) -> usize {
        self.waiting.load(Ordering::SeqCst)
    }

    /// Let the oldest held call proceed
    pub fn release(&self) {
        self.gate.add_permits(1);
    }

    async fn pass(&self, operation: MockOperation) {
        if operation != self.gated {
            return;
        }
        let held = self
            .holds
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |holds| holds.checked_sub(1))
            .is_ok();
        if held {
            self.waiting.fetch_add(1, Ordering::SeqCst);
            self.gate.acquire().await.unwrap().forget();
            self.waiting.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

#[async_trait]
impl ResourceClient for GatedClient {
    fn resource_type(&self) -> &ResourceType {
        self.inner.resource_type()
    }

    async fn list(&self) -> Result<ResourceList, ResourceClientError> {
        self.pass(MockOperation::List).await;
        self.inner.list().await
    }

    async fn get(&self, name: &str) -> Result<Resource, ResourceClientError> {
        self.pass(MockOperation::Get).await;
        self.inner.get(name).await
    }

    async fn create(&self, resource: &Resource) -> Result<Resource, ResourceClientError> {
        self.pass(MockOperation::Create).await;
        self.inner.create(resource).await
    }

    async fn patch(&self, name: &str, patch: ResourcePatch) -> Result<(), ResourceClientError> {
        self.pass(MockOperation::Patch).await;
        self.inner.patch(name, patch).await
    }

    async fn watch(&self, resource_version: Option<&str>) -> Result<WatchStream, ResourceClientError> {
        self.pass(MockOperation::Watch).await;
        self.inner.watch(resource_version).await
    }
}
