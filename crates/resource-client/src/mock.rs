//! Mock ResourceClient for unit testing
//!
//! This module provides an in-memory implementation of [`ResourceClient`] that
//! can be used in unit tests without a running cluster.
//!
//! Watch streams are scripted: every call to `watch()` consumes the next session
//! pushed with [`MockResourceClient::push_watch_session`]. A session ends after
//! its last event, which looks to the caller like the server closing the stream,
//! unless it was pushed with [`MockResourceClient::push_open_watch_session`].
//! Once no sessions remain, `watch()` returns a stream that never yields.

use crate::error::ResourceClientError;
use crate::models::*;
use crate::resource_trait::{ResourceClient, WatchStream};
use futures::{stream, StreamExt};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ListMeta;
use kube::core::TypeMeta;
use kube::ResourceExt;
use serde_json::Value;
use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Operations of the mock that can be made to fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MockOperation {
    List,
    Get,
    Create,
    Patch,
    Watch,
}

struct WatchSession {
    results: Vec<Result<WatchEvent, ResourceClientError>>,
    keep_open: bool,
}

/// Mock ResourceClient for testing
///
/// Clones share the same state, so a test can keep one handle for setup and
/// assertions while the code under test owns another.
#[derive(Clone)]
pub struct MockResourceClient {
    resource_type: ResourceType,
    namespace: String,
    // In-memory storage, keyed by name
    resources: Arc<Mutex<BTreeMap<String, Resource>>>,
    // Last resourceVersion handed out
    resource_version: Arc<Mutex<u64>>,
    patches: Arc<Mutex<Vec<(String, ResourcePatch)>>>,
    watch_sessions: Arc<Mutex<VecDeque<WatchSession>>>,
    watch_versions: Arc<Mutex<Vec<Option<String>>>>,
    failures: Arc<Mutex<HashSet<MockOperation>>>,
    list_calls: Arc<AtomicUsize>,
}

impl MockResourceClient {
    /// Create a new, empty mock client
    pub fn new(resource_type: ResourceType, namespace: impl Into<String>) -> Self {
        Self {
            resource_type,
            namespace: namespace.into(),
            resources: Arc::new(Mutex::new(BTreeMap::new())),
            resource_version: Arc::new(Mutex::new(0)),
            patches: Arc::new(Mutex::new(Vec::new())),
            watch_sessions: Arc::new(Mutex::new(VecDeque::new())),
            watch_versions: Arc::new(Mutex::new(Vec::new())),
            failures: Arc::new(Mutex::new(HashSet::new())),
            list_calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Add or replace a resource in the mock store (for test setup)
    ///
    /// The stored copy gets this client's type, namespace and a fresh
    /// resourceVersion, which is returned.
    pub fn add_resource(&self, resource: Resource) -> String {
        let version = self.next_resource_version();
        let mut resource = self.resource_type.attach(resource);
        resource.metadata.namespace = Some(self.namespace.clone());
        resource.metadata.resource_version = Some(version.clone());
        self.resources.lock().unwrap().insert(resource.name_any(), resource);
        version
    }

    /// Remove a resource from the mock store (for test setup)
    pub fn remove_resource(&self, name: &str) -> Option<Resource> {
        self.resources.lock().unwrap().remove(name)
    }

    /// Current stored copy of a resource
    pub fn resource(&self, name: &str) -> Option<Resource> {
        self.resources.lock().unwrap().get(name).cloned()
    }

    /// Script the events of the next watch session
    pub fn push_watch_session(&self, events: Vec<WatchEvent>) {
        self.push_watch_results(events.into_iter().map(Ok).collect());
    }

    /// Script the next watch session, including transport errors
    pub fn push_watch_results(&self, results: Vec<Result<WatchEvent, ResourceClientError>>) {
        self.watch_sessions.lock().unwrap().push_back(WatchSession {
            results,
            keep_open: false,
        });
    }

    /// Script the next watch session; the stream stays open after its events
    pub fn push_open_watch_session(&self, events: Vec<WatchEvent>) {
        self.watch_sessions.lock().unwrap().push_back(WatchSession {
            results: events.into_iter().map(Ok).collect(),
            keep_open: true,
        });
    }

    /// Make an operation fail until [`Self::recover`] is called
    pub fn fail(&self, operation: MockOperation) {
        self.failures.lock().unwrap().insert(operation);
    }

    pub fn recover(&self, operation: MockOperation) {
        self.failures.lock().unwrap().remove(&operation);
    }

    /// All patch attempts so far, including failed ones
    pub fn patches(&self) -> Vec<(String, ResourcePatch)> {
        self.patches.lock().unwrap().clone()
    }

    /// Number of `list()` calls so far
    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    /// The resourceVersion passed to each `watch()` call so far
    pub fn watch_versions(&self) -> Vec<Option<String>> {
        self.watch_versions.lock().unwrap().clone()
    }

    /// Generate next resourceVersion
    pub fn next_resource_version(&self) -> String {
        let mut version = self.resource_version.lock().unwrap();
        *version += 1;
        version.to_string()
    }

    fn check(&self, operation: MockOperation) -> Result<(), ResourceClientError> {
        if self.failures.lock().unwrap().contains(&operation) {
            return Err(ResourceClientError::Api(format!(
                "injected {operation:?} failure for {}",
                self.resource_type
            )));
        }
        Ok(())
    }

    fn not_found(&self, name: &str) -> ResourceClientError {
        ResourceClientError::NotFound(format!("{} {}/{}", self.resource_type, self.namespace, name))
    }
}

/// Apply a JSON merge patch (RFC 7386) to `target`
pub fn merge_patch(target: &mut Value, patch: &Value) {
    let Value::Object(patch_map) = patch else {
        *target = patch.clone();
        return;
    };
    if !target.is_object() {
        *target = Value::Object(serde_json::Map::new());
    }
    if let Value::Object(target_map) = target {
        for (key, value) in patch_map {
            if value.is_null() {
                target_map.remove(key);
            } else {
                merge_patch(target_map.entry(key.clone()).or_insert(Value::Null), value);
            }
        }
    }
}

#[async_trait::async_trait]
impl ResourceClient for MockResourceClient {
    fn resource_type(&self) -> &ResourceType {
        &self.resource_type
    }

    async fn list(&self) -> Result<ResourceList, ResourceClientError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        self.check(MockOperation::List)?;
        let current_version = self.resource_version.lock().unwrap().to_string();
        // Like the API server, list items carry no type meta
        let items = self
            .resources
            .lock()
            .unwrap()
            .values()
            .cloned()
            .map(|mut item| {
                item.types = None;
                item
            })
            .collect();
        Ok(ResourceList {
            types: TypeMeta {
                api_version: self.resource_type.api_version.clone(),
                kind: format!("{}List", self.resource_type.kind),
            },
            metadata: ListMeta {
                resource_version: Some(current_version),
                ..Default::default()
            },
            items,
        })
    }

    async fn get(&self, name: &str) -> Result<Resource, ResourceClientError> {
        self.check(MockOperation::Get)?;
        self.resource(name).ok_or_else(|| self.not_found(name))
    }

    async fn create(&self, resource: &Resource) -> Result<Resource, ResourceClientError> {
        self.check(MockOperation::Create)?;
        let name = resource.name_any();
        if self.resources.lock().unwrap().contains_key(&name) {
            return Err(ResourceClientError::Api(format!(
                "{} {} already exists",
                self.resource_type, name
            )));
        }
        self.add_resource(resource.clone());
        self.resource(&name).ok_or_else(|| self.not_found(&name))
    }

    async fn patch(&self, name: &str, patch: ResourcePatch) -> Result<(), ResourceClientError> {
        self.patches.lock().unwrap().push((name.to_string(), patch.clone()));
        self.check(MockOperation::Patch)?;
        let existing = self.resource(name).ok_or_else(|| self.not_found(name))?;
        if let ResourcePatch::Merge(document) = patch {
            let mut value = serde_json::to_value(&existing)?;
            merge_patch(&mut value, &document);
            let patched: Resource = serde_json::from_value(value)?;
            self.add_resource(patched);
        }
        Ok(())
    }

    async fn watch(&self, resource_version: Option<&str>) -> Result<WatchStream, ResourceClientError> {
        self.watch_versions
            .lock()
            .unwrap()
            .push(resource_version.map(str::to_string));
        self.check(MockOperation::Watch)?;
        let session = self.watch_sessions.lock().unwrap().pop_front();
        Ok(match session {
            Some(WatchSession { results, keep_open: true }) => {
                stream::iter(results).chain(stream::pending()).boxed()
            }
            Some(WatchSession { results, .. }) => stream::iter(results).boxed(),
            None => stream::pending().boxed(),
        })
    }
}
