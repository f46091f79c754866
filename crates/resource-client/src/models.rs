//! Resource client data model
//!
//! Resources are handled as [`DynamicObject`]s so that one client type can serve
//! config maps, secrets and workloads alike.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ListMeta;
use kube::api::{ApiResource, DynamicObject};
use kube::core::{GroupVersionKind, TypeMeta};
use kube::ResourceExt;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ResourceClientError;

/// A named, versioned unit of cluster state with a free-form payload.
pub type Resource = DynamicObject;

/// The `(apiVersion, kind)` pair identifying a resource type.
///
/// The qualified form is `<apiVersion>.<kind>`, e.g. `v1.ConfigMap` or
/// `apps/v1.Deployment`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceType {
    pub api_version: String,
    pub kind: String,
}

impl ResourceType {
    pub fn new(api_version: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            api_version: api_version.into(),
            kind: kind.into(),
        }
    }

    /// Resource type carried by the object itself, if its type meta is set.
    pub fn of(resource: &Resource) -> Option<Self> {
        resource
            .types
            .as_ref()
            .map(|types| Self::new(types.api_version.clone(), types.kind.clone()))
    }

    /// Group part of the api version (empty for the core group).
    pub fn group(&self) -> &str {
        self.api_version
            .split_once('/')
            .map_or("", |(group, _)| group)
    }

    /// Version part of the api version.
    pub fn version(&self) -> &str {
        self.api_version
            .split_once('/')
            .map_or(self.api_version.as_str(), |(_, version)| version)
    }

    pub fn type_meta(&self) -> TypeMeta {
        TypeMeta {
            api_version: self.api_version.clone(),
            kind: self.kind.clone(),
        }
    }

    /// API resource description used to address this type on the server.
    pub fn api_resource(&self) -> ApiResource {
        ApiResource::from_gvk(&GroupVersionKind::gvk(self.group(), self.version(), &self.kind))
    }

    /// Sets the type meta of `resource` to this type.
    ///
    /// List responses omit `apiVersion`/`kind` on their items; this restores them.
    pub fn attach(&self, mut resource: Resource) -> Resource {
        resource.types = Some(self.type_meta());
        resource
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.api_version, self.kind)
    }
}

impl FromStr for ResourceType {
    type Err = ResourceClientError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.rsplit_once('.') {
            Some((api_version, kind)) if !api_version.is_empty() && !kind.is_empty() => {
                Ok(Self::new(api_version, kind))
            }
            _ => Err(ResourceClientError::InvalidResourceType(s.to_string())),
        }
    }
}

/// `<apiVersion>.<kind>:<name>`, used to identify a resource in logs and maps.
pub fn qualified_name(resource: &Resource) -> String {
    let name = resource.name_any();
    match &resource.types {
        Some(types) => format!("{}.{}:{}", types.api_version, types.kind, name),
        None => format!("<unknown>:{name}"),
    }
}

/// Result of a list call.
#[derive(Debug, Clone, Default)]
pub struct ResourceList {
    pub types: TypeMeta,
    pub metadata: ListMeta,
    pub items: Vec<Resource>,
}

impl ResourceList {
    pub fn resource_version(&self) -> Option<&str> {
        self.metadata.resource_version.as_deref()
    }
}

/// One event of a watch stream.
#[derive(Debug, Clone)]
pub enum WatchEvent {
    Added(Resource),
    Modified(Resource),
    Deleted(Resource),
    /// An error reported inside the stream; the stream may still continue.
    Error(String),
    /// Any event type this client does not act on (e.g. bookmarks).
    Other(String),
}

impl From<kube::api::WatchEvent<DynamicObject>> for WatchEvent {
    fn from(event: kube::api::WatchEvent<DynamicObject>) -> Self {
        match event {
            kube::api::WatchEvent::Added(resource) => Self::Added(resource),
            kube::api::WatchEvent::Modified(resource) => Self::Modified(resource),
            kube::api::WatchEvent::Deleted(resource) => Self::Deleted(resource),
            kube::api::WatchEvent::Bookmark(_) => Self::Other("BOOKMARK".to_string()),
            kube::api::WatchEvent::Error(status) => Self::Error(status.message.clone()),
        }
    }
}

/// JSON patch operation verbs (RFC 6902)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatchOperation {
    Add,
    Remove,
    Replace,
    Copy,
    Move,
    Test,
}

/// One entry of a JSON patch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonPatchOp {
    pub op: PatchOperation,
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<serde_json::Value>,
}

/// A partial update of a resource.
#[derive(Debug, Clone, PartialEq)]
pub enum ResourcePatch {
    /// JSON merge patch (RFC 7386)
    Merge(serde_json::Value),
    /// Kubernetes strategic merge patch: lists with merge keys (containers,
    /// env) are merged by name instead of replaced.
    Strategic(serde_json::Value),
    /// Ordered list of JSON patch operations
    Json(Vec<JsonPatchOp>),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_core_resource_type() {
        let resource_type: ResourceType = "v1.ConfigMap".parse().unwrap();
        assert_eq!(resource_type.api_version, "v1");
        assert_eq!(resource_type.kind, "ConfigMap");
        assert_eq!(resource_type.group(), "");
        assert_eq!(resource_type.version(), "v1");
    }

    #[test]
    fn test_parse_grouped_resource_type() {
        let resource_type: ResourceType = "apps/v1.StatefulSet".parse().unwrap();
        assert_eq!(resource_type.api_version, "apps/v1");
        assert_eq!(resource_type.kind, "StatefulSet");
        assert_eq!(resource_type.group(), "apps");
        assert_eq!(resource_type.to_string(), "apps/v1.StatefulSet");
    }

    #[test]
    fn test_parse_dotted_group() {
        let resource_type: ResourceType = "networking.k8s.io/v1.Ingress".parse().unwrap();
        assert_eq!(resource_type.api_version, "networking.k8s.io/v1");
        assert_eq!(resource_type.kind, "Ingress");
    }

    #[test]
    fn test_parse_invalid_resource_type() {
        assert!("ConfigMap".parse::<ResourceType>().is_err());
        assert!(".ConfigMap".parse::<ResourceType>().is_err());
        assert!("v1.".parse::<ResourceType>().is_err());
    }

    #[test]
    fn test_attach_and_qualified_name() {
        let resource_type = ResourceType::new("apps/v1", "Deployment");
        let mut resource = DynamicObject::new("web", &resource_type.api_resource());
        resource.types = None;
        assert_eq!(qualified_name(&resource), "<unknown>:web");

        let resource = resource_type.attach(resource);
        assert_eq!(ResourceType::of(&resource), Some(resource_type));
        assert_eq!(qualified_name(&resource), "apps/v1.Deployment:web");
    }

    #[test]
    fn test_json_patch_op_serialization() {
        let op = JsonPatchOp {
            op: PatchOperation::Replace,
            path: "/spec/replicas".to_string(),
            from: None,
            value: Some(serde_json::json!(3)),
        };
        assert_eq!(
            serde_json::to_value(&op).unwrap(),
            serde_json::json!({"op": "replace", "path": "/spec/replicas", "value": 3})
        );
    }
}
