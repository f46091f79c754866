//! Workload patches that force a rollout.
//!
//! Every config resource a workload depends on is mirrored into an environment
//! variable of one of its containers, holding the content hash. Changing the
//! value changes the pod template, which makes the workload controller roll.

use crate::config::{workload_types, ENV_PREFIX};
use crate::error::ControllerError;
use crate::hash::resource_hash;
use k8s_openapi::api::core::v1::{Container, EnvVar, PodTemplateSpec};
use kube::ResourceExt;
use regex::Regex;
use resource_client::{qualified_name, Resource, ResourcePatch, ResourceType};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::LazyLock;

static INVALID_ENV_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^A-Z0-9]+").expect("hardcoded regex pattern is valid"));

/// Name of the variable carrying the hash of config resource `kind`/`name`.
pub fn env_var_name(prefix: &str, kind: &str, name: &str) -> String {
    INVALID_ENV_CHARS
        .replace_all(&format!("{prefix}_{kind}_{name}").to_uppercase(), "_")
        .into_owned()
}

fn declares_env(container: &Container, name: &str) -> bool {
    container
        .env
        .as_ref()
        .is_some_and(|env| env.iter().any(|var| var.name == name))
}

/// Builds the patch updating `target` for all `triggers`, in trigger order.
///
/// Each variable goes to the container already declaring it, or to the first
/// container. Init containers are never patched. A later trigger for the same
/// config resource overrides an earlier one.
pub fn build_patch(target: &Resource, triggers: &[Resource]) -> Result<ResourcePatch, ControllerError> {
    let target_name = qualified_name(target);
    if !ResourceType::of(target).is_some_and(|t| workload_types().contains(&t)) {
        return Err(ControllerError::UnsupportedTarget(target_name));
    }

    let template: PodTemplateSpec = serde_json::from_value(target.data["spec"]["template"].clone())
        .map_err(|e| ControllerError::InvalidTarget(target_name.clone(), e.to_string()))?;
    let containers = template.spec.map(|spec| spec.containers).unwrap_or_default();
    if containers.is_empty() {
        return Err(ControllerError::InvalidTarget(
            target_name,
            "pod template has no containers".to_string(),
        ));
    }

    // Container index -> variables to set
    let mut env_by_container: BTreeMap<usize, Vec<EnvVar>> = BTreeMap::new();
    for trigger in triggers {
        let kind = ResourceType::of(trigger).map(|t| t.kind).unwrap_or_default();
        let name = env_var_name(ENV_PREFIX, &kind, &trigger.name_any());
        let value = resource_hash(trigger);

        let index = containers
            .iter()
            .position(|container| declares_env(container, &name))
            .unwrap_or(0);
        let env = env_by_container.entry(index).or_default();
        match env.iter_mut().find(|var| var.name == name) {
            Some(var) => var.value = Some(value),
            None => env.push(EnvVar {
                name,
                value: Some(value),
                ..Default::default()
            }),
        }
    }

    let patched: Vec<Container> = env_by_container
        .into_iter()
        .map(|(index, env)| Container {
            name: containers[index].name.clone(),
            env: Some(env),
            ..Default::default()
        })
        .collect();

    // Strategic merge keys containers and env by name, so other entries stay
    Ok(ResourcePatch::Strategic(json!({
        "spec": { "template": { "spec": { "containers": patched } } }
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{
        create_test_config_map, create_test_container, create_test_deployment, create_test_secret,
        create_test_workload,
    };
    use serde_json::Value;

    fn patched_containers(patch: &ResourcePatch) -> Value {
        match patch {
            ResourcePatch::Strategic(document) => document["spec"]["template"]["spec"]["containers"].clone(),
            other => panic!("unexpected patch {other:?}"),
        }
    }

    #[test]
    fn test_env_var_name_plain() {
        assert_eq!(env_var_name("prefix", "type", "name"), "PREFIX_TYPE_NAME");
    }

    #[test]
    fn test_env_var_name_collapses_invalid_runs() {
        assert_eq!(env_var_name("prefix", "type?/", "foo:~"), "PREFIX_TYPE_FOO_");
    }

    #[test]
    fn test_env_var_name_with_default_prefix() {
        assert_eq!(
            env_var_name(ENV_PREFIX, "ConfigMap", "app-config"),
            "_RELOADER_CONFIGMAP_APP_CONFIG"
        );
    }

    #[test]
    fn test_patch_goes_to_first_container() {
        let target = create_test_deployment(
            "web",
            &[],
            vec![
                create_test_container("main", &[("LOG_LEVEL", "info")]),
                create_test_container("sidecar", &[]),
            ],
        );
        let trigger = create_test_config_map("app-config", json!({"a": "1"}));

        let patch = build_patch(&target, &[trigger.clone()]).unwrap();
        assert_eq!(
            patched_containers(&patch),
            json!([{
                "name": "main",
                "env": [{ "name": "_RELOADER_CONFIGMAP_APP_CONFIG", "value": resource_hash(&trigger) }]
            }])
        );
    }

    #[test]
    fn test_patch_goes_to_container_declaring_the_variable() {
        let target = create_test_deployment(
            "web",
            &[],
            vec![
                create_test_container("main", &[]),
                create_test_container("sidecar", &[("_RELOADER_SECRET_CREDENTIALS", "old")]),
            ],
        );
        let config = create_test_config_map("app-config", json!({}));
        let secret = create_test_secret("credentials", json!({"password": "aHVudGVyMg=="}));

        let patch = build_patch(&target, &[config, secret.clone()]).unwrap();
        let containers = patched_containers(&patch);
        assert_eq!(containers.as_array().unwrap().len(), 2);
        assert_eq!(containers[0]["name"], "main");
        assert_eq!(containers[0]["env"][0]["name"], "_RELOADER_CONFIGMAP_APP_CONFIG");
        assert_eq!(containers[1]["name"], "sidecar");
        assert_eq!(
            containers[1]["env"],
            json!([{ "name": "_RELOADER_SECRET_CREDENTIALS", "value": resource_hash(&secret) }])
        );
    }

    #[test]
    fn test_init_containers_are_ignored() {
        let mut target = create_test_deployment("web", &[], vec![create_test_container("main", &[])]);
        target.data["spec"]["template"]["spec"]["initContainers"] =
            json!([create_test_container("init", &[("_RELOADER_CONFIGMAP_APP_CONFIG", "old")])]);

        let patch = build_patch(&target, &[create_test_config_map("app-config", json!({}))]).unwrap();
        let containers = patched_containers(&patch);
        assert_eq!(containers.as_array().unwrap().len(), 1);
        assert_eq!(containers[0]["name"], "main");
    }

    #[test]
    fn test_later_trigger_wins() {
        let target = create_test_deployment("web", &[], vec![create_test_container("main", &[])]);
        let first = create_test_config_map("app-config", json!({"a": "1"}));
        let second = create_test_config_map("app-config", json!({"a": "2"}));

        let patch = build_patch(&target, &[first, second.clone()]).unwrap();
        assert_eq!(
            patched_containers(&patch)[0]["env"],
            json!([{ "name": "_RELOADER_CONFIGMAP_APP_CONFIG", "value": resource_hash(&second) }])
        );
    }

    #[test]
    fn test_other_workload_kinds() {
        for kind in ["DaemonSet", "StatefulSet"] {
            let target = create_test_workload(kind, "agent", &[], vec![create_test_container("main", &[])]);
            assert!(build_patch(&target, &[create_test_config_map("cfg", json!({}))]).is_ok());
        }
    }

    #[test]
    fn test_unsupported_target() {
        let target = create_test_workload("ReplicaSet", "web", &[], vec![create_test_container("main", &[])]);
        assert!(matches!(
            build_patch(&target, &[create_test_config_map("cfg", json!({}))]),
            Err(ControllerError::UnsupportedTarget(_))
        ));
    }

    #[test]
    fn test_target_without_containers() {
        let target = create_test_deployment("web", &[], vec![]);
        assert!(matches!(
            build_patch(&target, &[create_test_config_map("cfg", json!({}))]),
            Err(ControllerError::InvalidTarget(_, _))
        ));
    }
}
