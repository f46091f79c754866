//! Operator-facing configuration.
//!
//! All options can be given on the command line or through the environment,
//! so the controller can be configured from a Deployment manifest alone.

use crate::error::ControllerError;
use clap::{Args, Parser};
use resource_client::ResourceType;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

/// Prefix of the environment variables injected into workload containers
pub const ENV_PREFIX: &str = "_RELOADER_";

pub const CONFIGMAP_RELOADER_ANNOTATION: &str = "reloader.k8s.collaborne.com/configmap";
pub const SECRET_RELOADER_ANNOTATION: &str = "reloader.k8s.collaborne.com/secret";
pub const CONFIGMAP_LEGACY_RELOADER_ANNOTATION: &str = "configmap.reloader.stakater.com/reload";
pub const SECRET_LEGACY_RELOADER_ANNOTATION: &str = "secret.reloader.stakater.com/reload";

/// Config resource type -> annotations declaring a dependency on it, in lookup order
pub type DependencyTable = BTreeMap<ResourceType, Vec<String>>;

/// The dependency annotations understood on workloads
pub fn dependency_annotations() -> DependencyTable {
    BTreeMap::from([
        (
            ResourceType::new("v1", "ConfigMap"),
            vec![
                CONFIGMAP_RELOADER_ANNOTATION.to_string(),
                CONFIGMAP_LEGACY_RELOADER_ANNOTATION.to_string(),
            ],
        ),
        (
            ResourceType::new("v1", "Secret"),
            vec![
                SECRET_RELOADER_ANNOTATION.to_string(),
                SECRET_LEGACY_RELOADER_ANNOTATION.to_string(),
            ],
        ),
    ])
}

/// Workload types that can be rolled
pub fn workload_types() -> Vec<ResourceType> {
    vec![
        ResourceType::new("apps/v1", "Deployment"),
        ResourceType::new("apps/v1", "DaemonSet"),
        ResourceType::new("apps/v1", "StatefulSet"),
    ]
}

/// Command line and environment configuration
#[derive(Debug, Clone, Parser)]
#[command(
    name = "reloader",
    version,
    about = "Rolls workloads when the config maps or secrets they depend on change"
)]
pub struct Config {
    /// The namespace to watch
    #[arg(long, env = "WATCH_NAMESPACE")]
    pub namespace: String,

    /// The configmap under which to store known content hashes
    #[arg(long = "configmap", env = "RELOADER_CONFIGMAP")]
    pub hash_store_configmap: String,

    /// Period in milliseconds to wait for additional changes before updating a target resource
    #[arg(long, env = "RELOADER_COALESCE_PERIOD", default_value_t = 5000)]
    pub coalesce_period: u64,

    /// Enabled config resource types (empty to enable all, can be repeated)
    #[arg(long = "resource-type")]
    pub resource_types: Vec<String>,

    /// Config resource types to ignore (can be repeated)
    #[arg(long = "ignored-config-resource-types")]
    pub ignored_config_resource_types: Vec<String>,

    /// Port of the metrics and health endpoint
    #[arg(long, env = "PORT", default_value_t = 8080)]
    pub port: u16,

    #[command(flatten)]
    pub cluster: ClusterArgs,
}

/// Explicit cluster connectivity, mostly for local development
#[derive(Debug, Clone, Default, Args)]
pub struct ClusterArgs {
    /// The address and port of the Kubernetes API server
    #[arg(short = 's', long)]
    pub server: Option<String>,

    /// Path to a cert. file for the certificate authority
    #[arg(long = "certificate-authority", visible_alias = "cacert")]
    pub certificate_authority: Option<PathBuf>,

    /// Path to a client certificate file for TLS
    #[arg(long = "client-certificate", visible_alias = "cert")]
    pub client_certificate: Option<PathBuf>,

    /// Path to a client key file for TLS
    #[arg(long = "client-key", visible_alias = "key")]
    pub client_key: Option<PathBuf>,

    /// If true, the server's certificate will not be checked for validity
    #[arg(long)]
    pub insecure_skip_tls_verify: bool,

    /// Bearer token for authentication to the API server
    #[arg(long)]
    pub token: Option<String>,

    /// Username for basic authentication to the API server
    #[arg(long)]
    pub username: Option<String>,

    /// Password for basic authentication to the API server
    #[arg(long)]
    pub password: Option<String>,
}

impl Config {
    pub fn coalesce_period(&self) -> Duration {
        Duration::from_millis(self.coalesce_period)
    }

    /// Config resource types that get a watch loop.
    ///
    /// A type is monitored when it has dependency annotations, is enabled
    /// (or no types are explicitly enabled) and is not ignored.
    pub fn monitored_config_types(&self, table: &DependencyTable) -> Result<Vec<ResourceType>, ControllerError> {
        let enabled = parse_resource_types(&self.resource_types)?;
        let ignored = parse_resource_types(&self.ignored_config_resource_types)?;
        Ok(table
            .keys()
            .filter(|resource_type| enabled.is_empty() || enabled.contains(resource_type))
            .filter(|resource_type| !ignored.contains(resource_type))
            .cloned()
            .collect())
    }
}

fn parse_resource_types(values: &[String]) -> Result<Vec<ResourceType>, ControllerError> {
    values
        .iter()
        .map(|value| {
            value
                .parse::<ResourceType>()
                .map_err(|e| ControllerError::InvalidConfig(e.to_string()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Config {
        Config::try_parse_from(
            ["reloader", "--namespace", "apps", "--configmap", "reloader-hashes"]
                .iter()
                .chain(args.iter()),
        )
        .unwrap()
    }

    #[test]
    fn test_defaults() {
        let config = parse(&[]);
        assert_eq!(config.namespace, "apps");
        assert_eq!(config.hash_store_configmap, "reloader-hashes");
        assert_eq!(config.coalesce_period(), Duration::from_millis(5000));
        assert!(config.cluster.server.is_none());
    }

    #[test]
    fn test_all_config_types_monitored_by_default() {
        let config = parse(&[]);
        let monitored = config.monitored_config_types(&dependency_annotations()).unwrap();
        assert_eq!(
            monitored,
            vec![ResourceType::new("v1", "ConfigMap"), ResourceType::new("v1", "Secret")]
        );
    }

    #[test]
    fn test_ignored_config_types() {
        let config = parse(&["--ignored-config-resource-types", "v1.Secret"]);
        let monitored = config.monitored_config_types(&dependency_annotations()).unwrap();
        assert_eq!(monitored, vec![ResourceType::new("v1", "ConfigMap")]);
    }

    #[test]
    fn test_enabled_config_types() {
        let config = parse(&["--resource-type", "v1.Secret", "--resource-type", "apps/v1.Deployment"]);
        let monitored = config.monitored_config_types(&dependency_annotations()).unwrap();
        assert_eq!(monitored, vec![ResourceType::new("v1", "Secret")]);
    }

    #[test]
    fn test_invalid_config_type_is_rejected() {
        let config = parse(&["--ignored-config-resource-types", "Secret"]);
        assert!(matches!(
            config.monitored_config_types(&dependency_annotations()),
            Err(ControllerError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_connectivity_aliases() {
        let config = parse(&["-s", "https://k8s:6443", "--cacert", "/ca.crt", "--token", "abc"]);
        assert_eq!(config.cluster.server.as_deref(), Some("https://k8s:6443"));
        assert_eq!(config.cluster.certificate_authority, Some(PathBuf::from("/ca.crt")));
        assert_eq!(config.cluster.token.as_deref(), Some("abc"));
    }
}
