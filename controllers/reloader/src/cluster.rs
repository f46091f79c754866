//! Cluster connectivity.
//!
//! Resolves the API server, TLS material and credentials either from explicit
//! command line options or from the environment the process runs in.

use crate::config::ClusterArgs;
use crate::error::ControllerError;
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::Client;
use serde_json::{json, Map, Value};
use std::path::Path;
use tracing::info;

const CONTEXT_NAME: &str = "reloader";

/// Creates a Kubernetes client from the connectivity options.
///
/// With an explicit `--server` an in-memory kubeconfig is assembled from the
/// given options; otherwise the configuration is inferred (in-cluster service
/// account first, then the local kubeconfig).
pub async fn create_client(args: &ClusterArgs) -> Result<Client, ControllerError> {
    let config = match &args.server {
        Some(server) => {
            info!("Using explicit API server {}", server);
            let kubeconfig = explicit_kubeconfig(server, args)?;
            kube::Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                .await
                .map_err(|e| ControllerError::Kubeconfig(e.to_string()))?
        }
        None => kube::Config::infer()
            .await
            .map_err(|e| ControllerError::Kubeconfig(format!("Unknown Kubernetes API server: {e}")))?,
    };
    Ok(Client::try_from(config)?)
}

fn path_string(path: &Path) -> Value {
    Value::String(path.display().to_string())
}

/// Builds a single-context kubeconfig for the explicit connectivity options.
///
/// Credentials are picked in order: bearer token, basic auth, client certificate.
pub fn explicit_kubeconfig(server: &str, args: &ClusterArgs) -> Result<Kubeconfig, ControllerError> {
    let mut cluster = Map::new();
    cluster.insert("server".to_string(), Value::String(server.to_string()));
    if let Some(ca) = &args.certificate_authority {
        cluster.insert("certificate-authority".to_string(), path_string(ca));
    }
    if args.insecure_skip_tls_verify {
        cluster.insert("insecure-skip-tls-verify".to_string(), Value::Bool(true));
    }

    let mut user = Map::new();
    match (&args.token, &args.username, &args.password, &args.client_certificate, &args.client_key) {
        (Some(token), _, _, _, _) => {
            user.insert("token".to_string(), Value::String(token.clone()));
        }
        (None, Some(username), Some(password), _, _) => {
            user.insert("username".to_string(), Value::String(username.clone()));
            user.insert("password".to_string(), Value::String(password.clone()));
        }
        (None, _, _, Some(certificate), Some(key)) => {
            user.insert("client-certificate".to_string(), path_string(certificate));
            user.insert("client-key".to_string(), path_string(key));
        }
        _ => {}
    }

    let document = json!({
        "apiVersion": "v1",
        "kind": "Config",
        "clusters": [{ "name": CONTEXT_NAME, "cluster": cluster }],
        "users": [{ "name": CONTEXT_NAME, "user": user }],
        "contexts": [{ "name": CONTEXT_NAME, "context": { "cluster": CONTEXT_NAME, "user": CONTEXT_NAME } }],
        "current-context": CONTEXT_NAME,
    });
    serde_json::from_value(document).map_err(|e| ControllerError::Kubeconfig(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn named_cluster(kubeconfig: &Kubeconfig) -> &kube::config::Cluster {
        kubeconfig.clusters[0].cluster.as_ref().unwrap()
    }

    fn named_user(kubeconfig: &Kubeconfig) -> &kube::config::AuthInfo {
        kubeconfig.auth_infos[0].auth_info.as_ref().unwrap()
    }

    #[test]
    fn test_token_auth() {
        let args = ClusterArgs {
            token: Some("secret-token".to_string()),
            certificate_authority: Some(PathBuf::from("/etc/ca.crt")),
            ..Default::default()
        };
        let kubeconfig = explicit_kubeconfig("https://k8s:6443", &args).unwrap();

        assert_eq!(kubeconfig.current_context.as_deref(), Some(CONTEXT_NAME));
        let cluster = named_cluster(&kubeconfig);
        assert_eq!(cluster.server.as_deref(), Some("https://k8s:6443"));
        assert_eq!(cluster.certificate_authority.as_deref(), Some("/etc/ca.crt"));
        assert!(named_user(&kubeconfig).token.is_some());
    }

    #[test]
    fn test_basic_auth() {
        let args = ClusterArgs {
            username: Some("admin".to_string()),
            password: Some("hunter2".to_string()),
            insecure_skip_tls_verify: true,
            ..Default::default()
        };
        let kubeconfig = explicit_kubeconfig("https://k8s:6443", &args).unwrap();

        assert_eq!(named_cluster(&kubeconfig).insecure_skip_tls_verify, Some(true));
        let user = named_user(&kubeconfig);
        assert_eq!(user.username.as_deref(), Some("admin"));
        assert!(user.password.is_some());
        assert!(user.token.is_none());
    }

    #[test]
    fn test_client_certificate_auth() {
        let args = ClusterArgs {
            client_certificate: Some(PathBuf::from("/tls/client.crt")),
            client_key: Some(PathBuf::from("/tls/client.key")),
            ..Default::default()
        };
        let kubeconfig = explicit_kubeconfig("https://k8s:6443", &args).unwrap();

        let user = named_user(&kubeconfig);
        assert_eq!(user.client_certificate.as_deref(), Some("/tls/client.crt"));
        assert_eq!(user.client_key.as_deref(), Some("/tls/client.key"));
    }
}
