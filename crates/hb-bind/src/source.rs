//! Kubernetes objects credentials can be read from

use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{ConfigMap, Secret, Service};
use kube::{Api, Client};
#[cfg(any(test, feature = "mock"))]
use mockall::automock;
use tracing::debug;

use hb_common::{Error, Namespace, Result};

/// Read access to the objects a bind YAML may reference
///
/// Missing objects are reported as not found.
#[cfg_attr(any(test, feature = "mock"), automock)]
#[async_trait]
pub trait CredentialSource: Send + Sync {
    /// Data of a ConfigMap
    async fn config_map(&self, namespace: &Namespace, name: &str)
        -> Result<BTreeMap<String, String>>;

    /// Decoded data of a Secret
    async fn secret(&self, namespace: &Namespace, name: &str) -> Result<BTreeMap<String, String>>;

    /// A Service as a JSON document, for field path queries
    async fn service(&self, namespace: &Namespace, name: &str) -> Result<serde_json::Value>;
}

/// Credential source backed by the Kubernetes API
#[derive(Clone)]
pub struct KubeCredentialSource {
    client: Client,
}

impl KubeCredentialSource {
    /// Create a source using the given client
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl CredentialSource for KubeCredentialSource {
    async fn config_map(
        &self,
        namespace: &Namespace,
        name: &str,
    ) -> Result<BTreeMap<String, String>> {
        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), namespace.as_str());
        let cm = api
            .get(name)
            .await
            .map_err(|e| Error::from(e).context(format!("while getting config map {namespace}/{name}")))?;
        debug!(namespace = %namespace, config_map = %name, "config map read");
        Ok(cm.data.unwrap_or_default())
    }

    async fn secret(&self, namespace: &Namespace, name: &str) -> Result<BTreeMap<String, String>> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace.as_str());
        let secret = api
            .get(name)
            .await
            .map_err(|e| Error::from(e).context(format!("while getting secret {namespace}/{name}")))?;
        debug!(namespace = %namespace, secret = %name, "secret read");

        secret
            .data
            .unwrap_or_default()
            .into_iter()
            .map(|(key, bytes)| {
                String::from_utf8(bytes.0)
                    .map(|value| (key.clone(), value))
                    .map_err(|e| {
                        Error::serialization_for_kind(
                            "secret",
                            format!("key {key} of secret {namespace}/{name} is not valid UTF-8: {e}"),
                        )
                    })
            })
            .collect()
    }

    async fn service(&self, namespace: &Namespace, name: &str) -> Result<serde_json::Value> {
        let api: Api<Service> = Api::namespaced(self.client.clone(), namespace.as_str());
        let svc = api
            .get(name)
            .await
            .map_err(|e| Error::from(e).context(format!("while getting service {namespace}/{name}")))?;
        debug!(namespace = %namespace, service = %name, "service read");
        Ok(serde_json::to_value(svc)?)
    }
}
