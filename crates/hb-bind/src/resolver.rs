//! Credential resolution from rendered bind YAML
//!
//! A bind YAML declares credentials in two ways:
//!
//! ```yaml
//! credentialFrom:
//!   - secretRef:
//!       name: redis-auth
//! credential:
//!   - name: HOST
//!     value: redis.team-a.svc.cluster.local
//!   - name: PORT
//!     valueFrom:
//!       serviceRef:
//!         name: redis
//!         jsonpath: '{.spec.ports[0].port}'
//! ```
//!
//! Merge policy:
//! 1. `credentialFrom` sources are read in order; later sources overwrite
//!    keys of earlier ones.
//! 2. `credential` entries are collected; a name declared twice is a
//!    conflict and nothing is returned.
//! 3. `credential` entries overwrite keys coming from `credentialFrom`.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
#[cfg(any(test, feature = "mock"))]
use mockall::automock;
use serde::Deserialize;
use tracing::debug;

use hb_common::{Error, InstanceCredentials, Namespace, Result};

use crate::jsonpath;
use crate::renderer::RenderedBindYaml;
use crate::source::CredentialSource;

/// Credentials produced from a rendered bind YAML
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolveOutput {
    pub credentials: InstanceCredentials,
}

/// Turns rendered bind YAML into a flat credential map
#[cfg_attr(any(test, feature = "mock"), automock)]
#[async_trait]
pub trait BindTemplateResolver: Send + Sync {
    /// Resolve every credential declared in `rendered` within `namespace`
    async fn resolve(&self, rendered: &RenderedBindYaml, namespace: &Namespace)
        -> Result<ResolveOutput>;
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BindYaml {
    #[serde(default)]
    credential: Vec<CredentialVar>,
    #[serde(default)]
    credential_from: Vec<CredentialFromSource>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CredentialVar {
    name: String,
    #[serde(default)]
    value: Option<String>,
    #[serde(default)]
    value_from: Option<CredentialVarSource>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CredentialVarSource {
    #[serde(default)]
    config_map_key_ref: Option<KeySelector>,
    #[serde(default)]
    secret_key_ref: Option<KeySelector>,
    #[serde(default)]
    service_ref: Option<JsonPathSelector>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CredentialFromSource {
    #[serde(default)]
    config_map_ref: Option<NameSelector>,
    #[serde(default)]
    secret_ref: Option<NameSelector>,
}

#[derive(Debug, Deserialize)]
struct NameSelector {
    name: String,
}

#[derive(Debug, Deserialize)]
struct KeySelector {
    name: String,
    key: String,
}

#[derive(Debug, Deserialize)]
struct JsonPathSelector {
    name: String,
    jsonpath: String,
}

/// Resolver reading referenced objects through a [`CredentialSource`]
#[derive(Clone)]
pub struct Resolver {
    source: Arc<dyn CredentialSource>,
}

impl Resolver {
    /// Create a resolver over the given source
    pub fn new(source: Arc<dyn CredentialSource>) -> Self {
        Self { source }
    }

    async fn resolve_from(
        &self,
        from: &CredentialFromSource,
        namespace: &Namespace,
    ) -> Result<BTreeMap<String, String>> {
        match (&from.config_map_ref, &from.secret_ref) {
            (Some(cm), None) => self.source.config_map(namespace, &cm.name).await,
            (None, Some(secret)) => self.source.secret(namespace, &secret.name).await,
            _ => Err(Error::validation_for_field(
                "credentialFrom",
                "each entry needs exactly one of configMapRef or secretRef",
            )),
        }
    }

    async fn resolve_var(&self, var: &CredentialVar, namespace: &Namespace) -> Result<String> {
        let source = match (&var.value, &var.value_from) {
            (Some(value), None) => return Ok(value.clone()),
            (None, Some(source)) => source,
            (None, None) => return Ok(String::new()),
            (Some(_), Some(_)) => {
                return Err(Error::validation_for_field(
                    format!("credential.{}", var.name),
                    "value and valueFrom are mutually exclusive",
                ))
            }
        };

        match (
            &source.config_map_key_ref,
            &source.secret_key_ref,
            &source.service_ref,
        ) {
            (Some(sel), None, None) => {
                let data = self.source.config_map(namespace, &sel.name).await?;
                pick(data, "config map", &sel.name, &sel.key)
            }
            (None, Some(sel), None) => {
                let data = self.source.secret(namespace, &sel.name).await?;
                pick(data, "secret", &sel.name, &sel.key)
            }
            (None, None, Some(sel)) => {
                let svc = self.source.service(namespace, &sel.name).await?;
                jsonpath::query(&svc, &sel.jsonpath)
                    .map_err(|e| e.context(format!("while reading service {}", sel.name)))
            }
            _ => Err(Error::validation_for_field(
                format!("credential.{}.valueFrom", var.name),
                "needs exactly one of configMapKeyRef, secretKeyRef or serviceRef",
            )),
        }
    }
}

fn pick(
    mut data: BTreeMap<String, String>,
    kind: &str,
    name: &str,
    key: &str,
) -> Result<String> {
    data.remove(key)
        .ok_or_else(|| Error::not_found(format!("{kind} {name} key"), key))
}

#[async_trait]
impl BindTemplateResolver for Resolver {
    async fn resolve(
        &self,
        rendered: &RenderedBindYaml,
        namespace: &Namespace,
    ) -> Result<ResolveOutput> {
        let bind: BindYaml = match rendered.as_str().trim() {
            "" => BindYaml::default(),
            yaml => serde_yaml::from_str(yaml)
                .map_err(|e| Error::from(e).context("while unmarshaling bind yaml"))?,
        };

        let mut credentials = InstanceCredentials::new();
        for from in &bind.credential_from {
            credentials.extend(
                self.resolve_from(from, namespace)
                    .await
                    .map_err(|e| e.context("while resolving credentialFrom"))?,
            );
        }

        let mut declared = InstanceCredentials::new();
        for var in &bind.credential {
            if declared.contains_key(&var.name) {
                return Err(Error::conflict(format!(
                    "credential name '{}' is declared more than once",
                    var.name
                )));
            }
            let value = self
                .resolve_var(var, namespace)
                .await
                .map_err(|e| e.context(format!("while resolving credential {}", var.name)))?;
            declared.insert(var.name.clone(), value);
        }

        credentials.extend(declared);
        debug!(namespace = %namespace, keys = credentials.len(), "bind credentials resolved");
        Ok(ResolveOutput { credentials })
    }
}
