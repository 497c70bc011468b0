//! Test helpers for lifecycle tests
//!
//! Provides a broker wired to the in-memory driver, a fake chart installer
//! and a static credential source.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use tokio::sync::Notify;

use hb_bind::{CredentialSource, Resolver};
use hb_broker::{
    BindRequest, Broker, BrokerConfig, ChartInstaller, Context, DeprovisionRequest, LastOperationRequest,
    LastOperationResponse, OsbContext, ProvisionRequest, TaskDispatcher,
};
use hb_common::{
    Bundle, BundlePlan, Chart, ChartMetadata, ChartRef, ChartTemplate, ChartValues, Error,
    Namespace, OperationId, Release, ReleaseInfo, ReleaseName, Result,
};
use hb_storage::Storage;

// =============================================================================
// Catalog fixtures
// =============================================================================

/// OSB service ID of the redis bundle
pub const REDIS_SERVICE_ID: &str = "svc-redis";

/// OSB plan ID of the redis micro plan
pub const MICRO_PLAN_ID: &str = "plan-micro";

/// Namespace every test instance is provisioned into
pub const TEST_NAMESPACE: &str = "team-a";

const BIND_TEMPLATE: &str = r#"credential:
  - name: HOST
    value: {{ .Release.Name }}.{{ .Release.Namespace }}.svc.cluster.local
  - name: PORT
    value: {{ .Values.port | quote }}
  - name: PASSWORD
    valueFrom:
      secretKeyRef:
        name: {{ .Release.Name }}-auth
        key: password
"#;

fn object(v: serde_json::Value) -> ChartValues {
    v.as_object().cloned().unwrap_or_default()
}

/// A redis bundle with a single `micro` plan
pub fn redis_bundle(bindable: bool) -> Bundle {
    let plan = BundlePlan {
        id: MICRO_PLAN_ID.into(),
        name: "micro".to_string(),
        chart_ref: ChartRef {
            name: "redis".to_string(),
            version: "0.0.1".to_string(),
        },
        chart_values: object(json!({"persistence": {"enabled": false}})),
        bind_template: Some(BIND_TEMPLATE.to_string()),
        bindable: None,
    };
    Bundle {
        id: REDIS_SERVICE_ID.into(),
        name: "redis".to_string(),
        version: "0.0.1".to_string(),
        description: "in-memory key-value store".to_string(),
        bindable,
        provision_only_once: false,
        repository_url: "https://addons.example.com/index.yaml".to_string(),
        plans: BTreeMap::from([(MICRO_PLAN_ID.into(), plan)]),
    }
}

/// The chart the redis bundle points at
pub fn redis_chart() -> Chart {
    Chart {
        metadata: ChartMetadata {
            name: "redis".to_string(),
            version: "0.0.1".to_string(),
            description: Some("in-memory store".to_string()),
            engine: None,
        },
        values: object(json!({"port": 6379})),
        templates: vec![ChartTemplate {
            name: "templates/deployment.yaml".to_string(),
            data: "kind: Deployment\n".to_string(),
        }],
    }
}

// =============================================================================
// Collaborator fakes
// =============================================================================

/// Chart installer recording what it was asked to do
#[derive(Default)]
pub struct FakeInstaller {
    /// Releases installed, in order
    pub installs: Mutex<Vec<(ReleaseName, Namespace, ChartValues)>>,
    /// Releases deleted, in order
    pub deletes: Mutex<Vec<ReleaseName>>,
    /// When set, installs wait for a notification
    pub gate: Option<Arc<Notify>>,
    /// When set, installs fail with this message
    pub install_error: Option<String>,
    /// Number of installs that fail before installs start succeeding
    pub failing_installs: AtomicUsize,
    /// Time each install takes
    pub delay: Duration,
}

impl FakeInstaller {
    /// Number of installs started
    pub fn install_count(&self) -> usize {
        self.installs.lock().unwrap().len()
    }
}

#[async_trait]
impl ChartInstaller for FakeInstaller {
    async fn install(
        &self,
        chart: &Chart,
        values: ChartValues,
        release_name: &ReleaseName,
        namespace: &Namespace,
    ) -> Result<Release> {
        self.installs.lock().unwrap().push((
            release_name.clone(),
            namespace.clone(),
            values.clone(),
        ));
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if let Some(message) = &self.install_error {
            return Err(Error::chart(release_name.as_str(), message.clone()));
        }
        let failing = self
            .failing_installs
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if failing.is_ok() {
            return Err(Error::chart(release_name.as_str(), "pods never became ready"));
        }

        Ok(Release {
            name: release_name.clone(),
            namespace: namespace.clone(),
            revision: 1,
            chart: Some(chart.clone()),
            info: Some(ReleaseInfo {
                last_deployed: Utc::now(),
                status: "deployed".to_string(),
            }),
            config: values,
        })
    }

    async fn delete(&self, release_name: &ReleaseName) -> Result<()> {
        self.deletes.lock().unwrap().push(release_name.clone());
        Ok(())
    }
}

/// Credential source serving fixed secrets
#[derive(Default)]
pub struct StaticCredentialSource {
    secrets: BTreeMap<String, BTreeMap<String, String>>,
}

impl StaticCredentialSource {
    /// Add a secret with the given entries
    pub fn with_secret(mut self, name: &str, entries: &[(&str, &str)]) -> Self {
        self.secrets.insert(
            name.to_string(),
            entries
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        );
        self
    }
}

#[async_trait]
impl CredentialSource for StaticCredentialSource {
    async fn config_map(
        &self,
        _namespace: &Namespace,
        name: &str,
    ) -> Result<BTreeMap<String, String>> {
        Err(Error::not_found("configmap", name))
    }

    async fn secret(&self, _namespace: &Namespace, name: &str) -> Result<BTreeMap<String, String>> {
        self.secrets
            .get(name)
            .cloned()
            .ok_or_else(|| Error::not_found("secret", name))
    }

    async fn service(&self, _namespace: &Namespace, name: &str) -> Result<serde_json::Value> {
        Err(Error::not_found("service", name))
    }
}

// =============================================================================
// Broker harness
// =============================================================================

/// A broker plus handles to inspect what it did
pub struct TestBroker {
    pub broker: Arc<Broker>,
    pub storage: Storage,
    pub installer: Arc<FakeInstaller>,
    pub dispatched: Arc<Mutex<Vec<OperationId>>>,
}

impl TestBroker {
    /// Broker over a catalog holding the redis bundle
    pub fn new(installer: FakeInstaller, bindable: bool) -> Self {
        let (storage, bundles, charts) = Storage::in_memory();
        bundles.upsert(redis_bundle(bindable));
        charts.upsert(redis_chart());

        let installer = Arc::new(installer);
        let source = StaticCredentialSource::default()
            .with_secret("hb-redis-micro-i-1-auth", &[("password", "s3cr3t")]);
        let ctx = Context::builder(
            storage.clone(),
            installer.clone(),
            Arc::new(Resolver::new(Arc::new(source))),
        )
        .build();

        let dispatched = Arc::new(Mutex::new(Vec::new()));
        let seen = dispatched.clone();
        let config = BrokerConfig {
            shutdown_timeout: Duration::from_secs(5),
            ..Default::default()
        };
        let dispatcher = config.dispatcher().with_hook(Arc::new(move |id: &OperationId| {
            seen.lock().unwrap().push(id.clone());
        }));

        Self {
            broker: Arc::new(Broker::new(Arc::new(ctx), dispatcher, config)),
            storage,
            installer,
            dispatched,
        }
    }

    /// Number of times background work was dispatched
    pub fn dispatch_count(&self) -> usize {
        self.dispatched.lock().unwrap().len()
    }

    /// Dispatcher of the broker under test
    pub fn dispatcher(&self) -> &TaskDispatcher {
        self.broker.dispatcher()
    }

    /// Poll last operation until it leaves `in progress`
    pub async fn wait_for_terminal(
        &self,
        instance_id: &str,
        operation_id: &OperationId,
    ) -> LastOperationResponse {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            let resp = self
                .broker
                .last_operation(
                    &osb_context(),
                    LastOperationRequest {
                        instance_id: instance_id.into(),
                        operation_key: Some(operation_id.clone()),
                    },
                )
                .await
                .unwrap();
            if resp.state.is_terminal() {
                return resp;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "operation {operation_id} still in progress"
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

// =============================================================================
// Requests
// =============================================================================

/// Headers every platform sends
pub fn osb_context() -> OsbContext {
    OsbContext {
        api_version: "2.13".to_string(),
        originating_identity: None,
    }
}

/// Provision `instance_id` into the test namespace
pub fn provision_request(instance_id: &str, params: serde_json::Value) -> ProvisionRequest {
    ProvisionRequest {
        instance_id: instance_id.into(),
        accepts_incomplete: true,
        service_id: REDIS_SERVICE_ID.into(),
        plan_id: MICRO_PLAN_ID.into(),
        parameters: object(params),
        context: object(json!({"platform": "kubernetes", "namespace": TEST_NAMESPACE})),
    }
}

/// Bind `binding_id` to `instance_id`
pub fn bind_request(instance_id: &str, binding_id: &str) -> BindRequest {
    BindRequest {
        instance_id: instance_id.into(),
        binding_id: binding_id.to_string(),
        service_id: REDIS_SERVICE_ID.into(),
        plan_id: MICRO_PLAN_ID.into(),
        parameters: None,
    }
}

/// Deprovision `instance_id`
pub fn deprovision_request(instance_id: &str) -> DeprovisionRequest {
    DeprovisionRequest {
        instance_id: instance_id.into(),
        service_id: REDIS_SERVICE_ID.into(),
        plan_id: MICRO_PLAN_ID.into(),
        accepts_incomplete: true,
    }
}
