//! Binding: hands out the credentials stored when the instance was provisioned

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{info, instrument};

use hb_common::{
    Bundle, Error, InstanceCredentials, InstanceId, Result, ServiceId, ServicePlanId,
};

use crate::context::Context;
use crate::osb::OsbContext;

/// Bind request
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct BindRequest {
    #[serde(skip)]
    pub instance_id: InstanceId,
    #[serde(skip)]
    pub binding_id: String,
    pub service_id: ServiceId,
    pub plan_id: ServicePlanId,
    /// Not supported; a non-empty map rejects the request
    #[serde(default)]
    pub parameters: Option<Map<String, Value>>,
}

/// Bind outcome
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BindResponse {
    pub credentials: InstanceCredentials,
}

/// Bind handler
pub struct BindService {
    ctx: Arc<Context>,
}

impl BindService {
    /// Create a bind handler
    pub fn new(ctx: Arc<Context>) -> Self {
        Self { ctx }
    }

    /// Return the credentials of a provisioned instance of a bindable plan.
    ///
    /// Every binding of an instance gets the same credentials.
    #[instrument(skip(self, osb_ctx, req), fields(instance_id = %req.instance_id, binding_id = %req.binding_id, api_version = %osb_ctx.api_version))]
    pub async fn bind(&self, osb_ctx: &OsbContext, req: BindRequest) -> Result<BindResponse> {
        if req.parameters.as_ref().is_some_and(|p| !p.is_empty()) {
            return Err(Error::validation_for_field(
                "parameters",
                "bind parameters are not supported",
            ));
        }

        let instance = self
            .ctx
            .instances
            .get(&req.instance_id)
            .await
            .map_err(|e| e.context("while getting instance from storage"))?;
        if (!req.service_id.is_empty() && req.service_id != instance.service_id)
            || (!req.plan_id.is_empty() && req.plan_id != instance.service_plan_id)
        {
            return Err(Error::validation(format!(
                "instance {} was provisioned with service {} and plan {}",
                instance.id, instance.service_id, instance.service_plan_id
            )));
        }

        let bundle = self
            .ctx
            .bundles
            .get_by_id(&Bundle::id_for_service(&instance.service_id))
            .await
            .map_err(|e| e.context("while getting bundle from storage"))?;
        let plan = bundle.plan(&instance.service_plan_id).ok_or_else(|| {
            Error::validation(format!(
                "plan {} does not exist in service {}",
                instance.service_plan_id, instance.service_id
            ))
        })?;
        if !bundle.is_plan_bindable(plan) {
            return Err(Error::validation(format!(
                "plan {} of service {} is not bindable",
                plan.name, bundle.name
            )));
        }

        let provisioned = self
            .ctx
            .state
            .is_provisioned(&req.instance_id)
            .await
            .map_err(|e| e.context("while checking if instance is provisioned"))?;
        if !provisioned {
            return Err(Error::validation(format!(
                "instance {} is not provisioned",
                req.instance_id
            )));
        }

        let data = self
            .ctx
            .bind_data
            .get(&req.instance_id)
            .await
            .map_err(|e| e.context("while getting bind data from storage"))?;

        let keys: Vec<&str> = data.credentials.keys().map(String::as_str).collect();
        info!(credential_keys = ?keys, "binding created");
        Ok(BindResponse {
            credentials: data.credentials,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    use serde_json::json;

    use hb_bind::MockBindTemplateResolver;
    use hb_common::{
        BundlePlan, ChartRef, ChartValues, Instance, InstanceBindData, InstanceOperation,
        OperationState, OperationType,
    };
    use hb_storage::Storage;

    use crate::helm::MockChartInstaller;

    struct Fixture {
        storage: Storage,
    }

    impl Fixture {
        fn new(bindable: bool) -> Self {
            let (storage, bundles, _) = Storage::in_memory();
            let plan = BundlePlan {
                id: "plan-1".into(),
                name: "micro".to_string(),
                chart_ref: ChartRef {
                    name: "redis".to_string(),
                    version: "0.0.1".to_string(),
                },
                chart_values: ChartValues::new(),
                bind_template: Some("credential: []".to_string()),
                bindable: None,
            };
            bundles.upsert(Bundle {
                id: "svc-1".into(),
                name: "redis".to_string(),
                version: "0.0.1".to_string(),
                description: String::new(),
                bindable,
                provision_only_once: false,
                repository_url: String::new(),
                plans: BTreeMap::from([("plan-1".into(), plan)]),
            });
            Self { storage }
        }

        /// Store a provisioned instance; bind data only when `credentials`
        /// is not empty
        async fn provisioned(self, credentials: &[(&str, &str)]) -> Self {
            self.storage
                .instances
                .insert(Instance {
                    id: "i-1".into(),
                    service_id: "svc-1".into(),
                    service_plan_id: "plan-1".into(),
                    release_name: "hb-redis-micro-i-1".into(),
                    namespace: "team-a".into(),
                    params_hash: "h".to_string(),
                })
                .await
                .unwrap();
            self.storage
                .operations
                .insert(InstanceOperation::in_progress(
                    "i-1".into(),
                    "op-1".into(),
                    OperationType::Create,
                    "h",
                ))
                .await
                .unwrap();
            self.storage
                .operations
                .update_state(&"i-1".into(), &"op-1".into(), OperationState::Succeeded)
                .await
                .unwrap();
            if !credentials.is_empty() {
                self.storage
                    .bind_data
                    .insert(InstanceBindData {
                        instance_id: "i-1".into(),
                        credentials: credentials
                            .iter()
                            .map(|(k, v)| (k.to_string(), v.to_string()))
                            .collect(),
                    })
                    .await
                    .unwrap();
            }
            self
        }

        fn service(&self) -> BindService {
            let ctx = Context::builder(
                self.storage.clone(),
                Arc::new(MockChartInstaller::new()),
                Arc::new(MockBindTemplateResolver::new()),
            )
            .build();
            BindService::new(Arc::new(ctx))
        }
    }

    fn request() -> BindRequest {
        BindRequest {
            instance_id: "i-1".into(),
            binding_id: "b-1".to_string(),
            service_id: "svc-1".into(),
            plan_id: "plan-1".into(),
            parameters: None,
        }
    }

    // =========================================================================
    // Story Tests
    // =========================================================================

    /// Story: every binding of a bindable instance gets the stored credentials
    #[tokio::test]
    async fn story_bind_returns_stored_credentials() {
        let fx = Fixture::new(true)
            .provisioned(&[("HOST", "redis.team-a.svc"), ("PORT", "6379")])
            .await;
        let svc = fx.service();

        let first = svc.bind(&OsbContext::default(), request()).await.unwrap();
        let second = svc
            .bind(
                &OsbContext::default(),
                BindRequest {
                    binding_id: "b-2".to_string(),
                    ..request()
                },
            )
            .await
            .unwrap();

        assert_eq!(first.credentials["HOST"], "redis.team-a.svc");
        assert_eq!(first, second);
        assert_eq!(
            serde_json::to_value(&first).unwrap(),
            json!({"credentials": {"HOST": "redis.team-a.svc", "PORT": "6379"}})
        );
    }

    #[tokio::test]
    async fn test_bind_parameters_are_rejected() {
        let fx = Fixture::new(true).provisioned(&[("HOST", "h")]).await;
        let req = BindRequest {
            parameters: Some(
                json!({"params": "set-but-not-allowed"})
                    .as_object()
                    .cloned()
                    .unwrap(),
            ),
            ..request()
        };

        let err = fx.service().bind(&OsbContext::default(), req).await.unwrap_err();
        assert_eq!(err.kind(), hb_common::ErrorKind::Invalid);
    }

    #[tokio::test]
    async fn test_unknown_instance_is_not_found() {
        let fx = Fixture::new(true);
        let err = fx
            .service()
            .bind(&OsbContext::default(), request())
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_non_bindable_plan_is_rejected() {
        let fx = Fixture::new(false).provisioned(&[]).await;
        let err = fx
            .service()
            .bind(&OsbContext::default(), request())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("is not bindable"));
    }

    #[tokio::test]
    async fn test_other_plan_than_provisioned_is_rejected() {
        let fx = Fixture::new(true).provisioned(&[("HOST", "h")]).await;
        let req = BindRequest {
            plan_id: "plan-2".into(),
            ..request()
        };
        let err = fx.service().bind(&OsbContext::default(), req).await.unwrap_err();
        assert!(err.to_string().contains("was provisioned with service svc-1 and plan plan-1"));
    }

    /// Story: a bindable instance whose credentials were never stored has
    /// nothing to hand out
    #[tokio::test]
    async fn story_missing_bind_data_is_not_found() {
        let fx = Fixture::new(true).provisioned(&[]).await;
        let err = fx
            .service()
            .bind(&OsbContext::default(), request())
            .await
            .unwrap_err();
        assert!(err.is_not_found());
        assert!(err.to_string().contains("while getting bind data from storage"));
    }
}
