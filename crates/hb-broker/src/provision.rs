//! Provisioning: admission of create operations and the install pipeline
//!
//! Admission runs on the caller's task under the instance's provision lock.
//! It either answers from the ledger (already provisioned, already in
//! progress) or records a new `create` operation and the instance, then
//! hands the install to the dispatcher. The install pipeline writes the
//! operation's terminal state exactly once.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use hb_common::metrics::{self, OperationTimer};
use hb_common::values::{merged, params_hash};
use hb_common::{
    Bundle, BundlePlan, ChartValues, Error, Instance, InstanceBindData, InstanceId,
    InstanceOperation, Namespace, OperationId, OperationState, OperationType, Release,
    ReleaseName, Result, ADDONS_REPOSITORY_URL_KEY, RELEASE_NAME_MAX_LEN,
};

use crate::context::Context;
use crate::dispatcher::TaskDispatcher;
use crate::locks::InstanceLocks;
use crate::osb::{OsbContext, ProvisionRequest, ProvisionResponse};

/// Prefix of every release the broker installs
pub const RELEASE_NAME_PREFIX: &str = "hb";

/// Description of a successful provisioning
pub const PROVISIONING_SUCCEEDED: &str = "provisioning succeeded";

/// Deterministic release name `hb-{bundle}-{plan}-{instance}`, cut to the
/// Helm release name limit
pub fn release_name(bundle_name: &str, plan_name: &str, instance_id: &InstanceId) -> ReleaseName {
    let mut full = format!("{RELEASE_NAME_PREFIX}-{bundle_name}-{plan_name}-{instance_id}");
    if full.len() > RELEASE_NAME_MAX_LEN {
        let cut = (0..=RELEASE_NAME_MAX_LEN)
            .rev()
            .find(|&i| full.is_char_boundary(i))
            .unwrap_or(0);
        full.truncate(cut);
    }
    ReleaseName::new(full)
}

/// Everything the install pipeline needs, captured at admission
#[derive(Debug, Clone)]
struct ProvisioningInput {
    instance_id: InstanceId,
    operation_id: OperationId,
    namespace: Namespace,
    release_name: ReleaseName,
    plan: BundlePlan,
    bindable: bool,
    repository_url: String,
    overrides: ChartValues,
}

/// Provision handler
pub struct ProvisionService {
    ctx: Arc<Context>,
    dispatcher: TaskDispatcher,
    locks: InstanceLocks,
}

impl ProvisionService {
    /// Create a provision handler dispatching installs on `dispatcher`
    pub fn new(ctx: Arc<Context>, dispatcher: TaskDispatcher) -> Self {
        Self {
            ctx,
            dispatcher,
            locks: InstanceLocks::new(),
        }
    }

    /// Admit a provision request.
    ///
    /// Returns `is_async = false` when the instance is already provisioned,
    /// the in-flight operation when one exists, or a new operation otherwise.
    #[instrument(skip(self, osb_ctx, req), fields(instance_id = %req.instance_id, api_version = %osb_ctx.api_version))]
    pub async fn provision(
        &self,
        osb_ctx: &OsbContext,
        req: ProvisionRequest,
    ) -> Result<ProvisionResponse> {
        if !req.accepts_incomplete {
            return Err(Error::async_required(
                "provisioning runs in the background, set accepts_incomplete=true",
            ));
        }

        let instance_id = req.instance_id.clone();
        let _guard = self.locks.lock(&instance_id).await;
        let hash = params_hash(&req.parameters);

        let provisioned = self
            .ctx
            .state
            .is_provisioned(&instance_id)
            .await
            .map_err(|e| e.context("while checking if instance is already provisioned"))?;
        if provisioned {
            self.compare_provisioning_parameters(&instance_id, &hash)
                .await?;
            debug!("instance already provisioned");
            return Ok(ProvisionResponse {
                is_async: false,
                operation_key: None,
            });
        }

        let in_progress = self
            .ctx
            .state
            .is_provisioning_in_progress(&instance_id)
            .await
            .map_err(|e| e.context("while checking if instance is being provisioned"))?;
        if let Some(operation_id) = in_progress {
            self.compare_provisioning_parameters(&instance_id, &hash)
                .await?;
            debug!(operation_id = %operation_id, "provisioning already in progress");
            return Ok(ProvisionResponse {
                is_async: true,
                operation_key: Some(operation_id),
            });
        }

        let namespace = req
            .namespace()
            .map_err(|e| e.context("while getting namespace from context"))?;
        let bundle = self.bundle_for(&req).await?;
        let plan = bundle.plan(&req.plan_id).cloned().ok_or_else(|| {
            Error::validation_for_field(
                "plan_id",
                format!(
                    "bundle {} does not contain requested plan {}",
                    bundle.id, req.plan_id
                ),
            )
        })?;

        let instances = self
            .ctx
            .instances
            .get_all()
            .await
            .map_err(|e| e.context("while getting instance collection"))?;
        let others = instances.iter().filter(|i| i.id != instance_id);
        if !bundle.is_provisioning_allowed(&namespace, others) {
            info!(
                bundle = %bundle.name,
                bundle_id = %bundle.id,
                namespace = %namespace,
                "bundle with provisionOnlyOnce already has an instance in namespace"
            );
            return Err(Error::validation(format!(
                "bundle with name: {:?} (id: {}) and flag 'provisionOnlyOnce' in namespace {:?} will be not provisioned because its instance already exists",
                bundle.name, bundle.id, namespace.as_str()
            )));
        }

        let earlier = self
            .instance_from_earlier_attempt(&req, &namespace, &hash)
            .await?;

        let operation_id = self
            .ctx
            .ids
            .next_id()
            .map_err(|e| e.context("while generating ID for operation"))?;
        let release_name = match &earlier {
            Some(instance) => instance.release_name.clone(),
            None => release_name(&bundle.name, &plan.name, &instance_id),
        };

        self.ctx
            .operations
            .insert(InstanceOperation::in_progress(
                instance_id.clone(),
                operation_id.clone(),
                OperationType::Create,
                hash.clone(),
            ))
            .await
            .map_err(|e| e.context("while inserting instance operation to storage"))?;
        metrics::record_operation_accepted(OperationType::Create);

        if earlier.is_some() {
            debug!(operation_id = %operation_id, "reusing instance record of an earlier attempt");
        } else if let Err(e) = self
            .ctx
            .instances
            .insert(Instance {
                id: instance_id.clone(),
                service_id: req.service_id.clone(),
                service_plan_id: req.plan_id.clone(),
                release_name: release_name.clone(),
                namespace: namespace.clone(),
                params_hash: hash,
            })
            .await
        {
            let e = e.context("while inserting instance to storage");
            self.ctx
                .finish_operation(
                    &instance_id,
                    &operation_id,
                    OperationType::Create,
                    OperationState::Failed,
                    format!("provisioning failed on error: {e}"),
                )
                .await;
            return Err(e);
        }

        let input = ProvisioningInput {
            instance_id,
            operation_id: operation_id.clone(),
            namespace,
            release_name,
            bindable: bundle.is_plan_bindable(&plan),
            plan,
            repository_url: bundle.repository_url,
            overrides: req.parameters,
        };
        let ctx = self.ctx.clone();
        self.dispatcher
            .dispatch(operation_id.clone(), run_provisioning(ctx, input));

        info!(operation_id = %operation_id, "provisioning accepted");
        Ok(ProvisionResponse {
            is_async: true,
            operation_key: Some(operation_id),
        })
    }

    async fn bundle_for(&self, req: &ProvisionRequest) -> Result<Bundle> {
        let bundle_id = Bundle::id_for_service(&req.service_id);
        self.ctx
            .bundles
            .get_by_id(&bundle_id)
            .await
            .map_err(|e| {
                if e.is_not_found() {
                    Error::validation_for_field("service_id", format!("while getting bundle: {e}"))
                } else {
                    e.context("while getting bundle")
                }
            })
    }

    /// The instance record left by an earlier attempt that did not end in a
    /// provisioned instance (failed, or deprovisioned since).
    ///
    /// The record is created once and reused by later attempts, which must
    /// ask for the same service, plan, namespace and parameters.
    async fn instance_from_earlier_attempt(
        &self,
        req: &ProvisionRequest,
        namespace: &Namespace,
        hash: &str,
    ) -> Result<Option<Instance>> {
        let instance = match self.ctx.instances.get(&req.instance_id).await {
            Ok(instance) => instance,
            Err(e) if e.is_not_found() => return Ok(None),
            Err(e) => return Err(e.context("while getting instance from storage")),
        };

        let same_request = instance.service_id == req.service_id
            && instance.service_plan_id == req.plan_id
            && &instance.namespace == namespace
            && instance.params_hash == hash;
        if !same_request {
            return Err(Error::conflict(format!(
                "instance {} was already requested with a different service, plan, namespace or parameters",
                req.instance_id
            )));
        }
        Ok(Some(instance))
    }

    /// A repeated request must carry the parameters of the stored instance
    async fn compare_provisioning_parameters(
        &self,
        instance_id: &InstanceId,
        hash: &str,
    ) -> Result<()> {
        match self.ctx.instances.get(instance_id).await {
            Ok(instance) if instance.params_hash != hash => Err(Error::conflict(format!(
                "provisioning parameters of instance {instance_id} differ from the original request"
            ))),
            Ok(_) => Ok(()),
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e.context("while getting instance from storage")),
        }
    }
}

/// Background part of provisioning; never returns an error to anyone
async fn run_provisioning(ctx: Arc<Context>, input: ProvisioningInput) {
    let timer = OperationTimer::start(OperationType::Create);
    let (state, description) = match install(&ctx, &input).await {
        Err(e) => (
            OperationState::Failed,
            format!("provisioning failed on error: {e}"),
        ),
        Ok(release) if input.bindable => match resolve_and_save_bind_data(&ctx, &input, &release).await {
            Ok(()) => (OperationState::Succeeded, PROVISIONING_SUCCEEDED.to_string()),
            Err(e) => (
                OperationState::Failed,
                format!("resolving bind data failed with error: {e}"),
            ),
        },
        Ok(_) => (OperationState::Succeeded, PROVISIONING_SUCCEEDED.to_string()),
    };

    if state == OperationState::Failed {
        warn!(instance_id = %input.instance_id, description = %description, "provisioning failed");
    }
    timer.finish(state);
    ctx.finish_operation(
        &input.instance_id,
        &input.operation_id,
        OperationType::Create,
        state,
        description,
    )
    .await;
}

async fn install(ctx: &Context, input: &ProvisioningInput) -> Result<Release> {
    let chart_ref = &input.plan.chart_ref;
    let chart = ctx
        .charts
        .get(&chart_ref.name, &chart_ref.version)
        .await
        .map_err(|e| e.context("while getting chart from storage"))?;

    let mut values = merged(&input.plan.chart_values, input.overrides.clone());
    values.insert(
        ADDONS_REPOSITORY_URL_KEY.to_string(),
        Value::String(input.repository_url.clone()),
    );
    debug!(
        release = %input.release_name,
        namespace = %input.namespace,
        plan = %input.plan.name,
        "merged chart values"
    );

    ctx.installer
        .install(&chart, values, &input.release_name, &input.namespace)
        .await
        .map_err(|e| e.context("while installing helm release"))
}

async fn resolve_and_save_bind_data(
    ctx: &Context,
    input: &ProvisioningInput,
    release: &Release,
) -> Result<()> {
    let template = input.plan.bind_template.as_deref().unwrap_or_default();
    let rendered = ctx
        .renderer
        .render(template, release)
        .map_err(|e| e.context("while rendering bind yaml template"))?;

    let out = ctx
        .resolver
        .resolve(&rendered, &input.namespace)
        .await
        .map_err(|e| e.context("while resolving bind yaml values"))?;

    ctx.bind_data
        .insert(InstanceBindData {
            instance_id: input.instance_id.clone(),
            credentials: out.credentials,
        })
        .await
        .map_err(|e| e.context("while inserting instance bind data into storage"))
}
