//! Deprovisioning: admission of remove operations and release deletion

use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use hb_common::metrics::{self, OperationTimer};
use hb_common::{
    Error, InstanceId, InstanceOperation, OperationId, OperationState, OperationType,
    ReleaseName, Result,
};

use crate::context::Context;
use crate::dispatcher::TaskDispatcher;
use crate::locks::InstanceLocks;
use crate::osb::{DeprovisionRequest, DeprovisionResponse, OsbContext};

/// Description of a successful deprovisioning
pub const DEPROVISIONING_SUCCEEDED: &str = "deprovisioning succeeded";

/// Deprovision handler
pub struct DeprovisionService {
    ctx: Arc<Context>,
    dispatcher: TaskDispatcher,
    locks: InstanceLocks,
}

impl DeprovisionService {
    /// Create a deprovision handler dispatching deletes on `dispatcher`
    pub fn new(ctx: Arc<Context>, dispatcher: TaskDispatcher) -> Self {
        Self {
            ctx,
            dispatcher,
            locks: InstanceLocks::new(),
        }
    }

    /// Admit a deprovision request.
    ///
    /// An instance without any operation history is reported as not found.
    #[instrument(skip(self, osb_ctx, req), fields(instance_id = %req.instance_id, api_version = %osb_ctx.api_version))]
    pub async fn deprovision(
        &self,
        osb_ctx: &OsbContext,
        req: DeprovisionRequest,
    ) -> Result<DeprovisionResponse> {
        if !req.accepts_incomplete {
            return Err(Error::async_required(
                "deprovisioning runs in the background, set accepts_incomplete=true",
            ));
        }

        let instance_id = req.instance_id;
        let _guard = self.locks.lock(&instance_id).await;

        let deprovisioned = self
            .ctx
            .state
            .is_deprovisioned(&instance_id)
            .await
            .map_err(|e| e.context("while checking if instance is already deprovisioned"))?;
        if deprovisioned {
            debug!("instance already deprovisioned");
            return Ok(DeprovisionResponse {
                is_async: false,
                operation_key: None,
            });
        }

        let in_progress = self
            .ctx
            .state
            .is_deprovisioning_in_progress(&instance_id)
            .await
            .map_err(|e| e.context("while checking if instance is being deprovisioned"))?;
        if let Some(operation_id) = in_progress {
            debug!(operation_id = %operation_id, "deprovisioning already in progress");
            return Ok(DeprovisionResponse {
                is_async: true,
                operation_key: Some(operation_id),
            });
        }

        let operation_id = self
            .ctx
            .ids
            .next_id()
            .map_err(|e| e.context("while generating operation ID"))?;

        let instance = self
            .ctx
            .instances
            .get(&instance_id)
            .await
            .map_err(|e| e.context("while getting instance from storage"))?;

        self.ctx
            .operations
            .insert(InstanceOperation::in_progress(
                instance_id.clone(),
                operation_id.clone(),
                OperationType::Remove,
                instance.params_hash.clone(),
            ))
            .await
            .map_err(|e| e.context("while inserting instance operation to storage"))?;
        metrics::record_operation_accepted(OperationType::Remove);

        let ctx = self.ctx.clone();
        self.dispatcher.dispatch(
            operation_id.clone(),
            run_deprovisioning(ctx, instance_id, operation_id.clone(), instance.release_name),
        );

        info!(operation_id = %operation_id, "deprovisioning accepted");
        Ok(DeprovisionResponse {
            is_async: true,
            operation_key: Some(operation_id),
        })
    }
}

async fn run_deprovisioning(
    ctx: Arc<Context>,
    instance_id: InstanceId,
    operation_id: OperationId,
    release_name: ReleaseName,
) {
    let timer = OperationTimer::start(OperationType::Remove);
    let (state, description) = match remove(&ctx, &instance_id, &release_name).await {
        Ok(()) => (
            OperationState::Succeeded,
            DEPROVISIONING_SUCCEEDED.to_string(),
        ),
        Err(e) => {
            warn!(instance_id = %instance_id, release = %release_name, error = %e, "deprovisioning failed");
            (
                OperationState::Failed,
                format!("deprovisioning failed on error: {e}"),
            )
        }
    };
    timer.finish(state);
    ctx.finish_operation(
        &instance_id,
        &operation_id,
        OperationType::Remove,
        state,
        description,
    )
    .await;
}

async fn remove(ctx: &Context, instance_id: &InstanceId, release_name: &ReleaseName) -> Result<()> {
    ctx.installer
        .delete(release_name)
        .await
        .map_err(|e| e.context("while deleting helm release"))?;

    match ctx.bind_data.remove(instance_id).await {
        Ok(()) => Ok(()),
        Err(e) if e.is_not_found() => {
            debug!(instance_id = %instance_id, "instance had no bind data");
            Ok(())
        }
        Err(e) => Err(e.context("cannot remove instance bind data from storage")),
    }
}
