//! Last-operation polling

use std::sync::Arc;

use tracing::{debug, instrument};

use hb_common::{Error, InstanceOperation, Result};

use crate::context::Context;
use crate::osb::{LastOperationRequest, LastOperationResponse, OsbContext};

/// Answers last-operation polls straight from the ledger
pub struct LastOperationService {
    ctx: Arc<Context>,
}

impl LastOperationService {
    /// Create a last-operation handler
    pub fn new(ctx: Arc<Context>) -> Self {
        Self { ctx }
    }

    /// Report state and description of the requested operation, or of the
    /// most recent one when the request names none
    #[instrument(skip(self, osb_ctx, req), fields(instance_id = %req.instance_id, api_version = %osb_ctx.api_version))]
    pub async fn last_operation(
        &self,
        osb_ctx: &OsbContext,
        req: LastOperationRequest,
    ) -> Result<LastOperationResponse> {
        let op = match &req.operation_key {
            Some(operation_id) => self
                .ctx
                .operations
                .get(&req.instance_id, operation_id)
                .await
                .map_err(|e| e.context("while getting instance operation from storage"))?,
            None => self.latest(&req).await?,
        };

        debug!(operation_id = %op.operation_id, state = %op.state, "last operation");
        Ok(LastOperationResponse {
            state: op.state,
            description: op.state_description,
        })
    }

    async fn latest(&self, req: &LastOperationRequest) -> Result<InstanceOperation> {
        let history = self
            .ctx
            .operations
            .get_all(&req.instance_id)
            .await
            .map_err(|e| e.context("while getting instance operations from storage"))?;
        history
            .into_iter()
            .max_by_key(|op| op.created_at)
            .ok_or_else(|| Error::not_found("operations of instance", req.instance_id.as_str()))
    }
}
