//! Instance lifecycle state derived from the operation ledger
//!
//! Nothing is persisted here: every answer is recomputed from the full
//! operation history of the instance, so no status field can drift from the
//! ledger.

use std::sync::Arc;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;

use hb_common::{InstanceId, InstanceOperation, OperationId, OperationState, OperationType, Result};
use hb_storage::OperationStorage;

/// Lifecycle questions about one instance
#[cfg_attr(test, automock)]
#[async_trait]
pub trait InstanceStateGetter: Send + Sync {
    /// A `create` succeeded and no `remove` succeeded after it.
    ///
    /// An instance without history is not provisioned.
    async fn is_provisioned(&self, instance_id: &InstanceId) -> Result<bool>;

    /// The `create` operation currently in progress, if any.
    ///
    /// An instance without history has nothing in progress.
    async fn is_provisioning_in_progress(&self, instance_id: &InstanceId)
        -> Result<Option<OperationId>>;

    /// Any `remove` succeeded. An instance without history is not found.
    async fn is_deprovisioned(&self, instance_id: &InstanceId) -> Result<bool>;

    /// The `remove` operation currently in progress, if any. An instance
    /// without history is not found.
    async fn is_deprovisioning_in_progress(
        &self,
        instance_id: &InstanceId,
    ) -> Result<Option<OperationId>>;
}

/// [`InstanceStateGetter`] reading an [`OperationStorage`]
#[derive(Clone)]
pub struct InstanceStateService {
    operations: Arc<dyn OperationStorage>,
}

impl InstanceStateService {
    /// Create a state service over the given ledger
    pub fn new(operations: Arc<dyn OperationStorage>) -> Self {
        Self { operations }
    }

    /// History ordered by creation time; ties keep ledger order
    async fn history(&self, instance_id: &InstanceId) -> Result<Vec<InstanceOperation>> {
        let mut ops = self
            .operations
            .get_all(instance_id)
            .await
            .map_err(|e| e.context("while getting operations from storage"))?;
        ops.sort_by_key(|op| op.created_at);
        Ok(ops)
    }

    /// History where "not found" means "no operations yet"
    async fn history_or_empty(&self, instance_id: &InstanceId) -> Result<Vec<InstanceOperation>> {
        match self.history(instance_id).await {
            Err(e) if e.is_not_found() => Ok(Vec::new()),
            other => other,
        }
    }
}

/// Provisioned iff the last succeeded `create` has no later succeeded `remove`
pub fn derive_provisioned(history: &[InstanceOperation]) -> bool {
    history
        .iter()
        .rev()
        .find(|op| op.state == OperationState::Succeeded)
        .is_some_and(|op| op.type_ == OperationType::Create)
}

/// Deprovisioned iff any `remove` succeeded
pub fn derive_deprovisioned(history: &[InstanceOperation]) -> bool {
    history
        .iter()
        .any(|op| op.type_ == OperationType::Remove && op.state == OperationState::Succeeded)
}

/// The most recent operation of `type_` still in progress
pub fn derive_in_progress(
    history: &[InstanceOperation],
    type_: OperationType,
) -> Option<OperationId> {
    history
        .iter()
        .rev()
        .find(|op| op.type_ == type_ && op.state == OperationState::InProgress)
        .map(|op| op.operation_id.clone())
}

#[async_trait]
impl InstanceStateGetter for InstanceStateService {
    async fn is_provisioned(&self, instance_id: &InstanceId) -> Result<bool> {
        Ok(derive_provisioned(&self.history_or_empty(instance_id).await?))
    }

    async fn is_provisioning_in_progress(
        &self,
        instance_id: &InstanceId,
    ) -> Result<Option<OperationId>> {
        Ok(derive_in_progress(
            &self.history_or_empty(instance_id).await?,
            OperationType::Create,
        ))
    }

    async fn is_deprovisioned(&self, instance_id: &InstanceId) -> Result<bool> {
        Ok(derive_deprovisioned(&self.history(instance_id).await?))
    }

    async fn is_deprovisioning_in_progress(
        &self,
        instance_id: &InstanceId,
    ) -> Result<Option<OperationId>> {
        Ok(derive_in_progress(
            &self.history(instance_id).await?,
            OperationType::Remove,
        ))
    }
}
