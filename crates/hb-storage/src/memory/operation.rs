use async_trait::async_trait;
use dashmap::DashMap;
use tracing::debug;

use hb_common::{Error, InstanceId, InstanceOperation, OperationId, OperationState, Result};

use crate::OperationStorage;

/// In-memory operation ledger.
///
/// Operations are kept per instance in insertion order. The store enforces
/// the ledger rules itself: an operation is inserted `in progress` and moves
/// to a terminal state exactly once.
#[derive(Default)]
pub struct OperationStore {
    ops: DashMap<InstanceId, Vec<InstanceOperation>>,
}

impl OperationStore {
    fn transition(
        &self,
        instance_id: &InstanceId,
        operation_id: &OperationId,
        state: OperationState,
        description: Option<String>,
    ) -> Result<()> {
        if !state.is_terminal() {
            return Err(Error::conflict(format!(
                "operation {operation_id} cannot be moved back to '{state}'"
            )));
        }

        let mut history = self
            .ops
            .get_mut(instance_id)
            .ok_or_else(|| Error::not_found("operation", operation_id.as_str()))?;
        let op = history
            .iter_mut()
            .find(|op| &op.operation_id == operation_id)
            .ok_or_else(|| Error::not_found("operation", operation_id.as_str()))?;

        if op.state.is_terminal() {
            return Err(Error::conflict(format!(
                "operation {operation_id} is already '{}'",
                op.state
            )));
        }

        op.state = state;
        if description.is_some() {
            op.state_description = description;
        }
        debug!(instance_id = %instance_id, operation_id = %operation_id, state = %state, "operation finished");
        Ok(())
    }
}

#[async_trait]
impl OperationStorage for OperationStore {
    async fn insert(&self, op: InstanceOperation) -> Result<()> {
        if op.state != OperationState::InProgress {
            return Err(Error::validation_for_field(
                "state",
                format!("new operation must be '{}'", OperationState::InProgress),
            ));
        }

        let mut history = self.ops.entry(op.instance_id.clone()).or_default();
        if history.iter().any(|o| o.operation_id == op.operation_id) {
            return Err(Error::conflict(format!(
                "operation {} of instance {} already exists",
                op.operation_id, op.instance_id
            )));
        }
        history.push(op);
        Ok(())
    }

    async fn get(
        &self,
        instance_id: &InstanceId,
        operation_id: &OperationId,
    ) -> Result<InstanceOperation> {
        self.ops
            .get(instance_id)
            .and_then(|history| {
                history
                    .iter()
                    .find(|op| &op.operation_id == operation_id)
                    .cloned()
            })
            .ok_or_else(|| Error::not_found("operation", operation_id.as_str()))
    }

    async fn get_all(&self, instance_id: &InstanceId) -> Result<Vec<InstanceOperation>> {
        match self.ops.get(instance_id) {
            Some(history) if !history.is_empty() => Ok(history.clone()),
            _ => Err(Error::not_found("operations of instance", instance_id.as_str())),
        }
    }

    async fn update_state(
        &self,
        instance_id: &InstanceId,
        operation_id: &OperationId,
        state: OperationState,
    ) -> Result<()> {
        self.transition(instance_id, operation_id, state, None)
    }

    async fn update_state_desc(
        &self,
        instance_id: &InstanceId,
        operation_id: &OperationId,
        state: OperationState,
        description: String,
    ) -> Result<()> {
        self.transition(instance_id, operation_id, state, Some(description))
    }
}
