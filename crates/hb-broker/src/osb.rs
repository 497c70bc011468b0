//! OSB-level inputs and outcomes of the broker operations
//!
//! These are transport-neutral: the HTTP layer maps query strings, bodies
//! and headers onto them and maps the outcomes back onto status codes.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
#[cfg(test)]
use mockall::automock;
use uuid::Uuid;

use hb_common::{
    ChartValues, Error, InstanceId, Namespace, OperationId, OperationState, Result, ServiceId,
    ServicePlanId,
};

/// Key in the provision request context naming the target namespace
pub const NAMESPACE_CONTEXT_KEY: &str = "namespace";

/// Per-request metadata carried by OSB headers
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OsbContext {
    /// `X-Broker-API-Version`
    pub api_version: String,
    /// `X-Broker-API-Originating-Identity`, when sent
    pub originating_identity: Option<String>,
}

/// Provision request
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProvisionRequest {
    #[serde(skip)]
    pub instance_id: InstanceId,
    #[serde(skip)]
    pub accepts_incomplete: bool,
    pub service_id: ServiceId,
    pub plan_id: ServicePlanId,
    /// Chart value overrides
    #[serde(default)]
    pub parameters: ChartValues,
    /// Platform context; must carry the target namespace
    #[serde(default)]
    pub context: Map<String, Value>,
}

impl ProvisionRequest {
    /// Target namespace from the request context
    pub fn namespace(&self) -> Result<Namespace> {
        match self.context.get(NAMESPACE_CONTEXT_KEY) {
            Some(Value::String(ns)) if !ns.is_empty() => Ok(Namespace::new(ns.as_str())),
            Some(_) => Err(Error::validation_for_field(
                "context.namespace",
                "namespace must be a non-empty string",
            )),
            None => Err(Error::validation_for_field(
                "context.namespace",
                "namespace is missing from the request context",
            )),
        }
    }
}

/// Provision outcome
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionResponse {
    /// Whether work continues in the background
    pub is_async: bool,
    /// Operation to poll, present when `is_async`
    pub operation_key: Option<OperationId>,
}

/// Deprovision request
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeprovisionRequest {
    pub instance_id: InstanceId,
    pub service_id: ServiceId,
    pub plan_id: ServicePlanId,
    pub accepts_incomplete: bool,
}

/// Deprovision outcome
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeprovisionResponse {
    pub is_async: bool,
    pub operation_key: Option<OperationId>,
}

/// Last-operation request
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LastOperationRequest {
    pub instance_id: InstanceId,
    /// Operation to report; the latest one when absent
    pub operation_key: Option<OperationId>,
}

/// Last-operation outcome
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LastOperationResponse {
    pub state: OperationState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Source of fresh operation IDs
#[cfg_attr(test, automock)]
pub trait OperationIdProvider: Send + Sync {
    /// Allocate a new operation ID
    fn next_id(&self) -> Result<OperationId>;
}

/// Random UUID v4 operation IDs
#[derive(Debug, Clone, Copy, Default)]
pub struct UuidOperationIds;

impl OperationIdProvider for UuidOperationIds {
    fn next_id(&self) -> Result<OperationId> {
        Ok(OperationId::new(Uuid::new_v4().to_string()))
    }
}
