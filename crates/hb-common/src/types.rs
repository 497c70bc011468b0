//! Identifiers and ledger records shared by every broker crate

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create a new identifier
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            /// Borrow the underlying string
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Whether the identifier is empty
            pub fn is_empty(&self) -> bool {
                self.0.is_empty()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

string_id!(
    /// Service instance identifier, supplied by the platform
    InstanceId
);
string_id!(
    /// Operation identifier, generated by the broker per accepted request
    OperationId
);
string_id!(
    /// OSB service identifier (1:1 with a bundle ID)
    ServiceId
);
string_id!(
    /// OSB plan identifier (1:1 with a bundle plan ID)
    ServicePlanId
);
string_id!(
    /// Catalog bundle identifier
    BundleId
);
string_id!(
    /// Catalog bundle plan identifier
    BundlePlanId
);
string_id!(
    /// Kubernetes namespace
    Namespace
);
string_id!(
    /// Helm release name
    ReleaseName
);

/// Kind of an operation in the ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationType {
    /// Provisioning
    Create,
    /// Deprovisioning
    Remove,
}

impl OperationType {
    /// Wire and label value
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationType::Create => "create",
            OperationType::Remove => "remove",
        }
    }
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// State of an operation in the ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationState {
    /// The only non-terminal state
    #[serde(rename = "in progress")]
    InProgress,
    /// Terminal success
    #[serde(rename = "succeeded")]
    Succeeded,
    /// Terminal failure
    #[serde(rename = "failed")]
    Failed,
}

impl OperationState {
    /// Whether the state can no longer change
    pub fn is_terminal(&self) -> bool {
        !matches!(self, OperationState::InProgress)
    }

    /// Wire and label value
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationState::InProgress => "in progress",
            OperationState::Succeeded => "succeeded",
            OperationState::Failed => "failed",
        }
    }
}

impl fmt::Display for OperationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry of the per-instance operation ledger
///
/// Immutable except `state` / `state_description`, which move exactly once
/// from `in progress` to a terminal state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceOperation {
    pub instance_id: InstanceId,
    pub operation_id: OperationId,
    #[serde(rename = "type")]
    pub type_: OperationType,
    pub state: OperationState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_description: Option<String>,
    pub params_hash: String,
    pub created_at: DateTime<Utc>,
}

impl InstanceOperation {
    /// A freshly admitted operation, always `in progress`
    pub fn in_progress(
        instance_id: InstanceId,
        operation_id: OperationId,
        type_: OperationType,
        params_hash: impl Into<String>,
    ) -> Self {
        Self {
            instance_id,
            operation_id,
            type_,
            state: OperationState::InProgress,
            state_description: None,
            params_hash: params_hash.into(),
            created_at: Utc::now(),
        }
    }
}

/// Routing and identity data of a provisioned service instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Instance {
    pub id: InstanceId,
    pub service_id: ServiceId,
    pub service_plan_id: ServicePlanId,
    pub release_name: ReleaseName,
    pub namespace: Namespace,
    pub params_hash: String,
}

/// Flat credential map exposed to bindings
pub type InstanceCredentials = BTreeMap<String, String>;

/// Credentials resolved after a successful install of a bindable plan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceBindData {
    pub instance_id: InstanceId,
    pub credentials: InstanceCredentials,
}
