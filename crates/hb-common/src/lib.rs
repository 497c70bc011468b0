//! Common types for the helm broker: identifiers, ledger records, catalog
//! models, errors, and utilities

pub mod bundle;
pub mod error;
pub mod metrics;
pub mod retry;
pub mod telemetry;
pub mod types;
pub mod values;

pub use bundle::{
    Bundle, BundlePlan, Chart, ChartMetadata, ChartRef, ChartTemplate, Release, ReleaseInfo,
};
pub use error::{Error, ErrorKind};
pub use types::{
    BundleId, BundlePlanId, Instance, InstanceBindData, InstanceCredentials, InstanceId,
    InstanceOperation, Namespace, OperationId, OperationState, OperationType, ReleaseName,
    ServiceId, ServicePlanId,
};
pub use values::ChartValues;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Maximum length of a Helm release name
pub const RELEASE_NAME_MAX_LEN: usize = 53;

/// Chart value carrying the repository the bundle was loaded from
pub const ADDONS_REPOSITORY_URL_KEY: &str = "addonsRepositoryURL";
