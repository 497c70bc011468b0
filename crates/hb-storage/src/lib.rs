//! Storage capabilities for the helm broker
//!
//! The orchestration core only sees the traits in this crate. Every backend
//! reports a missing record as [`hb_common::Error::NotFound`] so callers can
//! test for absence with `is_not_found()` regardless of the driver.
//!
//! The [`memory`] driver is the reference backend: it enforces the
//! append-only ledger rules and is what the binary and the tests run on.

use std::sync::Arc;

use async_trait::async_trait;
#[cfg(any(test, feature = "mock"))]
use mockall::automock;

use hb_common::{
    Bundle, BundleId, Chart, Instance, InstanceBindData, InstanceId, InstanceOperation,
    OperationId, OperationState, Result,
};

pub mod memory;

/// Per-instance operation ledger
#[cfg_attr(any(test, feature = "mock"), automock)]
#[async_trait]
pub trait OperationStorage: Send + Sync {
    /// Append a new operation. It must be `in progress`.
    async fn insert(&self, op: InstanceOperation) -> Result<()>;

    /// Get one operation of an instance
    async fn get(&self, instance_id: &InstanceId, operation_id: &OperationId)
        -> Result<InstanceOperation>;

    /// Get the full history of an instance in ledger order.
    ///
    /// An instance without any operation is reported as not found.
    async fn get_all(&self, instance_id: &InstanceId) -> Result<Vec<InstanceOperation>>;

    /// Move an operation to a terminal state
    async fn update_state(
        &self,
        instance_id: &InstanceId,
        operation_id: &OperationId,
        state: OperationState,
    ) -> Result<()>;

    /// Move an operation to a terminal state with a description
    async fn update_state_desc(
        &self,
        instance_id: &InstanceId,
        operation_id: &OperationId,
        state: OperationState,
        description: String,
    ) -> Result<()>;
}

/// Instance records
#[cfg_attr(any(test, feature = "mock"), automock)]
#[async_trait]
pub trait InstanceStorage: Send + Sync {
    /// Store a new instance; a duplicate ID is a conflict
    async fn insert(&self, instance: Instance) -> Result<()>;

    /// Get an instance by ID
    async fn get(&self, instance_id: &InstanceId) -> Result<Instance>;

    /// List every stored instance
    async fn get_all(&self) -> Result<Vec<Instance>>;
}

/// Credentials of provisioned instances
#[cfg_attr(any(test, feature = "mock"), automock)]
#[async_trait]
pub trait InstanceBindDataStorage: Send + Sync {
    /// Store bind data; a second insert for the same instance is a conflict
    async fn insert(&self, data: InstanceBindData) -> Result<()>;

    /// Get bind data of an instance
    async fn get(&self, instance_id: &InstanceId) -> Result<InstanceBindData>;

    /// Remove bind data of an instance
    async fn remove(&self, instance_id: &InstanceId) -> Result<()>;
}

/// Catalog lookup
#[cfg_attr(any(test, feature = "mock"), automock)]
#[async_trait]
pub trait BundleGetter: Send + Sync {
    /// Get a bundle by ID
    async fn get_by_id(&self, id: &BundleId) -> Result<Bundle>;

    /// List every bundle of the catalog
    async fn find_all(&self) -> Result<Vec<Bundle>>;
}

/// Chart lookup
#[cfg_attr(any(test, feature = "mock"), automock)]
#[async_trait]
pub trait ChartGetter: Send + Sync {
    /// Get a chart by name and version
    async fn get(&self, name: &str, version: &str) -> Result<Chart>;
}

/// Handles to every store, as consumed by the broker
#[derive(Clone)]
pub struct Storage {
    /// Operation ledger
    pub operations: Arc<dyn OperationStorage>,
    /// Instance records
    pub instances: Arc<dyn InstanceStorage>,
    /// Bind data
    pub bind_data: Arc<dyn InstanceBindDataStorage>,
    /// Catalog bundles
    pub bundles: Arc<dyn BundleGetter>,
    /// Charts
    pub charts: Arc<dyn ChartGetter>,
}

impl Storage {
    /// Storage backed by the in-memory driver for every store.
    ///
    /// Returns the catalog handles as well so the caller can populate them.
    pub fn in_memory() -> (Self, Arc<memory::BundleStore>, Arc<memory::ChartStore>) {
        let bundles = Arc::new(memory::BundleStore::default());
        let charts = Arc::new(memory::ChartStore::default());
        let storage = Self {
            operations: Arc::new(memory::OperationStore::default()),
            instances: Arc::new(memory::InstanceStore::default()),
            bind_data: Arc::new(memory::BindDataStore::default()),
            bundles: bundles.clone(),
            charts: charts.clone(),
        };
        (storage, bundles, charts)
    }
}
