//! Shared collaborators of the broker operations
//!
//! Use [`ContextBuilder`] to construct instances:
//!
//! ```text
//! let ctx = Context::builder(storage, installer, resolver)
//!     .state_write_retry(RetryConfig::with_max_attempts(5))
//!     .build();
//! ```

use std::sync::Arc;

use tracing::{error, info};

use hb_bind::{BindTemplateRenderer, BindTemplateResolver, Renderer};
use hb_common::retry::{retry_with_backoff_if, RetryConfig};
use hb_common::metrics;
use hb_common::{Error, InstanceId, OperationId, OperationState, OperationType};
use hb_storage::{
    BundleGetter, ChartGetter, InstanceBindDataStorage, InstanceStorage, OperationStorage, Storage,
};

use crate::helm::ChartInstaller;
use crate::osb::{OperationIdProvider, UuidOperationIds};
use crate::state::{InstanceStateGetter, InstanceStateService};

/// Everything an operation needs, shared between admission and background work
pub struct Context {
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
    /// Lifecycle state derived from the ledger
    pub state: Arc<dyn InstanceStateGetter>,
    /// Chart install and delete
    pub installer: Arc<dyn ChartInstaller>,
    /// Bind template rendering
    pub renderer: Arc<dyn BindTemplateRenderer>,
    /// Credential resolution
    pub resolver: Arc<dyn BindTemplateResolver>,
    /// Operation ID allocation
    pub ids: Arc<dyn OperationIdProvider>,
    /// Retry policy for the terminal state write
    pub state_write_retry: RetryConfig,
}

impl Context {
    /// Create a builder for constructing a Context
    pub fn builder(
        storage: Storage,
        installer: Arc<dyn ChartInstaller>,
        resolver: Arc<dyn BindTemplateResolver>,
    ) -> ContextBuilder {
        ContextBuilder::new(storage, installer, resolver)
    }

    /// Record the outcome of a background operation.
    ///
    /// The write is retried while the ledger reports transient errors. When
    /// every attempt fails the operation stays `in progress`; the loss is
    /// logged and counted, and not reported to anyone else.
    pub async fn finish_operation(
        &self,
        instance_id: &InstanceId,
        operation_id: &OperationId,
        op_type: OperationType,
        state: OperationState,
        description: String,
    ) {
        let result = retry_with_backoff_if(
            &self.state_write_retry,
            "update_operation_state",
            || {
                let operations = self.operations.clone();
                let instance_id = instance_id.clone();
                let operation_id = operation_id.clone();
                let description = description.clone();
                async move {
                    operations
                        .update_state_desc(&instance_id, &operation_id, state, description)
                        .await
                }
            },
            |e: &Error| e.is_retryable(),
        )
        .await;

        match result {
            Ok(()) => info!(
                instance_id = %instance_id,
                operation_id = %operation_id,
                state = %state,
                description = %description,
                "operation finished"
            ),
            Err(e) => {
                metrics::record_terminal_write_lost(op_type, state);
                error!(
                    instance_id = %instance_id,
                    operation_id = %operation_id,
                    state = %state,
                    error = %e,
                    "state description was not updated, operation stays in progress"
                )
            }
        }
    }
}

/// Builder for [`Context`]
pub struct ContextBuilder {
    storage: Storage,
    installer: Arc<dyn ChartInstaller>,
    resolver: Arc<dyn BindTemplateResolver>,
    renderer: Option<Arc<dyn BindTemplateRenderer>>,
    state: Option<Arc<dyn InstanceStateGetter>>,
    ids: Option<Arc<dyn OperationIdProvider>>,
    state_write_retry: RetryConfig,
}

impl ContextBuilder {
    fn new(
        storage: Storage,
        installer: Arc<dyn ChartInstaller>,
        resolver: Arc<dyn BindTemplateResolver>,
    ) -> Self {
        Self {
            storage,
            installer,
            resolver,
            renderer: None,
            state: None,
            ids: None,
            state_write_retry: RetryConfig::default(),
        }
    }

    /// Override the bind template renderer (primarily for testing)
    pub fn renderer(mut self, renderer: Arc<dyn BindTemplateRenderer>) -> Self {
        self.renderer = Some(renderer);
        self
    }

    /// Override the state service (primarily for testing)
    pub fn state(mut self, state: Arc<dyn InstanceStateGetter>) -> Self {
        self.state = Some(state);
        self
    }

    /// Override operation ID allocation (primarily for testing)
    pub fn operation_ids(mut self, ids: Arc<dyn OperationIdProvider>) -> Self {
        self.ids = Some(ids);
        self
    }

    /// Retry policy for the terminal state write
    pub fn state_write_retry(mut self, retry: RetryConfig) -> Self {
        self.state_write_retry = retry;
        self
    }

    /// Build the Context
    pub fn build(self) -> Context {
        let storage = self.storage;
        Context {
            state: self
                .state
                .unwrap_or_else(|| Arc::new(InstanceStateService::new(storage.operations.clone()))),
            renderer: self.renderer.unwrap_or_else(|| Arc::new(Renderer::new())),
            ids: self.ids.unwrap_or_else(|| Arc::new(UuidOperationIds)),
            operations: storage.operations,
            instances: storage.instances,
            bind_data: storage.bind_data,
            bundles: storage.bundles,
            charts: storage.charts,
            installer: self.installer,
            resolver: self.resolver,
            state_write_retry: self.state_write_retry,
        }
    }
}
