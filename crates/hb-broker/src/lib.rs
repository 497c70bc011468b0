//! Helm broker core: lifecycle state, provisioning and deprovisioning
//! orchestration, last-operation polling, catalog and bindings
//!
//! [`Broker`] bundles the OSB operations over one shared [`Context`] and one
//! background [`TaskDispatcher`].

use std::sync::Arc;

use hb_common::Result;

pub mod bind;
pub mod catalog;
pub mod config;
pub mod context;
pub mod deprovision;
pub mod dispatcher;
pub mod helm;
pub mod last_operation;
pub mod locks;
pub mod osb;
pub mod provision;
pub mod state;

pub use bind::{BindRequest, BindResponse, BindService};
pub use catalog::{CatalogResponse, CatalogService};
pub use config::BrokerConfig;
pub use context::{Context, ContextBuilder};
pub use deprovision::DeprovisionService;
pub use dispatcher::{DispatchHook, TaskDispatcher};
pub use helm::{ChartInstaller, HelmCliInstaller};
pub use last_operation::LastOperationService;
pub use osb::{
    DeprovisionRequest, DeprovisionResponse, LastOperationRequest, LastOperationResponse,
    OperationIdProvider, OsbContext, ProvisionRequest, ProvisionResponse, UuidOperationIds,
};
pub use provision::{release_name, ProvisionService};
pub use state::{InstanceStateGetter, InstanceStateService};

/// The OSB operations of the broker
pub struct Broker {
    catalog: CatalogService,
    bind: BindService,
    provision: ProvisionService,
    deprovision: DeprovisionService,
    last_operation: LastOperationService,
    dispatcher: TaskDispatcher,
    config: BrokerConfig,
}

impl Broker {
    /// Create a broker over `ctx`, dispatching background work on `dispatcher`
    pub fn new(ctx: Arc<Context>, dispatcher: TaskDispatcher, config: BrokerConfig) -> Self {
        Self {
            catalog: CatalogService::new(ctx.clone()),
            bind: BindService::new(ctx.clone()),
            provision: ProvisionService::new(ctx.clone(), dispatcher.clone()),
            deprovision: DeprovisionService::new(ctx.clone(), dispatcher.clone()),
            last_operation: LastOperationService::new(ctx),
            dispatcher,
            config,
        }
    }

    /// List the offered services
    pub async fn catalog(&self, osb_ctx: &OsbContext) -> Result<CatalogResponse> {
        self.catalog.catalog(osb_ctx).await
    }

    /// Create a binding to a provisioned instance
    pub async fn bind(&self, osb_ctx: &OsbContext, req: BindRequest) -> Result<BindResponse> {
        self.bind.bind(osb_ctx, req).await
    }

    /// Provision a service instance
    pub async fn provision(
        &self,
        osb_ctx: &OsbContext,
        req: ProvisionRequest,
    ) -> Result<ProvisionResponse> {
        self.provision.provision(osb_ctx, req).await
    }

    /// Deprovision a service instance
    pub async fn deprovision(
        &self,
        osb_ctx: &OsbContext,
        req: DeprovisionRequest,
    ) -> Result<DeprovisionResponse> {
        self.deprovision.deprovision(osb_ctx, req).await
    }

    /// Poll the state of an operation
    pub async fn last_operation(
        &self,
        osb_ctx: &OsbContext,
        req: LastOperationRequest,
    ) -> Result<LastOperationResponse> {
        self.last_operation.last_operation(osb_ctx, req).await
    }

    /// Background dispatcher shared by provisioning and deprovisioning
    pub fn dispatcher(&self) -> &TaskDispatcher {
        &self.dispatcher
    }

    /// Drain in-flight background work within the configured timeout.
    ///
    /// Returns `false` when operations were still running at the deadline.
    pub async fn shutdown(&self) -> bool {
        self.dispatcher.shutdown(self.config.shutdown_timeout).await
    }
}
