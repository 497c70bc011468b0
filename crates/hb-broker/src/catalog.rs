//! OSB catalog built from the bundle store

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, instrument};

use hb_common::{Bundle, BundleId, BundlePlanId, Result};

use crate::context::Context;
use crate::osb::OsbContext;

/// `GET /v2/catalog` body
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CatalogResponse {
    pub services: Vec<Service>,
}

/// One offered service, mapped 1:1 from a bundle
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Service {
    pub id: BundleId,
    pub name: String,
    pub description: String,
    pub bindable: bool,
    pub plan_updateable: bool,
    pub metadata: ServiceMetadata,
    pub plans: Vec<Plan>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceMetadata {
    pub display_name: String,
    pub version: String,
    pub provision_only_once: bool,
}

/// One plan of a service
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Plan {
    pub id: BundlePlanId,
    pub name: String,
    pub description: String,
    pub bindable: bool,
}

impl From<&Bundle> for Service {
    fn from(bundle: &Bundle) -> Self {
        // OSB rejects services without a description
        let description = if bundle.description.is_empty() {
            bundle.name.clone()
        } else {
            bundle.description.clone()
        };
        Service {
            id: bundle.id.clone(),
            name: bundle.name.clone(),
            description,
            bindable: bundle.bindable,
            plan_updateable: false,
            metadata: ServiceMetadata {
                display_name: bundle.name.clone(),
                version: bundle.version.clone(),
                provision_only_once: bundle.provision_only_once,
            },
            plans: bundle
                .plans
                .values()
                .map(|plan| Plan {
                    id: plan.id.clone(),
                    name: plan.name.clone(),
                    description: format!("{} plan of {}", plan.name, bundle.name),
                    bindable: bundle.is_plan_bindable(plan),
                })
                .collect(),
        }
    }
}

/// Lists the catalog straight from the bundle store
pub struct CatalogService {
    ctx: Arc<Context>,
}

impl CatalogService {
    /// Create a catalog handler
    pub fn new(ctx: Arc<Context>) -> Self {
        Self { ctx }
    }

    /// Every stored bundle as an OSB service
    #[instrument(skip(self, osb_ctx), fields(api_version = %osb_ctx.api_version))]
    pub async fn catalog(&self, osb_ctx: &OsbContext) -> Result<CatalogResponse> {
        let bundles = self
            .ctx
            .bundles
            .find_all()
            .await
            .map_err(|e| e.context("while listing bundles from storage"))?;

        debug!(services = bundles.len(), "catalog listed");
        Ok(CatalogResponse {
            services: bundles.iter().map(Service::from).collect(),
        })
    }
}
