//! Catalog and chart models
//!
//! Bundles and plans are read-only inputs resolved from the catalog. Charts and
//! releases describe what the chart installer consumes and returns.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{BundleId, BundlePlanId, Namespace, ReleaseName, ServiceId, ServicePlanId};
use crate::values::ChartValues;

/// Reference to a chart by name and version
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChartRef {
    pub name: String,
    pub version: String,
}

/// A tier of a bundle, mapping to one chart with default values
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BundlePlan {
    pub id: BundlePlanId,
    pub name: String,
    pub chart_ref: ChartRef,
    #[serde(default)]
    pub chart_values: ChartValues,
    /// Raw bind template, rendered against the install result
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bind_template: Option<String>,
    /// Overrides the bundle-level flag when declared
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bindable: Option<bool>,
}

/// Catalog entry describing an installable service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bundle {
    pub id: BundleId,
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub bindable: bool,
    /// At most one instance of this bundle per namespace
    #[serde(default)]
    pub provision_only_once: bool,
    /// Repository the bundle was loaded from, passed to charts as a value
    #[serde(default)]
    pub repository_url: String,
    #[serde(default)]
    pub plans: BTreeMap<BundlePlanId, BundlePlan>,
}

impl Bundle {
    /// Bundle IDs are in 1:1 correspondence with OSB service IDs
    pub fn id_for_service(service_id: &ServiceId) -> BundleId {
        BundleId::new(service_id.as_str())
    }

    /// Look up a plan by OSB plan ID
    pub fn plan(&self, plan_id: &ServicePlanId) -> Option<&BundlePlan> {
        self.plans.get(&BundlePlanId::new(plan_id.as_str()))
    }

    /// Whether a plan of this bundle yields bindable instances.
    ///
    /// A flag declared on the plan wins; otherwise the bundle flag applies.
    pub fn is_plan_bindable(&self, plan: &BundlePlan) -> bool {
        plan.bindable.unwrap_or(self.bindable)
    }

    /// Whether a new instance may be provisioned into `namespace`.
    ///
    /// Only `provision_only_once` bundles are restricted: they allow no
    /// second instance of the same service in one namespace.
    pub fn is_provisioning_allowed<'a>(
        &self,
        namespace: &Namespace,
        existing: impl IntoIterator<Item = &'a crate::types::Instance>,
    ) -> bool {
        if !self.provision_only_once {
            return true;
        }
        !existing
            .into_iter()
            .any(|i| &i.namespace == namespace && i.service_id.as_str() == self.id.as_str())
    }
}

/// Chart metadata (the `Chart.yaml` subset the broker cares about)
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ChartMetadata {
    pub name: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Template engine declared by the chart; absent means the default
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub engine: Option<String>,
}

/// One file of a chart's template set
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChartTemplate {
    /// Path relative to the chart root, e.g. `templates/deployment.yaml`
    pub name: String,
    pub data: String,
}

/// A loaded chart
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Chart {
    pub metadata: ChartMetadata,
    #[serde(default)]
    pub values: ChartValues,
    #[serde(default)]
    pub templates: Vec<ChartTemplate>,
}

impl Chart {
    /// Chart reference for this chart
    pub fn chart_ref(&self) -> ChartRef {
        ChartRef {
            name: self.metadata.name.clone(),
            version: self.metadata.version.clone(),
        }
    }
}

/// Release status information
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReleaseInfo {
    pub last_deployed: DateTime<Utc>,
    #[serde(default)]
    pub status: String,
}

/// Result of a chart install
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Release {
    pub name: ReleaseName,
    pub namespace: Namespace,
    /// Release revision, starting at 1
    pub revision: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chart: Option<Chart>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub info: Option<ReleaseInfo>,
    /// Values the release was installed with
    #[serde(default)]
    pub config: ChartValues,
}
