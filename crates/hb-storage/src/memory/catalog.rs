use async_trait::async_trait;
use dashmap::DashMap;
use tracing::debug;

use hb_common::{Bundle, BundleId, Chart, ChartRef, Error, Result};

use crate::{BundleGetter, ChartGetter};

/// In-memory catalog of bundles
#[derive(Default)]
pub struct BundleStore {
    bundles: DashMap<BundleId, Bundle>,
}

impl BundleStore {
    /// Insert or replace a bundle
    pub fn upsert(&self, bundle: Bundle) {
        debug!(bundle_id = %bundle.id, name = %bundle.name, "bundle stored");
        self.bundles.insert(bundle.id.clone(), bundle);
    }

    /// Number of stored bundles
    pub fn len(&self) -> usize {
        self.bundles.len()
    }

    /// Whether the catalog is empty
    pub fn is_empty(&self) -> bool {
        self.bundles.is_empty()
    }
}

#[async_trait]
impl BundleGetter for BundleStore {
    async fn get_by_id(&self, id: &BundleId) -> Result<Bundle> {
        self.bundles
            .get(id)
            .map(|b| b.value().clone())
            .ok_or_else(|| Error::not_found("bundle", id.as_str()))
    }

    async fn find_all(&self) -> Result<Vec<Bundle>> {
        let mut bundles: Vec<Bundle> = self.bundles.iter().map(|b| b.value().clone()).collect();
        bundles.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(bundles)
    }
}

/// In-memory chart store, keyed by name and version
#[derive(Default)]
pub struct ChartStore {
    charts: DashMap<ChartRef, Chart>,
}

impl ChartStore {
    /// Insert or replace a chart
    pub fn upsert(&self, chart: Chart) {
        debug!(chart = %chart.metadata.name, version = %chart.metadata.version, "chart stored");
        self.charts.insert(chart.chart_ref(), chart);
    }
}

#[async_trait]
impl ChartGetter for ChartStore {
    async fn get(&self, name: &str, version: &str) -> Result<Chart> {
        let key = ChartRef {
            name: name.to_string(),
            version: version.to_string(),
        };
        self.charts
            .get(&key)
            .map(|c| c.value().clone())
            .ok_or_else(|| Error::not_found("chart", format!("{name}:{version}")))
    }
}
