//! Catalog loading from a directory of unpacked bundles
//!
//! Layout of one bundle:
//!
//! ```text
//! <catalog>/<bundle>/meta.yaml
//! <catalog>/<bundle>/plans/<plan>/meta.yaml
//! <catalog>/<bundle>/plans/<plan>/values.yaml   (optional)
//! <catalog>/<bundle>/plans/<plan>/bind.yaml     (optional)
//! <catalog>/<bundle>/chart/<chart>/Chart.yaml
//! <catalog>/<bundle>/chart/<chart>/values.yaml  (optional)
//! <catalog>/<bundle>/chart/<chart>/templates/**
//! ```
//!
//! Every plan of a bundle installs the bundle's single chart.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Deserialize;
use thiserror::Error;
use tracing::{info, warn};

use hb_common::{Bundle, BundlePlan, Chart, ChartMetadata, ChartTemplate, ChartValues};
use hb_storage::memory::{BundleStore, ChartStore};

const BUNDLE_META_FILE: &str = "meta.yaml";
const PLANS_DIR: &str = "plans";
const PLAN_META_FILE: &str = "meta.yaml";
const PLAN_VALUES_FILE: &str = "values.yaml";
const PLAN_BIND_FILE: &str = "bind.yaml";
const CHART_DIR: &str = "chart";
const CHART_META_FILE: &str = "Chart.yaml";
const CHART_VALUES_FILE: &str = "values.yaml";
const CHART_TEMPLATES_DIR: &str = "templates";

/// Errors raised while loading the catalog
#[derive(Debug, Error)]
pub enum CatalogError {
    /// A file or directory could not be read
    #[error("while reading {path}: {source}")]
    Io {
        /// Path that failed
        path: PathBuf,
        /// Underlying IO error
        #[source]
        source: std::io::Error,
    },

    /// A YAML document could not be parsed
    #[error("while parsing {path}: {message}")]
    Parse {
        /// Offending file
        path: PathBuf,
        /// Parser message
        message: String,
    },

    /// The bundle does not follow the expected layout
    #[error("invalid bundle {path}: {message}")]
    Invalid {
        /// Bundle directory
        path: PathBuf,
        /// What is wrong
        message: String,
    },
}

type Result<T> = std::result::Result<T, CatalogError>;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BundleMeta {
    id: String,
    name: String,
    version: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    bindable: bool,
    #[serde(default)]
    provision_only_once: bool,
    #[serde(default, rename = "repositoryURL")]
    repository_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PlanMeta {
    id: String,
    name: String,
    #[serde(default)]
    bindable: Option<bool>,
}

/// A bundle together with the chart its plans install
#[derive(Debug, Clone)]
pub struct LoadedBundle {
    /// Catalog entry
    pub bundle: Bundle,
    /// Chart referenced by every plan
    pub chart: Chart,
}

/// Load every bundle directory under `dir`
pub fn load_catalog(dir: &Path) -> Result<Vec<LoadedBundle>> {
    let repository_url = format!("file://{}", dir.display());
    let mut loaded = Vec::new();
    for bundle_dir in subdirectories(dir)? {
        loaded.push(load_bundle_dir(&bundle_dir, &repository_url)?);
    }
    Ok(loaded)
}

/// Put loaded bundles and charts into the in-memory stores
pub fn populate(bundles: &BundleStore, charts: &ChartStore, loaded: Vec<LoadedBundle>) {
    for LoadedBundle { bundle, chart } in loaded {
        info!(
            bundle = %bundle.name,
            bundle_id = %bundle.id,
            version = %bundle.version,
            plans = bundle.plans.len(),
            chart = %chart.metadata.name,
            "bundle loaded"
        );
        bundles.upsert(bundle);
        charts.upsert(chart);
    }
}

/// Load one unpacked bundle.
///
/// `default_repository_url` is used when the bundle meta does not name the
/// repository it came from.
pub fn load_bundle_dir(dir: &Path, default_repository_url: &str) -> Result<LoadedBundle> {
    let chart = load_chart_dir(&discover_chart_dir(dir)?)?;

    let meta: BundleMeta = read_yaml(&dir.join(BUNDLE_META_FILE))?.ok_or_else(|| invalid(
        dir,
        format!("missing metadata information about bundle, please check if bundle contains {BUNDLE_META_FILE:?} file"),
    ))?;
    if meta.id.is_empty() {
        return Err(invalid(dir, "bundle id must not be empty"));
    }

    let plans_dir = dir.join(PLANS_DIR);
    if !plans_dir.is_dir() {
        return Err(invalid(
            dir,
            format!("bundle does not contain any plans, please check if bundle contains {PLANS_DIR:?} directory"),
        ));
    }

    let mut plans = BTreeMap::new();
    for plan_dir in subdirectories(&plans_dir)? {
        let plan = load_plan_dir(&plan_dir, &chart)?;
        if plans.contains_key(&plan.id) {
            return Err(invalid(dir, format!("plan id {} is declared twice", plan.id)));
        }
        plans.insert(plan.id.clone(), plan);
    }
    if plans.is_empty() {
        return Err(invalid(dir, "bundle has no plans"));
    }

    let bundle = Bundle {
        id: meta.id.into(),
        name: meta.name,
        version: meta.version,
        description: meta.description,
        bindable: meta.bindable,
        provision_only_once: meta.provision_only_once,
        repository_url: meta
            .repository_url
            .unwrap_or_else(|| default_repository_url.to_string()),
        plans,
    };
    Ok(LoadedBundle { bundle, chart })
}

fn load_plan_dir(dir: &Path, chart: &Chart) -> Result<BundlePlan> {
    let meta: PlanMeta = read_yaml(&dir.join(PLAN_META_FILE))?
        .ok_or_else(|| invalid(dir, format!("{PLAN_META_FILE:?} is required but is not present")))?;
    let chart_values: ChartValues = read_yaml(&dir.join(PLAN_VALUES_FILE))?.unwrap_or_default();
    let bind_template = read_optional(&dir.join(PLAN_BIND_FILE))?;

    Ok(BundlePlan {
        id: meta.id.into(),
        name: meta.name,
        chart_ref: chart.chart_ref(),
        chart_values,
        bind_template,
        bindable: meta.bindable,
    })
}

/// The bundle's `chart` directory must hold exactly one chart directory
fn discover_chart_dir(bundle_dir: &Path) -> Result<PathBuf> {
    let chart_root = bundle_dir.join(CHART_DIR);
    if !chart_root.is_dir() {
        return Err(invalid(
            bundle_dir,
            format!("bundle does not contain {CHART_DIR:?} directory"),
        ));
    }

    let mut dirs = Vec::new();
    for entry in read_dir(&chart_root)? {
        if entry.is_dir() {
            dirs.push(entry);
        } else {
            warn!(file = %entry.display(), "ignoring file in chart directory");
        }
    }
    match dirs.len() {
        1 => Ok(dirs.remove(0)),
        0 => Err(invalid(
            bundle_dir,
            format!("{CHART_DIR:?} directory should contain one chart folder but it is empty"),
        )),
        n => Err(invalid(
            bundle_dir,
            format!("{CHART_DIR:?} directory must contain only one chart folder but found {n}"),
        )),
    }
}

/// Load an unpacked chart
pub fn load_chart_dir(dir: &Path) -> Result<Chart> {
    let metadata: ChartMetadata = read_yaml(&dir.join(CHART_META_FILE))?
        .ok_or_else(|| invalid(dir, format!("chart does not contain {CHART_META_FILE:?}")))?;
    let values: ChartValues = read_yaml(&dir.join(CHART_VALUES_FILE))?.unwrap_or_default();

    let mut templates = Vec::new();
    let templates_dir = dir.join(CHART_TEMPLATES_DIR);
    if templates_dir.is_dir() {
        collect_templates(dir, &templates_dir, &mut templates)?;
    }
    templates.sort_by(|a, b| a.name.cmp(&b.name));

    Ok(Chart {
        metadata,
        values,
        templates,
    })
}

fn collect_templates(chart_dir: &Path, dir: &Path, out: &mut Vec<ChartTemplate>) -> Result<()> {
    for path in read_dir(dir)? {
        if path.is_dir() {
            collect_templates(chart_dir, &path, out)?;
            continue;
        }
        let name = path
            .strip_prefix(chart_dir)
            .map_err(|_| invalid(chart_dir, format!("{} is outside the chart", path.display())))?
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        let data = std::fs::read_to_string(&path).map_err(|source| io(&path, source))?;
        out.push(ChartTemplate { name, data });
    }
    Ok(())
}

// =============================================================================
// File helpers
// =============================================================================

fn io(path: &Path, source: std::io::Error) -> CatalogError {
    CatalogError::Io {
        path: path.to_path_buf(),
        source,
    }
}

fn invalid(path: &Path, message: impl Into<String>) -> CatalogError {
    CatalogError::Invalid {
        path: path.to_path_buf(),
        message: message.into(),
    }
}

/// Entries of a directory, sorted by name
fn read_dir(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut entries = std::fs::read_dir(dir)
        .map_err(|source| io(dir, source))?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<std::io::Result<Vec<_>>>()
        .map_err(|source| io(dir, source))?;
    entries.sort();
    Ok(entries)
}

fn subdirectories(dir: &Path) -> Result<Vec<PathBuf>> {
    Ok(read_dir(dir)?.into_iter().filter(|p| p.is_dir()).collect())
}

/// Contents of `path`, or `None` when the file does not exist
fn read_optional(path: &Path) -> Result<Option<String>> {
    match std::fs::read_to_string(path) {
        Ok(data) => Ok(Some(data)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(source) => Err(io(path, source)),
    }
}

/// Parse a YAML file; a missing or empty file yields `None`
fn read_yaml<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let Some(data) = read_optional(path)? else {
        return Ok(None);
    };
    if data.trim().is_empty() {
        return Ok(None);
    }
    serde_yaml::from_str(&data).map_err(|e| CatalogError::Parse {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}
