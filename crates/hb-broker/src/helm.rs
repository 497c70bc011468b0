//! Chart installation and removal
//!
//! [`HelmCliInstaller`] shells out to the `helm` binary. A chart loaded from
//! the catalog is written to a scratch directory, installed from there, and
//! the JSON status printed by helm is turned into a [`Release`].

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
#[cfg(test)]
use mockall::automock;
use serde::Deserialize;
use tokio::process::Command;
use tracing::{debug, info};

use hb_common::{
    Chart, ChartValues, Error, Namespace, Release, ReleaseInfo, ReleaseName, Result,
};

/// Installs and deletes chart releases
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ChartInstaller: Send + Sync {
    /// Install `chart` with `values` as release `release_name` in `namespace`
    async fn install(
        &self,
        chart: &Chart,
        values: ChartValues,
        release_name: &ReleaseName,
        namespace: &Namespace,
    ) -> Result<Release>;

    /// Delete a release and everything it created
    async fn delete(&self, release_name: &ReleaseName) -> Result<()>;
}

/// Release status as printed by `helm install -o json`
#[derive(Debug, Deserialize)]
struct HelmStatus {
    name: String,
    namespace: String,
    version: u32,
    info: HelmStatusInfo,
}

#[derive(Debug, Deserialize)]
struct HelmStatusInfo {
    last_deployed: DateTime<Utc>,
    #[serde(default)]
    status: String,
}

/// Entry of `helm list -o json`
#[derive(Debug, Deserialize)]
struct HelmListEntry {
    name: String,
    namespace: String,
}

/// [`ChartInstaller`] backed by the helm CLI
#[derive(Debug, Clone)]
pub struct HelmCliInstaller {
    binary: String,
}

impl Default for HelmCliInstaller {
    fn default() -> Self {
        Self::new("helm")
    }
}

impl HelmCliInstaller {
    /// Use the helm binary at `binary` (a path or a name on `PATH`)
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    async fn run(&self, release: &ReleaseName, args: &[&str]) -> Result<Vec<u8>> {
        debug!(release = %release, args = ?args, "running helm");
        let output = Command::new(&self.binary)
            .args(args)
            .output()
            .await
            .map_err(|e| Error::chart(release.as_str(), format!("failed to run helm: {e}")))?;

        if !output.status.success() {
            return Err(Error::chart(
                release.as_str(),
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }
        Ok(output.stdout)
    }

    /// Namespace the release lives in, looked up across all namespaces
    async fn release_namespace(&self, release: &ReleaseName) -> Result<String> {
        let filter = format!("^{}$", release);
        let stdout = self
            .run(
                release,
                &["list", "--all-namespaces", "--filter", &filter, "-o", "json"],
            )
            .await?;
        let entries: Vec<HelmListEntry> = serde_json::from_slice(&stdout)?;
        entries
            .into_iter()
            .find(|e| e.name == release.as_str())
            .map(|e| e.namespace)
            .ok_or_else(|| Error::not_found("release", release.as_str()))
    }
}

async fn write_file(dir: &Path, rel: &str, data: &[u8]) -> Result<()> {
    let path = dir.join(rel);
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| Error::internal_with_context("helm", format!("{}: {e}", parent.display())))?;
    }
    tokio::fs::write(&path, data)
        .await
        .map_err(|e| Error::internal_with_context("helm", format!("{}: {e}", path.display())))
}

/// Write `chart` and the install values into `dir`
async fn write_chart(dir: &Path, chart: &Chart, values: &ChartValues) -> Result<()> {
    let mut metadata = serde_yaml::to_value(&chart.metadata)?;
    if let serde_yaml::Value::Mapping(m) = &mut metadata {
        m.insert("apiVersion".into(), "v2".into());
        m.remove("engine");
    }
    for template in &chart.templates {
        if Path::new(&template.name).is_absolute() || template.name.contains("..") {
            return Err(Error::validation_for_field(
                "chart.templates",
                format!("template path '{}' escapes the chart", template.name),
            ));
        }
    }

    write_file(dir, "chart/Chart.yaml", serde_yaml::to_string(&metadata)?.as_bytes()).await?;
    write_file(dir, "chart/values.yaml", serde_yaml::to_string(&chart.values)?.as_bytes()).await?;
    for template in &chart.templates {
        write_file(dir, &format!("chart/{}", template.name), template.data.as_bytes()).await?;
    }
    write_file(dir, "values.json", &serde_json::to_vec(values)?).await
}

fn scratch_error(e: impl std::fmt::Display) -> Error {
    Error::internal_with_context("helm", format!("scratch dir: {e}"))
}

impl HelmCliInstaller {
    async fn install_from(
        &self,
        scratch: &Path,
        chart: &Chart,
        values: ChartValues,
        release_name: &ReleaseName,
        namespace: &Namespace,
    ) -> Result<Release> {
        write_chart(scratch, chart, &values).await?;

        let chart_dir = scratch.join("chart");
        let values_file = scratch.join("values.json");
        let chart_dir = chart_dir.to_string_lossy();
        let values_file = values_file.to_string_lossy();

        info!(release = %release_name, namespace = %namespace, chart = %chart.metadata.name, "installing chart");
        let stdout = self
            .run(
                release_name,
                &[
                    "install",
                    release_name.as_str(),
                    &chart_dir,
                    "--namespace",
                    namespace.as_str(),
                    "--create-namespace",
                    "--values",
                    &values_file,
                    "--wait",
                    "-o",
                    "json",
                ],
            )
            .await?;

        let status: HelmStatus = serde_json::from_slice(&stdout)
            .map_err(|e| Error::chart(release_name.as_str(), format!("unreadable helm output: {e}")))?;

        Ok(Release {
            name: ReleaseName::new(status.name),
            namespace: Namespace::new(status.namespace),
            revision: status.version,
            chart: Some(chart.clone()),
            info: Some(ReleaseInfo {
                last_deployed: status.info.last_deployed,
                status: status.info.status,
            }),
            config: values,
        })
    }
}

#[async_trait]
impl ChartInstaller for HelmCliInstaller {
    async fn install(
        &self,
        chart: &Chart,
        values: ChartValues,
        release_name: &ReleaseName,
        namespace: &Namespace,
    ) -> Result<Release> {
        let scratch = tokio::task::spawn_blocking(tempfile::tempdir)
            .await
            .map_err(scratch_error)?
            .map_err(scratch_error)?;
        let result = self
            .install_from(scratch.path(), chart, values, release_name, namespace)
            .await;

        match tokio::task::spawn_blocking(move || scratch.close()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!(error = %e, "scratch dir not removed"),
            Err(e) => debug!(error = %e, "scratch dir cleanup did not run"),
        }
        result
    }

    async fn delete(&self, release_name: &ReleaseName) -> Result<()> {
        let namespace = self.release_namespace(release_name).await?;
        info!(release = %release_name, namespace = %namespace, "deleting release");
        self.run(
            release_name,
            &["uninstall", release_name.as_str(), "--namespace", &namespace, "--wait"],
        )
        .await?;
        Ok(())
    }
}
