use std::path::{Path, PathBuf};

use anyhow::{Context as _, bail};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use tracing::info;

use super::Adapter;
use crate::state_machine::Options;

/// Filesystem adapter: reads the workflow JSON from disk and drops marker
/// files (`started.job`, `finished.job`, `failed.job`) and `results.json`
/// into the run directory.
#[derive(Debug, Clone)]
pub struct LocalAdapter {
    osw_path: PathBuf,
}

impl LocalAdapter {
    pub fn new(osw_path: impl Into<PathBuf>) -> Self {
        Self {
            osw_path: osw_path.into(),
        }
    }

    pub fn osw_path(&self) -> &Path {
        &self.osw_path
    }

    /// Directory containing the workflow file.
    pub fn directory(&self) -> PathBuf {
        self.osw_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."))
    }
}

async fn read_optional_json(path: &Path) -> anyhow::Result<Option<Value>> {
    if !tokio::fs::try_exists(path).await? {
        return Ok(None);
    }
    let text = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    let value = serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))?;
    Ok(Some(value))
}

async fn write_marker(run_dir: &Path, name: &str, message: &str) -> anyhow::Result<()> {
    let path = run_dir.join(name);
    tokio::fs::write(&path, format!("{message} {}\n", Utc::now().to_rfc3339()))
        .await
        .with_context(|| format!("writing {}", path.display()))
}

#[async_trait]
impl Adapter for LocalAdapter {
    async fn get_workflow(&self, _directory: &Path, _options: &Options) -> anyhow::Result<Value> {
        let workflow = read_optional_json(&self.osw_path)
            .await?
            .with_context(|| format!("workflow file {} does not exist", self.osw_path.display()))?;
        if !workflow.is_object() {
            bail!("workflow file {} is not a JSON object", self.osw_path.display());
        }
        Ok(workflow)
    }

    async fn get_datapoint(&self, directory: &Path, _options: &Options) -> anyhow::Result<Option<Value>> {
        read_optional_json(&directory.join("data_point.json")).await
    }

    async fn get_analysis(&self, directory: &Path, _options: &Options) -> anyhow::Result<Option<Value>> {
        read_optional_json(&directory.join("analysis.json")).await
    }

    async fn communicate_started(&self, run_dir: &Path) -> anyhow::Result<()> {
        info!(run_dir = %run_dir.display(), "workflow started");
        write_marker(run_dir, "started.job", "Started Workflow").await
    }

    async fn communicate_transition(&self, _run_dir: &Path, message: &str) -> anyhow::Result<()> {
        info!("{message}");
        Ok(())
    }

    async fn communicate_results(&self, run_dir: &Path, results: &Value) -> anyhow::Result<()> {
        let path = run_dir.join("results.json");
        tokio::fs::write(&path, serde_json::to_string_pretty(results)?)
            .await
            .with_context(|| format!("writing {}", path.display()))
    }

    async fn communicate_complete(&self, run_dir: &Path) -> anyhow::Result<()> {
        write_marker(run_dir, "finished.job", "Finished Workflow").await
    }

    async fn communicate_failure(&self, run_dir: &Path) -> anyhow::Result<()> {
        write_marker(run_dir, "failed.job", "Failed Workflow").await
    }
}
