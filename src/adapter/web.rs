use std::path::Path;
use std::time::Duration;

use anyhow::bail;
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use super::{Adapter, LocalAdapter};
use crate::state_machine::Options;

/// Body posted to `<base_url>/status`.
#[derive(Debug, Clone, Serialize)]
struct StatusEvent<'a> {
    status: &'a str,
    run_dir: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    results: Option<&'a Value>,
}

/// Reads inputs like [`LocalAdapter`] and also reports every status change
/// to an HTTP endpoint. Local marker files are still written.
pub struct WebAdapter {
    local: LocalAdapter,
    client: Client,
    base_url: String,
}

impl WebAdapter {
    pub fn new(local: LocalAdapter, base_url: impl Into<String>) -> anyhow::Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            local,
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    async fn post(&self, event: StatusEvent<'_>) -> anyhow::Result<()> {
        let url = format!("{}/status", self.base_url);
        debug!(%url, status = event.status, "posting status");
        let response = self.client.post(&url).json(&event).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            bail!("status endpoint returned {}: {body}", status.as_u16());
        }
        Ok(())
    }

    fn event<'a>(status: &'a str, run_dir: &Path) -> StatusEvent<'a> {
        StatusEvent {
            status,
            run_dir: run_dir.display().to_string(),
            message: None,
            results: None,
        }
    }
}

#[async_trait]
impl Adapter for WebAdapter {
    async fn get_workflow(&self, directory: &Path, options: &Options) -> anyhow::Result<Value> {
        self.local.get_workflow(directory, options).await
    }

    async fn get_datapoint(&self, directory: &Path, options: &Options) -> anyhow::Result<Option<Value>> {
        self.local.get_datapoint(directory, options).await
    }

    async fn get_analysis(&self, directory: &Path, options: &Options) -> anyhow::Result<Option<Value>> {
        self.local.get_analysis(directory, options).await
    }

    async fn communicate_started(&self, run_dir: &Path) -> anyhow::Result<()> {
        self.local.communicate_started(run_dir).await?;
        self.post(Self::event("started", run_dir)).await
    }

    async fn communicate_transition(&self, run_dir: &Path, message: &str) -> anyhow::Result<()> {
        self.post(StatusEvent {
            message: Some(message),
            ..Self::event("transition", run_dir)
        })
        .await
    }

    async fn communicate_results(&self, run_dir: &Path, results: &Value) -> anyhow::Result<()> {
        self.local.communicate_results(run_dir, results).await?;
        self.post(StatusEvent {
            results: Some(results),
            ..Self::event("results", run_dir)
        })
        .await
    }

    async fn communicate_complete(&self, run_dir: &Path) -> anyhow::Result<()> {
        self.local.communicate_complete(run_dir).await?;
        self.post(Self::event("completed", run_dir)).await
    }

    async fn communicate_failure(&self, run_dir: &Path) -> anyhow::Result<()> {
        self.local.communicate_failure(run_dir).await?;
        self.post(Self::event("failed", run_dir)).await
    }
}
