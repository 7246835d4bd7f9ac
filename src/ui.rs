//! Terminal progress for a run: a spinner and coloured status lines.
//!
//! [`ProgressAdapter`] wraps the adapter the run reports to. Every call is
//! forwarded unchanged; the spinner follows the transition messages and the
//! terminal notices print a final ✓ or ✗.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use console::Style;
use indicatif::{ProgressBar, ProgressStyle};
use serde_json::Value;

use oswflow::{Adapter, Options};

pub struct ProgressAdapter {
    inner: Arc<dyn Adapter>,
    pb: ProgressBar,
    // Print a banner per transition instead of only updating the spinner.
    banners: bool,
    banner: Style,
    green: Style,
    red: Style,
}

impl ProgressAdapter {
    pub fn new(inner: Arc<dyn Adapter>, banners: bool) -> Self {
        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.cyan} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        pb.enable_steady_tick(Duration::from_millis(100));
        Self::with_bar(inner, pb, banners)
    }

    pub fn with_bar(inner: Arc<dyn Adapter>, pb: ProgressBar, banners: bool) -> Self {
        Self {
            inner,
            pb,
            banners,
            banner: Style::new().cyan().bold(),
            green: Style::new().green().bold(),
            red: Style::new().red().bold(),
        }
    }

    #[cfg(test)]
    fn message(&self) -> String {
        self.pb.message()
    }
}

#[async_trait]
impl Adapter for ProgressAdapter {
    async fn get_workflow(&self, directory: &Path, options: &Options) -> anyhow::Result<Value> {
        self.inner.get_workflow(directory, options).await
    }

    async fn get_datapoint(&self, directory: &Path, options: &Options) -> anyhow::Result<Option<Value>> {
        self.inner.get_datapoint(directory, options).await
    }

    async fn get_analysis(&self, directory: &Path, options: &Options) -> anyhow::Result<Option<Value>> {
        self.inner.get_analysis(directory, options).await
    }

    async fn communicate_started(&self, run_dir: &Path) -> anyhow::Result<()> {
        self.pb.set_message(format!("Run directory {}", run_dir.display()));
        self.inner.communicate_started(run_dir).await
    }

    async fn communicate_transition(&self, run_dir: &Path, message: &str) -> anyhow::Result<()> {
        if self.banners {
            self.pb
                .println(format!("{}", self.banner.apply_to(format!("═══ {message} ═══"))));
        }
        self.pb.set_message(message.to_string());
        self.inner.communicate_transition(run_dir, message).await
    }

    async fn communicate_results(&self, run_dir: &Path, results: &Value) -> anyhow::Result<()> {
        self.inner.communicate_results(run_dir, results).await
    }

    async fn communicate_complete(&self, run_dir: &Path) -> anyhow::Result<()> {
        self.pb.finish_and_clear();
        println!("  {} Workflow finished", self.green.apply_to("✓"));
        self.inner.communicate_complete(run_dir).await
    }

    async fn communicate_failure(&self, run_dir: &Path) -> anyhow::Result<()> {
        self.pb.finish_and_clear();
        println!("  {} Workflow failed, see {}", self.red.apply_to("✗"), run_dir.display());
        self.inner.communicate_failure(run_dir).await
    }
}
