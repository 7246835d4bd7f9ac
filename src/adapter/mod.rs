//! Input retrieval and status reporting for a run.
//!
//! The runner and the initialization job talk to the outside world only
//! through [`Adapter`]. [`LocalAdapter`] works against the filesystem,
//! [`WebAdapter`] additionally reports status to an HTTP endpoint.

mod local;
mod web;

use std::path::Path;

use async_trait::async_trait;
use serde_json::Value;

use crate::state_machine::Options;

pub use local::LocalAdapter;
pub use web::WebAdapter;

/// The `get_*` inputs are looked up relative to the workflow directory. The
/// `communicate_*` hooks receive the run directory, where the local adapter
/// writes its marker files and `results.json`.
#[async_trait]
pub trait Adapter: Send + Sync {
    /// The workflow description for the run rooted at `directory`.
    async fn get_workflow(&self, directory: &Path, options: &Options) -> anyhow::Result<Value>;

    async fn get_datapoint(&self, directory: &Path, options: &Options) -> anyhow::Result<Option<Value>>;

    async fn get_analysis(&self, directory: &Path, options: &Options) -> anyhow::Result<Option<Value>>;

    /// The run in `run_dir` has begun.
    async fn communicate_started(&self, run_dir: &Path) -> anyhow::Result<()>;

    /// Progress message emitted around each state.
    async fn communicate_transition(&self, _run_dir: &Path, _message: &str) -> anyhow::Result<()> {
        Ok(())
    }

    /// Results produced by the reporting measures.
    async fn communicate_results(&self, run_dir: &Path, results: &Value) -> anyhow::Result<()>;

    async fn communicate_complete(&self, run_dir: &Path) -> anyhow::Result<()>;

    async fn communicate_failure(&self, run_dir: &Path) -> anyhow::Result<()>;
}
