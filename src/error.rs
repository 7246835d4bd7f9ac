use std::path::PathBuf;

use thiserror::Error;

use crate::state_machine::State;

#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("No job named `{job}` is registered (bound to state {state})")]
    UnknownJob { state: State, job: String },

    #[error("Invalid job table: {0}")]
    InvalidJobTable(String),

    #[error("Timing channel `{0}` was stopped without being started")]
    ChannelNotStarted(String),

    #[error("Adapter call `{call}` failed: {message}")]
    Adapter { call: &'static str, message: String },

    #[error("Invalid workflow description: {0}")]
    InvalidWorkflow(String),

    #[error("Cannot find measure `{0}` in any measure path")]
    MeasureNotFound(String),

    #[error("Cannot find file `{0}` in any file path")]
    FileNotFound(String),

    #[error("Required context entry `{0}` is missing")]
    MissingContext(&'static str),

    #[error("Workflow cancelled before state {0}")]
    Cancelled(State),

    #[error("`{command}` did not finish within {secs}s")]
    Timeout { command: String, secs: u64 },

    #[error("Path {0} has no parent directory")]
    NoParent(PathBuf),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl WorkflowError {
    /// Wrap a failed adapter call, keeping the whole cause chain in the message.
    pub fn adapter(call: &'static str, err: anyhow::Error) -> Self {
        WorkflowError::Adapter {
            call,
            message: format!("{err:#}"),
        }
    }
}

pub type Result<T, E = WorkflowError> = std::result::Result<T, E>;
