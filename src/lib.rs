//! Runs a building energy workflow as a chain of jobs.
//!
//! A [`WorkflowRunner`] walks a [`JobTable`] from `queued` to `finished` (or
//! `errored`), building the job bound to each state from a [`JobRegistry`].
//! Jobs share data through the [`Context`], time themselves with the
//! [`TimeLogger`] and reach the outside world through an [`Adapter`] and an
//! [`Engine`].

pub mod adapter;
pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod jobs;
pub mod logging;
pub mod runner;
pub mod state_machine;
pub mod timing;
pub mod workflow;

pub use adapter::{Adapter, LocalAdapter, WebAdapter};
pub use config::RunnerConfig;
pub use context::Context;
pub use engine::{CommandEngine, Engine};
pub use error::{Result, WorkflowError};
pub use runner::{CancelToken, RunnerOptions, WorkflowRunner};
pub use state_machine::{Job, JobArgs, JobDescriptor, JobRegistry, JobTable, Options, State};
pub use timing::{TimeLogger, TimingRecord};
pub use workflow::Workflow;
