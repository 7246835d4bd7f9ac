//! The standard jobs bound to the default job table.
//!
//! Jobs share data only through the [`Context`]; the keys they use are listed
//! in [`keys`].

mod initialization;
mod measures;
mod postprocess;
mod preprocess;
mod simulation;
mod translation;

#[cfg(test)]
mod testing;

use std::path::PathBuf;

use serde_json::Value;

use crate::context::Context;
use crate::error::{Result, WorkflowError};
use crate::state_machine::{JobRegistry, Options, merge_options};
use crate::workflow::Workflow;

pub use initialization::RunInitialization;
pub use measures::{MEASURES_DIR, REPORTS_DIR, RunMeasures};
pub use postprocess::RunPostprocess;
pub use preprocess::RunPreprocess;
pub use simulation::RunEnergyPlus;
pub use translation::RunTranslation;

/// Context keys written and read by the standard jobs.
pub mod keys {
    pub const DIRECTORY: &str = "directory";
    pub const RUN_DIR: &str = "run_dir";
    pub const RUN_ID: &str = "run_id";
    pub const WORKFLOW: &str = "workflow";
    pub const DATAPOINT: &str = "datapoint";
    pub const ANALYSIS: &str = "analysis";
    pub const RUN_OPTIONS: &str = "run_options";
    /// Current OSM model path.
    pub const MODEL: &str = "model";
    /// Current IDF path.
    pub const MODEL_IDF: &str = "model_idf";
    pub const WEATHER_FILE: &str = "weather_file";
    /// Weather file staged next to the IDF for EnergyPlus.
    pub const SIMULATION_WEATHER: &str = "simulation_weather";
    pub const STEP_RESULTS: &str = "step_results";
    pub const EPLUSOUT_ERR: &str = "eplusout_err";
}

pub fn register_builtin(registry: &mut JobRegistry) {
    registry
        .register("RunInitialization", initialization::build)
        .register("RunOpenStudioMeasures", measures::build_openstudio)
        .register("RunTranslation", translation::build)
        .register("RunEnergyPlusMeasures", measures::build_energyplus)
        .register("RunPreprocess", preprocess::build)
        .register("RunEnergyPlus", simulation::build)
        .register("RunReportingMeasures", measures::build_reporting)
        .register("RunPostprocess", postprocess::build);
}

fn workflow_from(context: &Context) -> Result<Workflow> {
    let value = context
        .get(keys::WORKFLOW)
        .cloned()
        .ok_or(WorkflowError::MissingContext(keys::WORKFLOW))?;
    Workflow::from_value(value)
}

fn run_dir_from(context: &Context) -> Result<PathBuf> {
    context
        .get_path(keys::RUN_DIR)
        .ok_or(WorkflowError::MissingContext(keys::RUN_DIR))
}

fn required_path(context: &Context, key: &'static str) -> Result<PathBuf> {
    context.get_path(key).ok_or(WorkflowError::MissingContext(key))
}

/// The workflow's own `run_options` overridden by the job's options.
fn effective_options(context: &Context, options: &Options) -> Options {
    let run_options = context
        .get(keys::RUN_OPTIONS)
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();
    merge_options(&run_options, options)
}
