use std::path::{Path, PathBuf};

use anyhow::{Context as _, bail};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Map, Value, json};
use tracing::{debug, info, warn};

use super::{keys, run_dir_from, workflow_from};
use crate::context::Context;
use crate::engine::{Engine, MeasureRequest};
use crate::error::WorkflowError;
use crate::state_machine::{Job, JobArgs};
use crate::timing::TimeLogger;
use crate::workflow::{MeasureType, StepResult, StepStatus, Workflow, WorkflowStep};

/// Scratch directories of OpenStudio and EnergyPlus measures, under the run directory.
pub const MEASURES_DIR: &str = "measures";
/// Scratch directories of reporting measures, under the run directory.
pub const REPORTS_DIR: &str = "reports";

/// Applies every workflow step of one measure type, in workflow order.
///
/// Each step gets its own scratch directory and timing channel. A step whose
/// result is `Fail` stops the job after its result has been recorded.
pub struct RunMeasures<'a> {
    measure_type: MeasureType,
    engine: &'a dyn Engine,
    context: &'a mut Context,
    timer: &'a mut TimeLogger,
    directory: &'a Path,
}

pub(super) fn build_openstudio<'a>(args: JobArgs<'a>) -> Box<dyn Job + 'a> {
    Box::new(RunMeasures::new(MeasureType::ModelMeasure, args))
}

pub(super) fn build_energyplus<'a>(args: JobArgs<'a>) -> Box<dyn Job + 'a> {
    Box::new(RunMeasures::new(MeasureType::EnergyPlusMeasure, args))
}

pub(super) fn build_reporting<'a>(args: JobArgs<'a>) -> Box<dyn Job + 'a> {
    Box::new(RunMeasures::new(MeasureType::ReportingMeasure, args))
}

impl<'a> RunMeasures<'a> {
    pub fn new(measure_type: MeasureType, args: JobArgs<'a>) -> Self {
        debug!(%measure_type, options = ?args.options, "building RunMeasures");
        Self {
            measure_type,
            engine: args.engine,
            context: args.context,
            timer: args.timer,
            directory: args.directory,
        }
    }

    /// Context key of the model this phase reads and may replace.
    fn model_key(&self) -> Option<&'static str> {
        match self.measure_type {
            MeasureType::ModelMeasure => Some(keys::MODEL),
            MeasureType::EnergyPlusMeasure => Some(keys::MODEL_IDF),
            MeasureType::ReportingMeasure => None,
        }
    }

    fn scratch_root(&self, run_dir: &Path) -> PathBuf {
        match self.measure_type {
            MeasureType::ReportingMeasure => run_dir.join(REPORTS_DIR),
            _ => run_dir.join(MEASURES_DIR),
        }
    }

    async fn apply(&mut self) -> anyhow::Result<Vec<WorkflowStep>> {
        let mut workflow = workflow_from(self.context)?;
        let run_dir = run_dir_from(self.context)?;
        let indices = workflow.steps_of_type(self.measure_type, self.directory)?;
        let scratch = self.scratch_root(&run_dir);
        let mut applied = Vec::with_capacity(indices.len());

        for index in indices {
            let step = workflow.steps[index].clone();
            let name = step.display_name().to_string();
            let measure_dir = workflow
                .find_measure(&step.measure_dir_name, self.directory)
                .ok_or_else(|| WorkflowError::MeasureNotFound(step.measure_dir_name.clone()))?;
            let step_dir = scratch.join(format!("{index:03}_{}", step.measure_dir_name));
            tokio::fs::create_dir_all(&step_dir).await?;
            let model = self.model_key().and_then(|key| self.context.get_path(key));

            info!(measure = %name, measure_type = %self.measure_type, "applying measure");
            let channel = format!("measure:{name}");
            self.timer.start(channel.clone());
            let started_at = Utc::now();
            let outcome = self
                .engine
                .apply_measure(MeasureRequest {
                    step: &step,
                    measure_type: self.measure_type,
                    measure_dir: &measure_dir,
                    model: model.as_deref(),
                    step_dir: &step_dir,
                    run_dir: &run_dir,
                })
                .await;
            self.timer.stop(&channel)?;

            let mut result = outcome.with_context(|| format!("applying measure '{name}'"))?;
            result.started_at.get_or_insert(started_at);
            result.completed_at.get_or_insert_with(Utc::now);

            if let (Some(key), Some(output)) = (self.model_key(), result.output_model.as_deref()) {
                let output = step_dir.join(output);
                debug!(key, model = %output.display(), "measure replaced the model");
                self.context.register_value(key, output.display().to_string());
            }

            workflow.steps[index].result = Some(result.clone());
            self.record(&workflow, &step, &result)?;

            for warning in &result.step_warnings {
                warn!(measure = %name, "{warning}");
            }
            if result.step_result == StepStatus::Fail {
                bail!("measure '{name}' failed: {}", result.step_errors.join("; "));
            }
            applied.push(workflow.steps[index].clone());
        }

        Ok(applied)
    }

    /// Write the step's result into the stored workflow and the step log.
    fn record(&mut self, workflow: &Workflow, step: &WorkflowStep, result: &StepResult) -> anyhow::Result<()> {
        self.context.register_value(keys::WORKFLOW, workflow.to_value()?);

        let mut step_results = self
            .context
            .get(keys::STEP_RESULTS)
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        let mut entry = Map::new();
        entry.insert("measure_dir_name".into(), Value::String(step.measure_dir_name.clone()));
        entry.insert("name".into(), Value::String(step.display_name().to_string()));
        entry.insert("measure_type".into(), Value::String(self.measure_type.to_string()));
        entry.insert("result".into(), serde_json::to_value(result)?);
        step_results.push(Value::Object(entry));
        self.context.register_value(keys::STEP_RESULTS, step_results);
        Ok(())
    }
}

/// `{measure name: {value name: value}}` for every applied reporting step.
fn reporting_results(steps: &[WorkflowStep]) -> Map<String, Value> {
    steps
        .iter()
        .filter_map(|step| {
            let result = step.result.as_ref()?;
            let values = result
                .step_values
                .iter()
                .map(|v| (v.name.clone(), v.value.clone()))
                .collect();
            Some((step.display_name().to_string(), Value::Object(values)))
        })
        .collect()
}

#[async_trait]
impl<'a> Job for RunMeasures<'a> {
    async fn perform(&mut self) -> anyhow::Result<Value> {
        let applied = self.apply().await?;
        info!(measure_type = %self.measure_type, count = applied.len(), "measures applied");
        match self.measure_type {
            MeasureType::ReportingMeasure => Ok(Value::Object(reporting_results(&applied))),
            _ => Ok(json!({ "applied": applied.len() })),
        }
    }
}
