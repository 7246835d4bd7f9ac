use std::path::Path;

use anyhow::anyhow;
use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::{debug, info};

use super::keys;
use crate::adapter::Adapter;
use crate::context::Context;
use crate::error::WorkflowError;
use crate::state_machine::{Job, JobArgs, Options, OptionsExt};
use crate::workflow::Workflow;

/// Loads the workflow description and resolves its inputs.
pub struct RunInitialization<'a> {
    adapter: &'a dyn Adapter,
    context: &'a mut Context,
    directory: &'a Path,
    options: Options,
}

pub(super) fn build<'a>(args: JobArgs<'a>) -> Box<dyn Job + 'a> {
    Box::new(RunInitialization::new(args))
}

fn defaults() -> Options {
    let mut defaults = Options::new();
    defaults.insert("verify_osw".into(), Value::Bool(true));
    defaults
}

impl<'a> RunInitialization<'a> {
    pub fn new(args: JobArgs<'a>) -> Self {
        let options = args.options_with_defaults(&defaults());
        debug!(?options, "building RunInitialization");
        Self {
            adapter: args.adapter,
            context: args.context,
            directory: args.directory,
            options,
        }
    }

    fn resolve(&self, workflow: &Workflow, name: Option<&str>) -> Result<Value, WorkflowError> {
        match name {
            Some(name) => workflow
                .find_file(name, self.directory)
                .map(|p| Value::String(p.display().to_string()))
                .ok_or_else(|| WorkflowError::FileNotFound(name.to_string())),
            None => Ok(Value::Null),
        }
    }
}

#[async_trait]
impl<'a> Job for RunInitialization<'a> {
    async fn perform(&mut self) -> anyhow::Result<Value> {
        let value = self.adapter.get_workflow(self.directory, &self.options).await?;
        let workflow = Workflow::from_value(value)?;
        let datapoint = self.adapter.get_datapoint(self.directory, &self.options).await?;
        let analysis = self.adapter.get_analysis(self.directory, &self.options).await?;

        if self.options.flag("verify_osw") {
            workflow
                .validate_measures(self.directory)
                .map_err(|problems| anyhow!("workflow measures are invalid: {}", problems.join("; ")))?;
        }

        let model = self.resolve(&workflow, workflow.seed_file.as_deref())?;
        let weather = self.resolve(&workflow, workflow.weather_file.as_deref())?;
        info!(steps = workflow.steps.len(), %model, %weather, "workflow loaded");

        self.context.register_value(keys::WORKFLOW, workflow.to_value()?);
        self.context.register_value(keys::DATAPOINT, datapoint.unwrap_or(Value::Null));
        self.context.register_value(keys::ANALYSIS, analysis.unwrap_or(Value::Null));
        self.context
            .register_value(keys::RUN_OPTIONS, Value::Object(workflow.run_options.clone()));
        self.context.register_value(keys::MODEL, model.clone());
        self.context.register_value(keys::WEATHER_FILE, weather.clone());
        self.context.register_value(keys::STEP_RESULTS, Value::Array(Vec::new()));

        Ok(json!({
            "steps": workflow.steps.len(),
            "model": model,
            "weather_file": weather,
        }))
    }
}
