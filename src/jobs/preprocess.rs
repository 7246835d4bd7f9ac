use std::path::Path;

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::{debug, info};

use super::{effective_options, keys, required_path, run_dir_from};
use crate::context::Context;
use crate::state_machine::{Job, JobArgs, Options, OptionsExt, merge_options};

const SQLITE_OUTPUT: &str = "\nOutput:SQLite,\n  SimpleAndTabular;        !- Option Type\n";

/// Stages `in.idf` and `in.epw` in the run directory for EnergyPlus.
pub struct RunPreprocess<'a> {
    context: &'a mut Context,
    options: Options,
}

pub(super) fn build<'a>(args: JobArgs<'a>) -> Box<dyn Job + 'a> {
    Box::new(RunPreprocess::new(args))
}

fn defaults() -> Options {
    let mut defaults = Options::new();
    defaults.insert("skip_energyplus_preprocess".into(), Value::Bool(false));
    defaults
}

impl<'a> RunPreprocess<'a> {
    pub fn new(args: JobArgs<'a>) -> Self {
        Self {
            context: args.context,
            options: args.options,
        }
    }
}

/// Make sure EnergyPlus writes its SQLite output. Returns whether the IDF changed.
async fn ensure_sqlite_output(idf: &Path) -> anyhow::Result<bool> {
    let text = tokio::fs::read_to_string(idf).await?;
    if text.to_ascii_lowercase().contains("output:sqlite") {
        return Ok(false);
    }
    tokio::fs::write(idf, format!("{text}{SQLITE_OUTPUT}")).await?;
    Ok(true)
}

#[async_trait]
impl<'a> Job for RunPreprocess<'a> {
    async fn perform(&mut self) -> anyhow::Result<Value> {
        let idf = required_path(self.context, keys::MODEL_IDF)?;
        let run_dir = run_dir_from(self.context)?;
        let options = merge_options(&defaults(), &effective_options(self.context, &self.options));

        let staged_idf = run_dir.join("in.idf");
        if idf != staged_idf {
            debug!(from = %idf.display(), "staging IDF");
            tokio::fs::copy(&idf, &staged_idf).await?;
        }

        let sqlite_added = if options.flag("skip_energyplus_preprocess") {
            info!("skipping EnergyPlus preprocessing");
            false
        } else {
            ensure_sqlite_output(&staged_idf).await?
        };

        let weather = match self.context.get_path(keys::WEATHER_FILE) {
            Some(weather) => {
                let staged = run_dir.join("in.epw");
                tokio::fs::copy(&weather, &staged).await?;
                let staged = staged.display().to_string();
                self.context.register_value(keys::SIMULATION_WEATHER, staged.clone());
                Value::String(staged)
            }
            None => Value::Null,
        };

        let staged_idf = staged_idf.display().to_string();
        self.context.register_value(keys::MODEL_IDF, staged_idf.clone());
        Ok(json!({
            "idf": staged_idf,
            "weather": weather,
            "sqlite_output_added": sqlite_added,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::testing::Harness;

    #[tokio::test]
    async fn stages_inputs_and_requests_sqlite() {
        let mut h = Harness::new();
        let idf = h.write("files/seed.idf", "Version,9.6;\n");
        let epw = h.write("weather/site.epw", "LOCATION,Golden");
        h.context.register_value(keys::MODEL_IDF, idf.display().to_string());
        h.context.register_value(keys::WEATHER_FILE, epw.display().to_string());

        let result = h.perform(build, Options::new()).await.unwrap();
        assert_eq!(result["sqlite_output_added"], json!(true));

        let staged = std::fs::read_to_string(h.run_dir().join("in.idf")).unwrap();
        assert!(staged.starts_with("Version,9.6;"));
        assert!(staged.contains("Output:SQLite,"));
        assert_eq!(std::fs::read_to_string(h.run_dir().join("in.epw")).unwrap(), "LOCATION,Golden");
        assert_eq!(h.context.get_path(keys::MODEL_IDF), Some(h.run_dir().join("in.idf")));
        assert_eq!(h.context.get_path(keys::SIMULATION_WEATHER), Some(h.run_dir().join("in.epw")));
    }

    #[tokio::test]
    async fn existing_sqlite_output_is_left_alone() {
        let mut h = Harness::new();
        let staged = h.run_dir().join("in.idf");
        std::fs::write(&staged, "Version,9.6;\noutput:sqlite,Simple;\n").unwrap();
        h.context.register_value(keys::MODEL_IDF, staged.display().to_string());

        let result = h.perform(build, Options::new()).await.unwrap();
        assert_eq!(result["sqlite_output_added"], json!(false));
        assert_eq!(result["weather"], Value::Null);
        assert_eq!(
            std::fs::read_to_string(&staged).unwrap(),
            "Version,9.6;\noutput:sqlite,Simple;\n"
        );
    }

    #[tokio::test]
    async fn preprocessing_can_be_skipped_from_run_options() {
        let mut h = Harness::new();
        let idf = h.write("files/seed.idf", "Version,9.6;\n");
        h.context.register_value(keys::MODEL_IDF, idf.display().to_string());
        h.context
            .register_value(keys::RUN_OPTIONS, json!({"skip_energyplus_preprocess": true}));

        h.perform(build, Options::new()).await.unwrap();
        let staged = std::fs::read_to_string(h.run_dir().join("in.idf")).unwrap();
        assert_eq!(staged, "Version,9.6;\n");
    }
}
