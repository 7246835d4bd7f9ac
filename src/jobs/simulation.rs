use std::time::Duration;

use anyhow::{Context as _, bail};
use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::{error, info};

use super::{effective_options, keys, required_path, run_dir_from};
use crate::context::Context;
use crate::engine::{Engine, SimulationRequest};
use crate::state_machine::{Job, JobArgs, Options};

const FATAL_MARKER: &str = "**  Fatal  **";

/// Runs EnergyPlus on the staged IDF and checks how it ended.
pub struct RunEnergyPlus<'a> {
    engine: &'a dyn Engine,
    context: &'a mut Context,
    options: Options,
}

pub(super) fn build<'a>(args: JobArgs<'a>) -> Box<dyn Job + 'a> {
    Box::new(RunEnergyPlus::new(args))
}

impl<'a> RunEnergyPlus<'a> {
    pub fn new(args: JobArgs<'a>) -> Self {
        Self {
            engine: args.engine,
            context: args.context,
            options: args.options,
        }
    }

    fn timeout(&self) -> Option<Duration> {
        effective_options(self.context, &self.options)
            .get("simulation_timeout_secs")
            .and_then(Value::as_u64)
            .map(Duration::from_secs)
    }
}

#[async_trait]
impl<'a> Job for RunEnergyPlus<'a> {
    async fn perform(&mut self) -> anyhow::Result<Value> {
        let idf = required_path(self.context, keys::MODEL_IDF)?;
        let run_dir = run_dir_from(self.context)?;
        let weather = self.context.get_path(keys::SIMULATION_WEATHER);
        let timeout = self.timeout();

        info!(idf = %idf.display(), ?timeout, "running EnergyPlus");
        let output = self
            .engine
            .simulate(SimulationRequest {
                run_dir: &run_dir,
                idf: &idf,
                weather: weather.as_deref(),
                timeout,
            })
            .await
            .context("EnergyPlus could not be run")?;

        tokio::fs::write(run_dir.join("stdout-energyplus"), &output.stdout).await?;
        if !output.stderr.is_empty() {
            tokio::fs::write(run_dir.join("stderr-energyplus"), &output.stderr).await?;
        }

        let err_path = run_dir.join("eplusout.err");
        if tokio::fs::try_exists(&err_path).await? {
            self.context
                .register_value(keys::EPLUSOUT_ERR, err_path.display().to_string());
            let err_text = tokio::fs::read_to_string(&err_path).await?;
            if err_text.contains(FATAL_MARKER) {
                error!(path = %err_path.display(), "EnergyPlus reported a fatal error");
                bail!("EnergyPlus terminated with a fatal error, see {}", err_path.display());
            }
        }

        match output.exit_code {
            Some(0) => Ok(json!({ "exit_code": 0 })),
            Some(code) => bail!("EnergyPlus returned a non-zero exit code ({code})"),
            None => bail!("EnergyPlus was terminated by a signal"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::testing::{FakeEngine, Harness};

    fn staged(h: &mut Harness) {
        let idf = h.run_dir().join("in.idf");
        std::fs::write(&idf, "Version,9.6;").unwrap();
        h.context.register_value(keys::MODEL_IDF, idf.display().to_string());
    }

    #[tokio::test]
    async fn successful_simulation_registers_err_file() {
        let mut h = Harness::new();
        staged(&mut h);
        let epw = h.run_dir().join("in.epw");
        h.context
            .register_value(keys::SIMULATION_WEATHER, epw.display().to_string());
        let mut options = Options::new();
        options.insert("simulation_timeout_secs".into(), json!(600));

        let result = h.perform(build, options).await.unwrap();
        assert_eq!(result, json!({"exit_code": 0}));
        assert_eq!(h.context.get_path(keys::EPLUSOUT_ERR), Some(h.run_dir().join("eplusout.err")));
        assert!(h.run_dir().join("stdout-energyplus").is_file());

        let simulated = h.engine.simulated.lock().unwrap().clone();
        assert_eq!(simulated[0].weather, Some(epw));
        assert_eq!(simulated[0].timeout_secs, Some(600));
    }

    #[tokio::test]
    async fn fatal_error_in_err_file_fails() {
        let mut h = Harness::new();
        h.engine = FakeEngine {
            eplusout_err: "   **  Fatal  ** GetInput: errors found".to_string(),
            ..FakeEngine::new()
        };
        staged(&mut h);
        let err = h.perform(build, Options::new()).await.unwrap_err();
        assert!(err.to_string().starts_with("EnergyPlus terminated with a fatal error"));
    }

    #[tokio::test]
    async fn non_zero_exit_fails() {
        let mut h = Harness::new();
        h.engine = FakeEngine {
            exit_code: Some(2),
            ..FakeEngine::new()
        };
        staged(&mut h);
        let err = h.perform(build, Options::new()).await.unwrap_err();
        assert_eq!(err.to_string(), "EnergyPlus returned a non-zero exit code (2)");
    }
}
