//! Boundary to the external simulation tooling.
//!
//! Measures, model translation and EnergyPlus itself are opaque programs. The
//! jobs only see the [`Engine`] trait; [`CommandEngine`] drives real
//! executables as child processes.

use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use std::time::Duration;

use anyhow::{Context as _, bail};
use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info};

use crate::config::RunnerConfig;
use crate::error::WorkflowError;
use crate::state_machine::Options;
use crate::workflow::{MeasureType, StepResult, StepStatus, WorkflowStep};

/// One measure application.
#[derive(Debug, Clone, Copy)]
pub struct MeasureRequest<'a> {
    pub step: &'a WorkflowStep,
    pub measure_type: MeasureType,
    pub measure_dir: &'a Path,
    /// Current OSM model (OpenStudio measures) or IDF (EnergyPlus measures).
    pub model: Option<&'a Path>,
    /// Scratch directory reserved for this step.
    pub step_dir: &'a Path,
    /// The run directory, where reporting measures find simulation output.
    pub run_dir: &'a Path,
}

#[derive(Debug, Clone, Copy)]
pub struct SimulationRequest<'a> {
    pub run_dir: &'a Path,
    pub idf: &'a Path,
    pub weather: Option<&'a Path>,
    pub timeout: Option<Duration>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SimulationOutput {
    /// `None` when the process was terminated by a signal.
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

#[async_trait]
pub trait Engine: Send + Sync {
    async fn apply_measure(&self, request: MeasureRequest<'_>) -> anyhow::Result<StepResult>;

    /// Translate an OSM model to an IDF inside `run_dir`, returning its path.
    async fn translate(&self, model: &Path, run_dir: &Path, ft_options: &Options) -> anyhow::Result<PathBuf>;

    async fn simulate(&self, request: SimulationRequest<'_>) -> anyhow::Result<SimulationOutput>;
}

/// Runs the engine tools as child processes.
///
/// Measures and translation are invoked through configured argv prefixes;
/// the arguments appended after the prefix are fixed flags
/// (`--measure-dir`, `--model`, `--output-dir`, ...).
#[derive(Debug, Clone)]
pub struct CommandEngine {
    pub energyplus: PathBuf,
    pub measure_command: Vec<String>,
    pub translator_command: Vec<String>,
}

impl CommandEngine {
    pub fn from_config(config: &RunnerConfig) -> Self {
        Self {
            energyplus: PathBuf::from(&config.energyplus_exe),
            measure_command: config.measure_command.clone(),
            translator_command: config.translator_command.clone(),
        }
    }
}

async fn run_command(
    program: &Path,
    args: &[String],
    cwd: &Path,
    timeout: Option<Duration>,
) -> anyhow::Result<Output> {
    debug!(program = %program.display(), ?args, "spawning");
    let child = Command::new(program)
        .args(args)
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .with_context(|| format!("failed to start {}", program.display()))?;

    let output = child.wait_with_output();
    let output = match timeout {
        Some(limit) => tokio::time::timeout(limit, output).await.map_err(|_| WorkflowError::Timeout {
            command: program.display().to_string(),
            secs: limit.as_secs(),
        })??,
        None => output.await?,
    };
    Ok(output)
}

fn split_command(command: &[String]) -> anyhow::Result<(&Path, &[String])> {
    match command.split_first() {
        Some((program, rest)) => Ok((Path::new(program), rest)),
        None => bail!("command is empty"),
    }
}

#[async_trait]
impl Engine for CommandEngine {
    async fn apply_measure(&self, request: MeasureRequest<'_>) -> anyhow::Result<StepResult> {
        if self.measure_command.is_empty() {
            bail!(
                "no measure command configured, cannot apply '{}'",
                request.step.display_name()
            );
        }
        let (program, prefix) = split_command(&self.measure_command)?;
        let mut args = prefix.to_vec();
        args.extend([
            "--measure-dir".to_string(),
            request.measure_dir.display().to_string(),
            "--measure-type".to_string(),
            request.measure_type.to_string(),
            "--output-dir".to_string(),
            request.step_dir.display().to_string(),
            "--run-dir".to_string(),
            request.run_dir.display().to_string(),
            "--arguments".to_string(),
            serde_json::to_string(&request.step.arguments)?,
        ]);
        if let Some(model) = request.model {
            args.extend(["--model".to_string(), model.display().to_string()]);
        }

        let output = run_command(program, &args, request.step_dir, None).await?;
        let result_path = request.step_dir.join("result.json");
        if tokio::fs::try_exists(&result_path).await? {
            let text = tokio::fs::read_to_string(&result_path).await?;
            return serde_json::from_str(&text)
                .with_context(|| format!("parsing {}", result_path.display()));
        }

        let mut result = StepResult::new(if output.status.success() {
            StepStatus::Success
        } else {
            StepStatus::Fail
        });
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        if !output.status.success() && !stderr.is_empty() {
            result.step_errors.push(stderr);
        }
        Ok(result)
    }

    async fn translate(&self, model: &Path, run_dir: &Path, ft_options: &Options) -> anyhow::Result<PathBuf> {
        if self.translator_command.is_empty() {
            bail!("no translator command configured, cannot translate {}", model.display());
        }
        let (program, prefix) = split_command(&self.translator_command)?;
        let idf = run_dir.join("in.idf");
        let mut args = prefix.to_vec();
        args.extend([
            "--model".to_string(),
            model.display().to_string(),
            "--output".to_string(),
            idf.display().to_string(),
        ]);
        for (key, value) in ft_options {
            args.push(format!("--ft-option={key}={value}"));
        }

        let output = run_command(program, &args, run_dir, None).await?;
        if !output.status.success() {
            bail!(
                "translator exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        if !tokio::fs::try_exists(&idf).await? {
            bail!("translator did not write {}", idf.display());
        }
        Ok(idf)
    }

    async fn simulate(&self, request: SimulationRequest<'_>) -> anyhow::Result<SimulationOutput> {
        let mut args = vec!["-d".to_string(), request.run_dir.display().to_string()];
        if let Some(weather) = request.weather {
            args.extend(["-w".to_string(), weather.display().to_string()]);
        }
        args.push(request.idf.display().to_string());

        info!(energyplus = %self.energyplus.display(), "starting EnergyPlus");
        let output = run_command(&self.energyplus, &args, request.run_dir, request.timeout).await?;
        Ok(SimulationOutput {
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::workflow::Workflow;
    use serde_json::json;

    fn engine(energyplus: &str) -> CommandEngine {
        CommandEngine {
            energyplus: PathBuf::from(energyplus),
            measure_command: Vec::new(),
            translator_command: Vec::new(),
        }
    }

    #[tokio::test]
    async fn simulate_reports_exit_code() {
        let dir = tempfile::tempdir().unwrap();
        let idf = dir.path().join("in.idf");
        std::fs::write(&idf, "Version,9.6;").unwrap();
        let output = engine("true")
            .simulate(SimulationRequest {
                run_dir: dir.path(),
                idf: &idf,
                weather: None,
                timeout: None,
            })
            .await
            .unwrap();
        assert_eq!(output.exit_code, Some(0));

        let output = engine("false")
            .simulate(SimulationRequest {
                run_dir: dir.path(),
                idf: &idf,
                weather: None,
                timeout: None,
            })
            .await
            .unwrap();
        assert_eq!(output.exit_code, Some(1));
    }

    #[tokio::test]
    async fn run_command_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let err = run_command(
            Path::new("sleep"),
            &["5".to_string()],
            dir.path(),
            Some(Duration::from_millis(50)),
        )
        .await
        .unwrap_err();
        let err = err.downcast::<WorkflowError>().unwrap();
        assert!(matches!(err, WorkflowError::Timeout { .. }));
    }

    #[tokio::test]
    async fn missing_measure_command_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let workflow = Workflow::from_value(json!({"steps": [{"measure_dir_name": "m"}]})).unwrap();
        let err = engine("energyplus")
            .apply_measure(MeasureRequest {
                step: &workflow.steps[0],
                measure_type: MeasureType::ModelMeasure,
                measure_dir: dir.path(),
                model: None,
                step_dir: dir.path(),
                run_dir: dir.path(),
            })
            .await
            .unwrap_err();
        assert!(err.to_string().contains("no measure command configured"));
    }

    #[tokio::test]
    async fn measure_exit_status_becomes_step_result() {
        let dir = tempfile::tempdir().unwrap();
        let workflow = Workflow::from_value(json!({"steps": [{"measure_dir_name": "m"}]})).unwrap();
        let mut engine = engine("energyplus");
        engine.measure_command = vec!["true".to_string()];
        let result = engine
            .apply_measure(MeasureRequest {
                step: &workflow.steps[0],
                measure_type: MeasureType::ModelMeasure,
                measure_dir: dir.path(),
                model: None,
                step_dir: dir.path(),
                run_dir: dir.path(),
            })
            .await
            .unwrap();
        assert_eq!(result.step_result, StepStatus::Success);
    }
}
