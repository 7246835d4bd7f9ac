//! Fakes shared by the job tests.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;

use super::keys;
use crate::adapter::LocalAdapter;
use crate::context::Context;
use crate::engine::{Engine, MeasureRequest, SimulationOutput, SimulationRequest};
use crate::state_machine::{Job, JobArgs, Options};
use crate::timing::TimeLogger;
use crate::workflow::{MeasureType, StepResult, StepStatus, StepValue};

pub(super) type Builder = for<'a> fn(JobArgs<'a>) -> Box<dyn Job + 'a>;

/// Engine that records calls and answers from canned results.
#[derive(Default)]
pub(super) struct FakeEngine {
    pub results: Mutex<HashMap<String, StepResult>>,
    /// `(measure_dir_name, model)` per applied measure.
    pub applied: Mutex<Vec<(String, Option<PathBuf>)>>,
    pub translated: Mutex<Vec<Options>>,
    pub simulated: Mutex<Vec<SimulationRequestRecord>>,
    pub exit_code: Option<i32>,
    pub eplusout_err: String,
}

#[derive(Debug, Clone)]
pub(super) struct SimulationRequestRecord {
    pub idf: PathBuf,
    pub weather: Option<PathBuf>,
    pub timeout_secs: Option<u64>,
}

impl FakeEngine {
    pub fn new() -> Self {
        Self {
            exit_code: Some(0),
            eplusout_err: "EnergyPlus Completed Successfully-- 0 Warning; 0 Severe Errors".to_string(),
            ..Default::default()
        }
    }

    pub fn answer(&self, measure_dir_name: &str, result: StepResult) {
        self.results
            .lock()
            .unwrap()
            .insert(measure_dir_name.to_string(), result);
    }
}

#[async_trait]
impl Engine for FakeEngine {
    async fn apply_measure(&self, request: MeasureRequest<'_>) -> anyhow::Result<StepResult> {
        let name = request.step.measure_dir_name.clone();
        self.applied
            .lock()
            .unwrap()
            .push((name.clone(), request.model.map(Path::to_path_buf)));
        let canned = self.results.lock().unwrap().get(&name).cloned();
        Ok(canned.unwrap_or_else(|| {
            let mut result = StepResult::new(StepStatus::Success);
            result.step_values.push(StepValue {
                name: "applied".to_string(),
                value: Value::Bool(true),
                units: None,
            });
            result
        }))
    }

    async fn translate(&self, _model: &Path, run_dir: &Path, ft_options: &Options) -> anyhow::Result<PathBuf> {
        self.translated.lock().unwrap().push(ft_options.clone());
        let idf = run_dir.join("in.idf");
        std::fs::write(&idf, "Version,9.6;\n")?;
        Ok(idf)
    }

    async fn simulate(&self, request: SimulationRequest<'_>) -> anyhow::Result<SimulationOutput> {
        self.simulated.lock().unwrap().push(SimulationRequestRecord {
            idf: request.idf.to_path_buf(),
            weather: request.weather.map(Path::to_path_buf),
            timeout_secs: request.timeout.map(|t| t.as_secs()),
        });
        std::fs::write(request.run_dir.join("eplusout.err"), &self.eplusout_err)?;
        Ok(SimulationOutput {
            exit_code: self.exit_code,
            stdout: "EnergyPlus Starting\n".to_string(),
            stderr: String::new(),
        })
    }
}

/// A workflow directory with a `run/` subdirectory registered in a fresh context.
pub(super) struct Harness {
    pub dir: tempfile::TempDir,
    pub adapter: LocalAdapter,
    pub engine: FakeEngine,
    pub context: Context,
    pub timer: TimeLogger,
}

impl Harness {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let run_dir = dir.path().join("run");
        std::fs::create_dir_all(&run_dir).unwrap();
        let mut context = Context::new();
        context.register_value(keys::DIRECTORY, dir.path().display().to_string());
        context.register_value(keys::RUN_DIR, run_dir.display().to_string());
        Self {
            adapter: LocalAdapter::new(dir.path().join("workflow.osw")),
            dir,
            engine: FakeEngine::new(),
            context,
            timer: TimeLogger::new(),
        }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn run_dir(&self) -> PathBuf {
        self.dir.path().join("run")
    }

    pub fn write(&self, relative: &str, contents: &str) -> PathBuf {
        let path = self.dir.path().join(relative);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, contents).unwrap();
        path
    }

    pub fn measure(&self, name: &str, measure_type: MeasureType) {
        self.write(
            &format!("measures/{name}/measure.xml"),
            &format!("<measure><value>{measure_type}</value></measure>"),
        );
    }

    /// Register `workflow` the way initialization does.
    pub fn load_workflow(&mut self, workflow: Value) {
        let run_options = workflow.get("run_options").cloned().unwrap_or(Value::Null);
        self.context.register_value(keys::WORKFLOW, workflow);
        self.context.register_value(keys::RUN_OPTIONS, run_options);
        self.context.register_value(keys::STEP_RESULTS, Value::Array(Vec::new()));
    }

    pub async fn perform(&mut self, build: Builder, options: Options) -> anyhow::Result<Value> {
        let mut job = build(JobArgs {
            adapter: &self.adapter,
            engine: &self.engine,
            context: &mut self.context,
            timer: &mut self.timer,
            directory: self.dir.path(),
            options,
        });
        job.perform().await
    }
}
