//! Workflow description: seed model, weather, measure steps and search paths.
//!
//! The description is JSON. Only the keys the pipeline needs are typed; every
//! other key is carried through untouched so the output copy keeps it.

use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Result, WorkflowError};

const DEFAULT_FILE_PATHS: &[&str] = &["./files", "./weather", "../../files", "../../weather", "./"];
const DEFAULT_MEASURE_PATHS: &[&str] = &["./measures", "../../measures", "./"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MeasureType {
    ModelMeasure,
    EnergyPlusMeasure,
    ReportingMeasure,
}

impl MeasureType {
    const ALL: [MeasureType; 3] = [
        MeasureType::ModelMeasure,
        MeasureType::EnergyPlusMeasure,
        MeasureType::ReportingMeasure,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            MeasureType::ModelMeasure => "ModelMeasure",
            MeasureType::EnergyPlusMeasure => "EnergyPlusMeasure",
            MeasureType::ReportingMeasure => "ReportingMeasure",
        }
    }
}

impl fmt::Display for MeasureType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StepStatus {
    Success,
    Fail,
    Skip,
    NA,
}

/// A named value reported by a measure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepValue {
    pub name: String,
    pub value: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub units: Option<String>,
}

/// Outcome of applying one measure step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    pub step_result: StepStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub step_errors: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub step_warnings: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub step_info: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub step_values: Vec<StepValue>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub step_files: Vec<String>,
    /// Model or IDF written by the measure, when it produced a new one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_model: Option<String>,
}

impl StepResult {
    pub fn new(step_result: StepStatus) -> Self {
        Self {
            step_result,
            started_at: None,
            completed_at: None,
            step_errors: Vec::new(),
            step_warnings: Vec::new(),
            step_info: Vec::new(),
            step_values: Vec::new(),
            step_files: Vec::new(),
            output_model: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowStep {
    pub measure_dir_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub arguments: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub measure_type: Option<MeasureType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<StepResult>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl WorkflowStep {
    /// `name` when given, otherwise the measure directory name.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.measure_dir_name)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Workflow {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed_file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weather_file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_directory: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub out_name: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub file_paths: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub measure_paths: Vec<String>,
    #[serde(default)]
    pub steps: Vec<WorkflowStep>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub run_options: Map<String, Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Workflow {
    pub fn from_value(value: Value) -> Result<Self> {
        serde_json::from_value(value).map_err(|e| WorkflowError::InvalidWorkflow(e.to_string()))
    }

    pub fn to_value(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }

    /// Root directory, relative entries resolved against `osw_dir`.
    pub fn root_dir(&self, osw_dir: &Path) -> PathBuf {
        absolute(osw_dir, self.root.as_deref().unwrap_or("."))
    }

    pub fn out_name(&self) -> &str {
        self.out_name.as_deref().unwrap_or("out.osw")
    }

    pub fn file_search_paths(&self, osw_dir: &Path) -> Vec<PathBuf> {
        self.search_paths(osw_dir, &self.file_paths, DEFAULT_FILE_PATHS)
    }

    pub fn measure_search_paths(&self, osw_dir: &Path) -> Vec<PathBuf> {
        self.search_paths(osw_dir, &self.measure_paths, DEFAULT_MEASURE_PATHS)
    }

    fn search_paths(&self, osw_dir: &Path, configured: &[String], defaults: &[&str]) -> Vec<PathBuf> {
        let root = self.root_dir(osw_dir);
        configured
            .iter()
            .map(String::as_str)
            .chain(defaults.iter().copied())
            .map(|p| absolute(&root, p))
            .collect()
    }

    /// First existing file named `name`. Absolute names are checked as-is.
    pub fn find_file(&self, name: &str, osw_dir: &Path) -> Option<PathBuf> {
        find_in(name, &self.file_search_paths(osw_dir), Path::is_file)
    }

    /// First existing measure directory named `dir_name`.
    pub fn find_measure(&self, dir_name: &str, osw_dir: &Path) -> Option<PathBuf> {
        find_in(dir_name, &self.measure_search_paths(osw_dir), Path::is_dir)
    }

    /// Measure type declared on the step, else read from its `measure.xml`.
    pub fn measure_type(&self, step: &WorkflowStep, osw_dir: &Path) -> Result<MeasureType> {
        if let Some(measure_type) = step.measure_type {
            return Ok(measure_type);
        }
        let dir = self
            .find_measure(&step.measure_dir_name, osw_dir)
            .ok_or_else(|| WorkflowError::MeasureNotFound(step.measure_dir_name.clone()))?;
        read_measure_type(&dir)
    }

    /// Indices of the steps whose measures are of `measure_type`.
    pub fn steps_of_type(&self, measure_type: MeasureType, osw_dir: &Path) -> Result<Vec<usize>> {
        let mut indices = Vec::new();
        for (i, step) in self.steps.iter().enumerate() {
            if self.measure_type(step, osw_dir)? == measure_type {
                indices.push(i);
            }
        }
        Ok(indices)
    }

    /// Every measure directory is found, including for steps that declare
    /// their type, and measure types never go backwards: OpenStudio, then
    /// EnergyPlus, then reporting.
    pub fn validate_measures(&self, osw_dir: &Path) -> std::result::Result<(), Vec<String>> {
        let mut problems = Vec::new();
        let mut phase = MeasureType::ModelMeasure;

        for step in &self.steps {
            let name = &step.measure_dir_name;
            let found = self.find_measure(name, osw_dir).is_some();
            if !found {
                problems.push(WorkflowError::MeasureNotFound(name.clone()).to_string());
            }
            let measure_type = match (step.measure_type, found) {
                (Some(t), _) => t,
                (None, false) => continue,
                (None, true) => match self.measure_type(step, osw_dir) {
                    Ok(t) => t,
                    Err(e) => {
                        problems.push(e.to_string());
                        continue;
                    }
                },
            };
            match (measure_type, phase) {
                (MeasureType::ModelMeasure, MeasureType::EnergyPlusMeasure) => {
                    problems.push(format!("OpenStudio measure '{name}' called after transition to EnergyPlus"));
                }
                (MeasureType::ModelMeasure, MeasureType::ReportingMeasure) => {
                    problems.push(format!("OpenStudio measure '{name}' called after EnergyPlus simulation"));
                }
                (MeasureType::EnergyPlusMeasure, MeasureType::ReportingMeasure) => {
                    problems.push(format!("EnergyPlus measure '{name}' called after EnergyPlus simulation"));
                }
                (MeasureType::EnergyPlusMeasure, MeasureType::ModelMeasure) => {
                    phase = MeasureType::EnergyPlusMeasure;
                }
                (MeasureType::ReportingMeasure, _) => phase = MeasureType::ReportingMeasure,
                _ => {}
            }
        }

        if problems.is_empty() { Ok(()) } else { Err(problems) }
    }
}

fn absolute(base: &Path, path: &str) -> PathBuf {
    let path = Path::new(path);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

fn find_in(name: &str, search_paths: &[PathBuf], exists: fn(&Path) -> bool) -> Option<PathBuf> {
    let candidate = Path::new(name);
    if candidate.is_absolute() {
        return exists(candidate).then(|| candidate.to_path_buf());
    }
    search_paths
        .iter()
        .map(|dir| dir.join(candidate))
        .find(|p| exists(p))
}

/// Pull the measure type out of a measure directory's `measure.xml`.
fn read_measure_type(measure_dir: &Path) -> Result<MeasureType> {
    let xml_path = measure_dir.join("measure.xml");
    let xml = std::fs::read_to_string(&xml_path)?;
    MeasureType::ALL
        .into_iter()
        .find(|t| xml.contains(&format!("<value>{}</value>", t.as_str())))
        .ok_or_else(|| {
            WorkflowError::InvalidWorkflow(format!("no measure type found in {}", xml_path.display()))
        })
}
