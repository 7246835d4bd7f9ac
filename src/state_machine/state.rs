use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Result, WorkflowError};
use crate::state_machine::job::Options;

/// States of a workflow run.
///
/// The named variants make up the standard chain:
/// QUEUED → INITIALIZATION → OS_MEASURES → TRANSLATOR → EP_MEASURES →
/// PREPROCESS → SIMULATION → REPORTING_MEASURES → POSTPROCESS → FINISHED.
/// `Custom` covers states of caller-supplied job tables.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum State {
    Queued,
    Initialization,
    OsMeasures,
    Translator,
    EpMeasures,
    Preprocess,
    Simulation,
    ReportingMeasures,
    Postprocess,
    Finished,
    Errored,
    Custom(String),
}

impl State {
    pub fn as_str(&self) -> &str {
        match self {
            State::Queued => "queued",
            State::Initialization => "initialization",
            State::OsMeasures => "os_measures",
            State::Translator => "translator",
            State::EpMeasures => "ep_measures",
            State::Preprocess => "preprocess",
            State::Simulation => "simulation",
            State::ReportingMeasures => "reporting_measures",
            State::Postprocess => "postprocess",
            State::Finished => "finished",
            State::Errored => "errored",
            State::Custom(name) => name,
        }
    }

    /// `Finished` and `Errored` end a run.
    pub fn is_terminal(&self) -> bool {
        matches!(self, State::Finished | State::Errored)
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for State {
    fn from(name: &str) -> Self {
        match name {
            "queued" => State::Queued,
            "initialization" => State::Initialization,
            "os_measures" => State::OsMeasures,
            "translator" => State::Translator,
            "ep_measures" => State::EpMeasures,
            "preprocess" => State::Preprocess,
            "simulation" => State::Simulation,
            "reporting_measures" => State::ReportingMeasures,
            "postprocess" => State::Postprocess,
            "finished" => State::Finished,
            "errored" => State::Errored,
            other => State::Custom(other.to_string()),
        }
    }
}

impl From<String> for State {
    fn from(name: String) -> Self {
        State::from(name.as_str())
    }
}

impl From<State> for String {
    fn from(state: State) -> Self {
        match state {
            State::Custom(name) => name,
            other => other.as_str().to_string(),
        }
    }
}

/// One row of a job table: the job bound to `state` and where to go after it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobDescriptor {
    pub state: State,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_state: Option<State>,
    /// Identifier looked up in the job registry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job: Option<String>,
    #[serde(default, skip_serializing_if = "Options::is_empty")]
    pub options: Options,
}

impl JobDescriptor {
    /// A state that runs `job` and then moves to `next_state`.
    pub fn work(state: State, next_state: State, job: &str) -> Self {
        Self {
            state,
            next_state: Some(next_state),
            job: Some(job.to_string()),
            options: Options::new(),
        }
    }

    /// The job-less initial state.
    pub fn queued(next_state: State) -> Self {
        Self {
            state: State::Queued,
            next_state: Some(next_state),
            job: None,
            options: Options::new(),
        }
    }

    /// A terminal state: no job and no outgoing transition.
    pub fn terminal(state: State) -> Self {
        Self {
            state,
            next_state: None,
            job: None,
            options: Options::new(),
        }
    }

    pub fn with_options(mut self, options: Options) -> Self {
        self.options = options;
        self
    }
}

/// Ordered table of job descriptors forming a linear chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobTable {
    descriptors: Vec<JobDescriptor>,
}

impl JobTable {
    pub fn new(descriptors: Vec<JobDescriptor>) -> Self {
        Self { descriptors }
    }

    /// Build a table from `queued` through `work` to `finished`, plus `errored`.
    pub fn chain(work: &[(State, &str)]) -> Self {
        let mut descriptors = Vec::with_capacity(work.len() + 3);
        let first = work
            .first()
            .map(|(state, _)| state.clone())
            .unwrap_or(State::Finished);
        descriptors.push(JobDescriptor::queued(first));
        for (i, (state, job)) in work.iter().enumerate() {
            let next = work
                .get(i + 1)
                .map(|(state, _)| state.clone())
                .unwrap_or(State::Finished);
            descriptors.push(JobDescriptor::work(state.clone(), next, job));
        }
        descriptors.push(JobDescriptor::terminal(State::Finished));
        descriptors.push(JobDescriptor::terminal(State::Errored));
        Self { descriptors }
    }

    /// The full eight stage chain.
    pub fn standard() -> Self {
        Self::chain(&[
            (State::Initialization, "RunInitialization"),
            (State::OsMeasures, "RunOpenStudioMeasures"),
            (State::Translator, "RunTranslation"),
            (State::EpMeasures, "RunEnergyPlusMeasures"),
            (State::Preprocess, "RunPreprocess"),
            (State::Simulation, "RunEnergyPlus"),
            (State::ReportingMeasures, "RunReportingMeasures"),
            (State::Postprocess, "RunPostprocess"),
        ])
    }

    /// Apply measures and translate, without simulating.
    pub fn measures_only() -> Self {
        Self::chain(&[
            (State::Initialization, "RunInitialization"),
            (State::OsMeasures, "RunOpenStudioMeasures"),
            (State::Translator, "RunTranslation"),
            (State::EpMeasures, "RunEnergyPlusMeasures"),
            (State::Preprocess, "RunPreprocess"),
            (State::Postprocess, "RunPostprocess"),
        ])
    }

    /// Rerun reporting measures against an existing run directory.
    pub fn postprocess_only() -> Self {
        Self::chain(&[
            (State::Initialization, "RunInitialization"),
            (State::ReportingMeasures, "RunReportingMeasures"),
            (State::Postprocess, "RunPostprocess"),
        ])
    }

    pub fn get(&self, state: &State) -> Option<&JobDescriptor> {
        self.descriptors.iter().find(|d| &d.state == state)
    }

    pub fn descriptors(&self) -> &[JobDescriptor] {
        &self.descriptors
    }

    /// States with a job, in chain order starting after `queued`.
    pub fn work_states(&self) -> Vec<State> {
        let mut states = Vec::new();
        let mut current = self.get(&State::Queued).and_then(|d| d.next_state.clone());
        while let Some(state) = current {
            if state.is_terminal() || states.contains(&state) {
                break;
            }
            current = self.get(&state).and_then(|d| d.next_state.clone());
            states.push(state);
        }
        states
    }

    /// Check the structural invariants of the chain.
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for descriptor in &self.descriptors {
            if !seen.insert(&descriptor.state) {
                return invalid(format!("state {} appears twice", descriptor.state));
            }
            match &descriptor.state {
                State::Queued => {
                    if descriptor.job.is_some() {
                        return invalid("queued must not have a job".into());
                    }
                    if descriptor.next_state.is_none() {
                        return invalid("queued has no next state".into());
                    }
                }
                s if s.is_terminal() => {
                    if descriptor.job.is_some() || descriptor.next_state.is_some() {
                        return invalid(format!("terminal state {s} must not have a job or next state"));
                    }
                }
                s => {
                    if descriptor.job.is_none() {
                        return invalid(format!("state {s} has no job"));
                    }
                    if descriptor.next_state.is_none() {
                        return invalid(format!("state {s} has no next state"));
                    }
                }
            }
        }

        for required in [State::Queued, State::Finished, State::Errored] {
            if !seen.contains(&required) {
                return invalid(format!("missing state {required}"));
            }
        }

        for descriptor in &self.descriptors {
            if let Some(next) = &descriptor.next_state {
                if !seen.contains(next) {
                    return invalid(format!(
                        "state {} points at unknown state {next}",
                        descriptor.state
                    ));
                }
            }
        }

        // Walk from queued; a linear chain reaches finished without looping.
        let mut visited = HashSet::new();
        let mut current = State::Queued;
        while current != State::Finished {
            if !visited.insert(current.clone()) {
                return invalid(format!("chain loops back to {current}"));
            }
            current = match self.get(&current).and_then(|d| d.next_state.clone()) {
                Some(next) => next,
                None => return invalid(format!("chain stops at {current} before finished")),
            };
        }
        Ok(())
    }
}

impl Default for JobTable {
    fn default() -> Self {
        Self::standard()
    }
}

fn invalid(message: String) -> Result<()> {
    Err(WorkflowError::InvalidJobTable(message))
}
