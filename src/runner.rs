use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use indexmap::IndexMap;
use serde_json::Value;
use tracing::instrument::WithSubscriber;
use tracing::{Dispatch, Instrument, debug, error, info, info_span, warn};
use uuid::Uuid;

use crate::adapter::Adapter;
use crate::config::RunnerConfig;
use crate::context::Context;
use crate::engine::{CommandEngine, Engine};
use crate::error::{Result, WorkflowError};
use crate::jobs::keys;
use crate::logging;
use crate::state_machine::{JobArgs, JobFactory, JobRegistry, JobTable, Options, State, merge_options};
use crate::timing::TimeLogger;

pub const PROFILE_FILE: &str = "profile.json";

/// Shared flag that stops a run before its next state.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// How a [`WorkflowRunner`] is put together.
pub struct RunnerOptions {
    pub jobs: JobTable,
    pub registry: JobRegistry,
    pub engine: Arc<dyn Engine>,
    /// Run directory; relative paths are resolved against the workflow directory.
    pub run_dir: PathBuf,
    /// Keep an existing run directory instead of recreating it.
    pub preserve_run_dir: bool,
    /// Options handed to every job, under each descriptor's own options.
    pub options: Options,
    /// Log sink for the run. Defaults to stderr plus `run.log`.
    pub dispatch: Option<Dispatch>,
    pub verbose: bool,
}

impl Default for RunnerOptions {
    fn default() -> Self {
        let config = RunnerConfig::default();
        Self {
            jobs: JobTable::standard(),
            registry: JobRegistry::builtin(),
            engine: Arc::new(CommandEngine::from_config(&config)),
            run_dir: PathBuf::from(config.run_directory),
            preserve_run_dir: false,
            options: Options::new(),
            dispatch: None,
            verbose: false,
        }
    }
}

/// Drives a workflow through its job table.
///
/// Starting in `queued`, each state's job is built, performed and its result
/// stored, then the runner follows the table to the next state. A job error
/// moves the run to `errored`. Whatever happens, the adapter gets exactly one
/// completion or failure notice and the timing profile is written.
pub struct WorkflowRunner {
    adapter: Arc<dyn Adapter>,
    engine: Arc<dyn Engine>,
    directory: PathBuf,
    run_dir: PathBuf,
    table: JobTable,
    factories: HashMap<State, JobFactory>,
    options: Options,
    context: Context,
    timer: TimeLogger,
    state: State,
    results: IndexMap<State, Value>,
    final_message: Option<String>,
    run_id: Uuid,
    cancel: CancelToken,
    dispatch: Dispatch,
}

impl WorkflowRunner {
    /// Validate the job table, resolve every job, and reset the run directory.
    pub fn new(adapter: Arc<dyn Adapter>, directory: impl Into<PathBuf>, options: RunnerOptions) -> Result<Self> {
        let RunnerOptions {
            jobs,
            registry,
            engine,
            run_dir,
            preserve_run_dir,
            options,
            dispatch,
            verbose,
        } = options;

        jobs.validate()?;
        let mut factories = HashMap::new();
        for descriptor in jobs.descriptors() {
            if let Some(job) = &descriptor.job {
                let factory = registry.get(job).ok_or_else(|| WorkflowError::UnknownJob {
                    state: descriptor.state.clone(),
                    job: job.clone(),
                })?;
                factories.insert(descriptor.state.clone(), Arc::clone(factory));
            }
        }

        let directory = directory.into();
        let run_dir = directory.join(run_dir);
        if !preserve_run_dir && run_dir.exists() {
            std::fs::remove_dir_all(&run_dir)?;
        }
        std::fs::create_dir_all(&run_dir)?;

        let dispatch = match dispatch {
            Some(dispatch) => dispatch,
            None => logging::run_dispatch(&run_dir, verbose)?,
        };

        let run_id = Uuid::new_v4();
        let mut context = Context::new();
        context.register_value(keys::DIRECTORY, directory.display().to_string());
        context.register_value(keys::RUN_DIR, run_dir.display().to_string());
        context.register_value(keys::RUN_ID, run_id.to_string());

        Ok(Self {
            adapter,
            engine,
            directory,
            run_dir,
            table: jobs,
            factories,
            options,
            context,
            timer: TimeLogger::new(),
            state: State::Queued,
            results: IndexMap::new(),
            final_message: None,
            run_id,
            cancel: CancelToken::new(),
            dispatch,
        })
    }

    /// Run every state until `finished` or `errored` and return the final state.
    ///
    /// Adapter failures abort the loop and are returned as errors, but only
    /// after the terminal notice has been attempted and the profile written.
    pub async fn run(&mut self) -> Result<State> {
        let dispatch = self.dispatch.clone();
        let span = tracing::dispatcher::with_default(&dispatch, || {
            info_span!("workflow", run_id = %self.run_id)
        });
        self.run_to_end().instrument(span).with_subscriber(dispatch).await
    }

    async fn run_to_end(&mut self) -> Result<State> {
        info!(directory = %self.directory.display(), run_dir = %self.run_dir.display(), "starting workflow");
        let driven = self.drive().await;
        if let Err(err) = &driven {
            error!(error = %err, "workflow aborted");
        }

        let terminal = if self.state == State::Finished {
            self.adapter
                .communicate_complete(&self.run_dir)
                .await
                .map_err(|e| WorkflowError::adapter("communicate_complete", e))
        } else {
            self.adapter
                .communicate_failure(&self.run_dir)
                .await
                .map_err(|e| WorkflowError::adapter("communicate_failure", e))
        };

        self.timer.stop_all();
        let saved = self.timer.save(&self.profile_path());

        driven?;
        terminal?;
        saved?;
        info!(state = %self.state, "workflow complete");
        Ok(self.state.clone())
    }

    async fn drive(&mut self) -> Result<()> {
        self.adapter
            .communicate_started(&self.run_dir)
            .await
            .map_err(|e| WorkflowError::adapter("communicate_started", e))?;

        if self.state == State::Queued {
            self.next_state();
        }
        while !self.state.is_terminal() {
            self.step().await?;
        }

        if self.state == State::Finished {
            if let Some(results) = self.results.get(&State::ReportingMeasures).filter(|v| !v.is_null()) {
                self.adapter
                    .communicate_results(&self.run_dir, results)
                    .await
                    .map_err(|e| WorkflowError::adapter("communicate_results", e))?;
            }
        }
        Ok(())
    }

    /// Perform the job bound to the current state and advance.
    ///
    /// A job error is never returned: it is recorded as the final message and
    /// the state becomes `errored`. Only adapter failures surface as `Err`.
    pub async fn step(&mut self) -> Result<()> {
        let state = self.state.clone();
        if state.is_terminal() {
            return Ok(());
        }
        if self.cancel.is_cancelled() {
            let message = WorkflowError::Cancelled(state).to_string();
            warn!("{message}");
            self.final_message = Some(message);
            self.state = State::Errored;
            return Ok(());
        }
        let Some(factory) = self.factories.get(&state).cloned() else {
            self.next_state();
            return Ok(());
        };

        let descriptor_options = self
            .table
            .get(&state)
            .map(|d| d.options.clone())
            .unwrap_or_default();
        let options = merge_options(&self.options, &descriptor_options);

        self.communicate_transition(format!("Starting state {state}")).await?;
        self.timer.start(state.as_str());
        let outcome = {
            let args = JobArgs {
                adapter: self.adapter.as_ref(),
                engine: self.engine.as_ref(),
                context: &mut self.context,
                timer: &mut self.timer,
                directory: &self.directory,
                options,
            };
            let mut job = factory(args);
            job.perform().instrument(info_span!("state", name = %state)).await
        };
        if self.timer.is_open(state.as_str()) {
            self.timer.stop(state.as_str())?;
        }

        match outcome {
            Ok(value) => {
                self.results.insert(state.clone(), value);
                self.communicate_transition(format!("Returned from state {state}")).await?;
                self.next_state();
            }
            Err(err) => {
                let message = format!("Found error in state '{state}' with message: {err:?}");
                error!("{message}");
                self.final_message = Some(message);
                self.state = State::Errored;
            }
        }
        Ok(())
    }

    /// Move to the table's next state for the current state.
    pub fn next_state(&mut self) {
        if let Some(next) = self.table.get(&self.state).and_then(|d| d.next_state.clone()) {
            debug!(from = %self.state, to = %next, "transition");
            self.state = next;
        }
    }

    async fn communicate_transition(&self, message: String) -> Result<()> {
        self.adapter
            .communicate_transition(&self.run_dir, &message)
            .await
            .map_err(|e| WorkflowError::adapter("communicate_transition", e))
    }

    pub fn state(&self) -> &State {
        &self.state
    }

    /// Job results keyed by state, in the order the states completed.
    pub fn results(&self) -> &IndexMap<State, Value> {
        &self.results
    }

    /// Set only when the run errored.
    pub fn final_message(&self) -> Option<&str> {
        self.final_message.as_deref()
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    pub fn context_mut(&mut self) -> &mut Context {
        &mut self.context
    }

    pub fn timer(&self) -> &TimeLogger {
        &self.timer
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }

    pub fn profile_path(&self) -> PathBuf {
        self.run_dir.join(PROFILE_FILE)
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }
}
