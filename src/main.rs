mod cli;
mod ui;

use std::future::Future;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use serde_json::Value;
use tracing::{error, info, warn};

use cli::{Cli, Command, RunArgs};
use oswflow::logging::init_tracing;
use oswflow::{
    Adapter, CancelToken, CommandEngine, JobRegistry, LocalAdapter, Options, RunnerConfig, RunnerOptions, State,
    WebAdapter, WorkflowError, WorkflowRunner,
};
use ui::ProgressAdapter;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let Command::Run(args) = cli.command;
    match run(args, cli.verbose).await {
        Ok(code) => code,
        Err(err) => {
            error!("{err:#}");
            ExitCode::FAILURE
        }
    }
}

/// Drive `run` while listening for interrupts.
///
/// The first interrupt cancels the run before its next state. A second one
/// abandons it: the future is dropped, which kills any child process still
/// running. Returns `None` when the run was abandoned.
async fn supervise<F, S, I>(run: F, cancel: CancelToken, mut interrupt: S) -> Option<F::Output>
where
    F: Future,
    S: FnMut() -> I,
    I: Future<Output = ()>,
{
    tokio::pin!(run);
    tokio::select! {
        output = &mut run => return Some(output),
        () = interrupt() => {}
    }
    warn!("interrupt received, stopping before the next state (interrupt again to abort)");
    cancel.cancel();
    tokio::select! {
        output = &mut run => Some(output),
        () = interrupt() => {
            warn!("second interrupt received, abandoning the run");
            None
        }
    }
}

async fn ctrl_c() {
    if tokio::signal::ctrl_c().await.is_err() {
        std::future::pending::<()>().await;
    }
}

/// Options every job receives. Only settings that differ from the job
/// defaults are passed, so the workflow's own `run_options` still apply.
fn runner_options(args: &RunArgs, config: &RunnerConfig) -> Options {
    let mut options = Options::new();
    if args.debug || config.debug {
        options.insert("debug".into(), Value::Bool(true));
    }
    if !config.cleanup {
        options.insert("cleanup".into(), Value::Bool(false));
    }
    if let Some(secs) = args.timeout.or(config.simulation_timeout_secs) {
        options.insert("simulation_timeout_secs".into(), Value::from(secs));
    }
    options
}

async fn run(args: RunArgs, verbose: bool) -> anyhow::Result<ExitCode> {
    let config = RunnerConfig::load()?;
    let workflow = std::path::absolute(&args.workflow)?;
    let directory = workflow
        .parent()
        .map(Path::to_path_buf)
        .ok_or_else(|| WorkflowError::NoParent(workflow.clone()))?;

    let local = LocalAdapter::new(&workflow);
    let reporter: Arc<dyn Adapter> = match &args.status_url {
        Some(url) => Arc::new(WebAdapter::new(local, url.clone())?),
        None => Arc::new(local),
    };
    let adapter = Arc::new(ProgressAdapter::new(reporter, args.style_stdout));

    let options = runner_options(&args, &config);
    let debug = options.contains_key("debug");
    let mut runner = WorkflowRunner::new(
        adapter,
        directory,
        RunnerOptions {
            jobs: args.job_table(),
            registry: JobRegistry::builtin(),
            engine: Arc::new(CommandEngine::from_config(&config)),
            run_dir: PathBuf::from(&config.run_directory),
            preserve_run_dir: args.postprocess_only,
            options,
            dispatch: None,
            verbose: verbose || debug,
        },
    )?;

    let cancel = runner.cancel_token();
    let Some(state) = supervise(runner.run(), cancel, ctrl_c).await else {
        return Ok(ExitCode::from(130));
    };
    let state = state?;
    if let Some(message) = runner.final_message() {
        error!("{message}");
    }
    info!(profile = %runner.profile_path().display(), "timing profile written");
    if state == State::Finished {
        Ok(ExitCode::SUCCESS)
    } else {
        info!(%state, "workflow did not finish");
        Ok(ExitCode::FAILURE)
    }
}
