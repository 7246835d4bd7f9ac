//! Command line interface, built on clap.
//!
//! [`Cli`] carries the global `--verbose` flag and the [`Command`] to run.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use oswflow::JobTable;

/// Workflow job pipeline for building energy simulations.
#[derive(Debug, Parser)]
#[command(name = "oswflow", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Log at debug level.
    #[arg(long, short, global = true, default_value_t = false)]
    pub verbose: bool,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run a workflow description through the job pipeline.
    Run(RunArgs),
}

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Workflow description (OSW) to run.
    #[arg(long, short, value_name = "FILE", default_value = "workflow.osw")]
    pub workflow: PathBuf,

    /// Apply measures and translate, without simulating.
    #[arg(long, short, conflicts_with = "postprocess_only")]
    pub measures_only: bool,

    /// Rerun reporting measures and postprocessing on an existing run directory.
    #[arg(long, short)]
    pub postprocess_only: bool,

    /// Keep intermediate files.
    #[arg(long)]
    pub debug: bool,

    /// Report run status to this HTTP endpoint.
    #[arg(long, value_name = "URL")]
    pub status_url: Option<String>,

    /// Simulation timeout in seconds.
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Print a banner for every state transition.
    #[arg(long)]
    pub style_stdout: bool,
}

impl RunArgs {
    pub fn job_table(&self) -> JobTable {
        if self.measures_only {
            JobTable::measures_only()
        } else if self.postprocess_only {
            JobTable::postprocess_only()
        } else {
            JobTable::standard()
        }
    }
}
