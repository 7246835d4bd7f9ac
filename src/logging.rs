//! Log sinks.
//!
//! The binary installs a stderr subscriber once at startup. Each run also gets
//! its own [`Dispatch`] that writes to stderr and to `run.log` inside the run
//! directory; the runner executes under it, so nothing process-wide changes
//! when a run starts.

use std::fs::File;
use std::path::Path;
use std::sync::Mutex;

use tracing::Dispatch;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{EnvFilter, Layer};

use crate::error::Result;

pub const RUN_LOG: &str = "run.log";

fn env_filter(verbose: bool) -> EnvFilter {
    let default = if verbose { "debug" } else { "info" };
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default))
}

/// Global stderr subscriber for the command line entry point.
pub fn init_tracing(verbose: bool) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter(verbose))
        .with_target(false)
        .try_init();
}

/// Per-run dispatch: stderr filtered by `RUST_LOG`, plus the full debug log in
/// `<run_dir>/run.log`.
pub fn run_dispatch(run_dir: &Path, verbose: bool) -> Result<Dispatch> {
    let file = File::create(run_dir.join(RUN_LOG))?;
    let subscriber = tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .with_filter(env_filter(verbose)),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(Mutex::new(file))
                .with_ansi(false)
                .with_filter(LevelFilter::DEBUG),
        );
    Ok(Dispatch::new(subscriber))
}
