pub mod config;
pub mod context;
pub mod layers;

pub use context::{detect_context, ExecutionContext};
pub use layers::console::ConsoleOutput;

use crate::cli::commands::resolve_workspace;
use crate::logging::config::LoggingConfig;
use crate::logging::layers::{console, file, BoxedLayer};
use crate::{cli::Command, Result};
use anyhow::{anyhow, Context};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::prelude::*;
use tracing_subscriber::Registry;

static LOGGER_INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Keeps the audit log writer alive; drop it to flush before exiting.
pub struct LoggingGuard {
    _file_guard: Option<tracing_appender::non_blocking::WorkerGuard>,
    log_dir: Option<PathBuf>,
}

impl LoggingGuard {
    /// Directory of the audit log, when the file sink is enabled.
    pub fn log_dir(&self) -> Option<&PathBuf> {
        self.log_dir.as_ref()
    }
}

/// Initialize logging for the provided CLI command.
///
/// Filters come from `RUST_LOG` when set, otherwise from `logging.default_level`.
/// Errors when invoked more than once per process unless tests reset the guard.
pub fn init(command: &Command) -> Result<LoggingGuard> {
    if LOGGER_INITIALIZED
        .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
        .is_err()
    {
        return Err(anyhow!("logging already initialized"));
    }

    let context = detect_context(command);
    let workspace_root = resolve_workspace(command.workspace()).ok();
    let config = LoggingConfig::load(workspace_root.as_deref())?;

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.default_level))
        .context("failed to configure tracing level")?;

    let mut sinks: Vec<BoxedLayer<Registry>> = Vec::new();
    let mut file_guard = None;
    let mut log_dir = None;
    if config.enable_file {
        let directory = file::log_dir(&config, workspace_root.as_deref())?;
        let (layer, guard) = file::file_layer(&directory, config.rotation)?;
        sinks.push(layer);
        file_guard = Some(guard);
        log_dir = Some(directory);
    }
    let console_output = console::select_console_output(context, config.console_output);
    if let Some(layer) = console::console_layer(console_output) {
        sinks.push(layer);
    }

    tracing_subscriber::registry()
        .with(sinks)
        .with(env_filter)
        .try_init()
        .context("failed to install tracing subscriber")?;

    Ok(LoggingGuard {
        _file_guard: file_guard,
        log_dir,
    })
}

#[cfg(test)]
/// Reset the initialization guard so tests can reconfigure logging multiple times.
pub fn reset_for_tests() {
    LOGGER_INITIALIZED.store(false, Ordering::SeqCst);
}
