//! Process audit log.
//!
//! One JSON object per line with event fields flattened to the top level, so a
//! finished process can be found with `jq 'select(.process_id == "...")'`.

use crate::logging::config::{LogRotation, LoggingConfig};
use crate::logging::layers::BoxedLayer;
use crate::Result;
use anyhow::{anyhow, Context};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::Subscriber;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::RollingFileAppender;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::Layer;

pub const LOG_FILE_NAME: &str = "toolgate.log";

/// Directory holding the audit log.
///
/// An absolute `log_dir` is used as is; a relative one is taken from the workspace,
/// or from the home directory when there is no workspace.
pub fn log_dir(config: &LoggingConfig, workspace_root: Option<&Path>) -> Result<PathBuf> {
    let default_dir = Path::new(".toolgate").join("logs");
    let relative = match &config.log_dir {
        Some(dir) if dir.is_absolute() => return Ok(dir.clone()),
        Some(dir) => dir.clone(),
        None => default_dir,
    };
    match workspace_root {
        Some(workspace) => Ok(workspace.join(relative)),
        None => dirs_next::home_dir()
            .map(|home| home.join(relative))
            .ok_or_else(|| anyhow!("$HOME directory unavailable for the log file")),
    }
}

/// JSON-lines layer over a non-blocking appender. The guard must outlive the
/// subscriber or buffered lines are lost.
pub fn file_layer<S>(directory: &Path, rotation: LogRotation) -> Result<(BoxedLayer<S>, WorkerGuard)>
where
    S: Subscriber + for<'a> LookupSpan<'a> + 'static,
{
    fs::create_dir_all(directory)
        .with_context(|| format!("failed to create log directory {}", directory.display()))?;
    let appender = RollingFileAppender::builder()
        .rotation(rotation.into())
        .filename_prefix(LOG_FILE_NAME)
        .build(directory)
        .with_context(|| format!("failed to open log file in {}", directory.display()))?;
    let (writer, guard) = tracing_appender::non_blocking(appender);

    let layer = tracing_subscriber::fmt::layer()
        .json()
        .flatten_event(true)
        .with_current_span(false)
        .with_span_list(false)
        .with_target(true)
        .with_writer(writer)
        .boxed();
    Ok((layer, guard))
}
