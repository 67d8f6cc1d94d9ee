use crate::logging::context::ExecutionContext;
use crate::logging::layers::BoxedLayer;
use serde::Deserialize;
use std::io;
use std::str::FromStr;
use tracing::Subscriber;
use tracing_subscriber::fmt::writer::MakeWriter;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::Layer;

/// Where console logs go. Stdout is shared with the JSON command result.
#[derive(Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ConsoleOutput {
    Stdout,
    #[default]
    Stderr,
    None,
}

impl FromStr for ConsoleOutput {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "stdout" => Ok(ConsoleOutput::Stdout),
            "stderr" => Ok(ConsoleOutput::Stderr),
            "none" => Ok(ConsoleOutput::None),
            _ => Err(format!(
                "invalid logging.console_output '{}'; supported values are stdout, stderr, none",
                value
            )),
        }
    }
}

pub fn select_console_output(
    context: ExecutionContext,
    configured: Option<ConsoleOutput>,
) -> ConsoleOutput {
    // Scripts parse stdout, so automation only logs to stderr and only when asked to.
    match context {
        ExecutionContext::Interactive => configured.unwrap_or(ConsoleOutput::Stderr),
        ExecutionContext::Automation => match configured {
            Some(ConsoleOutput::Stderr) => ConsoleOutput::Stderr,
            _ => ConsoleOutput::None,
        },
    }
}

/// Compact one-line events for a person watching a supervised run, or `None` when
/// the console is silenced.
pub fn console_layer<S>(output: ConsoleOutput) -> Option<BoxedLayer<S>>
where
    S: Subscriber + for<'a> LookupSpan<'a> + 'static,
{
    match output {
        ConsoleOutput::Stdout => Some(compact_layer(io::stdout)),
        ConsoleOutput::Stderr => Some(compact_layer(io::stderr)),
        ConsoleOutput::None => None,
    }
}

fn compact_layer<S, W>(writer: W) -> BoxedLayer<S>
where
    S: Subscriber + for<'a> LookupSpan<'a> + 'static,
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    tracing_subscriber::fmt::layer()
        .compact()
        .with_writer(writer)
        .with_ansi(false)
        .with_target(false)
        .boxed()
}
