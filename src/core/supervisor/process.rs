//! Spawning and reaping a single child process.
//!
//! Programs are started directly with a discrete argument vector; nothing is ever
//! handed to a shell, so arguments cannot be reinterpreted as shell syntax.

use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

const READ_CHUNK_BYTES: usize = 8 * 1024;

/// Captured stream contents, cut at the configured cap.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Captured {
    pub bytes: Vec<u8>,
    pub truncated: bool,
}

impl Captured {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.bytes).into_owned()
    }
}

#[derive(Debug)]
pub enum ProcessExit {
    Completed {
        status: ExitStatus,
        stdout: Captured,
        stderr: Captured,
    },
    TimedOut,
    Killed,
}

pub struct SpawnSpec<'a> {
    pub program: &'a str,
    pub args: &'a [String],
    pub cwd: Option<&'a Path>,
}

pub fn spawn(spec: &SpawnSpec<'_>) -> std::io::Result<tokio::process::Child> {
    let mut command = Command::new(spec.program);
    command
        .args(spec.args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(cwd) = spec.cwd {
        command.current_dir(cwd);
    }
    command.spawn()
}

/// Wait for `child` to exit while draining its output, killing it when `timeout`
/// elapses or `kill` is cancelled.
pub async fn wait(
    mut child: tokio::process::Child,
    timeout: Duration,
    max_output_bytes: usize,
    kill: &CancellationToken,
) -> std::io::Result<ProcessExit> {
    let stdout = child.stdout.take();
    let stderr = child.stderr.take();

    let exit = {
        let run = async {
            let (stdout, stderr, status) = tokio::join!(
                read_capped(stdout, max_output_bytes),
                read_capped(stderr, max_output_bytes),
                child.wait()
            );
            status.map(|status| ProcessExit::Completed {
                status,
                stdout,
                stderr,
            })
        };
        tokio::select! {
            biased;
            _ = kill.cancelled() => Ok(ProcessExit::Killed),
            result = run => result,
            _ = tokio::time::sleep(timeout) => Ok(ProcessExit::TimedOut),
        }
    };

    if matches!(exit, Ok(ProcessExit::Killed) | Ok(ProcessExit::TimedOut)) {
        if let Err(err) = child.kill().await {
            tracing::warn!(error = %err, "failed to kill child process");
        }
    }
    exit
}

async fn read_capped<R>(reader: Option<R>, cap: usize) -> Captured
where
    R: AsyncRead + Unpin,
{
    let mut captured = Captured::default();
    let Some(mut reader) = reader else {
        return captured;
    };
    let mut chunk = vec![0u8; READ_CHUNK_BYTES];
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => {
                let room = cap.saturating_sub(captured.bytes.len());
                if n <= room {
                    captured.bytes.extend_from_slice(&chunk[..n]);
                } else {
                    // Keep draining so the child never blocks on a full pipe.
                    captured.bytes.extend_from_slice(&chunk[..room]);
                    captured.truncated = true;
                }
            }
            Err(err) => {
                tracing::debug!(error = %err, "stopped reading child output");
                break;
            }
        }
    }
    captured
}

/// Render a program and its arguments for logs and diagnostics.
pub fn format_command(program: &str, args: &[String]) -> String {
    std::iter::once(program)
        .chain(args.iter().map(String::as_str))
        .map(quote_for_display)
        .collect::<Vec<_>>()
        .join(" ")
}

fn quote_for_display(part: &str) -> String {
    let needs_quotes = part.is_empty()
        || part
            .chars()
            .any(|c| c.is_whitespace() || matches!(c, '"' | '\'' | '\\' | '$' | '`'));
    if needs_quotes {
        format!("'{}'", part.replace('\'', r"'\''"))
    } else {
        part.to_string()
    }
}
