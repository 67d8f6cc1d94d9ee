#![allow(clippy::result_large_err)]

//! Admission-gated process supervisor.
//!
//! `execute` runs every request through the same gates, in order:
//!
//! 1. shut down? reject without spawning
//! 2. circuit breaker open? reject without spawning
//! 3. wait for a concurrency slot (FIFO)
//! 4. spawn without a shell, enforce the hard timeout, capture capped output
//! 5. feed the outcome back to the breaker
//!
//! Dropping an `execute` future cancels its run: a queued request leaves the queue,
//! a live process is killed, and an unsettled half-open trial is handed back to the
//! breaker. Deduplicated runs are shared, so they run on their own task and finish
//! even when every caller has gone away.
//!
//! Failures at any stage come back as an unsuccessful [`CommandResult`]; `execute`
//! has no error path. The supervisor is a cheap clonable handle: construct it once,
//! pass clones to callers, and call [`ProcessSupervisor::shutdown`] at teardown.

mod dedupe;
pub mod process;
pub mod registry;

use crate::core::circuit_breaker::{BreakerPermit, CircuitBreaker};
use crate::core::config::{ConfigValidator, SupervisorConfig, ToolBinaries, ToolgateConfig};
use crate::core::error::AppError;
use crate::core::limiter::{ConcurrencyLimiter, LimiterError};
use crate::core::types::{
    CircuitState, CommandRequest, CommandResult, ErrorCategory, FailureKind, ProcessStats,
    SupervisorStats, Tool, EXIT_CODE_NOT_RUN,
};
use dedupe::{dedupe_key, InflightRuns};
use futures::FutureExt;
use process::{format_command, Captured, ProcessExit, SpawnSpec};
use registry::{ProcessEnd, ProcessRegistry};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

struct SupervisorInner {
    config: SupervisorConfig,
    tools: ToolBinaries,
    breaker: CircuitBreaker,
    limiter: ConcurrencyLimiter,
    registry: ProcessRegistry,
    inflight: InflightRuns,
    destroyed: AtomicBool,
}

#[derive(Clone)]
pub struct ProcessSupervisor {
    inner: Arc<SupervisorInner>,
}

impl std::fmt::Debug for ProcessSupervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessSupervisor")
            .field("config", &self.inner.config)
            .field("tools", &self.inner.tools)
            .field("destroyed", &self.is_destroyed())
            .finish()
    }
}

impl ProcessSupervisor {
    /// Build a supervisor. Invalid limits fail here rather than being defaulted.
    pub fn new(config: SupervisorConfig, tools: ToolBinaries) -> Result<Self, AppError> {
        if config.default_timeout_ms == 0 || config.max_output_bytes == 0 {
            return Err(AppError::new(
                ErrorCategory::ValidationError,
                "default_timeout_ms and max_output_bytes must be greater than zero",
            )
            .with_code("CFG-SUPERVISOR"));
        }
        let breaker = CircuitBreaker::new(config.breaker())?;
        let limiter = ConcurrencyLimiter::new(config.max_concurrency)?;
        Ok(Self {
            inner: Arc::new(SupervisorInner {
                config,
                tools,
                breaker,
                limiter,
                registry: ProcessRegistry::new(),
                inflight: InflightRuns::default(),
                destroyed: AtomicBool::new(false),
            }),
        })
    }

    pub fn from_config(config: &ToolgateConfig) -> Result<Self, AppError> {
        ConfigValidator::validate(config)?;
        Self::new(config.supervisor.clone(), config.tools.clone())
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.inner.config
    }

    /// Run one request through admission, the limiter and the process lifecycle.
    pub async fn execute(&self, request: CommandRequest) -> CommandResult {
        if !request.dedupe {
            return self.run(request).await;
        }

        let key = dedupe_key(&request);
        let (run, joined) = self.inner.inflight.join_or_start(&key, || {
            let command = format_command(self.inner.tools.binary(request.tool), &request.args);
            let this = self.clone();
            let task_key = key.clone();
            let task = tokio::spawn(async move {
                let result = this.run(request).await;
                this.inner.inflight.finish(&task_key);
                result
            });

            let owner = self.clone();
            let key = key.clone();
            async move {
                task.await.unwrap_or_else(|err| {
                    owner.inner.inflight.finish(&key);
                    tracing::error!(key = %key, error = %err, "deduplicated run aborted");
                    CommandResult::failed(
                        FailureKind::WaitFailed,
                        format!("deduplicated run did not complete: {}", err),
                        EXIT_CODE_NOT_RUN,
                        0,
                        command,
                    )
                })
            }
            .boxed()
            .shared()
        });
        if joined {
            tracing::debug!(key = %key, "joined in-flight duplicate request");
        }
        run.await
    }

    pub async fn git<I, S>(&self, args: I) -> CommandResult
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.execute(CommandRequest::new(Tool::Git, args)).await
    }

    pub async fn gh<I, S>(&self, args: I) -> CommandResult
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.execute(CommandRequest::new(Tool::Gh, args)).await
    }

    pub fn stats(&self) -> SupervisorStats {
        SupervisorStats {
            destroyed: self.is_destroyed(),
            circuit_breaker: self.inner.breaker.stats(),
            limiter: self.inner.limiter.stats(),
            processes: self.inner.registry.stats(),
            deduped_in_flight: self.inner.inflight.len(),
        }
    }

    pub fn process_stats(&self) -> ProcessStats {
        self.inner.registry.stats()
    }

    pub fn circuit_state(&self) -> CircuitState {
        self.inner.breaker.state()
    }

    pub fn reset_circuit_breaker(&self) {
        self.inner.breaker.reset();
    }

    /// Mark the supervisor terminal, kill every live process and drain the queue.
    pub fn destroy(&self) {
        if self.inner.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        let killed = self.inner.registry.kill_all();
        let cleared = self.inner.limiter.clear();
        tracing::info!(killed, cleared, "process supervisor destroyed");
    }

    /// [`destroy`](Self::destroy), then wait up to `grace` for killed processes to be reaped.
    pub async fn shutdown(&self, grace: Duration) {
        self.destroy();
        if tokio::time::timeout(grace, self.inner.registry.wait_idle())
            .await
            .is_err()
        {
            tracing::warn!(
                live = self.inner.registry.live(),
                "processes still alive after shutdown grace period"
            );
        }
    }

    pub fn is_destroyed(&self) -> bool {
        self.inner.destroyed.load(Ordering::SeqCst)
    }

    async fn run(&self, request: CommandRequest) -> CommandResult {
        let program = self.inner.tools.binary(request.tool);
        let command = format_command(program, &request.args);

        if self.is_destroyed() {
            return destroyed_result(request.tool, command);
        }

        let Some(permit) = self.inner.breaker.admit() else {
            tracing::debug!(command = %command, "circuit open, rejecting request");
            return CommandResult::rejected(
                FailureKind::CircuitOpen,
                format!(
                    "circuit breaker is open for {}; retry after cooldown",
                    request.tool
                ),
                command,
            );
        };

        let admitted = self
            .inner
            .limiter
            .execute(request, |request| {
                self.spawn_and_wait(request, command.clone(), permit)
            })
            .await;

        match admitted {
            Ok(result) => result,
            Err(LimiterError::Cleared) | Err(LimiterError::InvalidLimit) => {
                CommandResult::rejected(
                    FailureKind::QueueCleared,
                    "request was dropped from the queue during shutdown",
                    command,
                )
            }
        }
    }

    async fn spawn_and_wait(
        &self,
        request: CommandRequest,
        command: String,
        permit: BreakerPermit<'_>,
    ) -> CommandResult {
        // Destroy may have happened while this request was queued.
        if self.is_destroyed() {
            return destroyed_result(request.tool, command);
        }

        let tool = request.tool;
        let timeout = request
            .timeout_ms
            .map(Duration::from_millis)
            .unwrap_or_else(|| self.inner.config.default_timeout());
        let started = Instant::now();

        let spec = SpawnSpec {
            program: self.inner.tools.binary(tool),
            args: &request.args,
            cwd: request.cwd.as_deref(),
        };
        let child = match process::spawn(&spec) {
            Ok(child) => child,
            Err(err) => {
                self.inner.registry.record_spawn_failure();
                permit.failed();
                tracing::warn!(command = %command, error = %err, "failed to spawn process");
                return CommandResult::failed(
                    FailureKind::SpawnFailed,
                    format!("failed to spawn {}: {}", tool, err),
                    EXIT_CODE_NOT_RUN,
                    elapsed_ms(started),
                    command,
                );
            }
        };

        let registration = self
            .inner
            .registry
            .register(tool, child.id(), command.clone());
        if self.is_destroyed() {
            registration.kill_signal().cancel();
        }
        tracing::debug!(
            process_id = %registration.id(),
            pid = child.id(),
            command = %command,
            timeout_ms = timeout.as_millis() as u64,
            "spawned process"
        );

        let exit = process::wait(
            child,
            timeout,
            self.inner.config.max_output_bytes,
            registration.kill_signal(),
        )
        .await;
        let duration_ms = elapsed_ms(started);

        let (result, end) = match exit {
            Ok(ProcessExit::Completed {
                status,
                stdout,
                stderr,
            }) => match status.code() {
                Some(0) => (
                    success_result(stdout, &stderr, duration_ms, command),
                    ProcessEnd::Succeeded,
                ),
                Some(code) => {
                    let mut result = CommandResult::failed(
                        FailureKind::NonZeroExit,
                        non_zero_message(tool, code, &stderr),
                        code,
                        duration_ms,
                        command,
                    );
                    result.truncated = stdout.truncated || stderr.truncated;
                    (result, ProcessEnd::Failed)
                }
                None => (
                    CommandResult::failed(
                        FailureKind::Signaled,
                        format!("{} was terminated by a signal", tool),
                        EXIT_CODE_NOT_RUN,
                        duration_ms,
                        command,
                    ),
                    ProcessEnd::Failed,
                ),
            },
            Ok(ProcessExit::TimedOut) => (
                CommandResult::failed(
                    FailureKind::TimedOut,
                    format!(
                        "{} timed out after {} and was killed",
                        tool,
                        humantime::format_duration(timeout)
                    ),
                    EXIT_CODE_NOT_RUN,
                    duration_ms,
                    command,
                ),
                ProcessEnd::TimedOut,
            ),
            Ok(ProcessExit::Killed) => (
                CommandResult::failed(
                    FailureKind::Killed,
                    format!("{} was killed because the supervisor shut down", tool),
                    EXIT_CODE_NOT_RUN,
                    duration_ms,
                    command,
                ),
                ProcessEnd::Killed,
            ),
            Err(err) => (
                CommandResult::failed(
                    FailureKind::WaitFailed,
                    format!("failed while waiting on {} process: {}", tool, err),
                    EXIT_CODE_NOT_RUN,
                    duration_ms,
                    command,
                ),
                ProcessEnd::Failed,
            ),
        };

        match end {
            ProcessEnd::Succeeded => permit.succeeded(),
            // Shutdown kills say nothing about the tool's health.
            ProcessEnd::Killed => drop(permit),
            ProcessEnd::Failed | ProcessEnd::TimedOut => permit.failed(),
        }

        tracing::info!(
            process_id = %registration.id(),
            command = %result.command,
            success = result.success,
            exit_code = result.exit_code,
            duration_ms = result.duration_ms,
            "process finished"
        );
        registration.finish(end);
        result
    }
}

fn destroyed_result(tool: Tool, command: String) -> CommandResult {
    CommandResult::rejected(
        FailureKind::Destroyed,
        format!("process supervisor has been shut down; {} was not started", tool),
        command,
    )
}

/// Parsed JSON when stdout is JSON, the raw stdout string otherwise.
fn success_result(
    stdout: Captured,
    stderr: &Captured,
    duration_ms: u64,
    command: String,
) -> CommandResult {
    let raw = stdout.text();
    let data = match serde_json::from_str::<Value>(raw.trim()) {
        Ok(parsed) => parsed,
        Err(_) => Value::String(raw),
    };
    let mut result = CommandResult::succeeded(data, 0, duration_ms, command);
    result.truncated = stdout.truncated || stderr.truncated;
    result
}

fn non_zero_message(tool: Tool, code: i32, stderr: &Captured) -> String {
    let stderr = stderr.text();
    let stderr = stderr.trim();
    if stderr.is_empty() {
        format!("{} exited with code {}", tool, code)
    } else {
        format!("{} exited with code {}: {}", tool, code, stderr)
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}
