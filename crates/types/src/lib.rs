//! Shared request, result and statistics types for the toolgate supervisor.
//!
//! Everything here is plain data: serializable, cloneable and free of I/O so that
//! callers (and downstream schema validation) can depend on it without pulling in
//! the runtime.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use uuid::Uuid;

/// Exit code reported when a process never ran, failed to spawn or was killed.
pub const EXIT_CODE_NOT_RUN: i32 = -1;

/// The closed set of external tools the supervisor is allowed to invoke.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tool {
    Git,
    Gh,
}

impl Tool {
    pub const ALL: [Tool; 2] = [Tool::Git, Tool::Gh];

    pub fn as_str(self) -> &'static str {
        match self {
            Tool::Git => "git",
            Tool::Gh => "gh",
        }
    }
}

impl fmt::Display for Tool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Tool {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "git" => Ok(Tool::Git),
            "gh" => Ok(Tool::Gh),
            _ => Err(format!(
                "unknown tool '{}'; supported tools are git, gh",
                value
            )),
        }
    }
}

/// One invocation of an external tool.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CommandRequest {
    pub tool: Tool,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<PathBuf>,
    /// Per-call hard timeout; the supervisor default applies when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    /// Coalesce with an identical in-flight request instead of spawning again.
    #[serde(default)]
    pub dedupe: bool,
}

impl CommandRequest {
    pub fn new<I, S>(tool: Tool, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            tool,
            args: args.into_iter().map(Into::into).collect(),
            cwd: None,
            timeout_ms: None,
            dedupe: false,
        }
    }

    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    pub fn with_dedupe(mut self, dedupe: bool) -> Self {
        self.dedupe = dedupe;
        self
    }
}

/// Why a [`CommandResult`] is unsuccessful.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The supervisor was shut down before the request was admitted.
    Destroyed,
    /// The circuit breaker refused admission.
    CircuitOpen,
    /// The request was waiting for a slot when the queue was cleared.
    QueueCleared,
    /// The operating system could not create the process.
    SpawnFailed,
    /// The process exceeded its hard timeout and was killed.
    TimedOut,
    /// The process was killed during supervisor shutdown.
    Killed,
    /// The process exited with a non-zero status.
    NonZeroExit,
    /// The process was terminated by a signal it did not receive from us.
    Signaled,
    /// Waiting on the process or reading its output failed; its fate is unknown.
    WaitFailed,
}

impl FailureKind {
    /// Admission failures mean "try again shortly"; everything else came from the tool.
    pub fn is_admission(self) -> bool {
        matches!(
            self,
            FailureKind::Destroyed | FailureKind::CircuitOpen | FailureKind::QueueCleared
        )
    }
}

/// Outcome of one [`CommandRequest`]. Always produced, never an error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandResult {
    pub success: bool,
    /// Parsed JSON stdout, the raw stdout string when it is not JSON, or null on failure.
    pub data: Option<Value>,
    pub error: Option<String>,
    pub exit_code: i32,
    pub duration_ms: u64,
    /// Human-readable command line, for diagnostics only.
    pub command: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureKind>,
    /// Set when stdout or stderr exceeded the output cap and was cut.
    #[serde(default)]
    pub truncated: bool,
}

impl CommandResult {
    pub fn succeeded(data: Value, exit_code: i32, duration_ms: u64, command: String) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            exit_code,
            duration_ms,
            command,
            failure: None,
            truncated: false,
        }
    }

    pub fn failed(
        kind: FailureKind,
        error: impl Into<String>,
        exit_code: i32,
        duration_ms: u64,
        command: String,
    ) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
            exit_code,
            duration_ms,
            command,
            failure: Some(kind),
            truncated: false,
        }
    }

    /// A request that never reached the operating system.
    pub fn rejected(kind: FailureKind, error: impl Into<String>, command: String) -> Self {
        Self::failed(kind, error, EXIT_CODE_NOT_RUN, 0, command)
    }

    pub fn is_retryable(&self) -> bool {
        self.failure.map(FailureKind::is_admission).unwrap_or(false)
    }
}

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CircuitState {
    #[default]
    Closed,
    Open,
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half-open"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakerStats {
    pub state: CircuitState,
    pub failures: u32,
    pub threshold: u32,
    pub reset_time_ms: u64,
    pub last_transition: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimiterStats {
    pub queued: usize,
    pub active: usize,
    pub max_concurrency: usize,
}

/// A process currently tracked by the supervisor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiveProcessInfo {
    pub id: Uuid,
    pub tool: Tool,
    pub pid: Option<u32>,
    pub command: String,
    pub started_at: DateTime<Utc>,
}

/// Lifetime counters plus a snapshot of live processes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessStats {
    pub live: usize,
    pub spawned: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub timed_out: u64,
    pub killed: u64,
    pub spawn_failures: u64,
    pub processes: Vec<LiveProcessInfo>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SupervisorStats {
    pub destroyed: bool,
    pub circuit_breaker: BreakerStats,
    pub limiter: LimiterStats,
    pub processes: ProcessStats,
    pub deduped_in_flight: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitFeatures {
    pub worktree: bool,
    pub switch_restore: bool,
    pub sparse_checkout: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GhFeatures {
    pub json_output: bool,
    pub repo_clone: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureFlags {
    pub git: GitFeatures,
    pub gh: GhFeatures,
}

/// Versions and derived feature flags for the supported tools.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilitiesResult {
    pub git: Option<String>,
    pub gh: Option<String>,
    pub features: FeatureFlags,
    pub available: bool,
    pub error: Option<String>,
    pub checked_at: DateTime<Utc>,
}
