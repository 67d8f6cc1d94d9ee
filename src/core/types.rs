use serde::{Deserialize, Serialize};

pub use toolgate_types::{
    BreakerStats, CapabilitiesResult, CircuitState, CommandRequest, CommandResult, FailureKind,
    FeatureFlags, GhFeatures, GitFeatures, LimiterStats, LiveProcessInfo, ProcessStats,
    SupervisorStats, Tool, EXIT_CODE_NOT_RUN,
};

/// Error category enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCategory {
    ValidationError,
    ToolExecutionError,
    TimeoutError,
    ResourceError,
    SerializationError,
    IoError,
    InternalError,
    Unknown,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Error severity enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorSeverity {
    Error,
    Warning,
    Info,
    Debug,
}
