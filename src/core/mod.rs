pub mod capabilities;
pub mod circuit_breaker;
pub mod config;
pub mod error;
pub mod limiter;
pub mod progressive_timeout;
pub mod supervisor;
pub mod types;

pub use capabilities::{CapabilitiesProbe, ToolVersion};
pub use circuit_breaker::{BreakerConfig, BreakerConfigError, BreakerPermit, CircuitBreaker};
pub use config::{
    CapabilitiesConfig, ConfigLoader, ConfigValidator, SupervisorConfig, ToolBinaries,
    ToolgateConfig,
};
pub use error::AppError;
pub use limiter::{ConcurrencyLimiter, LimiterError};
pub use progressive_timeout::{
    calculate_timeout, execute_with_progressive_timeout, ProgressiveTimeoutConfig,
    ProgressiveTimeoutError,
};
pub use supervisor::ProcessSupervisor;
pub use types::*;
