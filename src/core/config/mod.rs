use crate::core::circuit_breaker::BreakerConfig;
use crate::core::progressive_timeout::ProgressiveTimeoutConfig;
use crate::core::types::Tool;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub mod loader;
pub mod validation;

pub use loader::ConfigLoader;
pub use validation::ConfigValidator;

/// Main toolgate configuration loaded from toolgate.toml
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ToolgateConfig {
    /// Supervisor admission and process limits
    #[serde(default)]
    pub supervisor: SupervisorConfig,

    /// Binaries used for each supported tool
    #[serde(default)]
    pub tools: ToolBinaries,

    /// Retry schedule for callers wrapping work in progressive timeouts
    #[serde(default)]
    pub progressive_timeout: ProgressiveTimeoutConfig,

    /// Capabilities probe caching
    #[serde(default)]
    pub capabilities: CapabilitiesConfig,
}

/// Supervisor configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupervisorConfig {
    /// Hard timeout applied when a request does not carry its own
    #[serde(default = "default_timeout_ms")]
    pub default_timeout_ms: u64,

    /// Maximum number of processes running at once
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    /// Consecutive failures that open the circuit breaker
    #[serde(default = "default_circuit_breaker_threshold")]
    pub circuit_breaker_threshold: u32,

    /// Cooldown before the circuit breaker admits a trial request
    #[serde(default = "default_circuit_breaker_reset_ms")]
    pub circuit_breaker_reset_ms: u64,

    /// Cap on captured stdout and stderr, each
    #[serde(default = "default_max_output_bytes")]
    pub max_output_bytes: usize,
}

/// Tool binary names or paths
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolBinaries {
    #[serde(default = "default_git_binary")]
    pub git: String,

    #[serde(default = "default_gh_binary")]
    pub gh: String,
}

/// Capabilities probe configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilitiesConfig {
    /// How long a probe result stays fresh
    #[serde(default = "default_cache_ttl_ms")]
    pub cache_ttl_ms: u64,
}

// Default functions
fn default_timeout_ms() -> u64 {
    30_000
}

fn default_max_concurrency() -> usize {
    4
}

fn default_circuit_breaker_threshold() -> u32 {
    5
}

fn default_circuit_breaker_reset_ms() -> u64 {
    60_000
}

fn default_max_output_bytes() -> usize {
    10 * 1024 * 1024
}

fn default_git_binary() -> String {
    "git".to_string()
}

fn default_gh_binary() -> String {
    "gh".to_string()
}

fn default_cache_ttl_ms() -> u64 {
    300_000
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        SupervisorConfig {
            default_timeout_ms: default_timeout_ms(),
            max_concurrency: default_max_concurrency(),
            circuit_breaker_threshold: default_circuit_breaker_threshold(),
            circuit_breaker_reset_ms: default_circuit_breaker_reset_ms(),
            max_output_bytes: default_max_output_bytes(),
        }
    }
}

impl SupervisorConfig {
    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }

    pub fn breaker(&self) -> BreakerConfig {
        BreakerConfig {
            threshold: self.circuit_breaker_threshold,
            reset_time: Duration::from_millis(self.circuit_breaker_reset_ms),
        }
    }
}

impl Default for ToolBinaries {
    fn default() -> Self {
        ToolBinaries {
            git: default_git_binary(),
            gh: default_gh_binary(),
        }
    }
}

impl ToolBinaries {
    pub fn binary(&self, tool: Tool) -> &str {
        match tool {
            Tool::Git => &self.git,
            Tool::Gh => &self.gh,
        }
    }

    /// Point every tool at the same binary, used by tests driving `sh`.
    pub fn all(binary: impl Into<String>) -> Self {
        let binary = binary.into();
        ToolBinaries {
            git: binary.clone(),
            gh: binary,
        }
    }
}

impl Default for CapabilitiesConfig {
    fn default() -> Self {
        CapabilitiesConfig {
            cache_ttl_ms: default_cache_ttl_ms(),
        }
    }
}

impl CapabilitiesConfig {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_millis(self.cache_ttl_ms)
    }
}
