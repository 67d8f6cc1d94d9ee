#![allow(clippy::result_large_err)]

use super::ToolgateConfig;
use crate::core::error::AppError;
use crate::core::types::ErrorCategory;
use std::env;
use std::path::Path;
use std::str::FromStr;

pub const CONFIG_FILE_NAME: &str = "toolgate.toml";

pub struct ConfigLoader;

impl ConfigLoader {
    /// Load config from workspace root (workspace/toolgate.toml)
    /// Environment variables override config file values
    /// A missing file yields defaults + env vars
    pub fn load_from_workspace(workspace_path: &Path) -> Result<ToolgateConfig, AppError> {
        let config_path = workspace_path.join(CONFIG_FILE_NAME);
        let config_file = Self::load_from_file(&config_path)?;

        let mut config = config_file.unwrap_or_default();

        // Apply environment variable overrides
        Self::apply_env_overrides(&mut config);

        Ok(config)
    }

    /// Load config from specific file path
    /// Returns Ok(None) if file doesn't exist
    pub fn load_from_file(path: &Path) -> Result<Option<ToolgateConfig>, AppError> {
        if !path.exists() {
            return Ok(None);
        }

        let content = std::fs::read_to_string(path).map_err(|e| {
            AppError::new(
                ErrorCategory::IoError,
                format!("Failed to read config file {}: {}", path.display(), e),
            )
            .with_code("CFG-001")
        })?;

        let config: ToolgateConfig = toml::from_str(&content).map_err(|e| {
            AppError::new(
                ErrorCategory::ValidationError,
                format!("Failed to parse config file {}: {}", path.display(), e),
            )
            .with_code("CFG-002")
        })?;

        Ok(Some(config))
    }

    /// Apply environment variable overrides to the configuration
    /// Values that fail to parse are ignored
    fn apply_env_overrides(config: &mut ToolgateConfig) {
        // Supervisor overrides
        override_parsed(
            "TOOLGATE_DEFAULT_TIMEOUT_MS",
            &mut config.supervisor.default_timeout_ms,
        );
        override_parsed(
            "TOOLGATE_MAX_CONCURRENCY",
            &mut config.supervisor.max_concurrency,
        );
        override_parsed(
            "TOOLGATE_CIRCUIT_BREAKER_THRESHOLD",
            &mut config.supervisor.circuit_breaker_threshold,
        );
        override_parsed(
            "TOOLGATE_CIRCUIT_BREAKER_RESET_MS",
            &mut config.supervisor.circuit_breaker_reset_ms,
        );
        override_parsed(
            "TOOLGATE_MAX_OUTPUT_BYTES",
            &mut config.supervisor.max_output_bytes,
        );

        // Tool binaries
        if let Ok(git) = env::var("TOOLGATE_GIT_BIN") {
            config.tools.git = git;
        }
        if let Ok(gh) = env::var("TOOLGATE_GH_BIN") {
            config.tools.gh = gh;
        }

        // Capabilities
        override_parsed(
            "TOOLGATE_CAPABILITIES_TTL_MS",
            &mut config.capabilities.cache_ttl_ms,
        );
    }

    /// Get documentation for supported environment variables
    pub fn env_var_documentation() -> &'static [&'static str] {
        &[
            "TOOLGATE_DEFAULT_TIMEOUT_MS - Override default per-call timeout (default: 30000)",
            "TOOLGATE_MAX_CONCURRENCY - Override max concurrent processes (default: 4)",
            "TOOLGATE_CIRCUIT_BREAKER_THRESHOLD - Override failures before the circuit opens (default: 5)",
            "TOOLGATE_CIRCUIT_BREAKER_RESET_MS - Override circuit breaker cooldown (default: 60000)",
            "TOOLGATE_MAX_OUTPUT_BYTES - Override captured output cap (default: 10485760)",
            "TOOLGATE_GIT_BIN - Override git binary (default: git)",
            "TOOLGATE_GH_BIN - Override gh binary (default: gh)",
            "TOOLGATE_CAPABILITIES_TTL_MS - Override capabilities cache TTL (default: 300000)",
        ]
    }
}

fn override_parsed<T: FromStr>(key: &str, target: &mut T) {
    if let Ok(raw) = env::var(key) {
        match raw.trim().parse::<T>() {
            Ok(value) => *target = value,
            Err(_) => tracing::warn!(variable = key, value = %raw, "ignoring unparseable override"),
        }
    }
}
