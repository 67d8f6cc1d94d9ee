#![allow(clippy::result_large_err)]

use super::ToolgateConfig;
use crate::core::error::AppError;
use crate::core::types::{ErrorCategory, Tool};

pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate configuration rules
    pub fn validate(config: &ToolgateConfig) -> Result<(), AppError> {
        let supervisor = &config.supervisor;

        if supervisor.max_concurrency == 0 {
            return Err(invalid("supervisor.max_concurrency must be at least 1"));
        }

        if supervisor.circuit_breaker_threshold == 0 {
            return Err(invalid(
                "supervisor.circuit_breaker_threshold must be at least 1",
            ));
        }

        if supervisor.circuit_breaker_reset_ms == 0 {
            return Err(invalid(
                "supervisor.circuit_breaker_reset_ms must be greater than zero",
            ));
        }

        if supervisor.default_timeout_ms == 0 {
            return Err(invalid(
                "supervisor.default_timeout_ms must be greater than zero",
            ));
        }

        if supervisor.max_output_bytes == 0 {
            return Err(invalid(
                "supervisor.max_output_bytes must be greater than zero",
            ));
        }

        for tool in Tool::ALL {
            if config.tools.binary(tool).trim().is_empty() {
                return Err(invalid(format!("tools.{} cannot be empty", tool)));
            }
        }

        config
            .progressive_timeout
            .validate()
            .map_err(|e| invalid(e.to_string()))?;

        Ok(())
    }
}

fn invalid(message: impl Into<String>) -> AppError {
    AppError::new(ErrorCategory::ValidationError, message).with_code("CFG-003")
}
