use crate::cli::Command;
use std::env;

/// Execution contexts that influence how logging is routed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExecutionContext {
    /// A person at a terminal running `toolgate` directly.
    Interactive,
    /// Scripts and CI consuming the JSON on stdout; the console stays quiet.
    Automation,
}

/// Derive the active execution context from a parsed CLI command plus overrides.
pub fn detect_context(command: &Command) -> ExecutionContext {
    if automation_override_enabled() {
        return ExecutionContext::Automation;
    }

    match command {
        Command::Exec(_) | Command::Probe(_) | Command::Config(_) => ExecutionContext::Interactive,
    }
}

fn automation_override_enabled() -> bool {
    let flag = |key: &str| {
        env::var(key)
            .map(|value| matches!(value.trim(), "1" | "true"))
            .unwrap_or(false)
    };
    flag("TOOLGATE_AUTOMATION") || flag("CI")
}
