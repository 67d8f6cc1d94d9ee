use crate::core::types::Tool;
use clap::Args;
use std::path::PathBuf;

#[derive(Args, Debug, Clone)]
pub struct WorkspaceArgs {
    /// Directory containing toolgate.toml (default: current directory)
    #[arg(long, value_name = "DIR")]
    pub workspace: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct ExecArgs {
    /// Tool to invoke (git or gh)
    #[arg(value_name = "TOOL", value_parser = parse_tool)]
    pub tool: Tool,

    /// Working directory for the tool (default: current directory)
    #[arg(long, value_name = "DIR")]
    pub cwd: Option<PathBuf>,

    /// Hard timeout for this call in milliseconds (default: supervisor.default_timeout_ms)
    #[arg(long, value_name = "MS")]
    pub timeout_ms: Option<u64>,

    /// Coalesce with an identical in-flight request
    #[arg(long)]
    pub dedupe: bool,

    /// Retry timed-out attempts with the [progressive_timeout] schedule
    #[arg(long, conflicts_with_all = ["timeout_ms", "dedupe"])]
    pub progressive: bool,

    /// Arguments passed to the tool verbatim, never through a shell
    #[arg(last = true, value_name = "ARGS")]
    pub args: Vec<String>,

    #[command(flatten)]
    pub workspace: WorkspaceArgs,
}

#[derive(Args, Debug)]
pub struct ProbeArgs {
    /// Ignore any cached result and probe again
    #[arg(long)]
    pub refresh: bool,

    #[command(flatten)]
    pub workspace: WorkspaceArgs,
}

#[derive(Args, Debug)]
pub struct ConfigArgs {
    /// Also list supported environment overrides
    #[arg(long)]
    pub env: bool,

    #[command(flatten)]
    pub workspace: WorkspaceArgs,
}

fn parse_tool(value: &str) -> Result<Tool, String> {
    value.parse()
}
