pub mod args;
pub mod commands;

pub use args::{ConfigArgs, ExecArgs, ProbeArgs, WorkspaceArgs};
use clap::{Parser, Subcommand};

const HELP_TEMPLATE: &str = "\
{name} {version}\n\
{about-with-newline}\n\
USAGE:\n    {usage}\n\
\nOPTIONS:\n{options}\n\
COMMANDS:\n{subcommands}\n";

#[derive(Parser)]
#[command(name = "toolgate")]
#[command(version = crate::VERSION)]
#[command(about = "Supervised execution of git and gh with admission control")]
#[command(help_template = HELP_TEMPLATE)]
#[command(
    after_long_help = "Every invocation passes through the circuit breaker and concurrency limiter; arguments are never interpreted by a shell."
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    #[command(
        about = "Run one tool invocation through the supervisor",
        long_about = "Exec spawns the tool without a shell, enforces the hard timeout and prints the command result as JSON.",
        after_help = "Example:\n    toolgate exec git --timeout-ms 5000 -- status --porcelain"
    )]
    Exec(ExecArgs),
    #[command(
        about = "Report tool versions and derived feature flags",
        long_about = "Probe runs --version for every supported tool and prints versions, feature flags and availability as JSON.",
        after_help = "Example:\n    toolgate probe --refresh"
    )]
    Probe(ProbeArgs),
    #[command(
        about = "Print the resolved configuration",
        long_about = "Config shows defaults merged with toolgate.toml and TOOLGATE_* environment overrides.",
        after_help = "Example:\n    toolgate config --env"
    )]
    Config(ConfigArgs),
}

impl Command {
    pub fn workspace(&self) -> &WorkspaceArgs {
        match self {
            Command::Exec(args) => &args.workspace,
            Command::Probe(args) => &args.workspace,
            Command::Config(args) => &args.workspace,
        }
    }
}

/// Runs the command and returns the process exit status.
pub async fn run(args: Args) -> crate::Result<i32> {
    match args.command {
        Command::Exec(exec_args) => commands::exec(exec_args).await,
        Command::Probe(probe_args) => commands::probe(probe_args).await,
        Command::Config(config_args) => commands::config(config_args),
    }
}
