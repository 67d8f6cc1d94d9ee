use crate::cli::args::{ConfigArgs, ExecArgs, ProbeArgs, WorkspaceArgs};
use crate::core::supervisor::process::format_command;
use crate::core::{
    execute_with_progressive_timeout, CapabilitiesProbe, CommandRequest, CommandResult,
    ConfigLoader, ConfigValidator, FailureKind, ProcessSupervisor, ToolgateConfig,
    EXIT_CODE_NOT_RUN,
};
use crate::Result;
use anyhow::Context;
use std::convert::Infallible;
use std::env;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Resolve the workspace directory used for config discovery.
pub fn resolve_workspace(args: &WorkspaceArgs) -> Result<PathBuf> {
    match &args.workspace {
        Some(path) => Ok(path.clone()),
        None => env::current_dir().context("failed to determine current directory"),
    }
}

fn load_config(args: &WorkspaceArgs) -> Result<ToolgateConfig> {
    let workspace = resolve_workspace(args)?;
    let config = ConfigLoader::load_from_workspace(&workspace)?;
    ConfigValidator::validate(&config)?;
    Ok(config)
}

/// Handles `toolgate exec`; exit status 0 on success, 1 otherwise.
pub async fn exec(args: ExecArgs) -> Result<i32> {
    let config = load_config(&args.workspace)?;
    let supervisor = ProcessSupervisor::from_config(&config)?;

    let mut request = CommandRequest::new(args.tool, args.args).with_dedupe(args.dedupe);
    if let Some(cwd) = args.cwd {
        request = request.with_cwd(cwd);
    }
    if let Some(timeout_ms) = args.timeout_ms {
        request = request.with_timeout_ms(timeout_ms);
    }

    let result = if args.progressive {
        execute_progressive(&supervisor, &config, request).await
    } else {
        supervisor.execute(request).await
    };
    supervisor.shutdown(SHUTDOWN_GRACE).await;

    println!(
        "{}",
        serde_json::to_string_pretty(&result).context("failed to serialize command result")?
    );
    Ok(if result.success { 0 } else { 1 })
}

/// Run `request` under the configured progressive timeout schedule. A timed-out
/// attempt is dropped, which kills its process; Ctrl-C stops the schedule.
async fn execute_progressive(
    supervisor: &ProcessSupervisor,
    config: &ToolgateConfig,
    request: CommandRequest,
) -> CommandResult {
    let schedule = &config.progressive_timeout;
    // The schedule bounds each attempt; the supervisor timeout only backstops the last.
    let request = request.with_timeout_ms(schedule.max_timeout_ms);
    let command = format_command(config.tools.binary(request.tool), &request.args);
    let started = Instant::now();

    let cancel = CancellationToken::new();
    let interrupt = tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        }
    });

    let outcome = execute_with_progressive_timeout(
        |_attempt| {
            let request = request.clone();
            async move { Ok::<_, Infallible>(supervisor.execute(request).await) }
        },
        schedule,
        &cancel,
    )
    .await;
    interrupt.abort();

    match outcome {
        Ok(result) => result,
        Err(err) => {
            let kind = if err.is_cancelled() {
                FailureKind::Killed
            } else {
                FailureKind::TimedOut
            };
            CommandResult::failed(
                kind,
                format!("{}: {}", request.tool, err),
                EXIT_CODE_NOT_RUN,
                started.elapsed().as_millis() as u64,
                command,
            )
        }
    }
}

/// Handles `toolgate probe`; exit status 0 when every tool is available, 2 otherwise.
pub async fn probe(args: ProbeArgs) -> Result<i32> {
    let config = load_config(&args.workspace)?;
    let supervisor = ProcessSupervisor::from_config(&config)?;
    let probe = CapabilitiesProbe::new(supervisor.clone(), config.capabilities.cache_ttl());

    let capabilities = probe.check(args.refresh).await;
    supervisor.shutdown(SHUTDOWN_GRACE).await;

    println!(
        "{}",
        serde_json::to_string_pretty(&capabilities)
            .context("failed to serialize capabilities")?
    );
    Ok(if capabilities.available { 0 } else { 2 })
}

/// Handles `toolgate config`.
pub fn config(args: ConfigArgs) -> Result<i32> {
    let config = load_config(&args.workspace)?;
    let rendered = toml::to_string_pretty(&config).context("failed to render configuration")?;
    print!("{}", rendered);

    if args.env {
        println!();
        println!("# Environment overrides");
        for line in ConfigLoader::env_var_documentation() {
            println!("# {}", line);
        }
    }
    Ok(0)
}
