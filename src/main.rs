use clap::Parser;
use toolgate::{cli, logging};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = cli::Args::parse();
    let logging_guard = logging::init(&args.command)?;
    if let Some(dir) = logging_guard.log_dir() {
        tracing::debug!(log_dir = %dir.display(), "audit log enabled");
    }

    let code = cli::run(args).await?;
    // Flush the file sink before a non-zero exit skips destructors.
    drop(logging_guard);
    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}
