//! roachlab - ephemeral local `CockroachDB` test clusters

use std::process::ExitCode;
use std::str::FromStr;

use anyhow::Result;
use clap::Parser;
use roachlab_cli::cli::{self, Cli, Stage};
use roachlab_cli::config::ConfigManager;
use roachlab_core::StageError;
use tracing::{Level, debug, warn};
use tracing_subscriber::FmtSubscriber;

/// Log level for diagnostics on stderr.
const LOG_LEVEL_ENV: &str = "ROACHLAB_LOG_LEVEL";

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let args = Cli::parse();

    if let Err(err) = init_tracing() {
        eprintln!("warning: {err:#}");
    }

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => report(&err),
    }
}

async fn run(args: Cli) -> Result<()> {
    let manager = ConfigManager::load()?;
    debug!(path = %manager.path().display(), "configuration loaded");
    let stage = Stage::new(manager.config().clone());
    cli::run(&stage, args.command).await
}

/// Discovery misses are answers, not failures: print them and exit 0.
fn report(err: &anyhow::Error) -> ExitCode {
    match err.downcast_ref::<StageError>() {
        Some(stage_err) if stage_err.is_informational() => {
            println!("{stage_err}");
            ExitCode::SUCCESS
        }
        _ => {
            eprintln!("Error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing() -> Result<()> {
    let configured = std::env::var(LOG_LEVEL_ENV).ok();
    let parsed = configured
        .as_deref()
        .and_then(|value| Level::from_str(value.trim()).ok());
    let subscriber = FmtSubscriber::builder()
        .with_max_level(parsed.unwrap_or(Level::WARN))
        .with_writer(std::io::stderr)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    if parsed.is_none()
        && let Some(value) = configured
    {
        warn!("ignoring {LOG_LEVEL_ENV}={value}; expected trace, debug, info, warn or error");
    }
    Ok(())
}
