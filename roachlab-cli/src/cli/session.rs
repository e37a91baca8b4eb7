//! Interactive views on the first node: console, SQL shell, log pager

use std::ffi::OsString;
use std::path::Path;
use std::process::Command;

use anyhow::{Context, Result, bail};
use roachlab_core::{NodeProcess, StageError};
use tracing::debug;

use crate::cli::context::Stage;

const DEFAULT_PAGER: &str = "less";

#[cfg(target_os = "macos")]
const BROWSER_OPENER: &str = "open";
#[cfg(not(target_os = "macos"))]
const BROWSER_OPENER: &str = "xdg-open";

fn first_node(stage: &Stage, version: Option<&str>) -> Result<NodeProcess> {
    let filter = stage.filter(version)?;
    let node = stage.discovery().first_node(&filter)?;
    debug!(pid = node.pid, index = ?node.index, "selected first node");
    Ok(node)
}

/// Open the console URL of the first node.
pub fn open_web(stage: &Stage, version: Option<&str>) -> Result<()> {
    let node = first_node(stage, version)?;
    let url = node.console_url().ok_or(StageError::NotFound)?;
    println!("Opening {url}");
    attach(Command::new(BROWSER_OPENER).arg(&url))
}

/// Run the first node's own binary as a SQL shell on this terminal.
pub fn open_sql(stage: &Stage, version: Option<&str>) -> Result<()> {
    let node = first_node(stage, version)?;
    let sql = node.sql_command().ok_or(StageError::NotFound)?;
    debug!(command = %sql, "opening sql shell");
    attach(&mut sql.to_command())
}

/// Page through the first node's log file.
pub fn open_log(stage: &Stage, version: Option<&str>) -> Result<()> {
    let node = first_node(stage, version)?;
    let Some(log) = node.log_file(&stage.workspace) else {
        println!("Node {} has no recognizable store path, so its log cannot be located", node.pid);
        return Ok(());
    };
    if !log.is_file() {
        println!("Log file {} does not exist", log.display());
        return Ok(());
    }
    attach(&mut pager(std::env::var_os("PAGER"), &log))
}

/// `$PAGER` may carry its own arguments, e.g. `less -R`.
fn pager(configured: Option<OsString>, log: &Path) -> Command {
    let configured = configured
        .and_then(|value| value.into_string().ok())
        .filter(|value| !value.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_PAGER.to_string());
    let mut words = configured.split_whitespace();
    let mut command = Command::new(words.next().unwrap_or(DEFAULT_PAGER));
    command.args(words).arg(log);
    command
}

/// Run with the terminal attached and wait for the user to leave.
fn attach(command: &mut Command) -> Result<()> {
    let program = command.get_program().to_string_lossy().into_owned();
    let status = command
        .status()
        .with_context(|| format!("failed to run {program}"))?;
    if !status.success() {
        bail!("{program} exited with {status}");
    }
    Ok(())
}
