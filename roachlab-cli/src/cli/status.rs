//! Running cluster overview

use anyhow::{Context, Result};
use chrono::Local;
use roachlab_core::{NodeProcess, StagingWorkspace};

use crate::cli::context::Stage;
use crate::output::table::MISSING;
use crate::output::{TableBuilder, format_bytes};

const COLUMNS: [&str; 8] = [
    "PID",
    "Node",
    "Version",
    "Invocation",
    "SQL",
    "Console",
    "Store",
    "Started",
];

/// Print every matching node process, then the staging usage line.
pub fn show_status(stage: &Stage, version: Option<&str>) -> Result<()> {
    let filter = stage.filter(version)?;
    let nodes = stage.discovery().discover(&filter)?;

    let table = node_table(&nodes, &stage.workspace);
    table
        .render(&mut std::io::stdout().lock())
        .context("failed to write status table")?;
    println!("{} node process(es) running", table.len());

    let usage = stage.usage()?;
    println!(
        "Staging root {}: {} in {} entr{}",
        stage.workspace.root().display(),
        format_bytes(usage.total_bytes()),
        usage.entries.len(),
        if usage.entries.len() == 1 { "y" } else { "ies" }
    );
    stage.warn_if_over_capacity(&usage);
    Ok(())
}

fn node_table(nodes: &[NodeProcess], workspace: &StagingWorkspace) -> TableBuilder {
    let mut table = TableBuilder::new(&COLUMNS);
    for node in nodes {
        let or_missing = |value: Option<String>| value.unwrap_or_else(|| MISSING.to_string());
        table.add_row([
            node.pid.to_string(),
            or_missing(node.index.map(|index| index.to_string())),
            node.version_label().to_string(),
            or_missing(node.invocation.map(|id| id.to_string())),
            or_missing(node.listen_addr.clone()),
            or_missing(node.console_url()),
            or_missing(node.store.as_ref().map(|store| relative_store(store, workspace))),
            or_missing(
                node.started_at
                    .map(|at| at.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S").to_string()),
            ),
        ]);
    }
    table
}

/// Store path shown relative to the staging root when it lives below it.
fn relative_store(store: &std::path::Path, workspace: &StagingWorkspace) -> String {
    store
        .strip_prefix(workspace.root())
        .unwrap_or(store)
        .display()
        .to_string()
}
