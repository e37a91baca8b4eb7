//! Staging root cleanup

use anyhow::Result;
use roachlab_core::host::HostOpenFiles;
use roachlab_core::workspace::CleanOutcome;

use crate::cli::context::Stage;
use crate::interactive::confirm;
use crate::output::format_bytes;

/// Refuse while anything under the staging root is open, otherwise report
/// usage and delete every entry once the user agrees.
pub fn clean_workspace(stage: &Stage) -> Result<()> {
    let root = stage.workspace.root().display().to_string();
    let outcome = stage.workspace.clean(&HostOpenFiles, |usage| {
        println!(
            "Staging root {root} holds {} in {} entr{}",
            format_bytes(usage.total_bytes()),
            usage.entries.len(),
            if usage.entries.len() == 1 { "y" } else { "ies" }
        );
        confirm("Delete everything under it?", false)
    })?;

    match outcome {
        CleanOutcome::Empty => println!("Staging root {root} is already empty"),
        CleanOutcome::Declined => println!("Nothing removed"),
        CleanOutcome::Removed { entries, bytes } => {
            println!("Removed {entries} entr{} ({})", if entries == 1 { "y" } else { "ies" }, format_bytes(bytes));
        }
    }
    Ok(())
}
