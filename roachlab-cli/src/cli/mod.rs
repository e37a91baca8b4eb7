//! CLI module organization

pub mod clean;
pub mod commands;
pub mod context;
pub mod server;
pub mod session;
pub mod status;

pub use clean::clean_workspace;
pub use commands::{Cli, Commands};
pub use context::Stage;
pub use server::{start_cluster, stop_cluster};
pub use session::{open_log, open_sql, open_web};
pub use status::show_status;

use anyhow::Result;

/// Dispatch one parsed command.
pub async fn run(stage: &Stage, command: Commands) -> Result<()> {
    match command {
        Commands::Start {
            nodes,
            version,
            import,
        } => start_cluster(stage, nodes, version.as_deref(), import).await,
        Commands::Stop { version } => stop_cluster(stage, version.as_deref()),
        Commands::Status { version } => show_status(stage, version.as_deref()),
        Commands::Clean => clean_workspace(stage),
        Commands::Web { version } => open_web(stage, version.as_deref()),
        Commands::Sql { version } => open_sql(stage, version.as_deref()),
        Commands::Log { version } => open_log(stage, version.as_deref()),
    }
}
