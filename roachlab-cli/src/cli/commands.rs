//! CLI command definitions

use clap::{Parser, Subcommand};

/// Ephemeral local `CockroachDB` test clusters
#[derive(Parser, Debug)]
#[command(name = "roachlab", author, version, about, long_about = None)]
pub struct Cli {
    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Commands {
    /// Launch a new cluster in its own staging directory
    Start {
        /// Number of nodes; 1 starts a self-initializing single node
        #[arg(short = 'n', value_name = "COUNT", default_value_t = 1, allow_negative_numbers = true)]
        nodes: i64,

        /// Database version as major.minor, e.g. 23.1
        #[arg(short = 'v', value_name = "VERSION")]
        version: Option<String>,

        /// Import the sample workload into node 1 once the cluster is up
        #[arg(short = 'i')]
        import: bool,
    },

    /// Force-kill every node process of the matching clusters
    Stop {
        /// Only clusters running this version
        #[arg(short = 'v', value_name = "VERSION")]
        version: Option<String>,
    },

    /// List running node processes and staging usage
    #[command(visible_aliases = ["stat", "show"])]
    Status {
        /// Only clusters running this version
        #[arg(short = 'v', value_name = "VERSION")]
        version: Option<String>,
    },

    /// Delete everything under the staging root after confirmation
    Clean,

    /// Open the first node's console in a browser
    Web {
        /// Pick the first node among clusters running this version
        #[arg(short = 'v', value_name = "VERSION")]
        version: Option<String>,
    },

    /// Open a SQL shell against the first node
    Sql {
        /// Pick the first node among clusters running this version
        #[arg(short = 'v', value_name = "VERSION")]
        version: Option<String>,
    },

    /// Page through the first node's log file
    Log {
        /// Pick the first node among clusters running this version
        #[arg(short = 'v', value_name = "VERSION")]
        version: Option<String>,
    },
}
