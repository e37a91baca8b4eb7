//! Lifecycle orchestration for ephemeral local CockroachDB test clusters.
//!
//! Nothing here persists cluster state. A cluster is launched with command
//! lines that embed the staging root and the resolved binary, and every later
//! operation re-derives "our" processes from the live process table.

// Safety-focused Clippy lints to prevent unsafe error handling regression
#![warn(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::unimplemented,
    clippy::todo
)]
#![deny(clippy::unwrap_in_result, clippy::panic_in_result_fn)]

pub mod config;
pub mod discovery;
pub mod error;
pub mod host;
pub mod launcher;
pub mod ports;
pub mod version;
pub mod workspace;

pub use config::StageConfig;
pub use discovery::{DiscoveryFilter, NodeProcess, ProcessDiscovery};
pub use error::{StageError, StageResult};
pub use launcher::{ClusterLauncher, LaunchRequest, LaunchedCluster, NodeSpec};
pub use ports::{NodeCount, PortAllocator, PortBlock};
pub use version::{ResolvedBinary, VersionResolver};
pub use workspace::{InvocationId, StagingWorkspace, WorkspaceUsage};
