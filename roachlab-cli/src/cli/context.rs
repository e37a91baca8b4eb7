//! State shared by every command handler

use anyhow::{Context, Result};
use roachlab_core::host::SysinfoProcessTable;
use roachlab_core::{
    DiscoveryFilter, ProcessDiscovery, ResolvedBinary, StageConfig, StageResult, StagingWorkspace,
    VersionResolver, WorkspaceUsage,
};
use tracing::debug;

use crate::output::format_bytes;

/// Loaded configuration plus the host-facing pieces built from it.
pub struct Stage {
    pub config: StageConfig,
    pub workspace: StagingWorkspace,
    resolver: VersionResolver,
    table: SysinfoProcessTable,
}

impl Stage {
    #[must_use]
    pub fn new(config: StageConfig) -> Self {
        let workspace = StagingWorkspace::new(config.staging.root_path());
        let resolver = VersionResolver::from_env(config.binary.name.clone());
        debug!(root = %workspace.root().display(), binary = %config.binary.name, "stage ready");
        Self {
            config,
            workspace,
            resolver,
            table: SysinfoProcessTable,
        }
    }

    /// Binary for `version`, or the default binary when absent.
    pub fn resolve(&self, version: Option<&str>) -> StageResult<ResolvedBinary> {
        self.resolver.resolve(version)
    }

    /// Filter for a `-v` flag. A requested version must resolve to an
    /// installed binary before anything is matched against it.
    pub fn filter(&self, version: Option<&str>) -> StageResult<DiscoveryFilter> {
        match version {
            None => Ok(DiscoveryFilter::any()),
            Some(version) => self.resolve(Some(version)).map(|binary| DiscoveryFilter::binary(&binary)),
        }
    }

    /// Discovery over the live process table. The default binary, when
    /// installed, labels versions and wins first-node ties.
    #[must_use]
    pub fn discovery(&self) -> ProcessDiscovery<'_, SysinfoProcessTable> {
        ProcessDiscovery::new(
            &self.table,
            &self.workspace,
            self.resolver.binary_name(),
            self.resolver.resolve(None).ok(),
        )
    }

    pub fn usage(&self) -> Result<WorkspaceUsage> {
        self.workspace
            .usage()
            .with_context(|| format!("failed to measure {}", self.workspace.root().display()))
    }

    /// Print the capacity warning if usage is above the configured threshold.
    pub fn warn_if_over_capacity(&self, usage: &WorkspaceUsage) {
        let threshold = self.config.staging.disk_warning_bytes();
        if usage.exceeds(threshold) {
            eprintln!(
                "warning: staging root {} holds {}, above the {} threshold; run `roachlab clean` when idle",
                self.workspace.root().display(),
                format_bytes(usage.total_bytes()),
                format_bytes(threshold),
            );
        }
    }
}
