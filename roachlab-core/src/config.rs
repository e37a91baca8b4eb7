//! Orchestrator configuration shared by the CLI and core crates.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Directory name used under the system temp dir when no staging root is set.
pub const DEFAULT_STAGING_DIR: &str = "roachlab";

const BYTES_PER_GB: u64 = 1024 * 1024 * 1024;

/// Top-level configuration for one orchestrator run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StageConfig {
    /// Staging directory layout and capacity warning.
    pub staging: StagingConfig,
    /// Base ports and block stepping.
    pub ports: PortConfig,
    /// Database binary naming.
    pub binary: BinaryConfig,
    /// Fixed delays used while bringing a multi-node cluster up.
    pub launch: LaunchConfig,
}

/// Where invocation workspaces live.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StagingConfig {
    /// Staging root; empty means `<tmp>/roachlab`.
    pub root: String,
    /// Usage above this many gigabytes triggers a warning.
    pub disk_warning_gb: u64,
}

impl StagingConfig {
    /// Resolved staging root.
    #[must_use]
    pub fn root_path(&self) -> PathBuf {
        if self.root.trim().is_empty() {
            std::env::temp_dir().join(DEFAULT_STAGING_DIR)
        } else {
            PathBuf::from(self.root.trim())
        }
    }

    /// Warning threshold in bytes.
    #[must_use]
    pub const fn disk_warning_bytes(&self) -> u64 {
        self.disk_warning_gb.saturating_mul(BYTES_PER_GB)
    }
}

impl Default for StagingConfig {
    fn default() -> Self {
        Self {
            root: String::new(),
            disk_warning_gb: 50,
        }
    }
}

/// Base ports for node `k`: `base + k + offset`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct PortConfig {
    /// SQL/listen base port. Node 1 of an unshifted block gets `base_listen + 1`.
    pub base_listen: u16,
    /// HTTP console base port.
    pub base_http: u16,
    /// Offset increment applied when a block collides.
    pub block_step: u16,
}

impl Default for PortConfig {
    fn default() -> Self {
        Self {
            base_listen: 26256,
            base_http: 8079,
            block_step: 100,
        }
    }
}

/// Naming of the database binary and its helpers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BinaryConfig {
    /// Unsuffixed binary looked up on `PATH`; versioned builds are `<name>-<version>`.
    pub name: String,
    /// Workload passed to `workload init` when sample data is requested.
    pub sample_workload: String,
}

impl Default for BinaryConfig {
    fn default() -> Self {
        Self {
            name: "cockroach".to_string(),
            sample_workload: "movr".to_string(),
        }
    }
}

/// Fixed waits around cluster initialization. These are not readiness probes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct LaunchConfig {
    /// Wait after spawning every node, before `init`.
    #[serde(with = "humantime_serde")]
    pub init_delay: Duration,
    /// Wait after `init` before the cluster is reported ready.
    #[serde(with = "humantime_serde")]
    pub ready_delay: Duration,
}

impl Default for LaunchConfig {
    fn default() -> Self {
        Self {
            init_delay: Duration::from_secs(3),
            ready_delay: Duration::from_secs(2),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_put_node_one_on_database_default_ports() {
        let ports = PortConfig::default();
        assert_eq!(ports.base_listen + 1, 26257);
        assert_eq!(ports.base_http + 1, 8080);
        assert_eq!(ports.block_step, 100);
    }

    #[test]
    fn empty_root_falls_back_to_temp_dir() {
        let staging = StagingConfig::default();
        assert_eq!(
            staging.root_path(),
            std::env::temp_dir().join(DEFAULT_STAGING_DIR)
        );
        assert_eq!(staging.disk_warning_bytes(), 50 * BYTES_PER_GB);
    }

    #[test]
    fn partial_toml_keeps_remaining_defaults() {
        let config: StageConfig = toml::from_str(
            r#"
            [staging]
            root = "/srv/stage"

            [launch]
            init_delay = "250ms"
            "#,
        )
        .expect("parse config");

        assert_eq!(config.staging.root_path(), PathBuf::from("/srv/stage"));
        assert_eq!(config.staging.disk_warning_gb, 50);
        assert_eq!(config.launch.init_delay, Duration::from_millis(250));
        assert_eq!(config.launch.ready_delay, Duration::from_secs(2));
        assert_eq!(config.binary.name, "cockroach");
    }
}
