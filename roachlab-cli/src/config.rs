use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use roachlab_core::StageConfig;
use roachlab_core::config::{BinaryConfig, LaunchConfig, PortConfig, StagingConfig};
use serde::Deserialize;

const DEFAULT_CONFIG: &str = include_str!("../config/default.toml");

/// Overrides the location of the user config file.
pub const CONFIG_PATH_ENV: &str = "ROACHLAB_CONFIG";
/// Overrides `staging.root` after all files are merged.
pub const STAGING_ROOT_ENV: &str = "ROACHLAB_STAGING_ROOT";

/// Built-in defaults shipped with the binary.
pub fn builtin_config() -> Result<StageConfig> {
    toml::from_str(DEFAULT_CONFIG).context("built-in default config is invalid")
}

/// Read-only view of the merged configuration. Cluster state is never written
/// back; the file only tunes how clusters are laid out and launched.
pub struct ConfigManager {
    path: PathBuf,
    config: StageConfig,
}

impl ConfigManager {
    pub fn load() -> Result<Self> {
        let path = match std::env::var_os(CONFIG_PATH_ENV) {
            Some(path) => PathBuf::from(path),
            None => default_config_path()?,
        };
        let mut manager = Self::load_with_path(path)?;
        if let Ok(root) = std::env::var(STAGING_ROOT_ENV)
            && !root.trim().is_empty()
        {
            manager.config.staging.root = root;
        }
        Ok(manager)
    }

    pub fn load_with_path<P: Into<PathBuf>>(path: P) -> Result<Self> {
        let path = path.into();
        let mut config = builtin_config()?;

        if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("failed to read config at {}", path.display()))?;
            let user_config: UserConfig = toml::from_str(&contents)
                .with_context(|| format!("invalid config at {}", path.display()))?;
            merge(&mut config, &user_config);
        }

        Ok(Self { path, config })
    }

    #[must_use]
    pub const fn config(&self) -> &StageConfig {
        &self.config
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Shape of a user config file. Sections and delays left out of the file are
/// `None` so they never reset what the defaults already hold.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct UserConfig {
    staging: Option<StagingConfig>,
    ports: Option<PortConfig>,
    binary: Option<BinaryConfig>,
    launch: Option<UserLaunch>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct UserLaunch {
    #[serde(with = "humantime_serde")]
    init_delay: Option<Duration>,
    #[serde(with = "humantime_serde")]
    ready_delay: Option<Duration>,
}

fn merge(base: &mut StageConfig, other: &UserConfig) {
    if let Some(staging) = &other.staging {
        merge_staging(&mut base.staging, staging);
    }
    if let Some(ports) = &other.ports {
        merge_ports(&mut base.ports, ports);
    }
    if let Some(binary) = &other.binary {
        merge_binary(&mut base.binary, binary);
    }
    if let Some(launch) = &other.launch {
        merge_launch(&mut base.launch, launch);
    }
}

fn merge_staging(base: &mut StagingConfig, other: &StagingConfig) {
    if !other.root.trim().is_empty() {
        base.root.clone_from(&other.root);
    }
    if other.disk_warning_gb > 0 {
        base.disk_warning_gb = other.disk_warning_gb;
    }
}

const fn merge_ports(base: &mut PortConfig, other: &PortConfig) {
    if other.base_listen > 0 {
        base.base_listen = other.base_listen;
    }
    if other.base_http > 0 {
        base.base_http = other.base_http;
    }
    if other.block_step > 0 {
        base.block_step = other.block_step;
    }
}

fn merge_binary(base: &mut BinaryConfig, other: &BinaryConfig) {
    if !other.name.is_empty() {
        base.name.clone_from(&other.name);
    }
    if !other.sample_workload.is_empty() {
        base.sample_workload.clone_from(&other.sample_workload);
    }
}

// Zero is a valid delay, so any delay written in the file wins.
const fn merge_launch(base: &mut LaunchConfig, other: &UserLaunch) {
    if let Some(delay) = other.init_delay {
        base.init_delay = delay;
    }
    if let Some(delay) = other.ready_delay {
        base.ready_delay = delay;
    }
}

fn default_config_path() -> Result<PathBuf> {
    let base =
        dirs::config_dir().ok_or_else(|| anyhow!("unable to determine configuration directory"))?;
    Ok(base.join("roachlab").join("config.toml"))
}
