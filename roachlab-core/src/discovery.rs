//! Re-identification of cluster processes from the live process table.
//!
//! A process belongs to us iff its command line carries a node launch
//! subcommand and mentions the staging root. Everything else (version, ports,
//! invocation, node index) is parsed back out of the arguments the launcher
//! wrote.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::error::{StageError, StageResult};
use crate::host::{CommandLine, ProcessEntry, ProcessTable};
use crate::launcher::{START_MULTI, START_SINGLE, sql_shell};
use crate::version::{ResolvedBinary, suffix_version};
use crate::workspace::{InvocationId, StagingWorkspace};

/// A running node recovered from its command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeProcess {
    /// OS process id.
    pub pid: u32,
    /// Executable token that preceded the launch subcommand.
    pub executable: String,
    /// `major.minor` if it could be attributed.
    pub version: Option<String>,
    /// `--listen-addr` value.
    pub listen_addr: Option<String>,
    /// `--http-addr` value.
    pub http_addr: Option<String>,
    /// `--store` value.
    pub store: Option<PathBuf>,
    /// Invocation parsed from the store path.
    pub invocation: Option<InvocationId>,
    /// Node index parsed from the store path.
    pub index: Option<u16>,
    /// Whether the node was started with a join list.
    pub joined: bool,
    /// Process start time.
    pub started_at: Option<DateTime<Utc>>,
}

impl NodeProcess {
    /// Log file path rebuilt from the store path.
    #[must_use]
    pub fn log_file(&self, workspace: &StagingWorkspace) -> Option<PathBuf> {
        Some(workspace.node_log_file(self.invocation?, self.index?))
    }

    /// Console URL, if the HTTP address is known.
    #[must_use]
    pub fn console_url(&self) -> Option<String> {
        self.http_addr.as_ref().map(|addr| format!("http://{addr}"))
    }

    /// SQL shell against this node with its own binary.
    #[must_use]
    pub fn sql_command(&self) -> Option<CommandLine> {
        self.listen_addr
            .as_deref()
            .map(|addr| sql_shell(&self.executable, addr))
    }

    /// Short version label for display.
    #[must_use]
    pub fn version_label(&self) -> &str {
        self.version.as_deref().unwrap_or("unknown")
    }
}

/// Which executables discovery should accept.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiscoveryFilter {
    executable: Option<String>,
    requested_version: Option<String>,
}

impl DiscoveryFilter {
    /// Match every version.
    #[must_use]
    pub fn any() -> Self {
        Self::default()
    }

    /// Match only processes started with `binary` (the `-v` case).
    #[must_use]
    pub fn binary(binary: &ResolvedBinary) -> Self {
        Self {
            executable: Some(binary.identifier()),
            requested_version: Some(binary.label()),
        }
    }

    /// Whether a version restriction is in effect.
    #[must_use]
    pub const fn is_filtered(&self) -> bool {
        self.executable.is_some()
    }

    fn accepts(&self, node: &NodeProcess) -> bool {
        self.executable
            .as_deref()
            .is_none_or(|exe| exe == node.executable)
    }
}

/// Outcome of `stop`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StopReport {
    /// Pids that were sent SIGKILL.
    pub killed: Vec<u32>,
    /// Pids that had already gone or refused the signal.
    pub failed: Vec<u32>,
}

/// Discovery over a process table.
pub struct ProcessDiscovery<'a, T: ProcessTable> {
    table: &'a T,
    workspace: &'a StagingWorkspace,
    binary_name: String,
    default: Option<ResolvedBinary>,
}

impl<'a, T: ProcessTable> ProcessDiscovery<'a, T> {
    /// Discovery for nodes under `workspace`. `default` is the unsuffixed
    /// binary if one is installed; it labels versions and wins ties when
    /// picking the first node.
    pub fn new(
        table: &'a T,
        workspace: &'a StagingWorkspace,
        binary_name: impl Into<String>,
        default: Option<ResolvedBinary>,
    ) -> Self {
        Self {
            table,
            workspace,
            binary_name: binary_name.into(),
            default,
        }
    }

    /// Every cluster member regardless of version, sorted by
    /// (invocation, node index, pid).
    #[must_use]
    pub fn members(&self) -> Vec<NodeProcess> {
        let root = self.workspace.root().display().to_string();
        let mut members: Vec<NodeProcess> = self
            .table
            .snapshot()
            .iter()
            .filter_map(|entry| self.parse_member(entry, &root))
            .collect();
        members.sort_by(|a, b| {
            (a.invocation, a.index, a.pid).cmp(&(b.invocation, b.index, b.pid))
        });
        debug!(count = members.len(), "discovered cluster processes");
        members
    }

    /// Members accepted by `filter`. Fails with [`StageError::NotFound`] when
    /// nothing runs at all, or [`StageError::AmbiguousVersion`] when only other
    /// versions run.
    pub fn discover(&self, filter: &DiscoveryFilter) -> StageResult<Vec<NodeProcess>> {
        let members = self.members();
        if members.is_empty() {
            return Err(StageError::NotFound);
        }

        let matched: Vec<NodeProcess> = members
            .iter()
            .filter(|node| filter.accepts(node))
            .cloned()
            .collect();
        if matched.is_empty() {
            let running: BTreeSet<String> =
                members.into_iter().map(|node| node.executable).collect();
            return Err(StageError::AmbiguousVersion {
                requested: filter.requested_version.clone().unwrap_or_default(),
                running: running.into_iter().collect(),
            });
        }
        Ok(matched)
    }

    /// Members of one invocation, for the post-launch summary.
    #[must_use]
    pub fn invocation(&self, id: InvocationId) -> Vec<NodeProcess> {
        self.members()
            .into_iter()
            .filter(|node| node.invocation == Some(id))
            .collect()
    }

    /// The canonical "first" node for `web`, `sql` and `log`.
    ///
    /// Ordering is by the node index recorded in the store path, then by the
    /// listen address as text. With no version filter, instances of the
    /// default binary are preferred whenever any of them are running.
    pub fn first_node(&self, filter: &DiscoveryFilter) -> StageResult<NodeProcess> {
        let mut candidates = self.discover(filter)?;

        if !filter.is_filtered()
            && let Some(default) = &self.default
        {
            let id = default.identifier();
            if candidates.iter().any(|node| node.executable == id) {
                candidates.retain(|node| node.executable == id);
            }
        }

        candidates
            .into_iter()
            .min_by(|a, b| {
                let key = |n: &NodeProcess| (n.index.unwrap_or(u16::MAX), n.listen_addr.clone());
                key(a).cmp(&key(b)).then(a.pid.cmp(&b.pid))
            })
            .ok_or(StageError::NotFound)
    }

    /// Force-kill every member accepted by `filter`, one by one.
    pub fn stop(&self, filter: &DiscoveryFilter) -> StageResult<StopReport> {
        let mut report = StopReport::default();
        for node in self.discover(filter)? {
            if self.table.kill(node.pid) {
                info!(pid = node.pid, node = ?node.index, "killed node process");
                report.killed.push(node.pid);
            } else {
                warn!(pid = node.pid, "could not signal node process");
                report.failed.push(node.pid);
            }
        }
        Ok(report)
    }

    fn parse_member(&self, entry: &ProcessEntry, root: &str) -> Option<NodeProcess> {
        let position = entry
            .cmd
            .iter()
            .position(|arg| arg == START_MULTI || arg == START_SINGLE)?;
        if !entry.cmd.iter().any(|arg| arg.contains(root)) {
            return None;
        }
        let executable = entry.cmd.get(position.checked_sub(1)?)?.clone();
        let args = &entry.cmd[position + 1..];

        let store = flag_value(args, "--store").map(PathBuf::from);
        let (invocation, index) = store
            .as_deref()
            .and_then(|path| self.workspace.parse_node_data_dir(path))
            .map_or((None, None), |(id, index)| (Some(id), Some(index)));

        Some(NodeProcess {
            pid: entry.pid,
            version: self.attribute_version(&executable),
            listen_addr: flag_value(args, "--listen-addr"),
            http_addr: flag_value(args, "--http-addr"),
            joined: flag_value(args, "--join").is_some(),
            started_at: i64::try_from(entry.start_time)
                .ok()
                .and_then(|secs| DateTime::from_timestamp(secs, 0)),
            executable,
            store,
            invocation,
            index,
        })
    }

    fn attribute_version(&self, executable: &str) -> Option<String> {
        suffix_version(&self.binary_name, Path::new(executable)).or_else(|| {
            self.default
                .as_ref()
                .filter(|default| default.identifier() == executable)
                .and_then(|default| default.version.clone())
        })
    }
}

/// Value of `--flag=value` or `--flag value`.
fn flag_value(args: &[String], flag: &str) -> Option<String> {
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        if let Some(value) = arg.strip_prefix(flag) {
            if let Some(value) = value.strip_prefix('=') {
                return Some(value.to_string());
            }
            if value.is_empty() {
                return iter.next().cloned();
            }
        }
    }
    None
}
