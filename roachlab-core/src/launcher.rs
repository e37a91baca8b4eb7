//! Multi-node and single-node cluster launch.
//!
//! Nodes are spawned detached and never supervised. A multi-node cluster is
//! brought up with fixed sleeps around a single `init` call: there is no
//! readiness polling, and a node that dies on startup is not noticed here.

use std::path::PathBuf;

use tokio::time::sleep;
use tracing::{info, warn};

use crate::config::{BinaryConfig, LaunchConfig};
use crate::error::StageResult;
use crate::host::{CommandLine, ProcessRunner};
use crate::ports::PortBlock;
use crate::version::ResolvedBinary;
use crate::workspace::{InvocationId, StagingWorkspace};

/// Host every node binds to.
pub const NODE_HOST: &str = "localhost";

/// Subcommand that starts a cluster member.
pub const START_MULTI: &str = "start";
/// Subcommand that starts an integrated, self-initializing single node.
pub const START_SINGLE: &str = "start-single-node";

/// Everything needed to launch one node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeSpec {
    /// 1-based node index; node 1 receives `init` and the sample import.
    pub index: u16,
    /// `host:port` for SQL and inter-node traffic.
    pub listen_addr: String,
    /// `host:port` for the HTTP console.
    pub http_addr: String,
    /// Store directory.
    pub store: PathBuf,
    /// File receiving the node's stdout and stderr.
    pub log: PathBuf,
    /// Comma-separated join list; `None` for single-node mode.
    pub join: Option<String>,
}

impl NodeSpec {
    /// Command line that starts this node with `binary`.
    #[must_use]
    pub fn command(&self, binary: &ResolvedBinary) -> CommandLine {
        let subcommand = if self.join.is_some() {
            START_MULTI
        } else {
            START_SINGLE
        };
        let command = CommandLine::new(&binary.executable)
            .arg(subcommand)
            .arg("--insecure")
            .arg(format!("--listen-addr={}", self.listen_addr))
            .arg(format!("--http-addr={}", self.http_addr))
            .arg(format!("--store={}", self.store.display()));
        match &self.join {
            Some(join) => command.arg(format!("--join={join}")),
            None => command,
        }
    }

    /// Console URL.
    #[must_use]
    pub fn console_url(&self) -> String {
        format!("http://{}", self.http_addr)
    }
}

/// Inputs for one `start`.
#[derive(Debug, Clone)]
pub struct LaunchRequest {
    /// Invocation owning the workspace subtree.
    pub invocation: InvocationId,
    /// Binary every node runs.
    pub binary: ResolvedBinary,
    /// Ports for every node.
    pub block: PortBlock,
    /// Run the sample workload import against node 1 after start.
    pub import_sample_data: bool,
}

/// Result of a launch. Only says what was issued, not what came up.
#[derive(Debug, Clone)]
pub struct LaunchedCluster {
    /// Owning invocation.
    pub invocation: InvocationId,
    /// Binary the nodes were started with.
    pub binary: ResolvedBinary,
    /// Node specs in index order.
    pub nodes: Vec<NodeSpec>,
    /// Pids returned by the spawns, parallel to `nodes`.
    pub pids: Vec<u32>,
}

impl LaunchedCluster {
    /// Node 1.
    #[must_use]
    pub fn first(&self) -> Option<&NodeSpec> {
        self.nodes.first()
    }

    /// SQL shell invocation against node 1.
    #[must_use]
    pub fn sql_command(&self) -> Option<CommandLine> {
        self.first()
            .map(|node| sql_shell(&self.binary.executable, &node.listen_addr))
    }
}

/// `<exe> sql --insecure --host=<addr>`.
#[must_use]
pub fn sql_shell(executable: impl Into<PathBuf>, listen_addr: &str) -> CommandLine {
    CommandLine::new(executable)
        .arg("sql")
        .arg("--insecure")
        .arg(format!("--host={listen_addr}"))
}

/// Starts clusters inside a staging workspace.
pub struct ClusterLauncher<'a, R: ProcessRunner> {
    runner: &'a R,
    workspace: &'a StagingWorkspace,
    timing: LaunchConfig,
    sample_workload: String,
}

impl<'a, R: ProcessRunner> ClusterLauncher<'a, R> {
    /// Launcher spawning through `runner` into `workspace`.
    pub fn new(
        runner: &'a R,
        workspace: &'a StagingWorkspace,
        timing: LaunchConfig,
        binary: &BinaryConfig,
    ) -> Self {
        Self {
            runner,
            workspace,
            timing,
            sample_workload: binary.sample_workload.clone(),
        }
    }

    /// Node specs for `request`, in index order.
    #[must_use]
    pub fn plan(&self, request: &LaunchRequest) -> Vec<NodeSpec> {
        let block = request.block;
        let listen = |index: u16| format!("{NODE_HOST}:{}", block.listen_port(index));
        let join = (!block.nodes().is_single()).then(|| {
            block
                .nodes()
                .indexes()
                .map(listen)
                .collect::<Vec<_>>()
                .join(",")
        });

        block
            .nodes()
            .indexes()
            .map(|index| NodeSpec {
                index,
                listen_addr: listen(index),
                http_addr: format!("{NODE_HOST}:{}", block.http_port(index)),
                store: self.workspace.node_data_dir(request.invocation, index),
                log: self.workspace.node_log_file(request.invocation, index),
                join: join.clone(),
            })
            .collect()
    }

    /// Prepare the workspace, spawn every node, initialize multi-node
    /// clusters, and optionally import sample data.
    pub async fn launch(&self, request: &LaunchRequest) -> StageResult<LaunchedCluster> {
        self.workspace.prepare(request.invocation)?;
        let nodes = self.plan(request);

        let mut pids = Vec::with_capacity(nodes.len());
        for node in &nodes {
            let pid = self
                .runner
                .spawn_detached(&node.command(&request.binary), &node.log)?;
            info!(pid, node = node.index, addr = %node.listen_addr, "launched node");
            pids.push(pid);
        }

        let cluster = LaunchedCluster {
            invocation: request.invocation,
            binary: request.binary.clone(),
            nodes,
            pids,
        };
        let Some(first) = cluster.first().cloned() else {
            return Ok(cluster);
        };

        if first.join.is_some() {
            sleep(self.timing.init_delay).await;
            let init = CommandLine::new(&request.binary.executable)
                .arg("init")
                .arg("--insecure")
                .arg(format!("--host={}", first.listen_addr));
            let status = self.runner.run_logged(&init, &first.log).await?;
            if !status.success() {
                warn!(%status, log = %first.log.display(), "cluster init exited unsuccessfully");
            }
            sleep(self.timing.ready_delay).await;
        } else if request.import_sample_data {
            // start-single-node initializes itself but still needs time to accept SQL.
            sleep(self.timing.init_delay).await;
        }

        if request.import_sample_data {
            let import = CommandLine::new(&request.binary.executable)
                .arg("workload")
                .arg("init")
                .arg(&self.sample_workload)
                .arg(format!(
                    "postgresql://root@{}?sslmode=disable",
                    first.listen_addr
                ));
            let status = self.runner.run_logged(&import, &first.log).await?;
            if !status.success() {
                warn!(%status, workload = %self.sample_workload, "sample data import failed");
            }
        }

        Ok(cluster)
    }
}
