//! Cluster start and stop

use anyhow::Result;
use roachlab_core::host::{HostRunner, HostSockets};
use roachlab_core::{
    ClusterLauncher, InvocationId, LaunchRequest, LaunchedCluster, NodeCount, NodeProcess,
    PortAllocator,
};
use tracing::info;

use crate::cli::context::Stage;
use crate::output::spinner;

/// Validate, resolve, allocate ports, launch, then print the ready banner.
pub async fn start_cluster(
    stage: &Stage,
    nodes: i64,
    version: Option<&str>,
    import_sample_data: bool,
) -> Result<()> {
    // Order matters: nothing touches the disk or the network before the
    // count and version are known to be good.
    let nodes = NodeCount::try_from(nodes)?;
    let binary = stage.resolve(version)?;
    let block = PortAllocator::new(stage.config.ports, &HostSockets).allocate(nodes)?;

    let request = LaunchRequest {
        invocation: InvocationId::current(),
        binary,
        block,
        import_sample_data,
    };
    info!(invocation = %request.invocation, offset = block.offset(), %nodes, "starting cluster");

    let runner = HostRunner;
    let launcher = ClusterLauncher::new(
        &runner,
        &stage.workspace,
        stage.config.launch,
        &stage.config.binary,
    );
    let progress = spinner(format!(
        "Starting {nodes}-node cluster with {}",
        request.binary
    ));
    let launched = launcher.launch(&request).await;
    progress.finish_and_clear();
    let cluster = launched?;

    let running = stage.discovery().invocation(cluster.invocation);
    print_banner(&cluster, &running);

    let usage = stage.usage()?;
    stage.warn_if_over_capacity(&usage);
    Ok(())
}

fn print_banner(cluster: &LaunchedCluster, running: &[NodeProcess]) {
    println!(
        "Cluster ready: invocation {}, {} node(s), {}",
        cluster.invocation,
        cluster.nodes.len(),
        cluster.binary
    );
    println!("  {}", process_summary(cluster.nodes.len(), running));
    if let Some(sql) = cluster.sql_command() {
        println!("  sql:     {sql}");
    }
    if let Some(first) = cluster.first() {
        println!("  console: {}", first.console_url());
        println!("  logs:    {}", first.log.display());
    }
}

/// One line, e.g. `processes: 3/3 running (pids 101, 102, 103)`.
fn process_summary(expected: usize, running: &[NodeProcess]) -> String {
    let pids: Vec<String> = running.iter().map(|node| node.pid.to_string()).collect();
    format!(
        "processes: {}/{expected} running (pids {})",
        running.len(),
        if pids.is_empty() {
            "none".to_string()
        } else {
            pids.join(", ")
        }
    )
}

/// Kill every matching node process.
pub fn stop_cluster(stage: &Stage, version: Option<&str>) -> Result<()> {
    let filter = stage.filter(version)?;
    let report = stage.discovery().stop(&filter)?;

    println!("Stopped {} node process(es)", report.killed.len());
    if !report.failed.is_empty() {
        let pids: Vec<String> = report.failed.iter().map(ToString::to_string).collect();
        println!("Could not signal pid(s) {}; they may already have exited", pids.join(", "));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(pid: u32) -> NodeProcess {
        NodeProcess {
            pid,
            executable: "/usr/bin/cockroach".to_string(),
            version: None,
            listen_addr: None,
            http_addr: None,
            store: None,
            invocation: None,
            index: None,
            joined: false,
            started_at: None,
        }
    }

    #[test]
    fn summary_lists_running_pids() {
        assert_eq!(
            process_summary(3, &[node(7), node(8), node(9)]),
            "processes: 3/3 running (pids 7, 8, 9)"
        );
    }

    #[test]
    fn summary_shows_missing_nodes() {
        assert_eq!(process_summary(2, &[node(7)]), "processes: 1/2 running (pids 7)");
        assert_eq!(process_summary(1, &[]), "processes: 0/1 running (pids none)");
    }
}
