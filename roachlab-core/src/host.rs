//! Host introspection behind small traits.
//!
//! The orchestrator only ever reads three pieces of host state (bound sockets,
//! open files, the process table) and performs two actions (spawn a process,
//! kill a process). Keeping them behind traits lets the planning logic run
//! against in-memory fakes in tests.

use std::collections::HashSet;
use std::fmt;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};

use sysinfo::{Pid, ProcessRefreshKind, System, UpdateKind};
use tracing::debug;

use crate::error::{StageError, StageResult};

/// TCP state code for `LISTEN` in `/proc/net/tcp`.
const PROC_TCP_LISTEN: &str = "0A";
/// TCP state code for `ESTABLISHED` in `/proc/net/tcp`.
const PROC_TCP_ESTABLISHED: &str = "01";

/// Source of ports currently in `LISTEN` or `ESTABLISHED` state.
pub trait SocketProbe {
    /// Local ports of every listening or established TCP socket.
    fn occupied_ports(&self) -> StageResult<HashSet<u16>>;
}

/// Source of open file descriptors.
pub trait OpenFileProbe {
    /// `(pid, path)` for every file descriptor pointing below `root`.
    /// Working-directory references are not file descriptors and never appear.
    fn open_files_under(&self, root: &Path) -> StageResult<Vec<(u32, PathBuf)>>;
}

/// One row of the process table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessEntry {
    /// OS process id.
    pub pid: u32,
    /// Full argument vector, `cmd[0]` included.
    pub cmd: Vec<String>,
    /// Start time in seconds since the Unix epoch.
    pub start_time: u64,
}

/// Read access to the process table plus forced termination.
pub trait ProcessTable {
    /// Snapshot of every visible process.
    fn snapshot(&self) -> Vec<ProcessEntry>;

    /// Deliver SIGKILL. Returns whether the signal was sent.
    fn kill(&self, pid: u32) -> bool;
}

/// A fully specified external command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine {
    /// Executable as it will appear in `argv[0]`.
    pub program: PathBuf,
    /// Remaining arguments.
    pub args: Vec<String>,
}

impl CommandLine {
    /// Start a command line for `program`.
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// Append one argument.
    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// `std::process::Command` with inherited stdio.
    #[must_use]
    pub fn to_command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command.args(&self.args);
        command
    }
}

impl fmt::Display for CommandLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.display())?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// Launches node processes and one-shot helper commands.
#[allow(async_fn_in_trait)]
pub trait ProcessRunner {
    /// Start `command` in the background with stdout and stderr appended to
    /// `log`. Returns the child pid; the child is never waited on.
    fn spawn_detached(&self, command: &CommandLine, log: &Path) -> StageResult<u32>;

    /// Run `command` to completion with its output appended to `log`.
    async fn run_logged(&self, command: &CommandLine, log: &Path) -> StageResult<ExitStatus>;
}

/// Socket table of the local host.
#[derive(Debug, Default, Clone, Copy)]
pub struct HostSockets;

impl SocketProbe for HostSockets {
    fn occupied_ports(&self) -> StageResult<HashSet<u16>> {
        if cfg!(target_os = "linux") {
            let mut ports = HashSet::new();
            for table in ["/proc/net/tcp", "/proc/net/tcp6"] {
                match std::fs::read_to_string(table) {
                    Ok(contents) => ports.extend(parse_proc_net_tcp(&contents)),
                    // tcp6 is absent on hosts without IPv6.
                    Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                    Err(err) => return Err(StageError::io(format!("failed to read {table}"), err)),
                }
            }
            return Ok(ports);
        }

        let output = Command::new("netstat")
            .args(["-an", "-p", "tcp"])
            .output()
            .map_err(|err| StageError::io("failed to run netstat", err))?;
        Ok(parse_netstat(&String::from_utf8_lossy(&output.stdout)).collect())
    }
}

/// Parse `/proc/net/tcp` or `/proc/net/tcp6`, yielding local ports of
/// sockets in `LISTEN` or `ESTABLISHED` state.
pub fn parse_proc_net_tcp(contents: &str) -> impl Iterator<Item = u16> + '_ {
    contents.lines().skip(1).filter_map(|line| {
        let mut fields = line.split_whitespace();
        let local = fields.nth(1)?;
        let state = fields.nth(1)?;
        if state != PROC_TCP_LISTEN && state != PROC_TCP_ESTABLISHED {
            return None;
        }
        let (_, port_hex) = local.rsplit_once(':')?;
        u16::from_str_radix(port_hex, 16).ok()
    })
}

/// Parse `netstat -an` output, yielding local ports of sockets in `LISTEN` or
/// `ESTABLISHED` state. Handles both `addr:port` and BSD `addr.port` forms.
pub fn parse_netstat(contents: &str) -> impl Iterator<Item = u16> + '_ {
    contents.lines().filter_map(|line| {
        if !(line.contains("LISTEN") || line.contains("ESTABLISHED")) {
            return None;
        }
        let local = line.split_whitespace().nth(3)?;
        let (_, port) = local.rsplit_once([':', '.'])?;
        port.parse().ok()
    })
}

/// Open file descriptors of the local host.
#[derive(Debug, Default, Clone, Copy)]
pub struct HostOpenFiles;

impl OpenFileProbe for HostOpenFiles {
    fn open_files_under(&self, root: &Path) -> StageResult<Vec<(u32, PathBuf)>> {
        let root = root.canonicalize().unwrap_or_else(|_| root.to_path_buf());
        if cfg!(target_os = "linux") {
            let scan = scan_proc_fds(Path::new("/proc"), &root);
            if !scan.unreadable.is_empty() {
                // Usually other users' processes; on a shared root they may hold files.
                debug!(
                    count = scan.unreadable.len(),
                    pids = ?scan.unreadable,
                    root = %root.display(),
                    "busy check could not inspect every process"
                );
            }
            return Ok(scan.holders);
        }

        let output = Command::new("lsof")
            .arg("+D")
            .arg(&root)
            .output()
            .map_err(|err| StageError::io("failed to run lsof", err))?;
        // lsof exits 1 when nothing is open; only its stdout matters.
        Ok(parse_lsof(&String::from_utf8_lossy(&output.stdout)))
    }
}

/// Result of walking `/proc/<pid>/fd`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcFdScan {
    /// `(pid, path)` of descriptors resolving below the root.
    pub holders: Vec<(u32, PathBuf)>,
    /// Processes whose descriptor table could not be read (typically another
    /// user's processes). Their open files are unknown.
    pub unreadable: Vec<u32>,
}

/// Walk `<proc_root>/<pid>/fd/*` and collect links that resolve below `root`.
/// Processes that exit mid-walk are skipped silently.
pub fn scan_proc_fds(proc_root: &Path, root: &Path) -> ProcFdScan {
    let mut scan = ProcFdScan::default();
    let Ok(entries) = std::fs::read_dir(proc_root) else {
        return scan;
    };

    for entry in entries.flatten() {
        let Some(pid) = entry.file_name().to_str().and_then(|s| s.parse::<u32>().ok()) else {
            continue;
        };
        let fds = match std::fs::read_dir(entry.path().join("fd")) {
            Ok(fds) => fds,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => continue,
            Err(_) => {
                scan.unreadable.push(pid);
                continue;
            }
        };
        for fd in fds.flatten() {
            if let Ok(target) = std::fs::read_link(fd.path())
                && target.starts_with(root)
            {
                scan.holders.push((pid, target));
            }
        }
    }
    scan.holders.sort();
    scan.holders.dedup();
    scan.unreadable.sort_unstable();
    scan
}

/// Parse default `lsof` columns, skipping the header and `cwd` entries.
pub fn parse_lsof(contents: &str) -> Vec<(u32, PathBuf)> {
    contents
        .lines()
        .skip(1)
        .filter_map(|line| {
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() < 9 || fields[3] == "cwd" {
                return None;
            }
            let pid = fields[1].parse().ok()?;
            Some((pid, PathBuf::from(fields[8..].join(" "))))
        })
        .collect()
}

/// Process table backed by `sysinfo`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SysinfoProcessTable;

impl ProcessTable for SysinfoProcessTable {
    fn snapshot(&self) -> Vec<ProcessEntry> {
        let mut system = System::new();
        // Command lines are not loaded by a plain refresh.
        system.refresh_processes_specifics(ProcessRefreshKind::new().with_cmd(UpdateKind::Always));
        let mut entries: Vec<ProcessEntry> = system
            .processes()
            .iter()
            .map(|(pid, process)| ProcessEntry {
                pid: pid.as_u32(),
                cmd: process.cmd().to_vec(),
                start_time: process.start_time(),
            })
            .collect();
        entries.sort_by_key(|entry| entry.pid);
        entries
    }

    fn kill(&self, pid: u32) -> bool {
        let mut system = System::new();
        let pid = Pid::from_u32(pid);
        if !system.refresh_process(pid) {
            return false;
        }
        system.process(pid).is_some_and(sysinfo::Process::kill)
    }
}

/// Runner that spawns real OS processes.
#[derive(Debug, Default, Clone, Copy)]
pub struct HostRunner;

impl HostRunner {
    fn log_handles(log: &Path) -> StageResult<(File, File)> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(log)
            .map_err(|err| StageError::io(format!("failed to open log {}", log.display()), err))?;
        let err_file = file
            .try_clone()
            .map_err(|err| StageError::io("failed to duplicate log handle", err))?;
        Ok((file, err_file))
    }
}

impl ProcessRunner for HostRunner {
    fn spawn_detached(&self, command: &CommandLine, log: &Path) -> StageResult<u32> {
        let (stdout, stderr) = Self::log_handles(log)?;
        let mut cmd = command.to_command();
        cmd.stdin(Stdio::null())
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr));

        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            // Own process group: Ctrl-C in the launching terminal must not reach nodes.
            cmd.process_group(0);
        }

        let child = cmd
            .spawn()
            .map_err(|err| StageError::io(format!("failed to launch `{command}`"), err))?;
        let pid = child.id();
        debug!(pid, %command, "spawned detached process");
        Ok(pid)
    }

    async fn run_logged(&self, command: &CommandLine, log: &Path) -> StageResult<ExitStatus> {
        let (stdout, stderr) = Self::log_handles(log)?;
        let mut cmd = tokio::process::Command::from(command.to_command());
        cmd.stdin(Stdio::null())
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr));
        cmd.status()
            .await
            .map_err(|err| StageError::io(format!("failed to run `{command}`"), err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PROC_TCP: &str = "\
  sl  local_address rem_address   st tx_queue rx_queue tr tm->when retrnsmt   uid  timeout inode
   0: 0100007F:66D9 00000000:0000 0A 00000000:00000000 00:00000000 00000000  1000        0 1 1
   1: 0100007F:1F90 0100007F:C350 01 00000000:00000000 00:00000000 00000000  1000        0 2 1
   2: 0100007F:2710 0100007F:C351 06 00000000:00000000 00:00000000 00000000  1000        0 3 1
";

    #[test]
    fn proc_net_tcp_keeps_listen_and_established() {
        let ports: Vec<u16> = parse_proc_net_tcp(PROC_TCP).collect();
        assert_eq!(ports, vec![26329, 8080]);
    }

    #[test]
    fn proc_net_tcp6_addresses_parse() {
        let table = "\
  sl  local_address                         remote_address                        st
   0: 00000000000000000000000000000000:6979 00000000000000000000000000000000:0000 0A
";
        let ports: Vec<u16> = parse_proc_net_tcp(table).collect();
        assert_eq!(ports, vec![0x6979]);
    }

    #[test]
    fn netstat_handles_linux_and_bsd_addresses() {
        let output = "\
Active Internet connections (including servers)
Proto Recv-Q Send-Q  Local Address          Foreign Address        (state)
tcp4       0      0  127.0.0.1.26257        *.*                    LISTEN
tcp        0      0 127.0.0.1:8080          127.0.0.1:51000        ESTABLISHED
tcp4       0      0  127.0.0.1.9000         127.0.0.1.51001        TIME_WAIT
";
        let ports: Vec<u16> = parse_netstat(output).collect();
        assert_eq!(ports, vec![26257, 8080]);
    }

    #[test]
    fn lsof_skips_cwd_entries() {
        let output = "\
COMMAND   PID USER   FD   TYPE DEVICE SIZE/OFF     NODE NAME
cockroach 411 dev   cwd    DIR    1,4      128  1234567 /tmp/roachlab/411/data/node1
cockroach 411 dev    3w    REG    1,4     2048  1234568 /tmp/roachlab/411/log/cockroach node1.log
";
        let holders = parse_lsof(output);
        assert_eq!(
            holders,
            vec![(411, PathBuf::from("/tmp/roachlab/411/log/cockroach node1.log"))]
        );
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn proc_scan_finds_our_own_open_file() {
        let dir = tempfile::tempdir().expect("temp dir");
        let root = dir.path().canonicalize().expect("canonical root");
        let path = root.join("held.log");
        let _held = File::create(&path).expect("create file");

        let holders = scan_proc_fds(Path::new("/proc"), &root).holders;
        assert!(
            holders
                .iter()
                .any(|(pid, p)| *pid == std::process::id() && *p == path),
            "expected {path:?} in {holders:?}"
        );
    }

    #[test]
    fn proc_scan_reports_unreadable_descriptor_tables() {
        let proc_root = tempfile::tempdir().expect("temp dir");
        let staging = proc_root.path().join("staging");
        std::fs::create_dir_all(&staging).expect("staging dir");

        // 41 holds a file under the root, 42 has an fd "directory" that cannot
        // be listed, 43 has already exited.
        let fd41 = proc_root.path().join("41/fd");
        std::fs::create_dir_all(&fd41).expect("fd dir");
        let held = staging.join("node1.log");
        File::create(&held).expect("create log");
        #[cfg(unix)]
        std::os::unix::fs::symlink(&held, fd41.join("3")).expect("fd link");
        std::fs::create_dir_all(proc_root.path().join("42")).expect("pid dir");
        File::create(proc_root.path().join("42/fd")).expect("fd file");
        std::fs::create_dir_all(proc_root.path().join("43")).expect("pid dir");

        let scan = scan_proc_fds(proc_root.path(), &staging);
        #[cfg(unix)]
        assert_eq!(scan.holders, vec![(41, held)]);
        assert_eq!(scan.unreadable, vec![42]);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn sysinfo_snapshot_carries_child_command_line() {
        let mut child = Command::new("sleep")
            .arg("30")
            .spawn()
            .expect("spawn sleep");
        let pid = child.id();

        let entry = SysinfoProcessTable
            .snapshot()
            .into_iter()
            .find(|entry| entry.pid == pid);
        let _ = child.kill();
        let _ = child.wait();

        let entry = entry.expect("child in snapshot");
        assert_eq!(entry.cmd, vec!["sleep".to_string(), "30".to_string()]);
        assert!(entry.start_time > 0);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn sysinfo_kill_terminates_child() {
        let mut child = Command::new("sleep")
            .arg("30")
            .spawn()
            .expect("spawn sleep");

        assert!(SysinfoProcessTable.kill(child.id()));
        let status = child.wait().expect("wait child");
        assert!(!status.success());
    }

    #[test]
    fn command_line_display_is_shell_like() {
        let cmd = CommandLine::new("/usr/local/bin/cockroach")
            .arg("sql")
            .arg("--insecure")
            .arg("--host=localhost:26257");
        assert_eq!(
            cmd.to_string(),
            "/usr/local/bin/cockroach sql --insecure --host=localhost:26257"
        );
    }
}
