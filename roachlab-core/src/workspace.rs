//! Staging directory layout, usage accounting, and guarded cleanup.
//!
//! Layout under the staging root:
//!
//! ```text
//! <root>/<invocation>/data/node<k>
//! <root>/<invocation>/log/cockroach_node<k>.log
//! ```

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{info, warn};
use walkdir::WalkDir;

use crate::error::{StageError, StageResult};
use crate::host::OpenFileProbe;

const DATA_DIR: &str = "data";
const LOG_DIR: &str = "log";
const NODE_PREFIX: &str = "node";
const LOG_PREFIX: &str = "cockroach_node";

/// Identifier of one orchestrator run: its OS process id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct InvocationId(u32);

impl InvocationId {
    /// Id of the running orchestrator.
    #[must_use]
    pub fn current() -> Self {
        Self(std::process::id())
    }

    /// Wrap a raw id.
    #[must_use]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Raw numeric id.
    #[must_use]
    pub const fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for InvocationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Apparent size of each first-level staging entry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkspaceUsage {
    /// `(entry, bytes)` sorted by entry path.
    pub entries: Vec<(PathBuf, u64)>,
}

impl WorkspaceUsage {
    /// Sum over all entries.
    #[must_use]
    pub fn total_bytes(&self) -> u64 {
        self.entries.iter().map(|(_, bytes)| bytes).sum()
    }

    /// Whether usage is strictly above `threshold` bytes.
    #[must_use]
    pub fn exceeds(&self, threshold: u64) -> bool {
        self.total_bytes() > threshold
    }
}

/// What `clean` ended up doing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CleanOutcome {
    /// Nothing under the staging root.
    Empty,
    /// The user answered no; nothing was touched.
    Declined,
    /// Every entry was removed.
    Removed {
        /// Number of first-level entries deleted.
        entries: usize,
        /// Bytes reclaimed.
        bytes: u64,
    },
}

/// The staging root and the per-invocation trees below it.
#[derive(Debug, Clone)]
pub struct StagingWorkspace {
    root: PathBuf,
}

impl StagingWorkspace {
    /// Workspace rooted at `root`. Nothing is created until [`Self::prepare`].
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Staging root.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Invocation subtree.
    #[must_use]
    pub fn invocation_dir(&self, id: InvocationId) -> PathBuf {
        self.root.join(id.to_string())
    }

    /// Store directory for node `index`.
    #[must_use]
    pub fn node_data_dir(&self, id: InvocationId, index: u16) -> PathBuf {
        self.invocation_dir(id)
            .join(DATA_DIR)
            .join(format!("{NODE_PREFIX}{index}"))
    }

    /// Log file for node `index`.
    #[must_use]
    pub fn node_log_file(&self, id: InvocationId, index: u16) -> PathBuf {
        self.invocation_dir(id)
            .join(LOG_DIR)
            .join(format!("{LOG_PREFIX}{index}.log"))
    }

    /// Recover `(invocation, node index)` from a store path produced by
    /// [`Self::node_data_dir`]. Paths outside this root yield `None`.
    #[must_use]
    pub fn parse_node_data_dir(&self, store: &Path) -> Option<(InvocationId, u16)> {
        let relative = store.strip_prefix(&self.root).ok()?;
        let mut parts = relative.components().map(|c| c.as_os_str().to_str());
        let id = parts.next()??.parse().ok()?;
        if parts.next()?? != DATA_DIR {
            return None;
        }
        let index = parts.next()??.strip_prefix(NODE_PREFIX)?.parse().ok()?;
        if parts.next().is_some() {
            return None;
        }
        Some((InvocationId::new(id), index))
    }

    /// Create `<root>`, `<root>/<id>/data` and `<root>/<id>/log`. Idempotent.
    pub fn prepare(&self, id: InvocationId) -> StageResult<()> {
        fs::create_dir_all(&self.root).map_err(|err| {
            StageError::io(format!("failed to create {}", self.root.display()), err)
        })?;

        let invocation = self.invocation_dir(id);
        for dir in [invocation.join(DATA_DIR), invocation.join(LOG_DIR)] {
            create_restricted_dir(&dir)?;
        }
        info!(root = %self.root.display(), invocation = %id, "prepared staging workspace");
        Ok(())
    }

    /// Apparent usage of every first-level entry. A missing root is empty.
    pub fn usage(&self) -> StageResult<WorkspaceUsage> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Ok(WorkspaceUsage::default());
            }
            Err(err) => {
                return Err(StageError::io(
                    format!("failed to list {}", self.root.display()),
                    err,
                ));
            }
        };

        let mut usage = WorkspaceUsage::default();
        for entry in entries {
            let entry =
                entry.map_err(|err| StageError::io("failed to read staging entry", err))?;
            let path = entry.path();
            let bytes = apparent_size(&path);
            usage.entries.push((path, bytes));
        }
        usage.entries.sort();
        Ok(usage)
    }

    /// Fail with [`StageError::ResourceBusy`] if anything below the root is open.
    pub fn ensure_idle<P: OpenFileProbe>(&self, probe: &P) -> StageResult<()> {
        if !self.root.exists() {
            return Ok(());
        }
        let holders = probe.open_files_under(&self.root)?;
        if holders.is_empty() {
            Ok(())
        } else {
            Err(StageError::ResourceBusy {
                root: self.root.clone(),
                holders,
            })
        }
    }

    /// Busy check, usage report, confirmation, then removal of every entry
    /// inside the root. The root directory itself is kept.
    pub fn clean<P, F>(&self, probe: &P, confirm: F) -> StageResult<CleanOutcome>
    where
        P: OpenFileProbe,
        F: FnOnce(&WorkspaceUsage) -> std::io::Result<bool>,
    {
        self.ensure_idle(probe)?;

        let usage = self.usage()?;
        if usage.entries.is_empty() {
            return Ok(CleanOutcome::Empty);
        }

        if !confirm(&usage).map_err(|err| StageError::io("failed to read confirmation", err))? {
            return Ok(CleanOutcome::Declined);
        }

        for (path, _) in &usage.entries {
            let removed = if path.is_dir() && !path.is_symlink() {
                fs::remove_dir_all(path)
            } else {
                fs::remove_file(path)
            };
            removed.map_err(|err| {
                StageError::io(format!("failed to remove {}", path.display()), err)
            })?;
        }

        let outcome = CleanOutcome::Removed {
            entries: usage.entries.len(),
            bytes: usage.total_bytes(),
        };
        warn!(root = %self.root.display(), ?outcome, "staging root cleaned");
        Ok(outcome)
    }
}

fn create_restricted_dir(dir: &Path) -> StageResult<()> {
    let mut builder = fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(0o750);
    }
    builder
        .create(dir)
        .map_err(|err| StageError::io(format!("failed to create {}", dir.display()), err))
}

/// Sum of file lengths below `path`, not following symlinks. Entries that
/// disappear mid-walk are skipped.
fn apparent_size(path: &Path) -> u64 {
    WalkDir::new(path)
        .follow_links(false)
        .into_iter()
        .filter_map(Result::ok)
        .filter_map(|entry| entry.metadata().ok())
        .filter(std::fs::Metadata::is_file)
        .map(|metadata| metadata.len())
        .sum()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::cell::Cell;

    use super::*;

    struct NoOpenFiles;

    impl OpenFileProbe for NoOpenFiles {
        fn open_files_under(&self, _root: &Path) -> StageResult<Vec<(u32, PathBuf)>> {
            Ok(Vec::new())
        }
    }

    struct HeldFile(PathBuf);

    impl OpenFileProbe for HeldFile {
        fn open_files_under(&self, root: &Path) -> StageResult<Vec<(u32, PathBuf)>> {
            Ok(if self.0.starts_with(root) {
                vec![(4242, self.0.clone())]
            } else {
                Vec::new()
            })
        }
    }

    fn snapshot(root: &Path) -> Vec<(PathBuf, Vec<u8>)> {
        let mut files: Vec<_> = WalkDir::new(root)
            .into_iter()
            .filter_map(Result::ok)
            .filter(|e| e.file_type().is_file())
            .map(|e| (e.path().to_path_buf(), fs::read(e.path()).unwrap()))
            .collect();
        files.sort();
        files
    }

    #[test]
    fn prepare_creates_layout_idempotently() {
        let dir = tempfile::tempdir().unwrap();
        let workspace = StagingWorkspace::new(dir.path().join("stage"));
        let id = InvocationId::new(777);

        workspace.prepare(id).unwrap();
        workspace.prepare(id).unwrap();

        assert!(dir.path().join("stage/777/data").is_dir());
        assert!(dir.path().join("stage/777/log").is_dir());
        assert_eq!(
            workspace.node_log_file(id, 2),
            dir.path().join("stage/777/log/cockroach_node2.log")
        );

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(dir.path().join("stage/777/log"))
                .unwrap()
                .permissions()
                .mode();
            assert_eq!(mode & 0o007, 0, "log dir must not be world accessible");
        }
    }

    #[test]
    fn store_paths_round_trip_to_invocation_and_index() {
        let workspace = StagingWorkspace::new("/tmp/roachlab");
        let id = InvocationId::new(31337);
        let store = workspace.node_data_dir(id, 3);

        assert_eq!(workspace.parse_node_data_dir(&store), Some((id, 3)));
        assert_eq!(
            workspace.parse_node_data_dir(Path::new("/elsewhere/1/data/node1")),
            None
        );
        assert_eq!(
            workspace.parse_node_data_dir(Path::new("/tmp/roachlab/12/log/node1")),
            None
        );
        assert_eq!(
            workspace.parse_node_data_dir(Path::new("/tmp/roachlab/12/data/node1/extra")),
            None
        );
    }

    #[test]
    fn usage_sums_first_level_entries() {
        let dir = tempfile::tempdir().unwrap();
        let workspace = StagingWorkspace::new(dir.path());
        workspace.prepare(InvocationId::new(1)).unwrap();
        workspace.prepare(InvocationId::new(2)).unwrap();
        fs::write(workspace.node_log_file(InvocationId::new(1), 1), vec![0u8; 1500]).unwrap();
        fs::write(workspace.node_log_file(InvocationId::new(2), 1), vec![0u8; 500]).unwrap();

        let usage = workspace.usage().unwrap();
        assert_eq!(usage.entries.len(), 2);
        assert_eq!(usage.total_bytes(), 2000);
        assert!(usage.exceeds(1999));
        assert!(!usage.exceeds(2000));
    }

    #[test]
    fn missing_root_has_no_usage() {
        let dir = tempfile::tempdir().unwrap();
        let workspace = StagingWorkspace::new(dir.path().join("absent"));
        assert_eq!(workspace.usage().unwrap(), WorkspaceUsage::default());
    }

    #[test]
    fn busy_staging_root_is_left_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let workspace = StagingWorkspace::new(dir.path());
        let id = InvocationId::new(9);
        workspace.prepare(id).unwrap();
        let log = workspace.node_log_file(id, 1);
        fs::write(&log, b"I180101 node starting").unwrap();
        let before = snapshot(dir.path());

        let asked = Cell::new(false);
        let err = workspace
            .clean(&HeldFile(log), |_| {
                asked.set(true);
                Ok(true)
            })
            .unwrap_err();

        assert!(matches!(err, StageError::ResourceBusy { ref holders, .. } if holders.len() == 1));
        assert!(!asked.get(), "no prompt while busy");
        assert_eq!(snapshot(dir.path()), before);
    }

    #[test]
    fn declined_clean_keeps_everything() {
        let dir = tempfile::tempdir().unwrap();
        let workspace = StagingWorkspace::new(dir.path());
        workspace.prepare(InvocationId::new(5)).unwrap();
        fs::write(workspace.node_log_file(InvocationId::new(5), 1), b"log").unwrap();
        let before = snapshot(dir.path());

        let outcome = workspace.clean(&NoOpenFiles, |_| Ok(false)).unwrap();
        assert_eq!(outcome, CleanOutcome::Declined);
        assert_eq!(snapshot(dir.path()), before);
    }

    #[test]
    fn confirmed_clean_removes_all_contents_but_keeps_root() {
        let dir = tempfile::tempdir().unwrap();
        let workspace = StagingWorkspace::new(dir.path());
        workspace.prepare(InvocationId::new(5)).unwrap();
        workspace.prepare(InvocationId::new(6)).unwrap();
        fs::write(workspace.node_log_file(InvocationId::new(6), 2), b"0123456789").unwrap();
        fs::write(dir.path().join("stray.txt"), b"abc").unwrap();

        let outcome = workspace
            .clean(&NoOpenFiles, |usage| {
                assert_eq!(usage.total_bytes(), 13);
                Ok(true)
            })
            .unwrap();

        assert_eq!(outcome, CleanOutcome::Removed { entries: 3, bytes: 13 });
        assert!(dir.path().is_dir());
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn empty_root_skips_the_prompt() {
        let dir = tempfile::tempdir().unwrap();
        let workspace = StagingWorkspace::new(dir.path());
        let outcome = workspace
            .clean(&NoOpenFiles, |_| panic!("must not prompt"))
            .unwrap();
        assert_eq!(outcome, CleanOutcome::Empty);
    }
}
