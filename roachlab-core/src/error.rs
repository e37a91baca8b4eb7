//! Error taxonomy for cluster orchestration.

use std::path::PathBuf;

use thiserror::Error;

/// Convenience alias used across the orchestrator.
pub type StageResult<T> = Result<T, StageError>;

/// Failures surfaced by the orchestrator.
#[derive(Debug, Error)]
pub enum StageError {
    /// User input was rejected before any side effect happened.
    #[error("invalid input: {0}")]
    Validation(String),

    /// The orchestrator itself is misconfigured (e.g. no default binary on PATH).
    #[error("configuration error: {0}")]
    Config(String),

    /// A well-formed version was requested but no matching binary is installed.
    #[error("no binary found for version {version} (looked for `{binary}` on PATH)")]
    Resolution {
        /// Requested version string.
        version: String,
        /// Binary name that was searched for.
        binary: String,
    },

    /// Every port block up to the top of the port range is occupied.
    #[error("no free port block for {nodes} node(s) starting at offset {last_offset}")]
    PortExhausted {
        /// Requested node count.
        nodes: u16,
        /// Last offset that was probed.
        last_offset: u32,
    },

    /// Files under the staging root are held open by running processes.
    #[error("staging root {root} is in use by {} process(es); run `roachlab stop` first", holders.len())]
    ResourceBusy {
        /// Staging root that was checked.
        root: PathBuf,
        /// `(pid, path)` pairs of open files found under the root.
        holders: Vec<(u32, PathBuf)>,
    },

    /// Discovery matched no running cluster process.
    #[error("no running cluster found")]
    NotFound,

    /// Processes exist, but none run the requested version.
    #[error(
        "no running cluster uses version {requested}; running executables: {}. See `roachlab status` for all clusters",
        running.join(", ")
    )]
    AmbiguousVersion {
        /// Version passed with `-v`.
        requested: String,
        /// Distinct executables found in the unfiltered match set.
        running: Vec<String>,
    },

    /// Underlying filesystem or process I/O failure.
    #[error("{context}: {source}")]
    Io {
        /// What the orchestrator was doing.
        context: String,
        /// Original error.
        #[source]
        source: std::io::Error,
    },
}

impl StageError {
    /// Wrap an I/O error with a description of the failed operation.
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Discovery outcomes that are reported but do not fail the command.
    #[must_use]
    pub const fn is_informational(&self) -> bool {
        matches!(self, Self::NotFound | Self::AmbiguousVersion { .. })
    }
}
