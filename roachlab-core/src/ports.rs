//! Conflict-free port block allocation.
//!
//! Node `k` of a cluster listens on `base_listen + k + offset` and serves its
//! console on `base_http + k + offset`. The offset is stepped by the block step
//! (100 by default) until no port of the block is in use on the host. The check
//! is advisory: another invocation may bind a port between the check and the
//! launch.

use std::collections::HashSet;
use std::fmt;

use tracing::{debug, info};

use crate::config::PortConfig;
use crate::error::{StageError, StageResult};
use crate::host::SocketProbe;

/// Number of nodes in a cluster, validated to be at least one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct NodeCount(u16);

impl NodeCount {
    /// The single-node configuration.
    pub const SINGLE: Self = Self(1);

    /// Node count as an integer.
    #[must_use]
    pub const fn get(self) -> u16 {
        self.0
    }

    /// Whether this count runs the integrated single-node configuration.
    #[must_use]
    pub const fn is_single(self) -> bool {
        self.0 == 1
    }

    /// Node indexes `1..=N`.
    pub fn indexes(self) -> impl Iterator<Item = u16> {
        1..=self.0
    }
}

impl TryFrom<i64> for NodeCount {
    type Error = StageError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        if value < 1 {
            return Err(StageError::Validation(format!(
                "node count must be at least 1, got {value}"
            )));
        }
        u16::try_from(value)
            .map(Self)
            .map_err(|_| StageError::Validation(format!("node count {value} is too large")))
    }
}

impl fmt::Display for NodeCount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Base ports plus the offset chosen for one invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortBlock {
    base_listen: u16,
    base_http: u16,
    offset: u16,
    nodes: NodeCount,
}

impl PortBlock {
    /// Offset applied to every node of the block.
    #[must_use]
    pub const fn offset(&self) -> u16 {
        self.offset
    }

    /// Nodes covered by the block.
    #[must_use]
    pub const fn nodes(&self) -> NodeCount {
        self.nodes
    }

    /// SQL/listen port of node `index`.
    #[must_use]
    pub const fn listen_port(&self, index: u16) -> u16 {
        self.base_listen + index + self.offset
    }

    /// HTTP console port of node `index`.
    #[must_use]
    pub const fn http_port(&self, index: u16) -> u16 {
        self.base_http + index + self.offset
    }

    /// All `2N` ports of the block, listen ports first.
    #[must_use]
    pub fn ports(&self) -> Vec<u16> {
        let listen = self.nodes.indexes().map(|i| self.listen_port(i));
        let http = self.nodes.indexes().map(|i| self.http_port(i));
        listen.chain(http).collect()
    }

    fn candidate(config: &PortConfig, nodes: NodeCount, offset: u32) -> Option<Self> {
        let top = u32::from(config.base_listen.max(config.base_http))
            + u32::from(nodes.get())
            + offset;
        if top > u32::from(u16::MAX) {
            return None;
        }
        Some(Self {
            base_listen: config.base_listen,
            base_http: config.base_http,
            offset: u16::try_from(offset).ok()?,
            nodes,
        })
    }
}

/// Chooses port blocks against the host's socket table.
pub struct PortAllocator<'a, P: SocketProbe> {
    config: PortConfig,
    probe: &'a P,
}

impl<'a, P: SocketProbe> PortAllocator<'a, P> {
    /// Create an allocator over `probe` using the configured bases.
    pub const fn new(config: PortConfig, probe: &'a P) -> Self {
        Self { config, probe }
    }

    /// Smallest block (by offset) whose `2N` ports are all free.
    pub fn allocate(&self, nodes: NodeCount) -> StageResult<PortBlock> {
        let step = u32::from(self.config.block_step.max(1));
        let mut offset = 0u32;

        loop {
            let Some(block) = PortBlock::candidate(&self.config, nodes, offset) else {
                return Err(StageError::PortExhausted {
                    nodes: nodes.get(),
                    last_offset: offset.saturating_sub(step),
                });
            };

            let occupied: HashSet<u16> = self.probe.occupied_ports()?;
            let collisions: Vec<u16> = block
                .ports()
                .into_iter()
                .filter(|port| occupied.contains(port))
                .collect();

            if collisions.is_empty() {
                info!(offset = block.offset(), nodes = %nodes, "allocated port block");
                return Ok(block);
            }

            debug!(offset, ?collisions, "port block in use, stepping");
            offset += step;
        }
    }
}
