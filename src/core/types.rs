//! Common types used throughout the library

use crate::core::value::Value;
use std::fmt;

/// Host and port of a single server node
///
/// Immutable once resolved; used both as a bootstrap endpoint and as the key
/// identifying a node in the cluster topology.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeAddress {
    /// Host name or IP address
    pub host: String,
    /// Port number
    pub port: u16,
}

impl NodeAddress {
    /// Create a new node address
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for NodeAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Role of a cluster node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeRole {
    /// Writable node owning a slot range
    Primary,
    /// Read replica of a primary
    Replica,
}

/// Represents a slot range in a cluster
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotRange {
    /// Start of the slot range (inclusive)
    pub start: u16,
    /// End of the slot range (inclusive)
    pub end: u16,
}

impl SlotRange {
    /// Create a new slot range
    #[must_use]
    pub const fn new(start: u16, end: u16) -> Self {
        Self { start, end }
    }

    /// Check if a slot is within this range
    #[must_use]
    pub const fn contains(&self, slot: u16) -> bool {
        slot >= self.start && slot <= self.end
    }
}

/// Node information in a cluster
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeInfo {
    /// Node ID as reported by the server (may be empty for older servers)
    pub id: String,
    /// Network address
    pub address: NodeAddress,
    /// Primary or replica
    pub role: NodeRole,
    /// Slot ranges owned by this node (empty for replicas)
    pub slots: Vec<SlotRange>,
}

impl NodeInfo {
    /// Create a new primary node info
    #[must_use]
    pub const fn primary(id: String, address: NodeAddress) -> Self {
        Self {
            id,
            address,
            role: NodeRole::Primary,
            slots: Vec::new(),
        }
    }

    /// Create a new replica node info
    #[must_use]
    pub const fn replica(id: String, address: NodeAddress) -> Self {
        Self {
            id,
            address,
            role: NodeRole::Replica,
            slots: Vec::new(),
        }
    }

    /// Check if this node owns a given slot
    #[must_use]
    pub fn owns_slot(&self, slot: u16) -> bool {
        self.slots.iter().any(|range| range.contains(slot))
    }
}

/// Outcome of EXEC on a transaction
///
/// A failed WATCH is a normal outcome, not an error, and is reported the same
/// way for standalone and cluster deployments: the whole transaction either
/// applied or it did not. There is never a partial per-node result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecOutcome {
    /// A watched key was modified; the queue was discarded without running
    Aborted,
    /// All queued commands ran atomically; one reply per command, in order
    Results(Vec<Value>),
}

impl ExecOutcome {
    /// Check whether the transaction was aborted by a failed WATCH
    #[must_use]
    pub const fn is_aborted(&self) -> bool {
        matches!(self, Self::Aborted)
    }

    /// Extract the per-command replies, if the transaction ran
    #[must_use]
    pub fn into_results(self) -> Option<Vec<Value>> {
        match self {
            Self::Results(results) => Some(results),
            Self::Aborted => None,
        }
    }
}
