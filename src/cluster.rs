//! Cluster slot hashing and topology tracking
//!
//! Key-to-slot mapping is CRC16/XMODEM over the key (or its `{hash tag}`)
//! modulo 16384. The topology is kept as an immutable snapshot behind an
//! `Arc`: readers grab the current snapshot without blocking writers, and a
//! refresh or a MOVED redirect installs a whole new snapshot.

use crate::core::error::{GlideError, GlideResult};
use crate::core::types::{NodeAddress, NodeInfo, NodeRole, SlotRange};
use crate::core::value::Value;
use crc16::{State, XMODEM};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// Total number of hash slots in a cluster
pub const CLUSTER_SLOTS: u16 = 16384;

/// Calculate the hash slot for a key
///
/// When the key contains a `{...}` section with at least one character
/// between the braces, only that section is hashed, so related keys can be
/// pinned to the same slot.
#[must_use]
pub fn calculate_slot(key: &[u8]) -> u16 {
    State::<XMODEM>::calculate(extract_hash_tag(key)) % CLUSTER_SLOTS
}

fn extract_hash_tag(key: &[u8]) -> &[u8] {
    if let Some(start) = key.iter().position(|&b| b == b'{') {
        if let Some(offset) = key[start + 1..].iter().position(|&b| b == b'}') {
            // An empty {} does not count as a tag
            if offset > 0 {
                return &key[start + 1..start + 1 + offset];
            }
        }
    }
    key
}

/// Immutable snapshot of the cluster layout
///
/// Node listings iterate in address order so that fan-out operations visit
/// nodes in a stable order between refreshes.
#[derive(Debug, Clone, Default)]
pub struct TopologyView {
    slot_primaries: HashMap<u16, NodeAddress>,
    slot_replicas: HashMap<u16, Vec<NodeAddress>>,
    nodes: BTreeMap<NodeAddress, NodeInfo>,
}

impl TopologyView {
    /// Parse a CLUSTER SLOTS reply into a snapshot
    ///
    /// Each entry is `[start, end, [primary-host, port, id?], replica...]`.
    ///
    /// # Errors
    ///
    /// Returns [`GlideError::Cluster`] on a malformed reply.
    pub fn from_cluster_slots(reply: &Value) -> GlideResult<Self> {
        let entries = reply
            .as_array()
            .map_err(|_| GlideError::Cluster("CLUSTER SLOTS reply is not an array".to_string()))?;

        let mut view = Self::default();
        for entry in &entries {
            let parts = entry.as_array().map_err(|_| {
                GlideError::Cluster("CLUSTER SLOTS entry is not an array".to_string())
            })?;
            if parts.len() < 3 {
                return Err(GlideError::Cluster(format!(
                    "CLUSTER SLOTS entry too short: {} elements",
                    parts.len()
                )));
            }

            let start = slot_bound(&parts[0])?;
            let end = slot_bound(&parts[1])?;
            let range = SlotRange::new(start, end);

            let primary = parse_node_entry(&parts[2])?;
            let replicas: Vec<(String, NodeAddress)> = parts[3..]
                .iter()
                .map(parse_node_entry)
                .collect::<GlideResult<_>>()?;

            let (primary_id, primary_addr) = primary;
            view.nodes
                .entry(primary_addr.clone())
                .or_insert_with(|| NodeInfo::primary(primary_id, primary_addr.clone()))
                .slots
                .push(range);

            let replica_addrs: Vec<NodeAddress> =
                replicas.iter().map(|(_, addr)| addr.clone()).collect();
            for (id, addr) in replicas {
                view.nodes
                    .entry(addr.clone())
                    .or_insert_with(|| NodeInfo::replica(id, addr));
            }

            for slot in start..=end {
                view.slot_primaries.insert(slot, primary_addr.clone());
                if !replica_addrs.is_empty() {
                    view.slot_replicas.insert(slot, replica_addrs.clone());
                }
            }
        }

        Ok(view)
    }

    /// Primary owning a slot
    #[must_use]
    pub fn primary_for_slot(&self, slot: u16) -> Option<&NodeAddress> {
        self.slot_primaries.get(&slot)
    }

    /// Replicas of the primary owning a slot, if any
    #[must_use]
    pub fn replicas_for_slot(&self, slot: u16) -> &[NodeAddress] {
        self.slot_replicas.get(&slot).map_or(&[], Vec::as_slice)
    }

    /// All primary addresses, in address order
    #[must_use]
    pub fn primaries(&self) -> Vec<NodeAddress> {
        self.nodes
            .values()
            .filter(|n| n.role == NodeRole::Primary)
            .map(|n| n.address.clone())
            .collect()
    }

    /// All node addresses (primaries and replicas), in address order
    #[must_use]
    pub fn all_nodes(&self) -> Vec<NodeAddress> {
        self.nodes.keys().cloned().collect()
    }

    /// Whether an address belongs to the current topology
    #[must_use]
    pub fn contains(&self, address: &NodeAddress) -> bool {
        self.nodes.contains_key(address)
    }

    /// Node metadata, keyed by address
    #[must_use]
    pub fn node(&self, address: &NodeAddress) -> Option<&NodeInfo> {
        self.nodes.get(address)
    }

    /// Number of slots with a known owner
    #[must_use]
    pub fn covered_slots(&self) -> usize {
        self.slot_primaries.len()
    }

    /// Copy of this view with one slot reassigned
    ///
    /// Used for MOVED redirects: the redirect names the new owner of a single
    /// slot, and the rest of the map stays as-is until the next full refresh.
    #[must_use]
    pub fn with_slot_owner(&self, slot: u16, owner: NodeAddress) -> Self {
        let mut next = self.clone();
        let info = next
            .nodes
            .entry(owner.clone())
            .or_insert_with(|| NodeInfo::primary(String::new(), owner.clone()));
        // Node metadata stays consistent with the slot map
        if !info.owns_slot(slot) {
            info.slots.push(SlotRange::new(slot, slot));
        }
        next.slot_primaries.insert(slot, owner);
        next.slot_replicas.remove(&slot);
        next
    }
}

fn slot_bound(value: &Value) -> GlideResult<u16> {
    let n = value
        .as_int()
        .map_err(|_| GlideError::Cluster("Slot bound is not an integer".to_string()))?;
    u16::try_from(n)
        .ok()
        .filter(|&slot| slot < CLUSTER_SLOTS)
        .ok_or_else(|| GlideError::Cluster(format!("Slot bound out of range: {n}")))
}

fn parse_node_entry(value: &Value) -> GlideResult<(String, NodeAddress)> {
    let parts = value
        .as_array()
        .map_err(|_| GlideError::Cluster("Node entry is not an array".to_string()))?;
    if parts.len() < 2 {
        return Err(GlideError::Cluster("Node entry too short".to_string()));
    }
    let host = parts[0]
        .as_string()
        .map_err(|_| GlideError::Cluster("Node host is not a string".to_string()))?;
    let port = parts[1]
        .as_int()
        .ok()
        .and_then(|p| u16::try_from(p).ok())
        .ok_or_else(|| GlideError::Cluster("Node port is not a valid port".to_string()))?;
    // The node ID is present on modern servers, absent on old ones
    let id = parts
        .get(2)
        .and_then(|v| v.as_string().ok())
        .unwrap_or_default();
    Ok((id, NodeAddress::new(host, port)))
}

/// Shared, atomically swappable topology
///
/// Clones share the same underlying snapshot slot.
#[derive(Clone, Debug, Default)]
pub struct ClusterTopology {
    view: Arc<RwLock<Arc<TopologyView>>>,
}

impl ClusterTopology {
    /// Create an empty topology
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current snapshot
    pub async fn current(&self) -> Arc<TopologyView> {
        self.view.read().await.clone()
    }

    /// Install a new snapshot
    pub async fn replace(&self, view: TopologyView) {
        debug!(slots = view.covered_slots(), nodes = view.all_nodes().len(), "topology updated");
        *self.view.write().await = Arc::new(view);
    }

    /// Apply a MOVED redirect: reassign one slot to its new owner
    pub async fn apply_moved(&self, slot: u16, owner: NodeAddress) {
        let mut guard = self.view.write().await;
        *guard = Arc::new(guard.with_slot_owner(slot, owner));
    }
}
