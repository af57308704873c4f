//! Command routing targets
//!
//! A [`Route`] says where a command should run: at the node owning a key's
//! slot, at one random node, fanned out to every primary or every node, or at
//! one explicitly named address. Routes resolve against a
//! [`TopologyView`](crate::cluster::TopologyView) snapshot into concrete
//! addresses; fan-out results keep a stable address-sorted order so repeated
//! calls line up.

use crate::cluster::{calculate_slot, TopologyView};
use crate::core::config::ReadFrom;
use crate::core::error::{GlideError, GlideResult};
use crate::core::types::NodeAddress;
use crate::core::value::Value;
use rand::seq::SliceRandom;

/// Where a command should be sent
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// Node owning the key's slot; reads may go to a replica per [`ReadFrom`]
    Key(String),
    /// Primary owning the key's slot, regardless of read-from policy
    PrimarySlotKey(String),
    /// One uniformly chosen node
    RandomNode,
    /// Every primary, concurrently
    AllPrimaries,
    /// Every node, primaries and replicas
    AllNodes,
    /// Exactly this node; it must be part of the current topology
    ByAddress(NodeAddress),
}

impl Route {
    /// Parse a string routing hint
    ///
    /// The three multi-node names are recognized case-sensitively; any other
    /// string is treated as a raw key.
    #[must_use]
    pub fn from_hint(hint: &str) -> Self {
        match hint {
            "randomNode" => Self::RandomNode,
            "allPrimaries" => Self::AllPrimaries,
            "allNodes" => Self::AllNodes,
            key => Self::Key(key.to_string()),
        }
    }

    /// Route to the node at a specific host and port
    pub fn by_address(host: impl Into<String>, port: u16) -> Self {
        Self::ByAddress(NodeAddress::new(host, port))
    }
}

/// Concrete addresses a route resolved to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteTargets {
    /// The command goes to one node
    Single(NodeAddress),
    /// The command runs on each node; replies are collected per node
    Fanout(Vec<NodeAddress>),
}

/// Resolve a route against a topology snapshot
///
/// `is_read` lets key routes honor `ReadFrom::PreferReplica`; write commands
/// and [`Route::PrimarySlotKey`] always land on the primary.
///
/// # Errors
///
/// Returns [`GlideError::Cluster`] when the snapshot cannot satisfy the route
/// (no nodes, uncovered slot) and [`GlideError::NodeNotFound`] for a
/// [`Route::ByAddress`] outside the topology.
pub fn resolve(
    route: &Route,
    view: &TopologyView,
    is_read: bool,
    read_from: ReadFrom,
) -> GlideResult<RouteTargets> {
    match route {
        Route::Key(key) => {
            let slot = calculate_slot(key.as_bytes());
            let primary = slot_primary(view, slot)?;
            if is_read && read_from == ReadFrom::PreferReplica {
                if let Some(replica) = view.replicas_for_slot(slot).first() {
                    return Ok(RouteTargets::Single(replica.clone()));
                }
            }
            Ok(RouteTargets::Single(primary))
        }
        Route::PrimarySlotKey(key) => {
            let slot = calculate_slot(key.as_bytes());
            Ok(RouteTargets::Single(slot_primary(view, slot)?))
        }
        Route::RandomNode => {
            let nodes = view.all_nodes();
            nodes
                .choose(&mut rand::thread_rng())
                .cloned()
                .map(RouteTargets::Single)
                .ok_or_else(|| GlideError::Cluster("No known nodes".to_string()))
        }
        Route::AllPrimaries => Ok(RouteTargets::Fanout(view.primaries())),
        Route::AllNodes => Ok(RouteTargets::Fanout(view.all_nodes())),
        Route::ByAddress(address) => {
            if view.contains(address) {
                Ok(RouteTargets::Single(address.clone()))
            } else {
                Err(GlideError::NodeNotFound(address.to_string()))
            }
        }
    }
}

fn slot_primary(view: &TopologyView, slot: u16) -> GlideResult<NodeAddress> {
    view.primary_for_slot(slot)
        .cloned()
        .ok_or_else(|| GlideError::Cluster(format!("No node owns slot {slot}")))
}

/// One node's reply within a fan-out result
pub type NodeReply = (NodeAddress, Value);

/// Collect fan-out replies into per-node entries, address-sorted
///
/// Aggregated INFO-style output stays keyed by node: two nodes reporting the
/// same field produce two entries, never one overwritten value.
#[must_use]
pub fn collect_node_replies(mut replies: Vec<NodeReply>) -> Vec<NodeReply> {
    replies.sort_by(|a, b| a.0.cmp(&b.0));
    replies
}
