//! Small constellation fixtures shared by the test suites.

use rustc_hash::FxHashMap;

use crate::constants::{DEFAULT_FEEDER_RATE, DEFAULT_ISL_RATE};
use crate::network::topology::{Topology, TopologyError};
use crate::network::types::{Edge, Node, NodeId};
use crate::network::NetworkState;
use crate::routing::SwitchingTable;
use crate::units::Nanosecs;

/// Two ground stations joined by one satellite:
/// `gs-a -- sat-1 -- gs-b` (1000 km and 1500 km feeder links).
pub fn relay_config() -> (Vec<Node>, Vec<Edge>) {
    let gs_a = Node::new_ground_station("gs-a", "Lisbon");
    let gs_b = Node::new_ground_station("gs-b", "Porto");
    let sat = Node::new_satellite("sat-1", 0);
    let e1 = Edge::new(gs_a.id.clone(), sat.id.clone(), 1000.0);
    let e2 = Edge::new(sat.id.clone(), gs_b.id.clone(), 1500.0);
    (vec![gs_a, gs_b, sat], vec![e1, e2])
}

/// The relay plus a second satellite giving every ground station two
/// disjoint paths: `gs-a -- {sat-1, sat-2} -- gs-b`.
pub fn diamond_config() -> (Vec<Node>, Vec<Edge>) {
    let (mut nodes, mut edges) = relay_config();
    let sat2 = Node::new_satellite("sat-2", 1);
    edges.push(Edge::new(NodeId::from("gs-a"), sat2.id.clone(), 1200.0));
    edges.push(Edge::new(sat2.id.clone(), NodeId::from("gs-b"), 1700.0));
    nodes.push(sat2);
    (nodes, edges)
}

pub fn relay_state() -> Result<NetworkState, TopologyError> {
    let (nodes, edges) = relay_config();
    state_of(&nodes, &edges)
}

pub fn diamond_state() -> Result<NetworkState, TopologyError> {
    let (nodes, edges) = diamond_config();
    state_of(&nodes, &edges)
}

fn state_of(nodes: &[Node], edges: &[Edge]) -> Result<NetworkState, TopologyError> {
    Ok(NetworkState::new(Topology::new(
        nodes,
        edges,
        &[],
        DEFAULT_ISL_RATE,
        DEFAULT_FEEDER_RATE,
    )?))
}

/// A one-entry switching table valid over whole seconds `[from, until]`.
pub fn table(owner: &str, from: u64, until: u64, dst: &str, hops: &[&str]) -> SwitchingTable {
    let mut entries = FxHashMap::default();
    entries.insert(
        NodeId::from(dst),
        hops.iter().map(|&h| NodeId::from(h)).collect(),
    );
    SwitchingTable {
        owner: NodeId::from(owner),
        valid_from: Nanosecs::from_secs(from),
        valid_until: Nanosecs::from_secs(until),
        entries,
    }
}
