//! The network model: node and link types, validated topology construction,
//! and the mutable per-run state the topology events act on.

pub(crate) mod topology;
pub mod types;

use std::net::Ipv4Addr;

pub use topology::{Topology, TopologyError};
pub use types::*;

use crate::constants;

/// The per-run network state. Owns every link that will ever exist and
/// applies scheduled LINK_UP / LINK_DOWN / weight-refresh transitions; the
/// forwarding engine consults it for link activity and device resolution.
///
/// One instance per simulation; components receive it by reference from the
/// simulation context.
#[derive(Debug, Clone)]
pub struct NetworkState {
    topo: Topology,
}

impl NetworkState {
    pub(crate) fn new(topo: Topology) -> Self {
        Self { topo }
    }

    /// Activates a link, recomputing its propagation delay from the given
    /// weight. Enabling an already-active link only refreshes the delay.
    /// Unknown links are logged and ignored.
    pub fn enable_link(&mut self, a: &NodeId, b: &NodeId, weight_km: f64) {
        let Some(id) = self.topo.link_between(a, b) else {
            tracing::warn!(%a, %b, "tried to enable a link that was not registered");
            return;
        };
        let link = &mut self.topo.links[id.inner()];
        link.delay = constants::propagation_delay(weight_km);
        link.active = true;
        tracing::debug!(%a, %b, delay = %link.delay, "link enabled");
    }

    /// Deactivates a link. Packets already serialized onto it still arrive;
    /// no new transmissions are accepted. Unknown links are logged and
    /// ignored.
    pub fn disable_link(&mut self, a: &NodeId, b: &NodeId) {
        let Some(id) = self.topo.link_between(a, b) else {
            tracing::warn!(%a, %b, "tried to disable a link that was not registered");
            return;
        };
        self.topo.links[id.inner()].active = false;
        tracing::debug!(%a, %b, "link disabled");
    }

    /// Refreshes a link's propagation delay without touching its activity.
    /// Unknown links are logged and ignored.
    pub fn update_weight(&mut self, a: &NodeId, b: &NodeId, weight_km: f64) {
        let Some(id) = self.topo.link_between(a, b) else {
            tracing::warn!(%a, %b, "weight update for unknown link ignored");
            return;
        };
        self.topo.links[id.inner()].delay = constants::propagation_delay(weight_km);
    }

    /// Whether the link between `a` and `b` is currently active. Symmetric
    /// in its arguments; false for unknown links.
    pub fn is_active(&self, a: &NodeId, b: &NodeId) -> bool {
        self.topo
            .link_between(a, b)
            .map(|id| self.topo.links[id.inner()].active)
            .unwrap_or(false)
    }

    pub fn link(&self, id: LinkId) -> &Link {
        &self.topo.links[id.inner()]
    }

    pub(crate) fn link_mut(&mut self, id: LinkId) -> &mut Link {
        &mut self.topo.links[id.inner()]
    }

    /// Resolves the local endpoint of the link towards `next_hop`, returning
    /// the link and which side of it `local` is.
    pub fn device_towards(&self, local: &NodeId, next_hop: &NodeId) -> Option<(LinkId, Side)> {
        let id = self.topo.link_between(local, next_hop)?;
        let side = self.topo.links[id.inner()].side_of(local)?;
        Some((id, side))
    }

    /// The owner of an endpoint address.
    pub fn node_for_addr(&self, addr: Ipv4Addr) -> Option<&NodeId> {
        self.topo.addr2node.get(&addr)
    }

    /// Whether `addr` is bound to one of `node`'s link endpoints.
    pub fn is_local_addr(&self, node: &NodeId, addr: Ipv4Addr) -> bool {
        self.topo
            .node_addrs
            .get(node)
            .is_some_and(|addrs| addrs.contains(&addr))
    }

    /// The address traffic destined for `node` is sent to: the first
    /// endpoint address assigned to it.
    pub fn primary_addr(&self, node: &NodeId) -> Option<Ipv4Addr> {
        self.topo.node_addrs.get(node)?.first().copied()
    }

    delegate::delegate! {
        to self.topo {
            pub fn node(&self, id: &NodeId) -> Option<&Node>;
            pub fn contains(&self, id: &NodeId) -> bool;
            pub fn nodes(&self) -> impl Iterator<Item = &Node>;
            pub fn links(&self) -> impl Iterator<Item = &Link>;
            pub fn link_between(&self, a: &NodeId, b: &NodeId) -> Option<LinkId>;
            pub fn nr_links(&self) -> usize;
        }
    }
}
