use std::collections::VecDeque;
use std::net::Ipv4Addr;
use std::sync::Arc;

use crate::packet::Packet;
use crate::units::{BitsPerSec, Nanosecs};

/// The stable node identifier from the constellation description (for example
/// `"IRIDIUM 145"` or `"632430d9e1196"`). It is the primary key throughout
/// the core; arena indices never leak into routing decisions.
#[derive(
    Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize,
)]
#[serde(transparent)]
pub struct NodeId(Arc<str>);

impl NodeId {
    pub fn new(id: impl Into<Arc<str>>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for NodeId {
    fn from(id: String) -> Self {
        Self::new(id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub kind: NodeKind,
}

impl Node {
    pub fn new_satellite(id: impl Into<NodeId>, orbit: u16) -> Self {
        Self {
            id: id.into(),
            kind: NodeKind::Satellite { orbit },
        }
    }

    pub fn new_ground_station(id: impl Into<NodeId>, town: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: NodeKind::GroundStation { town: town.into() },
        }
    }

    pub fn is_satellite(&self) -> bool {
        matches!(self.kind, NodeKind::Satellite { .. })
    }

    /// The town a ground station serves; `None` for satellites.
    pub fn town(&self) -> Option<&str> {
        match &self.kind {
            NodeKind::Satellite { .. } => None,
            NodeKind::GroundStation { town } => Some(town),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum NodeKind {
    Satellite { orbit: u16 },
    GroundStation { town: String },
}

/// An undirected edge of the input graph; `weight_km` is the distance
/// between the endpoints.
#[derive(Debug, Clone, derive_new::new, serde::Serialize, serde::Deserialize)]
pub struct Edge {
    pub a: NodeId,
    pub b: NodeId,
    pub weight_km: f64,
}

/// Which class of channel a link is, decided by its endpoint kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum LinkClass {
    /// Inter-satellite link.
    Isl,
    /// Satellite to ground station link.
    Feeder,
}

identifier!(LinkId, usize);

/// One endpoint of a link. Side `A` belongs to the lexicographically smaller
/// node id of the normalized endpoint pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    A,
    B,
}

impl Side {
    pub fn opposite(self) -> Side {
        match self {
            Side::A => Side::B,
            Side::B => Side::A,
        }
    }

    pub(crate) fn index(self) -> usize {
        match self {
            Side::A => 0,
            Side::B => 1,
        }
    }
}

/// A bidirectional channel between two nodes. Endpoints are stored
/// normalized (`a < b`); both directions share the activity flag and the
/// propagation delay, and each direction keeps its own transmit FIFO.
#[derive(Debug, Clone)]
pub struct Link {
    pub a: NodeId,
    pub b: NodeId,
    pub addr_a: Ipv4Addr,
    pub addr_b: Ipv4Addr,
    pub class: LinkClass,
    pub rate: BitsPerSec,
    pub delay: Nanosecs,
    pub active: bool,
    pub(crate) fifos: [TransmitFifo; 2],
}

impl Link {
    pub fn endpoint(&self, side: Side) -> &NodeId {
        match side {
            Side::A => &self.a,
            Side::B => &self.b,
        }
    }

    pub fn addr(&self, side: Side) -> Ipv4Addr {
        match side {
            Side::A => self.addr_a,
            Side::B => self.addr_b,
        }
    }

    /// Which side of this link `node` is, if it is an endpoint at all.
    pub fn side_of(&self, node: &NodeId) -> Option<Side> {
        if *node == self.a {
            Some(Side::A)
        } else if *node == self.b {
            Some(Side::B)
        } else {
            None
        }
    }

    /// Hands a packet to this direction's transmit FIFO. Returns the
    /// serialization time to schedule when the channel was idle; `None`
    /// means the packet queued behind an in-flight transmission.
    pub(crate) fn begin_or_enqueue(&mut self, from: Side, pkt: Packet) -> Option<(Packet, Nanosecs)> {
        let fifo = &mut self.fifos[from.index()];
        if fifo.transmitting {
            fifo.queue.push_back(pkt);
            return None;
        }
        fifo.transmitting = true;
        let serialization = self.rate.length(pkt.size);
        Some((pkt, serialization))
    }

    /// Advances the FIFO after a serialization completes.
    pub(crate) fn next_transmission(&mut self, from: Side) -> NextTx {
        let active = self.active;
        let fifo = &mut self.fifos[from.index()];
        match fifo.queue.pop_front() {
            // A queued packet was never committed; if the link died while it
            // waited, it is dropped at the sender.
            Some(pkt) if !active => NextTx::Dropped(pkt),
            Some(pkt) => {
                let serialization = self.rate.length(pkt.size);
                NextTx::Start(pkt, serialization)
            }
            None => {
                fifo.transmitting = false;
                NextTx::Idle
            }
        }
    }
}

/// Outcome of advancing a transmit FIFO.
#[derive(Debug)]
pub(crate) enum NextTx {
    /// Serialize this packet next; schedule its completion after the delay.
    Start(Packet, Nanosecs),
    /// The head packet was waiting on a link that went down.
    Dropped(Packet),
    Idle,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct TransmitFifo {
    pub(crate) transmitting: bool,
    pub(crate) queue: VecDeque<Packet>,
}

/// A timestamped link state change, from the scheduled event stream or an
/// injected failure scenario.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct TopologyEvent {
    pub at: Nanosecs,
    pub action: LinkAction,
    pub a: NodeId,
    pub b: NodeId,
    pub weight_km: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum LinkAction {
    Up,
    Down,
}

/// A batch of refreshed edge weights that becomes valid at `from`.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct WeightWindow {
    pub from: Nanosecs,
    pub edges: Vec<Edge>,
}
