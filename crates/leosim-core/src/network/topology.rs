//! Validated construction of the constellation topology: the node arena, the
//! link table with per-endpoint addresses, and the adjacency indices the
//! forwarding path uses.

use std::net::Ipv4Addr;

use itertools::Itertools;
use petgraph::graph::{NodeIndex, UnGraph};
use rustc_hash::{FxHashMap, FxHashSet};

use crate::constants;
use crate::network::types::{Edge, Link, LinkClass, LinkId, Node, NodeId, TransmitFifo};
use crate::units::BitsPerSec;

/// Orders an endpoint pair canonically (`a < b`).
pub(crate) fn normalize(a: NodeId, b: NodeId) -> (NodeId, NodeId) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

/// The immutable shape of the network. Activity flags, delays and transmit
/// FIFOs inside the [`Link`]s are the only parts that mutate during a run.
#[derive(Debug, Clone)]
pub struct Topology {
    pub(crate) graph: UnGraph<Node, LinkId>,
    pub(crate) id2idx: FxHashMap<NodeId, NodeIndex>,
    pub(crate) links: Vec<Link>,
    pub(crate) pair2link: FxHashMap<(NodeId, NodeId), LinkId>,
    pub(crate) addr2node: FxHashMap<Ipv4Addr, NodeId>,
    pub(crate) node_addrs: FxHashMap<NodeId, Vec<Ipv4Addr>>,
}

impl Topology {
    /// Creates a topology from the node list, the initially-active edge set,
    /// and the endpoint pairs of every link that a scheduled event will ever
    /// enable. Links only known from events start out inactive. This
    /// function returns an error if the specification fails to produce a
    /// valid topology; the checks are not exhaustive.
    ///
    /// Correctness properties:
    ///
    /// - Every node must have a unique ID.
    /// - Every link must have distinct, declared endpoints.
    /// - For any two nodes, there is at most one link between them.
    /// - Every node must be referenced by some link, now or later.
    /// - Link weights must be finite and non-negative.
    /// - No link may connect two ground stations.
    pub fn new(
        nodes: &[Node],
        edges: &[Edge],
        future_pairs: &[(NodeId, NodeId)],
        isl_rate: BitsPerSec,
        feeder_rate: BitsPerSec,
    ) -> Result<Self, TopologyError> {
        let mut graph = UnGraph::default();
        let mut id2idx = FxHashMap::default();
        for node in nodes.iter().cloned().sorted_by(|x, y| x.id.cmp(&y.id)) {
            let id = node.id.clone();
            let idx = graph.add_node(node);
            // CORRECTNESS: Every node must have a unique ID.
            if id2idx.insert(id.clone(), idx).is_some() {
                return Err(TopologyError::DuplicateNodeId(id));
            }
        }

        let mut builder = LinkTableBuilder {
            graph,
            id2idx,
            links: Vec::new(),
            pair2link: FxHashMap::default(),
            addr2node: FxHashMap::default(),
            node_addrs: FxHashMap::default(),
            isl_rate,
            feeder_rate,
        };
        for edge in edges {
            builder.add_link(edge.a.clone(), edge.b.clone(), edge.weight_km, true)?;
        }
        // Links first seen in a LINK_UP event exist from the start, inactive
        // until the event fires.
        for (a, b) in future_pairs {
            let key = normalize(a.clone(), b.clone());
            if builder.pair2link.contains_key(&key) {
                continue;
            }
            builder.add_link(a.clone(), b.clone(), 0.0, false)?;
        }

        let LinkTableBuilder {
            graph,
            id2idx,
            links,
            pair2link,
            addr2node,
            node_addrs,
            ..
        } = builder;

        // CORRECTNESS: Every node must be referenced by some link.
        let referenced = links
            .iter()
            .flat_map(|link| [link.a.clone(), link.b.clone()])
            .collect::<FxHashSet<_>>();
        for id in id2idx.keys() {
            if !referenced.contains(id) {
                return Err(TopologyError::IsolatedNode(id.clone()));
            }
        }

        Ok(Self {
            graph,
            id2idx,
            links,
            pair2link,
            addr2node,
            node_addrs,
        })
    }

    pub fn node(&self, id: &NodeId) -> Option<&Node> {
        self.id2idx.get(id).map(|&idx| &self.graph[idx])
    }

    pub fn contains(&self, id: &NodeId) -> bool {
        self.id2idx.contains_key(id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.graph.node_weights()
    }

    pub fn links(&self) -> impl Iterator<Item = &Link> {
        self.links.iter()
    }

    pub fn link_between(&self, a: &NodeId, b: &NodeId) -> Option<LinkId> {
        self.pair2link
            .get(&normalize(a.clone(), b.clone()))
            .copied()
    }

    delegate::delegate! {
        to self.links {
            #[call(len)]
            pub fn nr_links(&self) -> usize;
        }
    }
}

struct LinkTableBuilder {
    graph: UnGraph<Node, LinkId>,
    id2idx: FxHashMap<NodeId, NodeIndex>,
    links: Vec<Link>,
    pair2link: FxHashMap<(NodeId, NodeId), LinkId>,
    addr2node: FxHashMap<Ipv4Addr, NodeId>,
    node_addrs: FxHashMap<NodeId, Vec<Ipv4Addr>>,
    isl_rate: BitsPerSec,
    feeder_rate: BitsPerSec,
}

impl LinkTableBuilder {
    fn add_link(
        &mut self,
        a: NodeId,
        b: NodeId,
        weight_km: f64,
        active: bool,
    ) -> Result<(), TopologyError> {
        // CORRECTNESS: Every link must have distinct endpoints in `nodes`.
        if a == b {
            return Err(TopologyError::NodeAdjacentSelf(a));
        }
        let (a, b) = normalize(a, b);
        let &idx_a = self
            .id2idx
            .get(&a)
            .ok_or_else(|| TopologyError::UndeclaredNode(a.clone()))?;
        let &idx_b = self
            .id2idx
            .get(&b)
            .ok_or_else(|| TopologyError::UndeclaredNode(b.clone()))?;
        // CORRECTNESS: For any two nodes, there must be at most one link.
        if self.pair2link.contains_key(&(a.clone(), b.clone())) {
            return Err(TopologyError::DuplicateLink { n1: a, n2: b });
        }
        // CORRECTNESS: Link weights must be finite and non-negative.
        if !weight_km.is_finite() || weight_km < 0.0 {
            return Err(TopologyError::InvalidWeight {
                n1: a,
                n2: b,
                weight_km,
            });
        }
        let class = match (self.graph[idx_a].is_satellite(), self.graph[idx_b].is_satellite()) {
            (true, true) => LinkClass::Isl,
            (true, false) | (false, true) => LinkClass::Feeder,
            // CORRECTNESS: No link may connect two ground stations.
            (false, false) => return Err(TopologyError::GroundToGround { n1: a, n2: b }),
        };

        let id = LinkId::new(self.links.len());
        let (addr_a, addr_b) = link_addrs(id)?;
        self.addr2node.insert(addr_a, a.clone());
        self.addr2node.insert(addr_b, b.clone());
        self.node_addrs.entry(a.clone()).or_default().push(addr_a);
        self.node_addrs.entry(b.clone()).or_default().push(addr_b);

        self.links.push(Link {
            a: a.clone(),
            b: b.clone(),
            addr_a,
            addr_b,
            class,
            rate: match class {
                LinkClass::Isl => self.isl_rate,
                LinkClass::Feeder => self.feeder_rate,
            },
            delay: constants::propagation_delay(weight_km),
            active,
            fifos: [TransmitFifo::default(), TransmitFifo::default()],
        });
        self.pair2link.insert((a, b), id);
        self.graph.add_edge(idx_a, idx_b, id);
        Ok(())
    }
}

/// Each link is its own point-to-point subnet under 10.0.0.0/8: link `i`
/// owns `10.(i / 256).(i % 256).{1,2}`.
fn link_addrs(id: LinkId) -> Result<(Ipv4Addr, Ipv4Addr), TopologyError> {
    let i = id.inner();
    if i >= 1 << 16 {
        return Err(TopologyError::TooManyLinks(i + 1));
    }
    let (hi, lo) = ((i >> 8) as u8, (i & 0xff) as u8);
    Ok((
        Ipv4Addr::new(10, hi, lo, 1),
        Ipv4Addr::new(10, hi, lo, 2),
    ))
}

/// An error type listing some of the reasons a topology is invalid.
#[derive(Debug, thiserror::Error)]
pub enum TopologyError {
    /// Duplicate node ID.
    #[error("duplicate node ID {0}")]
    DuplicateNodeId(NodeId),

    /// A node is connected to itself.
    #[error("node {0} is connected to itself")]
    NodeAdjacentSelf(NodeId),

    /// A node is referenced by a link but does not exist.
    #[error("node {0} is not declared")]
    UndeclaredNode(NodeId),

    /// Duplicate link between two nodes.
    #[error("duplicate links between {n1} and {n2}")]
    DuplicateLink { n1: NodeId, n2: NodeId },

    /// A link weight that is NaN, infinite or negative.
    #[error("link {n1} - {n2} has invalid weight {weight_km}")]
    InvalidWeight {
        n1: NodeId,
        n2: NodeId,
        weight_km: f64,
    },

    /// Two ground stations directly connected.
    #[error("link {n1} - {n2} connects two ground stations")]
    GroundToGround { n1: NodeId, n2: NodeId },

    /// The 10.0.0.0/8 per-link address space is exhausted.
    #[error("too many links ({0}); address space holds 65536")]
    TooManyLinks(usize),

    /// A node is not connected to anything else.
    #[error("node {0} is not connected to any other node")]
    IsolatedNode(NodeId),
}
