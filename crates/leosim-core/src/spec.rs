//! The run specification and its setup-time validation. Everything fatal
//! happens here, before the first event fires; per-packet failures during
//! the run never abort it.

use typed_builder::TypedBuilder;

use crate::metrics::FlowMeta;
use crate::network::topology::{normalize, Topology, TopologyError};
use crate::network::types::{Edge, Node, NodeId, TopologyEvent, WeightWindow};
use crate::network::NetworkState;
use crate::routing::{RoutingError, SwitchingTable, TableStore};
use crate::sim::Config;
use crate::traffic::{AppId, Source, TrafficSpec};
use crate::units::Nanosecs;

/// Everything a run consumes: the constellation graph, the switching
/// tables, the scheduled event and failure streams, the dynamic weights,
/// the workload, and the run options.
#[derive(Debug, TypedBuilder)]
pub struct Spec {
    pub nodes: Vec<Node>,
    #[builder(default)]
    pub edges: Vec<Edge>,
    #[builder(default)]
    pub tables: Vec<SwitchingTable>,
    #[builder(default)]
    pub events: Vec<TopologyEvent>,
    #[builder(default)]
    pub failures: Vec<TopologyEvent>,
    #[builder(default)]
    pub weight_windows: Vec<WeightWindow>,
    #[builder(default)]
    pub traffic: Vec<TrafficSpec>,
    #[builder(default)]
    pub config: Config,
}

/// A `ValidSpec` is a `Spec` after setup: topology built and addressed,
/// tables resolved and checked, traffic turned into emission sources. It can
/// only be created through [`Spec::validate`].
#[derive(Debug)]
pub(crate) struct ValidSpec {
    pub(crate) state: NetworkState,
    pub(crate) tables: TableStore,
    pub(crate) events: Vec<TopologyEvent>,
    pub(crate) weight_windows: Vec<WeightWindow>,
    pub(crate) sources: Vec<(Source, Nanosecs, FlowMeta)>,
    pub(crate) config: Config,
}

impl Spec {
    /// Validate a specification, producing a `ValidSpec`.
    ///
    /// Correctness properties:
    ///
    /// - The graph, extended with every link an event will ever enable,
    ///   must form a valid topology.
    /// - Per owner, switching-table intervals must be disjoint.
    /// - Every traffic endpoint must be a declared, linked node.
    /// - Every traffic source must have a positive packet size and rate,
    ///   and an emission interval of at least one nanosecond.
    ///
    /// Switching-table rows referencing unknown nodes are skipped with a
    /// warning; the rest of the table stands.
    pub(crate) fn validate(self) -> Result<ValidSpec, SpecError> {
        // The union set of all links that will ever exist: initial edges
        // plus every LINK_UP pair. Event-only links start inactive.
        let future_pairs = self
            .events
            .iter()
            .chain(&self.failures)
            .filter(|event| matches!(event.action, crate::network::types::LinkAction::Up))
            .map(|event| normalize(event.a.clone(), event.b.clone()))
            .collect::<Vec<_>>();
        let topo = Topology::new(
            &self.nodes,
            &self.edges,
            &future_pairs,
            self.config.isl_data_rate,
            self.config.feeder_data_rate,
        )?;
        let state = NetworkState::new(topo);

        let mut tables = TableStore::new();
        for mut table in self.tables {
            if !state.contains(&table.owner) {
                tracing::warn!(owner = %table.owner, "switching table for unknown node skipped");
                continue;
            }
            table.entries.retain(|dst, hops| {
                if !state.contains(dst) {
                    tracing::warn!(owner = %table.owner, %dst, "table entry for unknown destination skipped");
                    return false;
                }
                hops.retain(|hop| {
                    let known = state.contains(hop);
                    if !known {
                        tracing::warn!(owner = %table.owner, %dst, %hop, "unknown next hop skipped");
                    }
                    known
                });
                !hops.is_empty()
            });
            tables.insert(table);
        }
        tables.validate()?;

        let mut sources = Vec::with_capacity(self.traffic.len());
        for (i, traffic) in self.traffic.iter().enumerate() {
            let app = AppId::new(i as u32);
            // CORRECTNESS: Every traffic endpoint must be a declared node.
            let src_addr = state
                .primary_addr(&traffic.src)
                .ok_or_else(|| SpecError::UnknownTrafficNode {
                    app,
                    node: traffic.src.clone(),
                })?;
            let dst_addr = state
                .primary_addr(&traffic.dst)
                .ok_or_else(|| SpecError::UnknownTrafficNode {
                    app,
                    node: traffic.dst.clone(),
                })?;
            if traffic.packet_size == crate::units::Bytes::ZERO {
                return Err(SpecError::ZeroPacketSize { app });
            }
            if traffic.rate == crate::units::BitsPerSec::ZERO {
                return Err(SpecError::ZeroRate { app });
            }
            // CORRECTNESS: A zero interval would emit forever at one instant.
            if traffic.rate.length(traffic.packet_size) == Nanosecs::ZERO {
                return Err(SpecError::IntervalTooSmall { app });
            }
            let meta = FlowMeta::new(
                traffic.src.clone(),
                traffic.dst.clone(),
                town_of(&state, &traffic.src),
                town_of(&state, &traffic.dst),
            );
            sources.push((
                Source::new(app, traffic, src_addr, dst_addr),
                traffic.start,
                meta,
            ));
        }

        // Scheduled events and injected failures are one stream at run time.
        let mut events = self.events;
        events.extend(self.failures);

        Ok(ValidSpec {
            state,
            tables,
            events,
            weight_windows: self.weight_windows,
            sources,
            config: self.config,
        })
    }
}

fn town_of(state: &NetworkState, id: &NodeId) -> Option<String> {
    state.node(id)?.town().map(str::to_owned)
}

#[derive(Debug, thiserror::Error)]
pub enum SpecError {
    #[error(transparent)]
    Topology(#[from] TopologyError),

    #[error(transparent)]
    Routing(#[from] RoutingError),

    #[error("traffic {app}: unknown node {node}")]
    UnknownTrafficNode { app: AppId, node: NodeId },

    #[error("traffic {app}: packet size must be positive")]
    ZeroPacketSize { app: AppId },

    #[error("traffic {app}: rate must be positive")]
    ZeroRate { app: AppId },

    #[error("traffic {app}: emission interval rounds below one nanosecond")]
    IntervalTooSmall { app: AppId },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;
    use crate::units::{BitsPerSec, Bytes};

    fn traffic(src: &str, dst: &str) -> TrafficSpec {
        TrafficSpec::new(
            NodeId::from(src),
            NodeId::from(dst),
            Nanosecs::from_secs(1),
            Nanosecs::from_secs(5),
            Bytes::new(1024),
            BitsPerSec::from_mbps(1),
        )
    }

    #[test]
    fn valid_relay_spec_passes() -> anyhow::Result<()> {
        let (nodes, edges) = testing::relay_config();
        let spec = Spec::builder()
            .nodes(nodes)
            .edges(edges)
            .tables(vec![
                testing::table("gs-a", 0, 100, "gs-b", &["sat-1"]),
                testing::table("sat-1", 0, 100, "gs-b", &["gs-b"]),
            ])
            .traffic(vec![traffic("gs-a", "gs-b")])
            .build();
        let valid = spec.validate();
        assert!(valid.is_ok(), "{:?}", valid.err());
        let valid = valid.unwrap();
        assert_eq!(valid.sources.len(), 1);
        assert_eq!(valid.tables.nr_owners(), 2);
        Ok(())
    }

    #[test]
    fn unknown_traffic_node_is_fatal() {
        let (nodes, edges) = testing::relay_config();
        let spec = Spec::builder()
            .nodes(nodes)
            .edges(edges)
            .traffic(vec![traffic("gs-a", "gs-z")])
            .build();
        assert!(matches!(
            spec.validate(),
            Err(SpecError::UnknownTrafficNode { .. })
        ));
    }

    #[test]
    fn table_rows_for_unknown_nodes_are_skipped() -> anyhow::Result<()> {
        let (nodes, edges) = testing::relay_config();
        let spec = Spec::builder()
            .nodes(nodes)
            .edges(edges)
            .tables(vec![
                testing::table("gs-a", 0, 100, "gs-z", &["sat-1"]),
                testing::table("mystery", 0, 100, "gs-b", &["sat-1"]),
            ])
            .build();
        let valid = spec.validate()?;
        // The unknown owner is gone; the known owner kept an empty table.
        assert_eq!(valid.tables.nr_owners(), 1);
        Ok(())
    }

    #[test]
    fn overlapping_tables_are_fatal() {
        let (nodes, edges) = testing::relay_config();
        let spec = Spec::builder()
            .nodes(nodes)
            .edges(edges)
            .tables(vec![
                testing::table("gs-a", 0, 10, "gs-b", &["sat-1"]),
                testing::table("gs-a", 5, 15, "gs-b", &["sat-1"]),
            ])
            .build();
        assert!(matches!(spec.validate(), Err(SpecError::Routing(_))));
    }

    #[test]
    fn zero_rate_is_fatal() {
        let (nodes, edges) = testing::relay_config();
        let mut t = traffic("gs-a", "gs-b");
        t.rate = BitsPerSec::ZERO;
        let spec = Spec::builder()
            .nodes(nodes)
            .edges(edges)
            .traffic(vec![t])
            .build();
        assert!(matches!(spec.validate(), Err(SpecError::ZeroRate { .. })));
    }

    #[test]
    fn event_only_links_extend_the_topology() -> anyhow::Result<()> {
        let (mut nodes, edges) = testing::relay_config();
        nodes.push(Node::new_satellite("sat-2", 1));
        let spec = Spec::builder()
            .nodes(nodes)
            .edges(edges)
            .events(vec![TopologyEvent {
                at: Nanosecs::from_secs(10),
                action: crate::network::types::LinkAction::Up,
                a: NodeId::from("sat-1"),
                b: NodeId::from("sat-2"),
                weight_km: 800.0,
            }])
            .build();
        let valid = spec.validate()?;
        let id = valid
            .state
            .link_between(&NodeId::from("sat-1"), &NodeId::from("sat-2"))
            .unwrap();
        assert!(!valid.state.link(id).active);
        Ok(())
    }
}
