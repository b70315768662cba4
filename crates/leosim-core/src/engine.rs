//! The per-node forwarding engine: resolves a packet's destination through
//! the switching table in force, picks a usable outgoing link with backup
//! fallback and optional loop avoidance, and accounts the per-flow effects.

use std::net::Ipv4Addr;

use crate::metrics::{FlowKey, MetricsCollector};
use crate::network::types::{LinkId, NodeId, Side};
use crate::network::NetworkState;
use crate::packet::Packet;
use crate::routing::TableStore;
use crate::sim::Config;
use crate::units::Nanosecs;

/// What a node decided to do with a packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// The destination address is one of the node's own endpoints.
    DeliverLocal,
    /// Transmit on `link`, sending from `from` towards `next_hop`.
    Forward {
        link: LinkId,
        from: Side,
        next_hop: NodeId,
        next_hop_addr: Ipv4Addr,
    },
    Drop(DropReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// Unknown destination, no table in force, no entry, or every candidate
    /// unusable.
    NoRoute,
    /// The chosen link went down before the packet could be committed.
    LinkInactive,
}

/// A borrow of everything one forwarding decision needs. Constructed per
/// packet event by the simulation; the split keeps the engine free of any
/// global state.
#[derive(Debug)]
pub(crate) struct Engine<'a> {
    pub(crate) state: &'a NetworkState,
    pub(crate) tables: &'a mut TableStore,
    pub(crate) config: &'a Config,
    pub(crate) metrics: &'a mut MetricsCollector,
    pub(crate) now: Nanosecs,
}

impl Engine<'_> {
    /// Routing entry point for packets originating at `local`.
    pub(crate) fn route_output(&mut self, local: &NodeId, pkt: &mut Packet) -> Decision {
        self.route(local, pkt, None)
    }

    /// Routing entry point for packets arriving at `local` over `ingress`.
    pub(crate) fn route_input(
        &mut self,
        local: &NodeId,
        pkt: &mut Packet,
        ingress: LinkId,
    ) -> Decision {
        self.route(local, pkt, Some(ingress))
    }

    fn route(&mut self, local: &NodeId, pkt: &mut Packet, ingress: Option<LinkId>) -> Decision {
        let key = flow_key(pkt);
        if self.state.is_local_addr(local, pkt.dst) {
            let latency = self.now - pkt.tag.sent_at();
            self.metrics.record_received(&key, latency, pkt.tag.hops());
            return Decision::DeliverLocal;
        }
        let Some(dst_node) = self.state.node_for_addr(pkt.dst).cloned() else {
            return self.drop(local, &key, "destination address unknown");
        };
        let Some(candidates) = lookup(self.tables, local, self.now, &dst_node) else {
            return self.drop(local, &key, "no switching-table entry in force");
        };

        // Candidate order is the table's preference order; only the primary
        // is considered unless backup paths are on.
        let considered = if self.config.use_backup_path {
            candidates.as_slice()
        } else {
            &candidates[..candidates.len().min(1)]
        };
        for (i, hop) in considered.iter().enumerate() {
            if !self.state.is_active(local, hop) {
                continue;
            }
            let Some((link, from)) = self.state.device_towards(local, hop) else {
                continue;
            };
            if self.config.simple_loop_avoidance && ingress == Some(link) {
                self.metrics.record_loop_avoided(&key);
                continue;
            }
            if i > 0 {
                self.metrics.record_backup_used(&key);
            }
            pkt.tag.record_hop();
            let next_hop_addr = self.state.link(link).addr(from.opposite());
            return Decision::Forward {
                link,
                from,
                next_hop: hop.clone(),
                next_hop_addr,
            };
        }
        self.drop(local, &key, "all next-hop candidates unusable")
    }

    fn drop(&mut self, local: &NodeId, key: &FlowKey, why: &str) -> Decision {
        tracing::debug!(node = %local, app = %key.app, dst = %key.dst, why, "packet dropped");
        self.metrics.record_drop(key, local);
        Decision::Drop(DropReason::NoRoute)
    }
}

fn lookup(
    tables: &mut TableStore,
    owner: &NodeId,
    now: Nanosecs,
    dst: &NodeId,
) -> Option<Vec<NodeId>> {
    tables
        .current_for(owner, now)?
        .next_hops(dst)
        .map(<[NodeId]>::to_vec)
}

pub(crate) fn flow_key(pkt: &Packet) -> FlowKey {
    FlowKey::new(pkt.tag.app(), pkt.src, pkt.dst)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::FlowTag;
    use crate::testing;
    use crate::traffic::AppId;
    use crate::units::Bytes;

    struct Fixture {
        state: NetworkState,
        tables: TableStore,
        config: Config,
        metrics: MetricsCollector,
    }

    impl Fixture {
        fn relay(config: Config) -> anyhow::Result<Self> {
            let state = testing::diamond_state()?;
            let mut tables = TableStore::new();
            // gs-a reaches gs-b through sat-1 for the whole run
            tables.insert(testing::table("gs-a", 0, 100, "gs-b", &["sat-1"]));
            tables.insert(testing::table("sat-1", 0, 100, "gs-b", &["gs-b"]));
            Ok(Self {
                state,
                tables,
                config,
                metrics: MetricsCollector::new(),
            })
        }

        fn engine(&mut self, now: Nanosecs) -> Engine<'_> {
            Engine {
                state: &self.state,
                tables: &mut self.tables,
                config: &self.config,
                metrics: &mut self.metrics,
                now,
            }
        }

        fn packet_to(&self, dst: &str) -> Packet {
            let dst_addr = self
                .state
                .primary_addr(&NodeId::from(dst))
                .expect("destination has an address");
            let src_addr = self.state.primary_addr(&NodeId::from("gs-a")).unwrap();
            Packet::new(
                Bytes::new(1024),
                src_addr,
                dst_addr,
                FlowTag::new(AppId::ZERO, 0, Nanosecs::ZERO),
            )
        }

        fn register(&mut self, pkt: &Packet) -> FlowKey {
            let key = flow_key(pkt);
            self.metrics.register_flow(
                key,
                crate::metrics::FlowMeta::new(
                    NodeId::from("gs-a"),
                    NodeId::from("gs-b"),
                    None,
                    None,
                ),
            );
            key
        }
    }

    #[test]
    fn forwards_via_primary() -> anyhow::Result<()> {
        let mut fx = Fixture::relay(Config::default())?;
        let mut pkt = fx.packet_to("gs-b");
        fx.register(&pkt);
        let decision = fx.engine(Nanosecs::ZERO).route_output(&NodeId::from("gs-a"), &mut pkt);
        match decision {
            Decision::Forward { next_hop, .. } => assert_eq!(next_hop, NodeId::from("sat-1")),
            other => panic!("expected forward, got {other:?}"),
        }
        assert_eq!(pkt.tag.hops(), 1);
        Ok(())
    }

    #[test]
    fn delivers_locally_and_records_latency() -> anyhow::Result<()> {
        let mut fx = Fixture::relay(Config::default())?;
        let mut pkt = fx.packet_to("gs-b");
        let key = fx.register(&pkt);
        let now = Nanosecs::from_millis(12);
        let decision = fx.engine(now).route_input(
            &NodeId::from("gs-b"),
            &mut pkt,
            LinkId::ZERO,
        );
        assert_eq!(decision, Decision::DeliverLocal);
        let stats = fx.metrics.get(&key).unwrap();
        assert_eq!(stats.received, 1);
        assert_eq!(stats.max_latency_ms(), 12.0);
        Ok(())
    }

    #[test]
    fn unknown_destination_drops_at_source() -> anyhow::Result<()> {
        let mut fx = Fixture::relay(Config::default())?;
        let mut pkt = fx.packet_to("gs-b");
        pkt.dst = std::net::Ipv4Addr::new(192, 168, 0, 1);
        let key = fx.register(&pkt);
        let decision = fx.engine(Nanosecs::ZERO).route_output(&NodeId::from("gs-a"), &mut pkt);
        assert_eq!(decision, Decision::Drop(DropReason::NoRoute));
        let stats = fx.metrics.get(&key).unwrap();
        assert_eq!(stats.dropped_by_node.get(&NodeId::from("gs-a")), Some(&1));
        Ok(())
    }

    #[test]
    fn no_table_in_force_drops() -> anyhow::Result<()> {
        let mut fx = Fixture::relay(Config::default())?;
        let mut pkt = fx.packet_to("gs-b");
        fx.register(&pkt);
        // Tables cover [0s, 100s]; route far outside the window.
        let decision = fx
            .engine(Nanosecs::from_secs(500))
            .route_output(&NodeId::from("gs-a"), &mut pkt);
        assert_eq!(decision, Decision::Drop(DropReason::NoRoute));
        Ok(())
    }

    #[test]
    fn dead_primary_falls_back_to_backup() -> anyhow::Result<()> {
        let mut fx = Fixture::relay(Config::default())?;
        fx.state
            .disable_link(&NodeId::from("gs-a"), &NodeId::from("sat-1"));
        // Give gs-a a second candidate towards gs-b via sat-2.
        fx.tables
            .insert(testing::table("gs-a", 0, 100, "gs-b", &["sat-1", "sat-2"]));
        let mut pkt = fx.packet_to("gs-b");
        let key = fx.register(&pkt);
        let decision = fx.engine(Nanosecs::ZERO).route_output(&NodeId::from("gs-a"), &mut pkt);
        match decision {
            Decision::Forward { next_hop, .. } => assert_eq!(next_hop, NodeId::from("sat-2")),
            other => panic!("expected forward, got {other:?}"),
        }
        assert_eq!(fx.metrics.get(&key).unwrap().backup_path_used, 1);
        Ok(())
    }

    #[test]
    fn backup_disabled_drops_on_dead_primary() -> anyhow::Result<()> {
        let config = Config::builder().use_backup_path(false).build();
        let mut fx = Fixture::relay(config)?;
        fx.state
            .disable_link(&NodeId::from("gs-a"), &NodeId::from("sat-1"));
        fx.tables
            .insert(testing::table("gs-a", 0, 100, "gs-b", &["sat-1", "sat-2"]));
        let mut pkt = fx.packet_to("gs-b");
        let key = fx.register(&pkt);
        let decision = fx.engine(Nanosecs::ZERO).route_output(&NodeId::from("gs-a"), &mut pkt);
        assert_eq!(decision, Decision::Drop(DropReason::NoRoute));
        assert_eq!(fx.metrics.get(&key).unwrap().backup_path_used, 0);
        Ok(())
    }

    #[test]
    fn loop_avoidance_skips_the_ingress_link() -> anyhow::Result<()> {
        let config = Config::builder().simple_loop_avoidance(true).build();
        let mut fx = Fixture::relay(config)?;
        // sat-1's only candidate for gs-b points back where the packet
        // came from.
        fx.tables
            .insert(testing::table("sat-1", 0, 100, "gs-b", &["gs-a"]));
        let mut pkt = fx.packet_to("gs-b");
        let key = fx.register(&pkt);
        let ingress = fx
            .state
            .link_between(&NodeId::from("gs-a"), &NodeId::from("sat-1"))
            .unwrap();
        let decision =
            fx.engine(Nanosecs::ZERO)
                .route_input(&NodeId::from("sat-1"), &mut pkt, ingress);
        assert_eq!(decision, Decision::Drop(DropReason::NoRoute));
        let stats = fx.metrics.get(&key).unwrap();
        assert_eq!(stats.loop_avoidance_triggered, 1);
        assert_eq!(stats.dropped_by_node.get(&NodeId::from("sat-1")), Some(&1));
        Ok(())
    }

    #[test]
    fn without_avoidance_the_packet_bounces_back() -> anyhow::Result<()> {
        let mut fx = Fixture::relay(Config::default())?;
        fx.tables
            .insert(testing::table("sat-1", 0, 100, "gs-b", &["gs-a"]));
        let mut pkt = fx.packet_to("gs-b");
        fx.register(&pkt);
        let ingress = fx
            .state
            .link_between(&NodeId::from("gs-a"), &NodeId::from("sat-1"))
            .unwrap();
        let decision =
            fx.engine(Nanosecs::ZERO)
                .route_input(&NodeId::from("sat-1"), &mut pkt, ingress);
        match decision {
            Decision::Forward { link, .. } => assert_eq!(link, ingress),
            other => panic!("expected forward, got {other:?}"),
        }
        Ok(())
    }

    #[test]
    fn avoidance_prefers_an_alternate_candidate() -> anyhow::Result<()> {
        let config = Config::builder().simple_loop_avoidance(true).build();
        let mut fx = Fixture::relay(config)?;
        fx.tables
            .insert(testing::table("sat-1", 0, 100, "gs-b", &["gs-a", "gs-b"]));
        let mut pkt = fx.packet_to("gs-b");
        let key = fx.register(&pkt);
        let ingress = fx
            .state
            .link_between(&NodeId::from("gs-a"), &NodeId::from("sat-1"))
            .unwrap();
        let decision =
            fx.engine(Nanosecs::ZERO)
                .route_input(&NodeId::from("sat-1"), &mut pkt, ingress);
        match decision {
            Decision::Forward { link, next_hop, .. } => {
                assert_ne!(link, ingress);
                assert_eq!(next_hop, NodeId::from("gs-b"));
            }
            other => panic!("expected forward, got {other:?}"),
        }
        let stats = fx.metrics.get(&key).unwrap();
        assert_eq!(stats.loop_avoidance_triggered, 1);
        assert_eq!(stats.backup_path_used, 1);
        Ok(())
    }
}
