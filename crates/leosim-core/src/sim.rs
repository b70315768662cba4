//! The per-run simulation context: run options, the event set, and the
//! dispatch loop that drives the network state, routing store, forwarding
//! engine and metrics off one virtual clock. There are no singletons; a run
//! owns all of its state and is dropped with it.

use rustc_hash::FxHashMap;
use typed_builder::TypedBuilder;

use crate::constants;
use crate::engine::{flow_key, Decision, Engine};
use crate::metrics::MetricsCollector;
use crate::network::types::{LinkAction, LinkId, NextTx, NodeId, Side};
use crate::network::NetworkState;
use crate::packet::{FlowTag, Packet};
use crate::routing::TableStore;
use crate::scheduler::EventQueue;
use crate::spec::{Spec, SpecError, ValidSpec};
use crate::traffic::{AppId, Source};
use crate::units::{BitsPerSec, Nanosecs};

/// Run-level options recognized by the core.
#[derive(Debug, Clone, TypedBuilder)]
pub struct Config {
    /// Simulation horizon.
    #[builder(default = Nanosecs::from_secs(60))]
    pub stop_time: Nanosecs,
    /// Fall back to backup candidates when the primary next hop is
    /// unusable.
    #[builder(default = true)]
    pub use_backup_path: bool,
    /// Refuse to forward a packet back out the link it arrived on.
    #[builder(default = false)]
    pub simple_loop_avoidance: bool,
    #[builder(default = constants::DEFAULT_ISL_RATE)]
    pub isl_data_rate: BitsPerSec,
    #[builder(default = constants::DEFAULT_FEEDER_RATE)]
    pub feeder_data_rate: BitsPerSec,
    /// Emit the per-flow CSV at the end of the run.
    #[builder(default = true)]
    pub write_csv: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// The event set. Handlers run to completion; anything that takes time is
/// expressed by scheduling another event.
#[derive(Debug)]
enum Event {
    /// A scheduled LINK_UP / LINK_DOWN transition.
    Topology {
        action: LinkAction,
        a: NodeId,
        b: NodeId,
        weight_km: f64,
    },
    /// A dynamic-weight window refreshing one edge's delay.
    RefreshWeight {
        a: NodeId,
        b: NodeId,
        weight_km: f64,
    },
    /// A traffic source emits its next packet.
    Emit { app: AppId },
    /// A packet finished serializing onto a link; the channel frees up.
    TxComplete { link: LinkId, from: Side, pkt: Packet },
    /// A packet reached the far end of a link.
    Arrive { link: LinkId, from: Side, pkt: Packet },
}

/// One simulation run.
#[derive(Debug)]
pub struct Simulation {
    scheduler: EventQueue<Event>,
    state: NetworkState,
    tables: TableStore,
    sources: FxHashMap<AppId, Source>,
    metrics: MetricsCollector,
    config: Config,
}

impl Simulation {
    /// Validates the specification and sets up the run: topology and
    /// addresses, switching tables, scheduled events, and one emission
    /// event per traffic source at its start time.
    pub fn new(spec: Spec) -> Result<Self, SpecError> {
        Ok(Self::build(spec.validate()?))
    }

    fn build(valid: ValidSpec) -> Self {
        let ValidSpec {
            state,
            tables,
            events,
            weight_windows,
            sources,
            config,
        } = valid;
        let mut scheduler = EventQueue::new();
        for event in events {
            scheduler.schedule_at(
                event.at,
                Event::Topology {
                    action: event.action,
                    a: event.a,
                    b: event.b,
                    weight_km: event.weight_km,
                },
            );
        }
        for window in weight_windows {
            for edge in window.edges {
                scheduler.schedule_at(
                    window.from,
                    Event::RefreshWeight {
                        a: edge.a,
                        b: edge.b,
                        weight_km: edge.weight_km,
                    },
                );
            }
        }
        let mut metrics = MetricsCollector::new();
        let mut source_map = FxHashMap::default();
        for (source, start, meta) in sources {
            metrics.register_flow(
                crate::metrics::FlowKey::new(source.app, source.src_addr, source.dst_addr),
                meta,
            );
            scheduler.schedule_at(start, Event::Emit { app: source.app });
            source_map.insert(source.app, source);
        }
        Self {
            scheduler,
            state,
            tables,
            sources: source_map,
            metrics,
            config,
        }
    }

    pub fn now(&self) -> Nanosecs {
        self.scheduler.now()
    }

    pub fn state(&self) -> &NetworkState {
        &self.state
    }

    pub fn metrics(&self) -> &MetricsCollector {
        &self.metrics
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Runs the configured horizon and returns the collected statistics.
    pub fn run(mut self) -> MetricsCollector {
        let stop = self.config.stop_time;
        self.run_until(stop);
        self.metrics
    }

    /// Fires every event due at or before `stop` in (time, sequence) order.
    pub fn run_until(&mut self, stop: Nanosecs) {
        while let Some((_, event)) = self.scheduler.pop_due(stop) {
            self.handle(event);
        }
    }

    fn handle(&mut self, event: Event) {
        match event {
            Event::Topology {
                action: LinkAction::Up,
                a,
                b,
                weight_km,
            } => self.state.enable_link(&a, &b, weight_km),
            Event::Topology {
                action: LinkAction::Down,
                a,
                b,
                ..
            } => self.state.disable_link(&a, &b),
            Event::RefreshWeight { a, b, weight_km } => {
                self.state.update_weight(&a, &b, weight_km)
            }
            Event::Emit { app } => self.emit(app),
            Event::TxComplete { link, from, pkt } => self.complete_transmission(link, from, pkt),
            Event::Arrive { link, from, pkt } => self.arrive(link, from, pkt),
        }
    }

    /// One source emission: stamp a fresh packet, account it as sent, route
    /// it out, and line up the next emission while the window lasts.
    fn emit(&mut self, app: AppId) {
        let now = self.scheduler.now();
        let Some(source) = self.sources.get_mut(&app) else {
            return;
        };
        let mut pkt = Packet::new(
            source.packet_size,
            source.src_addr,
            source.dst_addr,
            FlowTag::new(app, source.next_number, now),
        );
        source.next_number += 1;
        let node = source.node.clone();
        let interval = source.interval;
        let last_emission = source.last_emission;
        if now + interval <= last_emission {
            self.scheduler.schedule(interval, Event::Emit { app });
        }

        self.metrics.record_sent(&flow_key(&pkt));
        let decision = Engine {
            state: &self.state,
            tables: &mut self.tables,
            config: &self.config,
            metrics: &mut self.metrics,
            now,
        }
        .route_output(&node, &mut pkt);
        if let Decision::Forward { link, from, .. } = decision {
            self.transmit(link, from, pkt);
        }
    }

    /// Hands a packet to the outgoing channel. The forwarding decision and
    /// this call happen at the same instant, but a topology event in
    /// between may have taken the link down; the packet is then dropped at
    /// the sender.
    fn transmit(&mut self, link_id: LinkId, from: Side, pkt: Packet) {
        let link = self.state.link_mut(link_id);
        if !link.active {
            let sender = link.endpoint(from).clone();
            let key = flow_key(&pkt);
            tracing::debug!(node = %sender, app = %key.app, "link down before transmission, packet dropped");
            self.metrics.record_drop(&key, &sender);
            return;
        }
        if let Some((pkt, serialization)) = link.begin_or_enqueue(from, pkt) {
            self.scheduler.schedule(
                serialization,
                Event::TxComplete {
                    link: link_id,
                    from,
                    pkt,
                },
            );
        }
    }

    /// Serialization finished: the packet is committed, so its arrival is
    /// scheduled with the delay in force now, even if the link has gone
    /// down meanwhile. Queued packets behind it start serializing, except
    /// those stranded on a dead link.
    fn complete_transmission(&mut self, link_id: LinkId, from: Side, pkt: Packet) {
        let delay = self.state.link(link_id).delay;
        self.scheduler.schedule(
            delay,
            Event::Arrive {
                link: link_id,
                from,
                pkt,
            },
        );
        loop {
            match self.state.link_mut(link_id).next_transmission(from) {
                NextTx::Start(next, serialization) => {
                    self.scheduler.schedule(
                        serialization,
                        Event::TxComplete {
                            link: link_id,
                            from,
                            pkt: next,
                        },
                    );
                    break;
                }
                NextTx::Dropped(stranded) => {
                    let sender = self.state.link(link_id).endpoint(from).clone();
                    let key = flow_key(&stranded);
                    tracing::debug!(node = %sender, app = %key.app, "queued packet stranded on dead link, dropped");
                    self.metrics.record_drop(&key, &sender);
                }
                NextTx::Idle => break,
            }
        }
    }

    /// A committed packet lands at the far end and re-enters routing there.
    fn arrive(&mut self, link_id: LinkId, from: Side, mut pkt: Packet) {
        let receiver = self.state.link(link_id).endpoint(from.opposite()).clone();
        let decision = Engine {
            state: &self.state,
            tables: &mut self.tables,
            config: &self.config,
            metrics: &mut self.metrics,
            now: self.scheduler.now(),
        }
        .route_input(&receiver, &mut pkt, link_id);
        if let Decision::Forward { link, from, .. } = decision {
            self.transmit(link, from, pkt);
        }
    }
}

/// The core routine: validates a specification, runs it to the configured
/// horizon, and returns the per-flow statistics.
pub fn run(spec: Spec) -> Result<MetricsCollector, Error> {
    let sim = Simulation::new(spec)?;
    tracing::info!(
        nodes = sim.state.nodes().count(),
        links = sim.state.nr_links(),
        flows = sim.sources.len(),
        stop = %sim.config.stop_time,
        "starting run"
    );
    Ok(sim.run())
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    InvalidSpec(#[from] SpecError),
}
