//! Decodes the JSON input corpus of the constellation generator (graph,
//! switching tables, scheduled events, failure scenarios, dynamic weights
//! and the traffic workload) into a [`leosim_core::Spec`]. External
//! timestamps are ISO-8601 UTC (optionally with fractional seconds down to
//! microseconds) and are resolved against the simulation start instant.

use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use rustc_hash::FxHashMap;
use serde::de::DeserializeOwned;

use leosim_core::network::types::{Edge, LinkAction, Node, NodeId, TopologyEvent, WeightWindow};
use leosim_core::routing::SwitchingTable;
use leosim_core::traffic::{self, RateError, TrafficSpec};
use leosim_core::units::{Bytes, Nanosecs};
use leosim_core::{Config, Spec};

const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";

/// The constellation graph file.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct RawGraph {
    pub starttime: String,
    pub endtime: String,
    pub nodes: Vec<RawNode>,
    pub edges: Vec<RawEdge>,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct RawNode {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    /// Map coordinates for visualization; unused by the simulation.
    #[serde(default)]
    pub position: Option<(f64, f64)>,
    #[serde(default)]
    pub orbit: Option<u16>,
    #[serde(default)]
    pub town: Option<String>,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct RawEdge {
    pub source: String,
    pub target: String,
    /// Distance in kilometers.
    pub weight: f64,
}

/// One per-node switching table. `table_data` rows are either a single next
/// hop or a ranked candidate list.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct RawSwitchingTable {
    pub node: String,
    pub valid_from: String,
    pub valid_until: String,
    pub table_data: FxHashMap<String, RawNextHops>,
}

#[derive(Debug, Clone, serde::Deserialize)]
#[serde(untagged)]
pub enum RawNextHops {
    Single(String),
    Ranked(Vec<String>),
}

impl RawNextHops {
    fn into_vec(self) -> Vec<NodeId> {
        match self {
            RawNextHops::Single(hop) => vec![NodeId::from(hop)],
            RawNextHops::Ranked(hops) => hops.into_iter().map(NodeId::from).collect(),
        }
    }
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct RawEvent {
    pub timestamp: String,
    pub action: RawAction,
    pub from: String,
    pub to: String,
    #[serde(default)]
    pub weight: f64,
}

#[derive(Debug, Clone, Copy, serde::Deserialize)]
pub enum RawAction {
    #[serde(rename = "LINK_UP")]
    LinkUp,
    #[serde(rename = "LINK_DOWN")]
    LinkDown,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct RawWeightWindow {
    pub valid_from: String,
    pub edges: Vec<RawEdge>,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct RawTraffic {
    pub src_node_id: String,
    pub dst_node_id: String,
    /// Offset from simulation start, in seconds.
    pub start_time: f64,
    /// Emission window length, in seconds.
    pub duration: f64,
    /// Payload size in bytes.
    pub packet_size: u64,
    /// A rate string such as `"1Mbps"`.
    pub rate: String,
    #[serde(default = "default_protocol")]
    pub protocol: String,
    #[serde(default = "default_src_port")]
    pub src_port: u16,
    #[serde(default = "default_dst_port")]
    pub dst_port: u16,
}

fn default_protocol() -> String {
    "UDP".to_owned()
}

fn default_src_port() -> u16 {
    49152
}

fn default_dst_port() -> u16 {
    9999
}

pub fn read_graph(path: impl AsRef<Path>) -> Result<RawGraph, Error> {
    read_json(path)
}

pub fn read_switching_tables(path: impl AsRef<Path>) -> Result<Vec<RawSwitchingTable>, Error> {
    read_json(path)
}

pub fn read_events(path: impl AsRef<Path>) -> Result<Vec<RawEvent>, Error> {
    read_json(path)
}

pub fn read_weight_windows(path: impl AsRef<Path>) -> Result<Vec<RawWeightWindow>, Error> {
    read_json(path)
}

pub fn read_traffic(path: impl AsRef<Path>) -> Result<Vec<RawTraffic>, Error> {
    read_json(path)
}

fn read_json<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<T, Error> {
    let path = path.as_ref();
    if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
        return Err(Error::UnknownFileType(path.into()));
    }
    let contents = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&contents)?)
}

/// Resolves external ISO-8601 timestamps into simulation time, relative to
/// the start instant. Instants before the start clamp to zero with a
/// warning.
#[derive(Debug, Clone, Copy)]
pub struct TimeBase {
    start: NaiveDateTime,
}

impl TimeBase {
    pub fn new(start: &str) -> Result<Self, Error> {
        Ok(Self {
            start: parse_timestamp(start)?,
        })
    }

    /// The start instant named by the graph file.
    pub fn from_graph(graph: &RawGraph) -> Result<Self, Error> {
        Self::new(&graph.starttime)
    }

    pub fn resolve(&self, timestamp: &str) -> Result<Nanosecs, Error> {
        let instant = parse_timestamp(timestamp)?;
        let delta = instant - self.start;
        match delta.num_nanoseconds() {
            Some(nanos) if nanos >= 0 => Ok(Nanosecs::new(nanos as u64)),
            Some(_) => {
                tracing::warn!(timestamp, "instant precedes simulation start, clamped to zero");
                Ok(Nanosecs::ZERO)
            }
            None => Err(Error::TimestampRange(timestamp.to_owned())),
        }
    }
}

fn parse_timestamp(value: &str) -> Result<NaiveDateTime, Error> {
    NaiveDateTime::parse_from_str(value, TIMESTAMP_FORMAT).map_err(|source| Error::Timestamp {
        value: value.to_owned(),
        source,
    })
}

/// Assembles a core [`Spec`] from decoded inputs. The graph's `starttime`
/// anchors every timestamped input.
pub fn build_spec(
    graph: RawGraph,
    tables: Vec<RawSwitchingTable>,
    events: Vec<RawEvent>,
    failures: Vec<RawEvent>,
    weight_windows: Vec<RawWeightWindow>,
    traffic: Vec<RawTraffic>,
    config: Config,
) -> Result<Spec, Error> {
    let base = TimeBase::from_graph(&graph)?;

    let nodes = graph
        .nodes
        .into_iter()
        .map(|raw| match raw.kind.as_str() {
            "satellite" => Ok(Node::new_satellite(raw.id, raw.orbit.unwrap_or(0))),
            "ground_station" => Ok(Node::new_ground_station(
                raw.id,
                raw.town.unwrap_or_default(),
            )),
            _ => Err(Error::UnknownNodeKind {
                node: raw.id,
                kind: raw.kind,
            }),
        })
        .collect::<Result<Vec<_>, _>>()?;
    let edges = graph.edges.into_iter().map(convert_edge).collect();

    let tables = tables
        .into_iter()
        .map(|raw| convert_table(raw, &base))
        .collect::<Result<Vec<_>, _>>()?;
    let events = events
        .into_iter()
        .map(|raw| convert_event(raw, &base))
        .collect::<Result<Vec<_>, _>>()?;
    let failures = failures
        .into_iter()
        .map(|raw| convert_event(raw, &base))
        .collect::<Result<Vec<_>, _>>()?;
    let weight_windows = weight_windows
        .into_iter()
        .map(|raw| {
            Ok(WeightWindow {
                from: base.resolve(&raw.valid_from)?,
                edges: raw.edges.into_iter().map(convert_edge).collect(),
            })
        })
        .collect::<Result<Vec<_>, Error>>()?;
    let traffic = traffic
        .into_iter()
        .map(convert_traffic)
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Spec::builder()
        .nodes(nodes)
        .edges(edges)
        .tables(tables)
        .events(events)
        .failures(failures)
        .weight_windows(weight_windows)
        .traffic(traffic)
        .config(config)
        .build())
}

fn convert_edge(raw: RawEdge) -> Edge {
    Edge::new(NodeId::from(raw.source), NodeId::from(raw.target), raw.weight)
}

fn convert_table(raw: RawSwitchingTable, base: &TimeBase) -> Result<SwitchingTable, Error> {
    let entries = raw
        .table_data
        .into_iter()
        .map(|(dst, hops)| (NodeId::from(dst), hops.into_vec()))
        .collect();
    Ok(SwitchingTable {
        owner: NodeId::from(raw.node),
        valid_from: base.resolve(&raw.valid_from)?,
        valid_until: base.resolve(&raw.valid_until)?,
        entries,
    })
}

fn convert_event(raw: RawEvent, base: &TimeBase) -> Result<TopologyEvent, Error> {
    Ok(TopologyEvent {
        at: base.resolve(&raw.timestamp)?,
        action: match raw.action {
            RawAction::LinkUp => LinkAction::Up,
            RawAction::LinkDown => LinkAction::Down,
        },
        a: NodeId::from(raw.from),
        b: NodeId::from(raw.to),
        weight_km: raw.weight,
    })
}

fn convert_traffic(raw: RawTraffic) -> Result<TrafficSpec, Error> {
    if raw.protocol != "UDP" {
        return Err(Error::UnsupportedProtocol(raw.protocol));
    }
    let rate = traffic::parse_rate(&raw.rate)?;
    let mut spec = TrafficSpec::new(
        NodeId::from(raw.src_node_id),
        NodeId::from(raw.dst_node_id),
        Nanosecs::from_secs_f64(raw.start_time),
        Nanosecs::from_secs_f64(raw.duration),
        Bytes::new(raw.packet_size),
        rate,
    );
    spec.src_port = raw.src_port;
    spec.dst_port = raw.dst_port;
    Ok(spec)
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("unknown file type: {0}")]
    UnknownFileType(PathBuf),

    #[error("JSON error")]
    Json(#[from] serde_json::Error),

    #[error("IO error")]
    Io(#[from] std::io::Error),

    #[error("invalid timestamp {value:?}")]
    Timestamp {
        value: String,
        source: chrono::ParseError,
    },

    #[error("timestamp {0:?} is out of range")]
    TimestampRange(String),

    #[error("node {node} has unknown kind {kind:?}")]
    UnknownNodeKind { node: String, kind: String },

    #[error("unsupported protocol {0:?}")]
    UnsupportedProtocol(String),

    #[error(transparent)]
    Rate(#[from] RateError),
}

#[cfg(test)]
mod tests {
    use super::*;

    const GRAPH: &str = r#"{
        "starttime": "2025-03-21T11:20:54",
        "endtime": "2025-03-21T11:21:54",
        "nodes": [
            {"id": "632430d9e1196", "type": "ground_station", "town": "Lisbon", "position": [38.7, -9.1]},
            {"id": "IRIDIUM 145", "type": "satellite", "orbit": 3},
            {"id": "632430d9e10d6", "type": "ground_station", "town": "Porto"}
        ],
        "edges": [
            {"source": "632430d9e1196", "target": "IRIDIUM 145", "weight": 1000.0},
            {"source": "IRIDIUM 145", "target": "632430d9e10d6", "weight": 1500.0}
        ]
    }"#;

    const TABLES: &str = r#"[
        {
            "node": "632430d9e1196",
            "valid_from": "2025-03-21T11:20:54",
            "valid_until": "2025-03-21T11:21:54",
            "table_data": {"632430d9e10d6": "IRIDIUM 145"}
        },
        {
            "node": "IRIDIUM 145",
            "valid_from": "2025-03-21T11:20:54.500",
            "valid_until": "2025-03-21T11:21:54",
            "table_data": {"632430d9e10d6": ["632430d9e10d6", "632430d9e1196"]}
        }
    ]"#;

    const TRAFFIC: &str = r#"[
        {
            "src_node_id": "632430d9e1196",
            "dst_node_id": "632430d9e10d6",
            "start_time": 1.0,
            "duration": 5.0,
            "packet_size": 1024,
            "rate": "1Mbps",
            "protocol": "UDP",
            "src_port": 49152,
            "dst_port": 9999
        }
    ]"#;

    #[test]
    fn timestamps_resolve_relative_to_start() -> anyhow::Result<()> {
        let base = TimeBase::new("2025-03-21T11:20:54")?;
        assert_eq!(base.resolve("2025-03-21T11:20:54")?, Nanosecs::ZERO);
        assert_eq!(
            base.resolve("2025-03-21T11:20:55.5")?,
            Nanosecs::from_millis(1500)
        );
        assert_eq!(
            base.resolve("2025-03-21T11:20:54.000001")?,
            Nanosecs::from_micros(1)
        );
        // An instant before the start clamps to zero.
        assert_eq!(base.resolve("2025-03-21T11:20:00")?, Nanosecs::ZERO);
        Ok(())
    }

    #[test]
    fn malformed_timestamp_is_an_error() {
        assert!(matches!(
            TimeBase::new("21/03/2025 11:20"),
            Err(Error::Timestamp { .. })
        ));
    }

    #[test]
    fn graph_round_trips_through_spec() -> anyhow::Result<()> {
        let graph: RawGraph = serde_json::from_str(GRAPH)?;
        let tables: Vec<RawSwitchingTable> = serde_json::from_str(TABLES)?;
        let traffic: Vec<RawTraffic> = serde_json::from_str(TRAFFIC)?;
        let spec = build_spec(
            graph,
            tables,
            Vec::new(),
            Vec::new(),
            Vec::new(),
            traffic,
            Config::default(),
        )?;
        assert_eq!(spec.nodes.len(), 3);
        assert_eq!(spec.edges.len(), 2);
        assert_eq!(spec.tables.len(), 2);
        // The second table starts half a second into the run.
        assert_eq!(spec.tables[1].valid_from, Nanosecs::from_millis(500));
        let ranked = spec.tables[1]
            .entries
            .get(&NodeId::from("632430d9e10d6"))
            .unwrap();
        assert_eq!(ranked.len(), 2);
        assert_eq!(spec.traffic.len(), 1);
        assert_eq!(spec.traffic[0].packet_size, Bytes::new(1024));
        Ok(())
    }

    #[test]
    fn single_next_hop_decodes_as_one_candidate() -> anyhow::Result<()> {
        let tables: Vec<RawSwitchingTable> = serde_json::from_str(TABLES)?;
        let base = TimeBase::new("2025-03-21T11:20:54")?;
        let table = convert_table(tables[0].clone(), &base)?;
        let hops = table.next_hops(&NodeId::from("632430d9e10d6")).unwrap();
        assert_eq!(hops, [NodeId::from("IRIDIUM 145")]);
        Ok(())
    }

    #[test]
    fn events_decode_actions() -> anyhow::Result<()> {
        let raw: Vec<RawEvent> = serde_json::from_str(
            r#"[
                {"timestamp": "2025-03-21T11:20:56", "action": "LINK_DOWN",
                 "from": "IRIDIUM 145", "to": "632430d9e10d6", "weight": 0.0},
                {"timestamp": "2025-03-21T11:20:58", "action": "LINK_UP",
                 "from": "IRIDIUM 145", "to": "632430d9e10d6", "weight": 1480.5}
            ]"#,
        )?;
        let base = TimeBase::new("2025-03-21T11:20:54")?;
        let events = raw
            .into_iter()
            .map(|event| convert_event(event, &base))
            .collect::<Result<Vec<_>, _>>()?;
        assert_eq!(events[0].action, LinkAction::Down);
        assert_eq!(events[0].at, Nanosecs::from_secs(2));
        assert_eq!(events[1].action, LinkAction::Up);
        assert_eq!(events[1].weight_km, 1480.5);
        Ok(())
    }

    #[test]
    fn non_udp_protocol_is_rejected() {
        let raw = RawTraffic {
            src_node_id: "a".into(),
            dst_node_id: "b".into(),
            start_time: 0.0,
            duration: 1.0,
            packet_size: 512,
            rate: "1Mbps".into(),
            protocol: "TCP".into(),
            src_port: 1,
            dst_port: 2,
        };
        assert!(matches!(
            convert_traffic(raw),
            Err(Error::UnsupportedProtocol(_))
        ));
    }

    #[test]
    fn bad_rate_unit_is_rejected() {
        let raw = RawTraffic {
            src_node_id: "a".into(),
            dst_node_id: "b".into(),
            start_time: 0.0,
            duration: 1.0,
            packet_size: 512,
            rate: "1MBps".into(),
            protocol: "UDP".into(),
            src_port: 1,
            dst_port: 2,
        };
        assert!(matches!(convert_traffic(raw), Err(Error::Rate(_))));
    }
}
