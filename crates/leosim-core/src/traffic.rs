//! Constant-rate traffic sources and the rate grammar of the workload
//! inputs.

use std::net::Ipv4Addr;

use crate::network::types::NodeId;
use crate::units::{BitsPerSec, Bytes, Nanosecs};

identifier!(AppId, u32);

/// Transport named by the workload entry. Sources emit UDP-style datagrams;
/// anything else is rejected at setup.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum Protocol {
    #[default]
    #[serde(rename = "UDP")]
    Udp,
}

/// One workload entry: a constant-bit-rate flow between two nodes.
#[derive(Debug, Clone, derive_new::new, serde::Serialize, serde::Deserialize)]
pub struct TrafficSpec {
    pub src: NodeId,
    pub dst: NodeId,
    pub start: Nanosecs,
    pub duration: Nanosecs,
    pub packet_size: Bytes,
    pub rate: BitsPerSec,
    #[new(default)]
    #[serde(default)]
    pub protocol: Protocol,
    #[new(value = "49152")]
    #[serde(default = "default_src_port")]
    pub src_port: u16,
    #[new(value = "9999")]
    #[serde(default = "default_dst_port")]
    pub dst_port: u16,
}

fn default_src_port() -> u16 {
    49152
}

fn default_dst_port() -> u16 {
    9999
}

/// Parses a rate like `750kbps`, `1.5Mbps` or `2Gbps`. Units are SI
/// (base-10); an unknown unit or a malformed value is a fatal configuration
/// error.
pub fn parse_rate(s: &str) -> Result<BitsPerSec, RateError> {
    let split = s
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .ok_or_else(|| RateError::MissingUnit(s.to_owned()))?;
    let (value, unit) = s.split_at(split);
    let value: f64 = value
        .parse()
        .map_err(|_| RateError::InvalidValue(s.to_owned()))?;
    let multiplier = match unit {
        "bps" => 1.0,
        "kbps" => 1e3,
        "Mbps" => 1e6,
        "Gbps" => 1e9,
        _ => return Err(RateError::InvalidUnit(unit.to_owned())),
    };
    Ok(BitsPerSec::new((value * multiplier).round() as u64))
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RateError {
    /// A bare number with no unit.
    #[error("rate {0:?} is missing a unit")]
    MissingUnit(String),

    /// The numeric part failed to parse.
    #[error("invalid rate value in {0:?}")]
    InvalidValue(String),

    /// A unit other than bps/kbps/Mbps/Gbps.
    #[error("invalid rate unit {0:?}")]
    InvalidUnit(String),
}

/// The run-time emission state of one traffic source. The emission interval
/// is the serialization time of one packet at the configured rate; the
/// source stops after the last whole interval inside its duration, so a
/// trailing partial packet is never sent.
#[derive(Debug, Clone)]
pub(crate) struct Source {
    pub(crate) app: AppId,
    pub(crate) node: NodeId,
    pub(crate) src_addr: Ipv4Addr,
    pub(crate) dst_addr: Ipv4Addr,
    pub(crate) packet_size: Bytes,
    pub(crate) interval: Nanosecs,
    pub(crate) last_emission: Nanosecs,
    pub(crate) next_number: u64,
}

impl Source {
    pub(crate) fn new(
        app: AppId,
        spec: &TrafficSpec,
        src_addr: Ipv4Addr,
        dst_addr: Ipv4Addr,
    ) -> Self {
        let interval = spec.rate.length(spec.packet_size);
        Self {
            app,
            node: spec.src.clone(),
            src_addr,
            dst_addr,
            packet_size: spec.packet_size,
            interval,
            last_emission: spec.start + spec.duration,
            next_number: 0,
        }
    }
}
