//! Per-flow statistics and the end-of-run reports.

use std::io::{self, Write};
use std::net::Ipv4Addr;

use itertools::Itertools;
use rustc_hash::FxHashMap;

use crate::network::types::NodeId;
use crate::traffic::AppId;
use crate::units::Nanosecs;

/// Column layout of the per-flow CSV.
pub const FLOW_CSV_HEADER: &str = "AppId,Source IP,Source Node,Source Town,Destination IP,\
Destination Node,Destination Town,Packets Sent,Packets Received,Min Latency (ms),\
Max Latency (ms),Avg Latency (ms),Avg Hop Count,Dropped Packets,Dropped Locations,\
Backup Path Used,Loop Avoidance Triggered";

/// Column layout of the appended totals CSV.
pub const TOTALS_CSV_HEADER: &str =
    "Run,FailureScenario,TotalPacketsSent,TotalPacketsReceived,DeliveryRatio(%)";

/// The identity metrics are aggregated under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, derive_new::new)]
pub struct FlowKey {
    pub app: AppId,
    pub src: Ipv4Addr,
    pub dst: Ipv4Addr,
}

/// Report-only context for a flow, resolved at setup.
#[derive(Debug, Clone, derive_new::new)]
pub struct FlowMeta {
    pub src_node: NodeId,
    pub dst_node: NodeId,
    pub src_town: Option<String>,
    pub dst_town: Option<String>,
}

#[derive(Debug, Clone)]
pub struct FlowStats {
    pub sent: u64,
    pub received: u64,
    pub backup_path_used: u64,
    pub loop_avoidance_triggered: u64,
    pub dropped_by_node: FxHashMap<NodeId, u64>,
    min_latency: Nanosecs,
    max_latency: Nanosecs,
    total_latency: Nanosecs,
    min_hops: u16,
    max_hops: u16,
    total_hops: u64,
}

impl Default for FlowStats {
    fn default() -> Self {
        Self {
            sent: 0,
            received: 0,
            backup_path_used: 0,
            loop_avoidance_triggered: 0,
            dropped_by_node: FxHashMap::default(),
            min_latency: Nanosecs::MAX,
            max_latency: Nanosecs::ZERO,
            total_latency: Nanosecs::ZERO,
            min_hops: u16::MAX,
            max_hops: 0,
            total_hops: 0,
        }
    }
}

impl FlowStats {
    fn record_received(&mut self, latency: Nanosecs, hops: u16) {
        self.received += 1;
        self.min_latency = self.min_latency.min(latency);
        self.max_latency = self.max_latency.max(latency);
        self.total_latency += latency;
        self.min_hops = self.min_hops.min(hops);
        self.max_hops = self.max_hops.max(hops);
        self.total_hops += u64::from(hops);
    }

    fn record_drop(&mut self, node: &NodeId) {
        *self.dropped_by_node.entry(node.clone()).or_default() += 1;
    }

    pub fn dropped_total(&self) -> u64 {
        self.dropped_by_node.values().sum()
    }

    /// Minimum delivery latency in milliseconds; `-1` before any delivery.
    pub fn min_latency_ms(&self) -> f64 {
        if self.received == 0 {
            return -1.0;
        }
        self.min_latency.into_millis_f64()
    }

    /// Maximum delivery latency in milliseconds; `-1` before any delivery.
    pub fn max_latency_ms(&self) -> f64 {
        if self.received == 0 {
            return -1.0;
        }
        self.max_latency.into_millis_f64()
    }

    /// Mean delivery latency in milliseconds; `-1` before any delivery.
    pub fn avg_latency_ms(&self) -> f64 {
        if self.received == 0 {
            return -1.0;
        }
        self.total_latency.into_millis_f64() / self.received as f64
    }

    /// Mean hop count over delivered packets; `-1` before any delivery.
    pub fn avg_hops(&self) -> f64 {
        if self.received == 0 {
            return -1.0;
        }
        self.total_hops as f64 / self.received as f64
    }

    pub fn min_hops(&self) -> Option<u16> {
        (self.received > 0).then_some(self.min_hops)
    }

    pub fn max_hops(&self) -> Option<u16> {
        (self.received > 0).then_some(self.max_hops)
    }

    /// The `{node:count,...}` rendering of per-node drops, sorted by node.
    pub fn dropped_locations(&self) -> String {
        let inner = self
            .dropped_by_node
            .iter()
            .sorted_by_key(|&(node, _)| node)
            .map(|(node, count)| format!("{node}:{count}"))
            .join(",");
        format!("{{{inner}}}")
    }
}

#[derive(Debug, Clone)]
pub struct FlowRecord {
    pub meta: FlowMeta,
    pub stats: FlowStats,
}

/// Global counters over all flows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Totals {
    pub sent: u64,
    pub received: u64,
}

impl Totals {
    pub fn delivery_ratio_percent(&self) -> f64 {
        if self.sent == 0 {
            return 0.0;
        }
        self.received as f64 / self.sent as f64 * 100.0
    }
}

/// Accumulates [`FlowStats`] keyed by flow identity and renders the end-of-
/// run reports. Flows are registered at setup; accounting calls for an
/// unregistered flow are logged and dropped.
#[derive(Debug, Default)]
pub struct MetricsCollector {
    flows: FxHashMap<FlowKey, FlowRecord>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_flow(&mut self, key: FlowKey, meta: FlowMeta) {
        self.flows.entry(key).or_insert_with(|| FlowRecord {
            meta,
            stats: FlowStats::default(),
        });
    }

    pub fn get(&self, key: &FlowKey) -> Option<&FlowStats> {
        self.flows.get(key).map(|rec| &rec.stats)
    }

    fn stats_mut(&mut self, key: &FlowKey) -> Option<&mut FlowStats> {
        let rec = self.flows.get_mut(key);
        if rec.is_none() {
            tracing::debug!(app = %key.app, "metrics update for unregistered flow");
        }
        rec.map(|rec| &mut rec.stats)
    }

    pub(crate) fn record_sent(&mut self, key: &FlowKey) {
        if let Some(stats) = self.stats_mut(key) {
            stats.sent += 1;
        }
    }

    pub(crate) fn record_received(&mut self, key: &FlowKey, latency: Nanosecs, hops: u16) {
        if let Some(stats) = self.stats_mut(key) {
            stats.record_received(latency, hops);
        }
    }

    pub(crate) fn record_drop(&mut self, key: &FlowKey, node: &NodeId) {
        if let Some(stats) = self.stats_mut(key) {
            stats.record_drop(node);
        }
    }

    pub(crate) fn record_backup_used(&mut self, key: &FlowKey) {
        if let Some(stats) = self.stats_mut(key) {
            stats.backup_path_used += 1;
        }
    }

    pub(crate) fn record_loop_avoided(&mut self, key: &FlowKey) {
        if let Some(stats) = self.stats_mut(key) {
            stats.loop_avoidance_triggered += 1;
        }
    }

    /// Flows in deterministic (app id, addresses) order.
    pub fn flows(&self) -> impl Iterator<Item = (&FlowKey, &FlowRecord)> {
        self.flows.iter().sorted_by_key(|&(key, _)| *key)
    }

    pub fn totals(&self) -> Totals {
        self.flows.values().fold(Totals::default(), |acc, rec| Totals {
            sent: acc.sent + rec.stats.sent,
            received: acc.received + rec.stats.received,
        })
    }

    /// The plain-text run summary: one line per flow, a recap of lossy
    /// flows, then the global totals.
    pub fn write_summary(&self, w: &mut dyn Write) -> io::Result<()> {
        writeln!(w, "Traffic Summary:")?;
        for (key, rec) in self.flows() {
            writeln!(w, "{}", summary_line(key, rec))?;
        }
        writeln!(w, "Traffic where packets got lost:")?;
        for (key, rec) in self
            .flows()
            .filter(|(_, rec)| rec.stats.sent > rec.stats.received)
        {
            writeln!(w, "{}", summary_line(key, rec))?;
        }
        let totals = self.totals();
        writeln!(w, "Total Packets Sent: {}", totals.sent)?;
        writeln!(w, "Total Packets Received: {}", totals.received)?;
        writeln!(w, "Ratio: {:.1}%", totals.delivery_ratio_percent())
    }

    /// The per-flow CSV, header included.
    pub fn write_flow_csv(&self, w: &mut dyn Write) -> io::Result<()> {
        writeln!(w, "{FLOW_CSV_HEADER}")?;
        for (key, rec) in self.flows() {
            let FlowRecord { meta, stats } = rec;
            writeln!(
                w,
                "{},{},{},{},{},{},{},{},{},{:.3},{:.3},{:.3},{:.2},{},\"{}\",{},{}",
                key.app,
                key.src,
                meta.src_node,
                meta.src_town.as_deref().unwrap_or(""),
                key.dst,
                meta.dst_node,
                meta.dst_town.as_deref().unwrap_or(""),
                stats.sent,
                stats.received,
                stats.min_latency_ms(),
                stats.max_latency_ms(),
                stats.avg_latency_ms(),
                stats.avg_hops(),
                stats.dropped_total(),
                stats.dropped_locations(),
                stats.backup_path_used,
                stats.loop_avoidance_triggered,
            )?;
        }
        Ok(())
    }

    /// One appended row of the cross-run totals CSV.
    pub fn write_totals_row(&self, w: &mut dyn Write, run: u32, scenario: &str) -> io::Result<()> {
        let totals = self.totals();
        writeln!(
            w,
            "{},{},{},{},{:.1}",
            run,
            scenario,
            totals.sent,
            totals.received,
            totals.delivery_ratio_percent()
        )
    }
}

fn summary_line(key: &FlowKey, rec: &FlowRecord) -> String {
    let stats = &rec.stats;
    let mut line = format!(
        "AppId: {}, From: {} To: {}, Sent: {}, Received: {}",
        key.app, key.src, key.dst, stats.sent, stats.received
    );
    if stats.received > 0 {
        line.push_str(&format!(
            ", Min Latency: {:.3}ms, Max Latency: {:.3}ms, Avg Latency: {:.3}ms, Avg Hop Count: {:.2}",
            stats.min_latency_ms(),
            stats.max_latency_ms(),
            stats.avg_latency_ms(),
            stats.avg_hops(),
        ));
    }
    for (node, count) in stats.dropped_by_node.iter().sorted_by_key(|&(node, _)| node) {
        line.push_str(&format!(", Dropped {count} packets on node {node}"));
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> FlowKey {
        FlowKey::new(
            AppId::ZERO,
            Ipv4Addr::new(10, 0, 0, 1),
            Ipv4Addr::new(10, 0, 1, 2),
        )
    }

    fn meta() -> FlowMeta {
        FlowMeta::new(
            NodeId::from("gs-a"),
            NodeId::from("gs-b"),
            Some("Lisbon".into()),
            Some("Porto".into()),
        )
    }

    #[test]
    fn latency_sentinels_before_any_delivery() {
        let stats = FlowStats::default();
        assert_eq!(stats.min_latency_ms(), -1.0);
        assert_eq!(stats.max_latency_ms(), -1.0);
        assert_eq!(stats.avg_latency_ms(), -1.0);
        assert_eq!(stats.avg_hops(), -1.0);
    }

    #[test]
    fn latency_extrema_and_mean() {
        let mut collector = MetricsCollector::new();
        collector.register_flow(key(), meta());
        collector.record_received(&key(), Nanosecs::from_millis(4), 2);
        collector.record_received(&key(), Nanosecs::from_millis(8), 3);
        let stats = collector.get(&key()).unwrap();
        assert_eq!(stats.min_latency_ms(), 4.0);
        assert_eq!(stats.max_latency_ms(), 8.0);
        assert_eq!(stats.avg_latency_ms(), 6.0);
        assert_eq!(stats.avg_hops(), 2.5);
        assert_eq!(stats.min_hops(), Some(2));
        assert_eq!(stats.max_hops(), Some(3));
    }

    #[test]
    fn dropped_locations_renders_sorted() {
        let mut stats = FlowStats::default();
        stats.record_drop(&NodeId::from("sat-2"));
        stats.record_drop(&NodeId::from("sat-1"));
        stats.record_drop(&NodeId::from("sat-2"));
        assert_eq!(stats.dropped_locations(), "{sat-1:1,sat-2:2}");
        assert_eq!(stats.dropped_total(), 3);
    }

    #[test]
    fn unregistered_flow_updates_are_ignored() {
        let mut collector = MetricsCollector::new();
        collector.record_sent(&key());
        assert!(collector.get(&key()).is_none());
    }

    #[test]
    fn totals_and_ratio() {
        let mut collector = MetricsCollector::new();
        collector.register_flow(key(), meta());
        for _ in 0..4 {
            collector.record_sent(&key());
        }
        collector.record_received(&key(), Nanosecs::from_millis(1), 1);
        collector.record_received(&key(), Nanosecs::from_millis(1), 1);
        collector.record_received(&key(), Nanosecs::from_millis(1), 1);
        let totals = collector.totals();
        assert_eq!((totals.sent, totals.received), (4, 3));
        assert_eq!(totals.delivery_ratio_percent(), 75.0);
    }

    #[test]
    fn flow_csv_shape() {
        let mut collector = MetricsCollector::new();
        collector.register_flow(key(), meta());
        collector.record_sent(&key());
        let mut out = Vec::new();
        collector.write_flow_csv(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        let mut lines = text.lines();
        assert_eq!(lines.next(), Some(FLOW_CSV_HEADER));
        let row = lines.next().unwrap();
        assert_eq!(row.split(',').count(), FLOW_CSV_HEADER.split(',').count());
        assert!(row.starts_with("0,10.0.0.1,gs-a,Lisbon,10.0.1.2,gs-b,Porto,1,0,-1.000,"));
    }
}
