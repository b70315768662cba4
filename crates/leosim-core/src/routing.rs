//! Time-partitioned switching tables and their per-node store.

use rustc_hash::FxHashMap;

use crate::network::types::NodeId;
use crate::units::Nanosecs;

/// A forwarding table for one node, valid over `[valid_from, valid_until]`.
/// Entries map a destination node to its candidate next hops in preference
/// order: primary first, then backups.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct SwitchingTable {
    pub owner: NodeId,
    pub valid_from: Nanosecs,
    pub valid_until: Nanosecs,
    pub entries: FxHashMap<NodeId, Vec<NodeId>>,
}

impl SwitchingTable {
    pub fn covers(&self, t: Nanosecs) -> bool {
        self.valid_from <= t && t <= self.valid_until
    }

    pub fn next_hops(&self, dest: &NodeId) -> Option<&[NodeId]> {
        self.entries.get(dest).map(Vec::as_slice)
    }
}

/// Per-owner switching tables, sorted by `valid_from`. Lookups remember the
/// last table used per owner, so the steady state is a single interval
/// check; a roll-over scans forward, and out-of-order queries fall back to
/// binary search.
#[derive(Debug, Clone, Default)]
pub struct TableStore {
    per_owner: FxHashMap<NodeId, NodeTables>,
}

#[derive(Debug, Clone, Default)]
struct NodeTables {
    tables: Vec<SwitchingTable>,
    cursor: usize,
}

impl TableStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a table, keeping the owner's list sorted by `valid_from`. A
    /// table with the same `(owner, valid_from)` replaces the earlier one:
    /// latest inserted wins.
    pub fn insert(&mut self, table: SwitchingTable) {
        let node = self.per_owner.entry(table.owner.clone()).or_default();
        match node
            .tables
            .binary_search_by_key(&table.valid_from, |t| t.valid_from)
        {
            Ok(i) => node.tables[i] = table,
            Err(i) => node.tables.insert(i, table),
        }
    }

    /// The table governing `owner` at instant `t`, if any.
    pub fn current_for(&mut self, owner: &NodeId, t: Nanosecs) -> Option<&SwitchingTable> {
        let node = self.per_owner.get_mut(owner)?;
        if node.tables.get(node.cursor).is_some_and(|tb| tb.covers(t)) {
            return Some(&node.tables[node.cursor]);
        }
        // Typical roll-over: the next table in line took effect.
        if let Some(next) = node.tables.get(node.cursor + 1) {
            if next.covers(t) {
                node.cursor += 1;
                return Some(&node.tables[node.cursor]);
            }
        }
        let i = node
            .tables
            .partition_point(|tb| tb.valid_from <= t)
            .checked_sub(1)?;
        if node.tables[i].covers(t) {
            node.cursor = i;
            return Some(&node.tables[i]);
        }
        None
    }

    /// Checks every owner's intervals are well-formed and pairwise disjoint
    /// (abutting boundaries are allowed).
    pub fn validate(&self) -> Result<(), RoutingError> {
        for (owner, node) in &self.per_owner {
            for tb in &node.tables {
                if tb.valid_from > tb.valid_until {
                    return Err(RoutingError::InvertedInterval {
                        owner: owner.clone(),
                        from: tb.valid_from,
                        until: tb.valid_until,
                    });
                }
            }
            for pair in node.tables.windows(2) {
                if pair[1].valid_from < pair[0].valid_until {
                    return Err(RoutingError::OverlappingTables {
                        owner: owner.clone(),
                        at: pair[1].valid_from,
                    });
                }
            }
        }
        Ok(())
    }

    pub fn nr_owners(&self) -> usize {
        self.per_owner.len()
    }

    pub fn nr_tables(&self, owner: &NodeId) -> usize {
        self.per_owner.get(owner).map_or(0, |n| n.tables.len())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RoutingError {
    /// A table whose interval ends before it starts.
    #[error("table for {owner} runs from {from} until {until}")]
    InvertedInterval {
        owner: NodeId,
        from: Nanosecs,
        until: Nanosecs,
    },

    /// Two tables for the same owner share more than a boundary instant.
    #[error("tables for {owner} overlap at {at}")]
    OverlappingTables { owner: NodeId, at: Nanosecs },
}
