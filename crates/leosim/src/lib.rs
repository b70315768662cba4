//! `leosim` is a discrete-event simulator for LEO satellite constellations
//! carrying IP-like traffic between ground stations over inter-satellite
//! and feeder links. Given a pre-computed constellation description (nodes,
//! links, time-partitioned switching tables, scheduled topology events,
//! failure scenarios and a traffic workload), it runs the network forward
//! in virtual time, forwards each packet hop by hop under the switching
//! table in force, and reports per-flow delivery, latency, hop-count and
//! drop statistics.

#![warn(unreachable_pub, missing_docs)]

pub mod core;
pub mod frontend;
