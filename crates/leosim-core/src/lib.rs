#![warn(unreachable_pub, missing_debug_implementations)]

//! The core of the LEO constellation simulator. This crate runs a
//! pre-computed constellation description forward in virtual time: a
//! discrete-event [scheduler], the [network] state whose links rise and
//! fall on schedule, per-node time-partitioned [routing] tables, the
//! packet-forwarding [engine], constant-rate [traffic] sources, and the
//! per-flow [metrics] a run produces. The usual entry point is
//! [`run`], which turns a [`Spec`] into a [`metrics::MetricsCollector`].

#[macro_use]
mod ident;

pub mod constants;
pub mod engine;
pub mod metrics;
pub mod network;
pub mod packet;
pub mod routing;
pub mod scheduler;
pub mod sim;
pub mod spec;
pub mod traffic;
pub mod units;

pub mod testing;

pub use sim::{run, Config, Error, Simulation};
pub use spec::Spec;
