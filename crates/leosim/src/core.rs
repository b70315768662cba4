//! Core simulator data structures and routines. The most common entry
//! point is [`run()`](crate::core::run), which turns a [specification](Spec)
//! into a collection of [per-flow statistics](metrics::MetricsCollector).

pub use leosim_core::*;
