//! JSON input decoding for the constellation generator's file corpus.

pub use leosim_frontend::*;
