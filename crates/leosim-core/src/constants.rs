//! Simulation constants. These are set to match the constellation generator's
//! conventions: link weights are kilometers, and the two link classes carry
//! their own default data rates.

use crate::units::{BitsPerSec, Nanosecs};

/// Speed of light in vacuum, in km/s.
pub const SPEED_OF_LIGHT_KM_PER_S: f64 = 299_792.4580;

/// Default data rate for inter-satellite links.
pub const DEFAULT_ISL_RATE: BitsPerSec = BitsPerSec::from_mbps(1_000);

/// Default data rate for feeder (satellite to ground station) links.
pub const DEFAULT_FEEDER_RATE: BitsPerSec = BitsPerSec::from_mbps(500);

/// Propagation delay over a link of the given length, rounded to the
/// nearest nanosecond.
pub fn propagation_delay(weight_km: f64) -> Nanosecs {
    Nanosecs::from_secs_f64(weight_km / SPEED_OF_LIGHT_KM_PER_S)
}
