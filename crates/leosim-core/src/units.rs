macro_rules! unit {
    ($name: ident) => {
        #[derive(
            Debug,
            Default,
            Copy,
            Clone,
            PartialOrd,
            Ord,
            PartialEq,
            Eq,
            Hash,
            derive_more::Add,
            derive_more::Sub,
            derive_more::AddAssign,
            derive_more::SubAssign,
            derive_more::Sum,
            derive_more::FromStr,
            serde::Serialize,
            serde::Deserialize,
        )]
        pub struct $name(u64);

        impl $name {
            pub const ZERO: $name = Self::new(0);
            pub const ONE: $name = Self::new(1);
            pub const MAX: $name = Self::new(u64::MAX);

            pub const fn new(value: u64) -> Self {
                Self(value)
            }

            pub const fn into_u64(self) -> u64 {
                self.0
            }

            pub fn into_f64(self) -> f64 {
                self.0 as f64
            }
        }
    };
}

unit!(Nanosecs);

impl Nanosecs {
    pub const fn from_micros(micros: u64) -> Self {
        Self::new(micros * 1_000)
    }

    pub const fn from_millis(millis: u64) -> Self {
        Self::new(millis * 1_000_000)
    }

    pub const fn from_secs(secs: u64) -> Self {
        Self::new(secs * 1_000_000_000)
    }

    /// Converts a duration in seconds, rounding to the nearest nanosecond.
    /// Negative durations clamp to zero.
    pub fn from_secs_f64(secs: f64) -> Self {
        Self::new((secs * 1e9).round().max(0.0) as u64)
    }

    pub fn into_millis_f64(self) -> f64 {
        self.0 as f64 / 1e6
    }
}

impl std::fmt::Display for Nanosecs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}ns", self.0)
    }
}

unit!(Bytes);

impl Bytes {
    pub const fn into_bits(self) -> u64 {
        self.0 * 8
    }
}

impl std::fmt::Display for Bytes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}B", self.0)
    }
}

unit!(BitsPerSec);

impl BitsPerSec {
    pub const fn from_mbps(mbps: u64) -> Self {
        Self::new(mbps * 1_000_000)
    }

    /// The time it takes to serialize `size` onto a channel of this rate,
    /// truncated to whole nanoseconds. A zero rate never completes; setup
    /// validation rejects it before any packet is transmitted.
    pub fn length(self, size: Bytes) -> Nanosecs {
        assert!(self.0 > 0, "zero data rate");
        let nanos = (size.into_bits() as u128 * 1_000_000_000) / self.0 as u128;
        Nanosecs::new(nanos.min(u64::MAX as u128) as u64)
    }
}

impl std::fmt::Display for BitsPerSec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}bps", self.0)
    }
}
