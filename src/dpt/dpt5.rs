//! DPT 5.xxx - 8-bit Unsigned Value (1 byte)
//!
//! Values 0-255 with per-subtype scaling. The scaled subtypes (5.001
//! percentage, 5.003 angle) round in both directions so that every value
//! of the user range survives an encode/decode round-trip.

use crate::error::{KnxError, Result};

/// DPT 5.xxx 8-bit unsigned types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dpt5 {
    /// DPT 5.001 - Percentage (0-100 %), scaled to 0-255
    Percentage,
    /// DPT 5.003 - Angle (0-360 deg), scaled to 0-255
    Angle,
    /// DPT 5.004 - Percentage (0-255)
    PercentU8,
    /// DPT 5.006 - Tariff (0-254)
    Tariff,
    /// DPT 5.010 - Counter pulses (0-255)
    Counter,
}

impl Dpt5 {
    /// Resolve a subtype number.
    pub const fn from_sub(sub: u16) -> Option<Self> {
        match sub {
            1 => Some(Self::Percentage),
            3 => Some(Self::Angle),
            4 => Some(Self::PercentU8),
            6 => Some(Self::Tariff),
            10 => Some(Self::Counter),
            _ => None,
        }
    }

    /// DPT identifier string (e.g. "5.001").
    pub const fn identifier(&self) -> &'static str {
        match self {
            Self::Percentage => "5.001",
            Self::Angle => "5.003",
            Self::PercentU8 => "5.004",
            Self::Tariff => "5.006",
            Self::Counter => "5.010",
        }
    }

    /// Unit string for display.
    pub const fn unit(&self) -> &'static str {
        match self {
            Self::Percentage => "%",
            Self::Angle => "deg",
            Self::PercentU8 | Self::Tariff => "",
            Self::Counter => "pulses",
        }
    }

    /// Upper bound of the user-facing range.
    pub const fn max(&self) -> u32 {
        match self {
            Self::Percentage => 100,
            Self::Angle => 360,
            Self::PercentU8 | Self::Counter => 255,
            Self::Tariff => 254,
        }
    }

    /// Whether a value is inside the subtype range.
    pub fn in_range(&self, value: u32) -> bool {
        value <= self.max()
    }

    /// Encode to the raw payload byte, applying subtype scaling.
    ///
    /// # Errors
    ///
    /// Returns `DptErrorKind::ValueOutOfRange` for values beyond the
    /// subtype range.
    pub fn encode(&self, value: u32) -> Result<u8> {
        if !self.in_range(value) {
            return Err(KnxError::dpt_value_out_of_range());
        }
        let raw = match self {
            // Round-to-nearest keeps integer percents exact through a round-trip
            Self::Percentage => (value * 255 + 50) / 100,
            Self::Angle => (value * 255 + 180) / 360,
            Self::PercentU8 | Self::Tariff | Self::Counter => value,
        };
        Ok(raw as u8)
    }

    /// Decode the raw payload byte, applying the inverse scaling.
    ///
    /// # Errors
    ///
    /// Returns `DptErrorKind::BadPayload` on an empty payload.
    pub fn decode(&self, data: &[u8]) -> Result<u32> {
        let raw = *data.first().ok_or_else(KnxError::dpt_bad_payload)?;
        let value = match self {
            Self::Percentage => (u32::from(raw) * 100 + 127) / 255,
            Self::Angle => (u32::from(raw) * 360 + 127) / 255,
            Self::PercentU8 | Self::Tariff | Self::Counter => u32::from(raw),
        };
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percentage_scaling() {
        assert_eq!(Dpt5::Percentage.encode(0).unwrap(), 0);
        assert_eq!(Dpt5::Percentage.encode(100).unwrap(), 255);
        assert_eq!(Dpt5::Percentage.encode(50).unwrap(), 128);
    }

    #[test]
    fn test_percentage_round_trip_exact() {
        for v in 0..=100u32 {
            let raw = Dpt5::Percentage.encode(v).unwrap();
            assert_eq!(Dpt5::Percentage.decode(&[raw]).unwrap(), v, "percent {v}");
        }
    }

    #[test]
    fn test_angle_round_trip() {
        for v in [0u32, 90, 180, 270, 360] {
            let raw = Dpt5::Angle.encode(v).unwrap();
            let back = Dpt5::Angle.decode(&[raw]).unwrap();
            assert!(back.abs_diff(v) <= 1, "angle {v} -> {back}");
        }
    }

    #[test]
    fn test_unscaled_round_trip() {
        for v in 0..=255u32 {
            let raw = Dpt5::Counter.encode(v).unwrap();
            assert_eq!(Dpt5::Counter.decode(&[raw]).unwrap(), v);
        }
    }

    #[test]
    fn test_out_of_range() {
        assert!(Dpt5::Percentage.encode(101).is_err());
        assert!(Dpt5::Angle.encode(361).is_err());
        assert!(Dpt5::Tariff.encode(255).is_err());
    }

    #[test]
    fn test_decode_empty() {
        assert!(Dpt5::Percentage.decode(&[]).is_err());
    }
}
