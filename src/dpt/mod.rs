//! KNX Datapoint Types (DPT).
//!
//! DPTs define how a datapoint value is carried in a group telegram.
//! Each family module implements the codec for one main type; the
//! [`DptXlator`] factory dispatches on the main number of a [`DptId`]
//! (the prefix before the dot), the way an ETS tool resolves `9.001`.
//!
//! ## Supported families
//!
//! - **DPT 1.xxx** - Boolean (1 bit): switches, doors, binary sensors
//! - **DPT 5.xxx** - 8-bit unsigned: percentages, angles, counters
//! - **DPT 7.xxx** - 16-bit unsigned: pulses, time periods, brightness
//! - **DPT 9.xxx** - 2-byte KNX float: temperature, illuminance, pressure
//! - **DPT 13.xxx** - 32-bit signed: energy, flow rate, long counters
//! - **DPT 14.xxx** - 4-byte IEEE-754 float: physical quantities

use core::fmt;

use crate::error::{KnxError, Result};

pub mod dpt1;
pub mod dpt5;
pub mod dpt7;
pub mod dpt9;
pub mod dpt13;
pub mod dpt14;

#[doc(inline)]
pub use dpt1::Dpt1;
#[doc(inline)]
pub use dpt5::Dpt5;
#[doc(inline)]
pub use dpt7::Dpt7;
#[doc(inline)]
pub use dpt9::Dpt9;
#[doc(inline)]
pub use dpt13::Dpt13;
#[doc(inline)]
pub use dpt14::Dpt14;

/// Maximum group payload octets carried in a standard frame APDU.
pub const MAX_PAYLOAD: usize = 14;

/// A dynamically typed datapoint value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    /// 1-bit value (DPT 1.xxx).
    Bool(bool),
    /// Unsigned integer value (DPT 5.xxx, 7.xxx).
    Unsigned(u32),
    /// Signed integer value (DPT 13.xxx).
    Signed(i32),
    /// Floating point value (DPT 9.xxx, 14.xxx).
    Float(f32),
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(b) => write!(f, "{b}"),
            Value::Unsigned(u) => write!(f, "{u}"),
            Value::Signed(i) => write!(f, "{i}"),
            Value::Float(x) => write!(f, "{x}"),
        }
    }
}

/// A DPT identifier, `main.sub` (e.g. `9.001`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DptId {
    /// Main type; selects the codec family.
    pub main: u16,
    /// Subtype; selects range and semantics within the family.
    pub sub: u16,
}

impl DptId {
    /// Create an identifier from its two components.
    pub const fn new(main: u16, sub: u16) -> Self {
        Self { main, sub }
    }
}

impl fmt::Display for DptId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:03}", self.main, self.sub)
    }
}

impl core::str::FromStr for DptId {
    type Err = KnxError;

    fn from_str(s: &str) -> Result<Self> {
        let (main, sub) = s.split_once('.').ok_or_else(|| KnxError::unknown_dpt(s))?;
        let main = main.parse::<u16>().map_err(|_| KnxError::unknown_dpt(s))?;
        let sub = sub.parse::<u16>().map_err(|_| KnxError::unknown_dpt(s))?;
        Ok(Self { main, sub })
    }
}

/// Encoded group payload, as carried in the APDU.
///
/// Values up to 6 bits wide ride in the low bits of the APCI octet;
/// wider values follow the APCI octet as plain octets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroupData {
    /// Payload packed into the APCI octet (6 bits max).
    Small(u8),
    /// Payload appended after the APCI octet.
    Bytes(heapless::Vec<u8, MAX_PAYLOAD>),
}

impl GroupData {
    /// Build an appended payload from a slice.
    ///
    /// # Errors
    ///
    /// Returns `FrameErrorKind::BufferTooSmall` if the slice exceeds
    /// [`MAX_PAYLOAD`].
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        heapless::Vec::from_slice(bytes)
            .map(Self::Bytes)
            .map_err(|_| KnxError::buffer_too_small())
    }
}

/// A DPT codec resolved from a [`DptId`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DptXlator {
    /// DPT 1.xxx
    Bool(Dpt1),
    /// DPT 5.xxx
    Unsigned8(Dpt5),
    /// DPT 7.xxx
    Unsigned16(Dpt7),
    /// DPT 9.xxx
    Float16(Dpt9),
    /// DPT 13.xxx
    Signed32(Dpt13),
    /// DPT 14.xxx
    Float32(Dpt14),
}

impl DptXlator {
    /// Look up the codec for an identifier.
    ///
    /// # Errors
    ///
    /// Returns `ConfigErrorKind::UnknownDpt` for unsupported main types
    /// or subtypes.
    pub fn for_id(id: DptId) -> Result<Self> {
        let xlator = match id.main {
            1 => Dpt1::from_sub(id.sub).map(Self::Bool),
            5 => Dpt5::from_sub(id.sub).map(Self::Unsigned8),
            7 => Dpt7::from_sub(id.sub).map(Self::Unsigned16),
            9 => Dpt9::from_sub(id.sub).map(Self::Float16),
            13 => Dpt13::from_sub(id.sub).map(Self::Signed32),
            14 => Dpt14::from_sub(id.sub).map(Self::Float32),
            _ => None,
        };
        xlator.ok_or_else(|| KnxError::unknown_dpt(id.to_string()))
    }

    /// The identifier string of the resolved subtype.
    pub const fn identifier(&self) -> &'static str {
        match self {
            Self::Bool(d) => d.identifier(),
            Self::Unsigned8(d) => d.identifier(),
            Self::Unsigned16(d) => d.identifier(),
            Self::Float16(d) => d.identifier(),
            Self::Signed32(d) => d.identifier(),
            Self::Float32(d) => d.identifier(),
        }
    }

    /// Payload width in bits; widths up to 6 pack into the APCI octet.
    pub const fn width_bits(&self) -> usize {
        match self {
            Self::Bool(_) => 1,
            Self::Unsigned8(_) => 8,
            Self::Unsigned16(_) | Self::Float16(_) => 16,
            Self::Signed32(_) | Self::Float32(_) => 32,
        }
    }

    /// Whether a value has the right variant and is inside the subtype range.
    pub fn validate(&self, value: &Value) -> bool {
        match (self, value) {
            (Self::Bool(_), Value::Bool(_)) => true,
            (Self::Unsigned8(d), Value::Unsigned(u)) => d.in_range(*u),
            (Self::Unsigned16(_), Value::Unsigned(u)) => *u <= u32::from(u16::MAX),
            (Self::Float16(d), Value::Float(x)) => d.in_range(*x),
            (Self::Signed32(_), Value::Signed(_)) => true,
            (Self::Float32(_), Value::Float(x)) => x.is_finite(),
            _ => false,
        }
    }

    /// Encode a value to its group payload form.
    ///
    /// # Errors
    ///
    /// `DptErrorKind::WrongKind` for a mismatched value variant,
    /// `DptErrorKind::ValueOutOfRange` for a value outside the subtype range.
    pub fn encode(&self, value: &Value) -> Result<GroupData> {
        match (self, value) {
            (Self::Bool(d), Value::Bool(b)) => Ok(GroupData::Small(d.encode(*b))),
            (Self::Unsigned8(d), Value::Unsigned(u)) => {
                GroupData::from_slice(&[d.encode(*u)?])
            }
            (Self::Unsigned16(d), Value::Unsigned(u)) => {
                GroupData::from_slice(&d.encode(*u)?)
            }
            (Self::Float16(d), Value::Float(x)) => GroupData::from_slice(&d.encode(*x)?),
            (Self::Signed32(d), Value::Signed(i)) => GroupData::from_slice(&d.encode(*i)),
            (Self::Float32(d), Value::Float(x)) => GroupData::from_slice(&d.encode(*x)?),
            _ => Err(KnxError::dpt_wrong_kind()),
        }
    }

    /// Decode a group payload to a value.
    ///
    /// # Errors
    ///
    /// `DptErrorKind::BadPayload` if the payload shape does not match
    /// the codec width.
    pub fn decode(&self, data: &GroupData) -> Result<Value> {
        match (self, data) {
            (Self::Bool(d), GroupData::Small(v)) => Ok(Value::Bool(d.decode(*v))),
            (Self::Bool(d), GroupData::Bytes(b)) if !b.is_empty() => {
                Ok(Value::Bool(d.decode(b[0])))
            }
            (Self::Unsigned8(d), GroupData::Bytes(b)) => {
                Ok(Value::Unsigned(d.decode(b.as_slice())?))
            }
            (Self::Unsigned16(d), GroupData::Bytes(b)) => {
                Ok(Value::Unsigned(u32::from(d.decode(b.as_slice())?)))
            }
            (Self::Float16(d), GroupData::Bytes(b)) => Ok(Value::Float(d.decode(b.as_slice())?)),
            (Self::Signed32(d), GroupData::Bytes(b)) => Ok(Value::Signed(d.decode(b.as_slice())?)),
            (Self::Float32(d), GroupData::Bytes(b)) => Ok(Value::Float(d.decode(b.as_slice())?)),
            _ => Err(KnxError::dpt_bad_payload()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dpt_id_parse_format() {
        let id: DptId = "9.001".parse().unwrap();
        assert_eq!(id, DptId::new(9, 1));
        assert_eq!(id.to_string(), "9.001");

        let id: DptId = "1.009".parse().unwrap();
        assert_eq!(id, DptId::new(1, 9));
    }

    #[test]
    fn test_dpt_id_parse_invalid() {
        assert!("9".parse::<DptId>().is_err());
        assert!("a.b".parse::<DptId>().is_err());
        assert!("".parse::<DptId>().is_err());
    }

    #[test]
    fn test_factory_by_main_type() {
        let x = DptXlator::for_id(DptId::new(9, 1)).unwrap();
        assert!(matches!(x, DptXlator::Float16(Dpt9::Temperature)));
        assert_eq!(x.width_bits(), 16);

        let x = DptXlator::for_id(DptId::new(1, 9)).unwrap();
        assert!(matches!(x, DptXlator::Bool(Dpt1::OpenClose)));
        assert_eq!(x.width_bits(), 1);
    }

    #[test]
    fn test_factory_unknown() {
        assert!(DptXlator::for_id(DptId::new(99, 1)).is_err());
        assert!(DptXlator::for_id(DptId::new(9, 99)).is_err());
    }

    #[test]
    fn test_encode_wrong_kind() {
        let x = DptXlator::for_id(DptId::new(9, 1)).unwrap();
        let err = x.encode(&Value::Bool(true)).unwrap_err();
        assert_eq!(err, KnxError::dpt_wrong_kind());
    }

    #[test]
    fn test_round_trip_bool() {
        let x = DptXlator::for_id(DptId::new(1, 1)).unwrap();
        for v in [true, false] {
            let data = x.encode(&Value::Bool(v)).unwrap();
            assert_eq!(x.decode(&data).unwrap(), Value::Bool(v));
        }
    }

    #[test]
    fn test_round_trip_float16() {
        let x = DptXlator::for_id(DptId::new(9, 1)).unwrap();
        let data = x.encode(&Value::Float(21.5)).unwrap();
        assert_eq!(data, GroupData::from_slice(&[0x0C, 0x33]).unwrap());
        assert_eq!(x.decode(&data).unwrap(), Value::Float(21.5));
    }

    #[test]
    fn test_validate() {
        let pct = DptXlator::for_id(DptId::new(5, 1)).unwrap();
        assert!(pct.validate(&Value::Unsigned(100)));
        assert!(!pct.validate(&Value::Unsigned(101)));
        assert!(!pct.validate(&Value::Float(50.0)));
    }
}
