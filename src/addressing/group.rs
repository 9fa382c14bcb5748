//! KNX Group Address.
//!
//! Logical bus-wide identifier for a value topic. Two text notations share
//! the same 16-bit key:
//! - 3-level: Main/Middle/Sub (5/3/8 bits), e.g. `1/2/3`
//! - 2-level: Main/Sub (5/11 bits), e.g. `1/515`
//!
//! Parsing auto-detects the notation by slash count; formatting follows
//! the process-wide [`AddressStyle`].

use core::fmt;

use crate::error::{KnxError, Result};

/// Group address display notation, chosen once at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AddressStyle {
    /// `main/sub` (5/11 bits).
    TwoLevel,
    /// `main/middle/sub` (5/3/8 bits).
    #[default]
    ThreeLevel,
}

impl AddressStyle {
    /// Map the `ADDRESS_LEVEL` setting (2 or 3) to a style.
    pub const fn from_level(level: u8) -> Option<Self> {
        match level {
            2 => Some(Self::TwoLevel),
            3 => Some(Self::ThreeLevel),
            _ => None,
        }
    }
}

/// KNX Group Address.
///
/// # Examples
///
/// ```
/// use knx_weave::addressing::{AddressStyle, GroupAddress};
///
/// let addr = GroupAddress::new(1, 2, 3).unwrap();
/// assert_eq!(addr.to_string(), "1/2/3");
/// assert_eq!(addr.format(AddressStyle::TwoLevel).as_str(), "1/515");
///
/// // Both notations parse to the same raw key
/// let a: GroupAddress = "1/2/3".parse().unwrap();
/// let b: GroupAddress = "1/515".parse().unwrap();
/// assert_eq!(a, b);
/// assert_eq!(u16::from(a), 0x0A03);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GroupAddress {
    raw: u16,
}

impl GroupAddress {
    /// Maximum main group value (5 bits).
    pub const MAX_MAIN: u8 = 31;
    /// Maximum middle group value (3 bits).
    pub const MAX_MIDDLE: u8 = 7;
    /// Maximum sub value for the 2-level notation (11 bits).
    pub const MAX_SUB_2LEVEL: u16 = 2047;

    /// Create a 3-level group address (Main/Middle/Sub).
    ///
    /// # Errors
    ///
    /// Returns `ConfigErrorKind::BadAddress` if a component is out of range.
    pub fn new(main: u8, middle: u8, sub: u8) -> Result<Self> {
        if main > Self::MAX_MAIN || middle > Self::MAX_MIDDLE {
            return Err(KnxError::bad_address(format!("{main}/{middle}/{sub}")));
        }
        let raw = (u16::from(main) << 11) | (u16::from(middle) << 8) | u16::from(sub);
        Ok(Self { raw })
    }

    /// Create a 2-level group address (Main/Sub).
    ///
    /// # Errors
    ///
    /// Returns `ConfigErrorKind::BadAddress` if a component is out of range.
    pub fn new_2level(main: u8, sub: u16) -> Result<Self> {
        if main > Self::MAX_MAIN || sub > Self::MAX_SUB_2LEVEL {
            return Err(KnxError::bad_address(format!("{main}/{sub}")));
        }
        let raw = (u16::from(main) << 11) | sub;
        Ok(Self { raw })
    }

    /// Raw 16-bit representation.
    #[inline]
    pub const fn raw(self) -> u16 {
        self.raw
    }

    /// Main group component (0-31).
    #[inline]
    pub const fn main(self) -> u8 {
        ((self.raw >> 11) & 0x1F) as u8
    }

    /// Middle group component of the 3-level notation (0-7).
    #[inline]
    pub const fn middle(self) -> u8 {
        ((self.raw >> 8) & 0x07) as u8
    }

    /// Sub component of the 3-level notation (0-255).
    #[inline]
    pub const fn sub(self) -> u8 {
        (self.raw & 0xFF) as u8
    }

    /// Sub component of the 2-level notation (0-2047).
    #[inline]
    pub const fn sub_2level(self) -> u16 {
        self.raw & 0x07FF
    }

    /// Format in the given style.
    pub fn format(&self, style: AddressStyle) -> heapless::String<16> {
        use core::fmt::Write;
        let mut s = heapless::String::new();
        match style {
            AddressStyle::TwoLevel => {
                let _ = write!(s, "{}/{}", self.main(), self.sub_2level());
            }
            AddressStyle::ThreeLevel => {
                let _ = write!(s, "{}/{}/{}", self.main(), self.middle(), self.sub());
            }
        }
        s
    }

    /// Big-endian byte representation.
    #[inline]
    pub const fn to_be_bytes(self) -> [u8; 2] {
        self.raw.to_be_bytes()
    }
}

impl From<u16> for GroupAddress {
    #[inline]
    fn from(raw: u16) -> Self {
        Self { raw }
    }
}

impl From<GroupAddress> for u16 {
    #[inline]
    fn from(addr: GroupAddress) -> u16 {
        addr.raw
    }
}

impl fmt::Display for GroupAddress {
    /// Formats 3-level; use [`GroupAddress::format`] to honor the configured style.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.main(), self.middle(), self.sub())
    }
}

impl core::str::FromStr for GroupAddress {
    type Err = KnxError;

    fn from_str(s: &str) -> Result<Self> {
        let mut parts = s.split('/');

        let main = parts
            .next()
            .and_then(|p| p.parse::<u8>().ok())
            .ok_or_else(|| KnxError::bad_address(s))?;

        let second = parts
            .next()
            .and_then(|p| p.parse::<u16>().ok())
            .ok_or_else(|| KnxError::bad_address(s))?;

        match parts.next() {
            Some(sub_str) => {
                // 3-level notation
                let sub = sub_str
                    .parse::<u8>()
                    .map_err(|_| KnxError::bad_address(s))?;
                if parts.next().is_some() || second > u16::from(Self::MAX_MIDDLE) {
                    return Err(KnxError::bad_address(s));
                }
                Self::new(main, second as u8, sub)
            }
            None => Self::new_2level(main, second),
        }
    }
}
