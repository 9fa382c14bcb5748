//! Group objects: the binding between a datapoint and the bus.
//!
//! A group object declaration names a datapoint, a flag set, a priority
//! and the GAD-map entries it links to. Weaving resolves the links to
//! concrete group addresses.

use core::fmt;

use crate::addressing::GroupAddress;
use crate::error::{KnxError, Result};
use crate::protocol::Priority;

/// Communication flags of a group object.
///
/// ```text
/// C  Communication - gate for everything else
/// R  Read          - answer inbound GroupValue_Read
/// W  Write         - accept inbound GroupValue_Write
/// T  Transmit      - send on local datapoint change
/// U  Update        - accept inbound GroupValue_Response
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Flags {
    /// `C` - the object takes part in bus communication at all.
    pub communicate: bool,
    /// `R` - reads are answered with the current value.
    pub read: bool,
    /// `W` - inbound writes update the datapoint.
    pub write: bool,
    /// `T` - local writes are transmitted.
    pub transmit: bool,
    /// `U` - inbound responses update the datapoint.
    pub update: bool,
}

impl Flags {
    /// Parse a flag string like `"CWTU"`. Order is free; repeats are fine.
    ///
    /// # Errors
    ///
    /// `ConfigErrorKind::BadFlags` on any character outside `CRWTU`.
    pub fn parse(s: &str) -> Result<Self> {
        let mut flags = Self::default();
        for c in s.chars() {
            match c {
                'C' => flags.communicate = true,
                'R' => flags.read = true,
                'W' => flags.write = true,
                'T' => flags.transmit = true,
                'U' => flags.update = true,
                _ => return Err(KnxError::bad_flags(s)),
            }
        }
        Ok(flags)
    }
}

impl fmt::Display for Flags {
    /// Canonical order `CRWTU`, omitting unset flags.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (set, c) in [
            (self.communicate, 'C'),
            (self.read, 'R'),
            (self.write, 'W'),
            (self.transmit, 'T'),
            (self.update, 'U'),
        ] {
            if set {
                write!(f, "{c}")?;
            }
        }
        Ok(())
    }
}

impl core::str::FromStr for Flags {
    type Err = KnxError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Static declaration of a group object.
#[derive(Debug, Clone)]
pub struct GroupObjectSpec {
    /// Datapoint this object serves.
    pub datapoint: String,
    /// Communication flags.
    pub flags: Flags,
    /// Transmission priority for frames this object sends.
    pub priority: Priority,
    /// GAD-map entry names; defaults to the datapoint name when empty.
    pub links: Vec<String>,
}

impl GroupObjectSpec {
    /// The GAD-map names this object binds, in declaration order.
    pub fn link_names(&self) -> Vec<&str> {
        if self.links.is_empty() {
            vec![self.datapoint.as_str()]
        } else {
            self.links.iter().map(String::as_str).collect()
        }
    }
}

/// A woven group object: the declaration plus its resolved addresses.
#[derive(Debug, Clone)]
pub struct GroupObject {
    /// The declaration.
    pub spec: GroupObjectSpec,
    /// Resolved addresses, in link order. All match inbound; the first
    /// one is the sending address when `T` is set.
    pub gads: Vec<GroupAddress>,
}

impl GroupObject {
    /// The sending group address, if the object may transmit.
    pub fn sending_gad(&self) -> Option<GroupAddress> {
        (self.spec.flags.communicate && self.spec.flags.transmit)
            .then(|| self.gads.first().copied())
            .flatten()
    }
}
