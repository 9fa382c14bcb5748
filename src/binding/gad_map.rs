//! Group-address table: the textual name-to-GAD mapping.
//!
//! File format, one binding per line:
//!
//! ```text
//! # heating
//! outside_temp = 1/2/3
//! door_state   = 0/0/5
//! ```
//!
//! Names are case-sensitive; both 2-level and 3-level address notations
//! are accepted. Duplicate names are a configuration error.

use std::collections::HashMap;
use std::path::Path;

use crate::addressing::GroupAddress;
use crate::error::{KnxError, Result};

/// The parsed GAD map.
#[derive(Debug, Clone, Default)]
pub struct GadMap {
    entries: HashMap<String, GroupAddress>,
}

impl GadMap {
    /// An empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse the textual format.
    ///
    /// # Errors
    ///
    /// `ConfigErrorKind::GadMap` for malformed lines or addresses,
    /// `ConfigErrorKind::DuplicateGad` for repeated names.
    pub fn parse(text: &str) -> Result<Self> {
        let mut map = Self::new();
        for (lineno, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let (name, address) = line
                .split_once('=')
                .ok_or_else(|| KnxError::gad_map(format!("line {}: missing '='", lineno + 1)))?;
            let name = name.trim();
            if name.is_empty() {
                return Err(KnxError::gad_map(format!("line {}: empty name", lineno + 1)));
            }
            let gad: GroupAddress = address.trim().parse().map_err(|_| {
                KnxError::gad_map(format!(
                    "line {}: bad group address {:?}",
                    lineno + 1,
                    address.trim()
                ))
            })?;
            map.insert(name, gad)?;
        }
        Ok(map)
    }

    /// Load and parse a map file.
    ///
    /// # Errors
    ///
    /// `ConfigErrorKind::GadMap` on read failure or any parse error.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| KnxError::gad_map(format!("{}: {e}", path.display())))?;
        Self::parse(&text)
    }

    /// Insert one binding.
    ///
    /// # Errors
    ///
    /// `ConfigErrorKind::DuplicateGad` if the name is already mapped.
    pub fn insert(&mut self, name: impl Into<String>, gad: GroupAddress) -> Result<()> {
        let name = name.into();
        if self.entries.contains_key(&name) {
            return Err(KnxError::duplicate_gad(name));
        }
        self.entries.insert(name, gad);
        Ok(())
    }

    /// Look a name up.
    pub fn lookup(&self, name: &str) -> Option<GroupAddress> {
        self.entries.get(name).copied()
    }

    /// Number of bindings.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the map is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate over bindings in unspecified order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, GroupAddress)> {
        self.entries.iter().map(|(name, gad)| (name.as_str(), *gad))
    }
}
