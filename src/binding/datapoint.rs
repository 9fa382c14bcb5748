//! Datapoints: typed value slots owned by a functional block.

use crate::dpt::{DptId, DptXlator, Value};
use crate::error::{KnxError, Result};

/// How application logic uses a datapoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    /// Fed from the bus; read by the block.
    Input,
    /// Written by the block; transmitted to the bus.
    Output,
    /// Both directions.
    InOut,
}

impl AccessMode {
    /// Parse a configuration name.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "input" => Some(Self::Input),
            "output" => Some(Self::Output),
            "inout" => Some(Self::InOut),
            _ => None,
        }
    }

    /// Configuration name.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Input => "input",
            Self::Output => "output",
            Self::InOut => "inout",
        }
    }
}

/// Static declaration of a datapoint.
#[derive(Debug, Clone)]
pub struct DatapointSpec {
    /// Name, unique within the block.
    pub name: String,
    /// DPT identifier.
    pub dpt: DptId,
    /// Access mode.
    pub access: AccessMode,
    /// Value returned before the first write.
    pub default: Value,
}

/// A declared datapoint with its resolved codec.
///
/// The current value is not stored here; all of a block's values live
/// under the block's single lock so handlers see consistent pairs.
#[derive(Debug, Clone)]
pub struct Datapoint {
    spec: DatapointSpec,
    xlator: DptXlator,
}

impl Datapoint {
    /// Resolve the codec and validate the default value.
    ///
    /// # Errors
    ///
    /// `ConfigErrorKind::UnknownDpt` for an unsupported identifier,
    /// `DptErrorKind` if the default does not validate.
    pub fn new(spec: DatapointSpec) -> Result<Self> {
        let xlator = DptXlator::for_id(spec.dpt)?;
        if !xlator.validate(&spec.default) {
            return Err(KnxError::dpt_value_out_of_range());
        }
        Ok(Self { spec, xlator })
    }

    /// Datapoint name.
    pub fn name(&self) -> &str {
        &self.spec.name
    }

    /// Static declaration.
    pub const fn spec(&self) -> &DatapointSpec {
        &self.spec
    }

    /// Resolved codec.
    pub const fn xlator(&self) -> &DptXlator {
        &self.xlator
    }

    /// Default value.
    pub const fn default_value(&self) -> Value {
        self.spec.default
    }
}
