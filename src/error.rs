//! Error types for the KNX stack and device runtime.
//!
//! One public [`KnxError`] with a kind enum per error family. Transport-level
//! conditions that are recovered in place (confirm timeouts, cancelled
//! transmissions) are *not* errors; they surface as
//! [`TransmissionResult`](crate::stack::TransmissionResult) values.

use core::fmt;

/// Result type alias for KNX operations.
pub type Result<T> = core::result::Result<T, KnxError>;

/// Configuration error variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigErrorKind {
    /// Malformed GAD map file (bad line, bad address literal).
    GadMap,
    /// Duplicate name in the GAD map.
    DuplicateGad,
    /// Unknown or unsupported DPT identifier.
    UnknownDpt,
    /// Duplicate functional block name within a device or registry.
    DuplicateBlock,
    /// Duplicate datapoint name within a functional block.
    DuplicateDatapoint,
    /// Group object refers to a datapoint or GAD name that does not exist.
    DanglingReference,
    /// Bad individual or group address literal.
    BadAddress,
    /// Bad group object flag string.
    BadFlags,
    /// Operation attempted in the wrong device state.
    BadState,
}

/// Frame error variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameErrorKind {
    /// Buffer too small for the requested encode/decode.
    BufferTooSmall,
    /// KNXnet/IP header magic or version mismatch.
    BadHeader,
    /// Service type is not ROUTING_INDICATION.
    UnsupportedServiceType,
    /// Length field disagrees with the datagram.
    BadLength,
    /// cEMI message code is not an L_Data code.
    UnknownMessageCode,
    /// NPDU truncated or oversized.
    BadNpdu,
}

/// DPT error variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DptErrorKind {
    /// Value outside the DPT's declared range.
    ValueOutOfRange,
    /// Payload bytes do not decode under this DPT.
    BadPayload,
    /// Value variant does not match the DPT's value kind.
    WrongKind,
}

/// Transceiver error variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransceiverErrorKind {
    /// Socket open or bind failure.
    Bind,
    /// Multicast group membership failure.
    Membership,
    /// Socket option failure (TTL, loop, timeout).
    SocketOption,
    /// Datagram was only partially sent.
    PartialSend,
    /// Send or receive I/O failure.
    Io,
}

/// KNX stack error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KnxError {
    /// Configuration errors; surface before the stack starts.
    Config(ConfigErrorKind, String),
    /// cEMI / KNXnet/IP framing errors; dropped with a warning, never fatal.
    Frame(FrameErrorKind),
    /// DPT encode/decode/validation errors.
    Dpt(DptErrorKind),
    /// Socket-level errors; fatal at startup, recoverable during run.
    Transceiver(TransceiverErrorKind, String),
    /// An item was dropped by queue backpressure.
    QueueDropped,
}

impl KnxError {
    pub(crate) fn gad_map(detail: impl Into<String>) -> Self {
        Self::Config(ConfigErrorKind::GadMap, detail.into())
    }

    pub(crate) fn duplicate_gad(name: impl Into<String>) -> Self {
        Self::Config(ConfigErrorKind::DuplicateGad, name.into())
    }

    pub(crate) fn unknown_dpt(id: impl Into<String>) -> Self {
        Self::Config(ConfigErrorKind::UnknownDpt, id.into())
    }

    pub(crate) fn duplicate_block(name: impl Into<String>) -> Self {
        Self::Config(ConfigErrorKind::DuplicateBlock, name.into())
    }

    pub(crate) fn duplicate_datapoint(name: impl Into<String>) -> Self {
        Self::Config(ConfigErrorKind::DuplicateDatapoint, name.into())
    }

    pub(crate) fn dangling_reference(detail: impl Into<String>) -> Self {
        Self::Config(ConfigErrorKind::DanglingReference, detail.into())
    }

    pub(crate) fn bad_address(literal: impl Into<String>) -> Self {
        Self::Config(ConfigErrorKind::BadAddress, literal.into())
    }

    pub(crate) fn bad_flags(literal: impl Into<String>) -> Self {
        Self::Config(ConfigErrorKind::BadFlags, literal.into())
    }

    pub(crate) fn bad_state(detail: impl Into<String>) -> Self {
        Self::Config(ConfigErrorKind::BadState, detail.into())
    }

    pub(crate) const fn buffer_too_small() -> Self {
        Self::Frame(FrameErrorKind::BufferTooSmall)
    }

    pub(crate) const fn bad_header() -> Self {
        Self::Frame(FrameErrorKind::BadHeader)
    }

    pub(crate) const fn unsupported_service_type() -> Self {
        Self::Frame(FrameErrorKind::UnsupportedServiceType)
    }

    pub(crate) const fn bad_length() -> Self {
        Self::Frame(FrameErrorKind::BadLength)
    }

    pub(crate) const fn unknown_message_code() -> Self {
        Self::Frame(FrameErrorKind::UnknownMessageCode)
    }

    pub(crate) const fn bad_npdu() -> Self {
        Self::Frame(FrameErrorKind::BadNpdu)
    }

    pub(crate) const fn dpt_value_out_of_range() -> Self {
        Self::Dpt(DptErrorKind::ValueOutOfRange)
    }

    pub(crate) const fn dpt_bad_payload() -> Self {
        Self::Dpt(DptErrorKind::BadPayload)
    }

    pub(crate) const fn dpt_wrong_kind() -> Self {
        Self::Dpt(DptErrorKind::WrongKind)
    }

    pub(crate) fn transceiver(kind: TransceiverErrorKind, detail: impl Into<String>) -> Self {
        Self::Transceiver(kind, detail.into())
    }

    /// True for configuration errors (exit code 1 territory for the CLI).
    pub fn is_config(&self) -> bool {
        matches!(self, Self::Config(..))
    }
}

impl fmt::Display for KnxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KnxError::Config(kind, detail) => write!(f, "config error: {kind:?}: {detail}"),
            KnxError::Frame(kind) => write!(f, "frame error: {kind:?}"),
            KnxError::Dpt(kind) => write!(f, "DPT error: {kind:?}"),
            KnxError::Transceiver(kind, detail) => {
                write!(f, "transceiver error: {kind:?}: {detail}")
            }
            KnxError::QueueDropped => write!(f, "queue backpressure drop"),
        }
    }
}

impl std::error::Error for KnxError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_is_config() {
        let err = KnxError::duplicate_block("alert");
        assert!(err.is_config());
        assert!(!KnxError::QueueDropped.is_config());
    }

    #[test]
    fn test_display_contains_detail() {
        let err = KnxError::gad_map("line 3: missing '='");
        let msg = format!("{err}");
        assert!(msg.contains("line 3"));
    }
}
