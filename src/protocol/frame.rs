//! KNXnet/IP routing frame header.
//!
//! ```text
//! +--------------+--------------+---------------------+
//! | Header Len   | Protocol Ver |  Service Type ID    |
//! |   (1 byte)   |   (1 byte)   |     (2 bytes)       |
//! +--------------+--------------+---------------------+
//! |           Total Length (2 bytes)                  |
//! +---------------------------------------------------+
//! ```
//!
//! Total length includes the 6-byte header. All fields big-endian.

use crate::error::{KnxError, Result};
use crate::protocol::constants::{
    HEADER_SIZE_10, KNXNETIP_VERSION_10, MAX_FRAME_SIZE, SERVICE_ROUTING_INDICATION,
};

/// Parsed KNXnet/IP header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoutingHeader {
    /// Service type identifier.
    pub service_type: u16,
    /// Total datagram length, header included.
    pub total_length: u16,
}

impl RoutingHeader {
    /// Header size in bytes.
    pub const SIZE: usize = 6;

    /// Parse a header from the start of a datagram.
    ///
    /// # Errors
    ///
    /// `FrameErrorKind::BadHeader` on a magic/version mismatch,
    /// `FrameErrorKind::BufferTooSmall` on a short buffer.
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < Self::SIZE {
            return Err(KnxError::buffer_too_small());
        }
        if data[0] != HEADER_SIZE_10 || data[1] != KNXNETIP_VERSION_10 {
            return Err(KnxError::bad_header());
        }
        Ok(Self {
            service_type: u16::from_be_bytes([data[2], data[3]]),
            total_length: u16::from_be_bytes([data[4], data[5]]),
        })
    }
}

/// Wrap an encoded cEMI frame in a `ROUTING_INDICATION` datagram.
///
/// # Errors
///
/// Returns `FrameErrorKind::BufferTooSmall` if the result would exceed
/// [`MAX_FRAME_SIZE`].
pub fn encode_routing_frame(cemi: &[u8]) -> Result<heapless::Vec<u8, MAX_FRAME_SIZE>> {
    let total = RoutingHeader::SIZE + cemi.len();
    if total > MAX_FRAME_SIZE {
        return Err(KnxError::buffer_too_small());
    }

    let mut out = heapless::Vec::new();
    let header = [
        HEADER_SIZE_10,
        KNXNETIP_VERSION_10,
        (SERVICE_ROUTING_INDICATION >> 8) as u8,
        (SERVICE_ROUTING_INDICATION & 0xFF) as u8,
        (total >> 8) as u8,
        (total & 0xFF) as u8,
    ];
    out.extend_from_slice(&header)
        .map_err(|_| KnxError::buffer_too_small())?;
    out.extend_from_slice(cemi)
        .map_err(|_| KnxError::buffer_too_small())?;
    Ok(out)
}

/// Validate a routing datagram and return its cEMI payload.
///
/// # Errors
///
/// `FrameErrorKind::BadHeader` on magic/version mismatch,
/// `FrameErrorKind::UnsupportedServiceType` for anything but
/// `ROUTING_INDICATION`, `FrameErrorKind::BadLength` when the length
/// field disagrees with the datagram.
pub fn decode_routing_frame(datagram: &[u8]) -> Result<&[u8]> {
    let header = RoutingHeader::parse(datagram)?;
    if header.service_type != SERVICE_ROUTING_INDICATION {
        return Err(KnxError::unsupported_service_type());
    }
    if header.total_length as usize != datagram.len() {
        return Err(KnxError::bad_length());
    }
    Ok(&datagram[RoutingHeader::SIZE..])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode() {
        let cemi = [0x11, 0x00, 0xBC, 0xE0];
        let frame = encode_routing_frame(&cemi).unwrap();
        assert_eq!(&frame[..6], &[0x06, 0x10, 0x05, 0x30, 0x00, 0x0A]);
        assert_eq!(&frame[6..], &cemi);
    }

    #[test]
    fn test_decode_round_trip() {
        let cemi = [0x29, 0x00, 0xBC, 0xE0, 0x11, 0x01, 0x0A, 0x03, 0x01, 0x00, 0x80];
        let frame = encode_routing_frame(&cemi).unwrap();
        assert_eq!(decode_routing_frame(&frame).unwrap(), &cemi);
    }

    #[test]
    fn test_decode_bad_magic() {
        let data = [0x05, 0x10, 0x05, 0x30, 0x00, 0x06];
        assert_eq!(
            decode_routing_frame(&data).unwrap_err(),
            KnxError::bad_header()
        );
    }

    #[test]
    fn test_decode_wrong_service() {
        // TUNNELLING_REQUEST is not routed
        let data = [0x06, 0x10, 0x04, 0x20, 0x00, 0x06];
        assert_eq!(
            decode_routing_frame(&data).unwrap_err(),
            KnxError::unsupported_service_type()
        );
    }

    #[test]
    fn test_decode_length_mismatch() {
        let data = [0x06, 0x10, 0x05, 0x30, 0x00, 0x08, 0x29];
        assert_eq!(
            decode_routing_frame(&data).unwrap_err(),
            KnxError::bad_length()
        );
    }

    #[test]
    fn test_decode_short() {
        assert!(decode_routing_frame(&[0x06, 0x10]).is_err());
    }
}
