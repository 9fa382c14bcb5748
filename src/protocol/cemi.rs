//! Common External Message Interface (cEMI) frames.
//!
//! cEMI is the framing between the host stack and the bus interface; here
//! it travels inside KNXnet/IP routing datagrams.
//!
//! ## Frame Structure
//!
//! ```text
//! +------------------------------------------+
//! | Message Code (1 byte)                    |
//! | Additional Info Length (1 byte)          |
//! | Additional Info (variable)               |
//! | Control Field 1 (1 byte)                 |
//! | Control Field 2 (1 byte)                 |
//! | Source Address (2 bytes)                 |
//! | Destination Address (2 bytes)            |
//! | NPDU Length (1 byte)                     |
//! | TPCI/APCI + data (variable)              |
//! +------------------------------------------+
//! ```
//!
//! The NPDU length octet counts the octets *after* the TPCI octet, so a
//! GroupValue_Read (TPCI + APCI) carries length 1.
//!
//! Frames are owned values with one variant per message code, so a frame's
//! direction is always visible in its type.

use crate::addressing::{GroupAddress, IndividualAddress};
use crate::error::{KnxError, Result};
use crate::protocol::constants::{
    MessageCode, Priority, DEFAULT_HOP_COUNT, MAX_CEMI_SIZE, MAX_NPDU,
};

/// Control Field 1 of an `L_Data` frame.
///
/// ```text
/// Bit 7: Frame Type (1=standard)
/// Bit 5: Repeat (1=do not repeat)
/// Bit 4: System Broadcast (1=broadcast)
/// Bit 3-2: Priority
/// Bit 1: Acknowledge Request
/// Bit 0: Confirm (1=error)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlField1 {
    raw: u8,
}

impl ControlField1 {
    /// Build a control field.
    pub const fn new(
        standard_frame: bool,
        do_not_repeat: bool,
        broadcast: bool,
        priority: Priority,
        ack_requested: bool,
        has_error: bool,
    ) -> Self {
        let mut raw = (priority.to_u8() & 0x03) << 2;
        if standard_frame {
            raw |= 0x80;
        }
        if do_not_repeat {
            raw |= 0x20;
        }
        if broadcast {
            raw |= 0x10;
        }
        if ack_requested {
            raw |= 0x02;
        }
        if has_error {
            raw |= 0x01;
        }
        Self { raw }
    }

    /// Outbound default for a group frame with the given priority:
    /// standard frame, no repeat, broadcast, no ack, no error.
    pub const fn for_group(priority: Priority) -> Self {
        Self::new(true, true, true, priority, false, false)
    }

    /// Raw byte value.
    #[inline]
    pub const fn raw(self) -> u8 {
        self.raw
    }

    /// Standard (true) vs extended (false) frame format.
    #[inline]
    pub const fn is_standard_frame(self) -> bool {
        self.raw & 0x80 != 0
    }

    /// Repeat suppression flag.
    #[inline]
    pub const fn do_not_repeat(self) -> bool {
        self.raw & 0x20 != 0
    }

    /// Broadcast flag.
    #[inline]
    pub const fn is_broadcast(self) -> bool {
        self.raw & 0x10 != 0
    }

    /// Transmission priority.
    #[inline]
    pub const fn priority(self) -> Priority {
        Priority::from_u8((self.raw >> 2) & 0x03)
    }

    /// Acknowledge-request flag.
    #[inline]
    pub const fn ack_requested(self) -> bool {
        self.raw & 0x02 != 0
    }

    /// Confirm error flag.
    #[inline]
    pub const fn has_error(self) -> bool {
        self.raw & 0x01 != 0
    }
}

impl From<u8> for ControlField1 {
    #[inline]
    fn from(raw: u8) -> Self {
        Self { raw }
    }
}

impl From<ControlField1> for u8 {
    #[inline]
    fn from(ctrl: ControlField1) -> u8 {
        ctrl.raw
    }
}

/// Control Field 2 of an `L_Data` frame.
///
/// ```text
/// Bit 7: Destination Address Type (1=group)
/// Bit 6-4: Hop Count
/// Bit 3-0: Extended Frame Format (0=standard)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlField2 {
    raw: u8,
}

impl ControlField2 {
    /// Build a control field.
    pub const fn new(is_group: bool, hop_count: u8, extended_format: u8) -> Self {
        let mut raw = ((hop_count & 0x07) << 4) | (extended_format & 0x0F);
        if is_group {
            raw |= 0x80;
        }
        Self { raw }
    }

    /// Outbound default: group destination, hop count 6, standard format.
    pub const fn for_group() -> Self {
        Self::new(true, DEFAULT_HOP_COUNT, 0)
    }

    /// Raw byte value.
    #[inline]
    pub const fn raw(self) -> u8 {
        self.raw
    }

    /// Group (true) vs individual (false) destination.
    #[inline]
    pub const fn is_group_address(self) -> bool {
        self.raw & 0x80 != 0
    }

    /// Hop count (0-7).
    #[inline]
    pub const fn hop_count(self) -> u8 {
        (self.raw >> 4) & 0x07
    }

    /// Replace the hop count.
    pub const fn with_hop_count(self, hop_count: u8) -> Self {
        Self {
            raw: (self.raw & 0x8F) | ((hop_count & 0x07) << 4),
        }
    }

    /// Extended frame format bits.
    #[inline]
    pub const fn extended_format(self) -> u8 {
        self.raw & 0x0F
    }
}

impl From<u8> for ControlField2 {
    #[inline]
    fn from(raw: u8) -> Self {
        Self { raw }
    }
}

impl From<ControlField2> for u8 {
    #[inline]
    fn from(ctrl: ControlField2) -> u8 {
        ctrl.raw
    }
}

/// The service body shared by all `L_Data` variants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LData {
    /// Control field 1.
    pub ctrl1: ControlField1,
    /// Control field 2.
    pub ctrl2: ControlField2,
    /// Source individual address.
    pub source: IndividualAddress,
    /// Raw destination; group or individual per `ctrl2`.
    pub destination: u16,
    /// TPCI octet plus APCI octet plus appended payload.
    pub npdu: heapless::Vec<u8, MAX_NPDU>,
}

impl LData {
    /// Build a group-addressed body with outbound defaults.
    ///
    /// # Errors
    ///
    /// Returns `FrameErrorKind::BadNpdu` if the NPDU exceeds [`MAX_NPDU`].
    pub fn group(
        source: IndividualAddress,
        destination: GroupAddress,
        priority: Priority,
        npdu: &[u8],
    ) -> Result<Self> {
        let npdu = heapless::Vec::from_slice(npdu).map_err(|_| KnxError::bad_npdu())?;
        Ok(Self {
            ctrl1: ControlField1::for_group(priority),
            ctrl2: ControlField2::for_group(),
            source,
            destination: destination.raw(),
            npdu,
        })
    }

    /// Transmission priority from control field 1.
    #[inline]
    pub const fn priority(&self) -> Priority {
        self.ctrl1.priority()
    }

    /// Destination as a group address, if `ctrl2` says so.
    pub fn destination_group(&self) -> Option<GroupAddress> {
        self.ctrl2
            .is_group_address()
            .then(|| GroupAddress::from(self.destination))
    }
}

/// A cEMI `L_Data` frame, tagged by message code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Cemi {
    /// `L_Data.req` (0x11), host to bus.
    LDataReq(LData),
    /// `L_Data.ind` (0x29), bus to host.
    LDataInd(LData),
    /// `L_Data.con` (0x2E), confirmation of a request.
    LDataCon(LData),
}

impl Cemi {
    /// Minimum encoded size: MC, add-info length, two control fields,
    /// source, destination, NPDU length octet, TPCI octet.
    pub const MIN_SIZE: usize = 10;

    /// The message code of this variant.
    pub const fn code(&self) -> MessageCode {
        match self {
            Self::LDataReq(_) => MessageCode::LDataReq,
            Self::LDataInd(_) => MessageCode::LDataInd,
            Self::LDataCon(_) => MessageCode::LDataCon,
        }
    }

    /// Shared service body.
    pub const fn ldata(&self) -> &LData {
        match self {
            Self::LDataReq(l) | Self::LDataInd(l) | Self::LDataCon(l) => l,
        }
    }

    /// Mutable service body.
    pub fn ldata_mut(&mut self) -> &mut LData {
        match self {
            Self::LDataReq(l) | Self::LDataInd(l) | Self::LDataCon(l) => l,
        }
    }

    /// Transmission priority.
    #[inline]
    pub const fn priority(&self) -> Priority {
        self.ldata().priority()
    }

    /// Parse an encoded cEMI frame.
    ///
    /// Additional info is skipped; unknown message codes are a
    /// `FrameErrorKind::UnknownMessageCode`.
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < Self::MIN_SIZE {
            return Err(KnxError::buffer_too_small());
        }

        let code = MessageCode::from_u8(data[0]).ok_or_else(KnxError::unknown_message_code)?;
        let add_info_len = data[1] as usize;
        let service = data
            .get(2 + add_info_len..)
            .ok_or_else(KnxError::bad_length)?;
        if service.len() < 8 {
            return Err(KnxError::bad_length());
        }

        let ctrl1 = ControlField1::from(service[0]);
        let ctrl2 = ControlField2::from(service[1]);
        let source = IndividualAddress::from(u16::from_be_bytes([service[2], service[3]]));
        let destination = u16::from_be_bytes([service[4], service[5]]);

        // The length octet counts the octets after the TPCI octet
        let npdu_len = service[6] as usize;
        let tpdu = service
            .get(7..7 + 1 + npdu_len)
            .ok_or_else(KnxError::bad_length)?;
        let npdu = heapless::Vec::from_slice(tpdu).map_err(|_| KnxError::bad_npdu())?;

        let ldata = LData {
            ctrl1,
            ctrl2,
            source,
            destination,
            npdu,
        };
        Ok(match code {
            MessageCode::LDataReq => Self::LDataReq(ldata),
            MessageCode::LDataInd => Self::LDataInd(ldata),
            MessageCode::LDataCon => Self::LDataCon(ldata),
        })
    }

    /// Encode the frame; no additional info is emitted.
    ///
    /// # Errors
    ///
    /// Returns `FrameErrorKind::BadNpdu` on an NPDU without a TPCI octet.
    pub fn encode(&self) -> Result<heapless::Vec<u8, MAX_CEMI_SIZE>> {
        let ldata = self.ldata();
        if ldata.npdu.is_empty() {
            return Err(KnxError::bad_npdu());
        }

        let mut out = heapless::Vec::new();
        let header = [
            self.code().to_u8(),
            0x00, // no additional info
            ldata.ctrl1.raw(),
            ldata.ctrl2.raw(),
        ];
        out.extend_from_slice(&header)
            .map_err(|_| KnxError::buffer_too_small())?;
        out.extend_from_slice(&ldata.source.to_be_bytes())
            .map_err(|_| KnxError::buffer_too_small())?;
        out.extend_from_slice(&ldata.destination.to_be_bytes())
            .map_err(|_| KnxError::buffer_too_small())?;
        out.push((ldata.npdu.len() - 1) as u8)
            .map_err(|_| KnxError::buffer_too_small())?;
        out.extend_from_slice(&ldata.npdu)
            .map_err(|_| KnxError::buffer_too_small())?;
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_control_field1_bits() {
        let ctrl = ControlField1::for_group(Priority::Low);
        // 0xBC: standard, do-not-repeat, broadcast, low priority
        assert_eq!(ctrl.raw(), 0xBC);
        assert!(ctrl.is_standard_frame());
        assert!(ctrl.do_not_repeat());
        assert!(ctrl.is_broadcast());
        assert_eq!(ctrl.priority(), Priority::Low);
        assert!(!ctrl.ack_requested());
        assert!(!ctrl.has_error());
    }

    #[test]
    fn test_control_field1_priority() {
        assert_eq!(ControlField1::for_group(Priority::System).raw(), 0xB0);
        assert_eq!(ControlField1::for_group(Priority::Normal).raw(), 0xB4);
        assert_eq!(ControlField1::for_group(Priority::Urgent).raw(), 0xB8);
    }

    #[test]
    fn test_control_field2_bits() {
        let ctrl = ControlField2::for_group();
        // 0xE0: group destination, hop count 6, standard format
        assert_eq!(ctrl.raw(), 0xE0);
        assert!(ctrl.is_group_address());
        assert_eq!(ctrl.hop_count(), 6);
        assert_eq!(ctrl.extended_format(), 0);

        let decremented = ctrl.with_hop_count(5);
        assert_eq!(decremented.hop_count(), 5);
        assert!(decremented.is_group_address());
    }

    #[test]
    fn test_encode_group_write() {
        let ldata = LData::group(
            IndividualAddress::new(1, 1, 1).unwrap(),
            GroupAddress::new(1, 2, 3).unwrap(),
            Priority::Low,
            &[0x00, 0x80, 0x0C, 0x33],
        )
        .unwrap();
        let encoded = Cemi::LDataReq(ldata).encode().unwrap();
        assert_eq!(
            encoded.as_slice(),
            &[0x11, 0x00, 0xBC, 0xE0, 0x11, 0x01, 0x0A, 0x03, 0x03, 0x00, 0x80, 0x0C, 0x33]
        );
    }

    #[test]
    fn test_parse_group_write_ind() {
        let data = [
            0x29, // L_Data.ind
            0x00, // no additional info
            0xBC, 0xE0, // control fields
            0x11, 0x01, // source 1.1.1
            0x0A, 0x03, // destination 1/2/3
            0x01, // NPDU length (APCI octet only)
            0x00, 0x81, // TPCI, APCI group write + value 1
        ];
        let cemi = Cemi::parse(&data).unwrap();
        assert_eq!(cemi.code(), MessageCode::LDataInd);
        let ldata = cemi.ldata();
        assert_eq!(ldata.source, IndividualAddress::new(1, 1, 1).unwrap());
        assert_eq!(
            ldata.destination_group(),
            Some(GroupAddress::new(1, 2, 3).unwrap())
        );
        assert_eq!(ldata.npdu.as_slice(), &[0x00, 0x81]);
        assert_eq!(cemi.priority(), Priority::Low);
    }

    #[test]
    fn test_parse_with_additional_info() {
        let data = [
            0x11, // L_Data.req
            0x04, // 4 bytes of additional info
            0xAA, 0xBB, 0xCC, 0xDD, // additional info (skipped)
            0xBC, 0xE0, 0x11, 0x01, 0x0A, 0x03, 0x01, 0x00, 0x80,
        ];
        let cemi = Cemi::parse(&data).unwrap();
        assert_eq!(cemi.code(), MessageCode::LDataReq);
        assert_eq!(cemi.ldata().npdu.as_slice(), &[0x00, 0x80]);
    }

    #[test]
    fn test_round_trip() {
        let ldata = LData::group(
            IndividualAddress::new(1, 2, 250).unwrap(),
            GroupAddress::new(5, 6, 7).unwrap(),
            Priority::Urgent,
            &[0x00, 0x00],
        )
        .unwrap();
        let cemi = Cemi::LDataInd(ldata);
        let encoded = cemi.encode().unwrap();
        assert_eq!(Cemi::parse(&encoded).unwrap(), cemi);
    }

    #[test]
    fn test_parse_unknown_message_code() {
        let data = [0xFF, 0x00, 0xBC, 0xE0, 0x11, 0x01, 0x0A, 0x03, 0x01, 0x00, 0x80];
        assert_eq!(
            Cemi::parse(&data).unwrap_err(),
            KnxError::unknown_message_code()
        );
    }

    #[test]
    fn test_parse_truncated_npdu() {
        let data = [
            0x29, 0x00, 0xBC, 0xE0, 0x11, 0x01, 0x0A, 0x03,
            0x05, // claims 5 octets after TPCI
            0x00, 0x80,
        ];
        assert!(Cemi::parse(&data).is_err());
    }

    #[test]
    fn test_parse_too_small() {
        assert!(Cemi::parse(&[0x29, 0x00]).is_err());
    }
}
