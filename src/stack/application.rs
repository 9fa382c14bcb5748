//! Application-layer (A) group data service: the APCI codec.
//!
//! The APCI is 10 bits wide, split across the NPDU's first two octets:
//! bits 9-8 live in the low two bits of the TPCI octet, bits 7-6 in the
//! high bits of the second octet. For the group-value services:
//!
//! - `GroupValue_Read`     = 0x000
//! - `GroupValue_Response` = 0x040
//! - `GroupValue_Write`    = 0x080
//!
//! Payloads up to 6 bits pack into the low bits of the APCI octet;
//! larger payloads follow as plain octets.

use std::sync::{Arc, RwLock, Weak};

use log::{debug, warn};

use crate::addressing::{GroupAddress, IndividualAddress};
use crate::dpt::GroupData;
use crate::protocol::constants::MAX_NPDU;
use crate::protocol::Priority;
use crate::stack::transmission::TransmissionResult;
use crate::stack::transport::{TransportGroupDataListener, TransportGroupDataService};

/// `A_GroupValue_Read` APCI.
pub const APCI_GROUP_VALUE_READ: u16 = 0x000;
/// `A_GroupValue_Response` APCI.
pub const APCI_GROUP_VALUE_RESPONSE: u16 = 0x040;
/// `A_GroupValue_Write` APCI.
pub const APCI_GROUP_VALUE_WRITE: u16 = 0x080;

/// Upward listener for decoded group-value services (the binding layer).
pub trait GroupValueListener: Send + Sync {
    /// Inbound `GroupValue_Write`.
    fn group_value_write_ind(
        &self,
        source: IndividualAddress,
        gad: GroupAddress,
        priority: Priority,
        data: &GroupData,
    );

    /// Inbound `GroupValue_Read`.
    fn group_value_read_ind(&self, source: IndividualAddress, gad: GroupAddress, priority: Priority);

    /// Inbound `GroupValue_Response`.
    fn group_value_response_ind(
        &self,
        source: IndividualAddress,
        gad: GroupAddress,
        priority: Priority,
        data: &GroupData,
    );
}

/// Application-layer group data service.
pub struct ApplicationGroupDataService {
    transport: Arc<TransportGroupDataService>,
    listener: RwLock<Option<Weak<dyn GroupValueListener>>>,
}

impl ApplicationGroupDataService {
    /// Create the service above a transport layer.
    pub fn new(transport: Arc<TransportGroupDataService>) -> Self {
        Self {
            transport,
            listener: RwLock::new(None),
        }
    }

    /// Install the upward listener (the binding layer).
    pub fn set_listener(&self, listener: Weak<dyn GroupValueListener>) {
        *self.listener.write().expect("listener lock poisoned") = Some(listener);
    }

    /// Send a `GroupValue_Write`.
    pub fn group_value_write_req(
        &self,
        gad: GroupAddress,
        priority: Priority,
        data: &GroupData,
    ) -> TransmissionResult {
        self.send(APCI_GROUP_VALUE_WRITE, gad, priority, Some(data))
    }

    /// Send a `GroupValue_Read`.
    pub fn group_value_read_req(&self, gad: GroupAddress, priority: Priority) -> TransmissionResult {
        self.send(APCI_GROUP_VALUE_READ, gad, priority, None)
    }

    /// Send a `GroupValue_Response`.
    pub fn group_value_response_req(
        &self,
        gad: GroupAddress,
        priority: Priority,
        data: &GroupData,
    ) -> TransmissionResult {
        self.send(APCI_GROUP_VALUE_RESPONSE, gad, priority, Some(data))
    }

    fn send(
        &self,
        apci: u16,
        gad: GroupAddress,
        priority: Priority,
        data: Option<&GroupData>,
    ) -> TransmissionResult {
        let mut apdu = [0u8; MAX_NPDU];
        apdu[0] = ((apci >> 8) & 0x03) as u8;
        apdu[1] = (apci & 0xFF) as u8;
        let mut len = 2;

        match data {
            None => {}
            Some(GroupData::Small(value)) => apdu[1] |= value & 0x3F,
            Some(GroupData::Bytes(bytes)) => {
                if 2 + bytes.len() > apdu.len() {
                    warn!("group payload of {} octets does not fit an APDU", bytes.len());
                    return TransmissionResult::SendFailed;
                }
                apdu[2..2 + bytes.len()].copy_from_slice(bytes);
                len += bytes.len();
            }
        }

        self.transport.group_data_req(gad, priority, &apdu[..len])
    }
}

impl TransportGroupDataListener for ApplicationGroupDataService {
    fn group_data_ind(
        &self,
        source: IndividualAddress,
        gad: GroupAddress,
        priority: Priority,
        tsdu: &[u8],
    ) {
        if tsdu.len() < 2 {
            debug!("short APDU ({} octets) dropped", tsdu.len());
            return;
        }

        let apci = (u16::from(tsdu[0] & 0x03) << 8) | u16::from(tsdu[1] & 0xC0);
        let listener = self
            .listener
            .read()
            .expect("listener lock poisoned")
            .as_ref()
            .and_then(Weak::upgrade);
        let Some(listener) = listener else {
            debug!("group value indication with no listener");
            return;
        };

        match apci {
            APCI_GROUP_VALUE_READ => listener.group_value_read_ind(source, gad, priority),
            APCI_GROUP_VALUE_WRITE | APCI_GROUP_VALUE_RESPONSE => {
                let data = if tsdu.len() == 2 {
                    GroupData::Small(tsdu[1] & 0x3F)
                } else {
                    match GroupData::from_slice(&tsdu[2..]) {
                        Ok(data) => data,
                        Err(err) => {
                            warn!("oversized group payload dropped: {err}");
                            return;
                        }
                    }
                };
                if apci == APCI_GROUP_VALUE_WRITE {
                    listener.group_value_write_ind(source, gad, priority, &data);
                } else {
                    listener.group_value_response_ind(source, gad, priority, &data);
                }
            }
            other => debug!("unhandled APCI 0x{other:03X} dropped"),
        }
    }
}

impl std::fmt::Debug for ApplicationGroupDataService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApplicationGroupDataService").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use crate::settings::Settings;
    use crate::stack::link::LinkDataService;
    use crate::stack::network::NetworkGroupDataService;

    #[derive(Debug, PartialEq)]
    enum Seen {
        Write(GroupData),
        Read,
        Response(GroupData),
    }

    struct Recorder {
        seen: Mutex<Vec<Seen>>,
    }

    impl GroupValueListener for Recorder {
        fn group_value_write_ind(
            &self,
            _source: IndividualAddress,
            _gad: GroupAddress,
            _priority: Priority,
            data: &GroupData,
        ) {
            self.seen.lock().unwrap().push(Seen::Write(data.clone()));
        }

        fn group_value_read_ind(
            &self,
            _source: IndividualAddress,
            _gad: GroupAddress,
            _priority: Priority,
        ) {
            self.seen.lock().unwrap().push(Seen::Read);
        }

        fn group_value_response_ind(
            &self,
            _source: IndividualAddress,
            _gad: GroupAddress,
            _priority: Priority,
            data: &GroupData,
        ) {
            self.seen.lock().unwrap().push(Seen::Response(data.clone()));
        }
    }

    fn setup() -> (Arc<ApplicationGroupDataService>, Arc<Recorder>) {
        let link = Arc::new(LinkDataService::new(
            &Settings::default(),
            IndividualAddress::new(1, 1, 1).unwrap(),
        ));
        let network = Arc::new(NetworkGroupDataService::new(link));
        let transport = Arc::new(TransportGroupDataService::new(network));
        let application = Arc::new(ApplicationGroupDataService::new(transport));
        let recorder = Arc::new(Recorder {
            seen: Mutex::new(Vec::new()),
        });
        application.set_listener(Arc::downgrade(&recorder) as Weak<dyn GroupValueListener>);
        (application, recorder)
    }

    fn ind(app: &ApplicationGroupDataService, tsdu: &[u8]) {
        app.group_data_ind(
            IndividualAddress::new(2, 2, 2).unwrap(),
            GroupAddress::new(1, 2, 3).unwrap(),
            Priority::Low,
            tsdu,
        );
    }

    #[test]
    fn test_decode_small_write() {
        let (app, recorder) = setup();
        ind(&app, &[0x00, 0x81]);
        assert_eq!(
            recorder.seen.lock().unwrap()[0],
            Seen::Write(GroupData::Small(0x01))
        );
    }

    #[test]
    fn test_decode_byte_write() {
        let (app, recorder) = setup();
        ind(&app, &[0x00, 0x80, 0x0C, 0x33]);
        assert_eq!(
            recorder.seen.lock().unwrap()[0],
            Seen::Write(GroupData::from_slice(&[0x0C, 0x33]).unwrap())
        );
    }

    #[test]
    fn test_decode_read() {
        let (app, recorder) = setup();
        ind(&app, &[0x00, 0x00]);
        assert_eq!(recorder.seen.lock().unwrap()[0], Seen::Read);
    }

    #[test]
    fn test_decode_response() {
        let (app, recorder) = setup();
        ind(&app, &[0x00, 0x41]);
        assert_eq!(
            recorder.seen.lock().unwrap()[0],
            Seen::Response(GroupData::Small(0x01))
        );
    }

    #[test]
    fn test_unknown_apci_dropped() {
        let (app, recorder) = setup();
        // MemoryRead (0x200): tsdu[0] low bits = 0x02
        ind(&app, &[0x02, 0x00]);
        assert!(recorder.seen.lock().unwrap().is_empty());
    }

    #[test]
    fn test_short_apdu_dropped() {
        let (app, recorder) = setup();
        ind(&app, &[0x00]);
        assert!(recorder.seen.lock().unwrap().is_empty());
    }
}
