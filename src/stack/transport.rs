//! Transport-layer (T) group data service.
//!
//! Group communication is connectionless: the TPCI is always the
//! unnumbered-data form (two high bits `00`, the rest zero except for the
//! APCI bits sharing the octet). Inbound, anything else is dropped here.

use std::sync::{Arc, RwLock, Weak};

use log::debug;

use crate::addressing::{GroupAddress, IndividualAddress};
use crate::protocol::Priority;
use crate::stack::network::{NetworkGroupDataListener, NetworkGroupDataService};
use crate::stack::transmission::TransmissionResult;

/// TPCI mask for the transport control bits of octet 0.
const TPCI_MASK: u8 = 0xC0;

/// Unnumbered data TPCI pattern.
const TPCI_UNNUMBERED_DATA: u8 = 0x00;

/// Upward listener for inbound transport-layer group data.
pub trait TransportGroupDataListener: Send + Sync {
    /// Group data arrived; `tsdu` starts at the TPCI/APCI octet.
    fn group_data_ind(
        &self,
        source: IndividualAddress,
        gad: GroupAddress,
        priority: Priority,
        tsdu: &[u8],
    );
}

/// Transport-layer group data service.
pub struct TransportGroupDataService {
    network: Arc<NetworkGroupDataService>,
    listener: RwLock<Option<Weak<dyn TransportGroupDataListener>>>,
}

impl TransportGroupDataService {
    /// Create the service above a network layer.
    pub fn new(network: Arc<NetworkGroupDataService>) -> Self {
        Self {
            network,
            listener: RwLock::new(None),
        }
    }

    /// Install the upward listener (the application layer).
    pub fn set_listener(&self, listener: Weak<dyn TransportGroupDataListener>) {
        *self.listener.write().expect("listener lock poisoned") = Some(listener);
    }

    /// Send a TSDU to a group address, applying the TPCI bits to octet 0.
    pub fn group_data_req(
        &self,
        gad: GroupAddress,
        priority: Priority,
        tsdu: &[u8],
    ) -> TransmissionResult {
        let mut nsdu = [0u8; crate::protocol::constants::MAX_NPDU];
        if tsdu.is_empty() || tsdu.len() > nsdu.len() {
            debug!("group_data_req: bad TSDU length {}", tsdu.len());
            return TransmissionResult::SendFailed;
        }
        nsdu[..tsdu.len()].copy_from_slice(tsdu);
        nsdu[0] = (nsdu[0] & !TPCI_MASK) | TPCI_UNNUMBERED_DATA;
        self.network.group_data_req(gad, priority, &nsdu[..tsdu.len()])
    }
}

impl NetworkGroupDataListener for TransportGroupDataService {
    fn group_data_ind(
        &self,
        source: IndividualAddress,
        gad: GroupAddress,
        priority: Priority,
        nsdu: &[u8],
    ) {
        let Some(&tpci) = nsdu.first() else {
            debug!("empty NSDU dropped at transport layer");
            return;
        };
        if tpci & TPCI_MASK != TPCI_UNNUMBERED_DATA {
            debug!("non group-data TPCI 0x{tpci:02X} dropped");
            return;
        }

        let listener = self
            .listener
            .read()
            .expect("listener lock poisoned")
            .as_ref()
            .and_then(Weak::upgrade);
        if let Some(listener) = listener {
            listener.group_data_ind(source, gad, priority, nsdu);
        }
    }
}

impl std::fmt::Debug for TransportGroupDataService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportGroupDataService").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use crate::settings::Settings;
    use crate::stack::link::LinkDataService;

    struct Recorder {
        seen: Mutex<Vec<Vec<u8>>>,
    }

    impl TransportGroupDataListener for Recorder {
        fn group_data_ind(
            &self,
            _source: IndividualAddress,
            _gad: GroupAddress,
            _priority: Priority,
            tsdu: &[u8],
        ) {
            self.seen.lock().unwrap().push(tsdu.to_vec());
        }
    }

    fn setup() -> (Arc<TransportGroupDataService>, Arc<Recorder>) {
        let link = Arc::new(LinkDataService::new(
            &Settings::default(),
            IndividualAddress::new(1, 1, 1).unwrap(),
        ));
        let network = Arc::new(NetworkGroupDataService::new(link));
        let transport = Arc::new(TransportGroupDataService::new(network));
        let recorder = Arc::new(Recorder {
            seen: Mutex::new(Vec::new()),
        });
        transport.set_listener(Arc::downgrade(&recorder) as Weak<dyn TransportGroupDataListener>);
        (transport, recorder)
    }

    #[test]
    fn test_unnumbered_data_passes() {
        let (transport, recorder) = setup();
        transport.group_data_ind(
            IndividualAddress::new(2, 2, 2).unwrap(),
            GroupAddress::new(1, 2, 3).unwrap(),
            Priority::Low,
            &[0x00, 0x81],
        );
        assert_eq!(recorder.seen.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_control_tpci_dropped() {
        let (transport, recorder) = setup();
        // 0x80 = unnumbered control (T_Connect)
        transport.group_data_ind(
            IndividualAddress::new(2, 2, 2).unwrap(),
            GroupAddress::new(1, 2, 3).unwrap(),
            Priority::Low,
            &[0x80],
        );
        // 0x40 = numbered data
        transport.group_data_ind(
            IndividualAddress::new(2, 2, 2).unwrap(),
            GroupAddress::new(1, 2, 3).unwrap(),
            Priority::Low,
            &[0x44, 0x81],
        );
        assert!(recorder.seen.lock().unwrap().is_empty());
    }
}
