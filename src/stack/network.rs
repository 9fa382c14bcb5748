//! Network-layer (N) group data service.
//!
//! A thin layer: inbound it accepts only group-addressed indications,
//! decrements the hop count and passes the NSDU up; outbound it builds
//! the cEMI body with the group defaults (hop count 6) and hands it to
//! the link layer.

use std::sync::{Arc, RwLock, Weak};

use log::debug;

use crate::addressing::{GroupAddress, IndividualAddress};
use crate::protocol::{Cemi, LData, Priority};
use crate::stack::link::{LinkDataListener, LinkDataService};
use crate::stack::transmission::TransmissionResult;

/// Upward listener for inbound network-layer group data.
pub trait NetworkGroupDataListener: Send + Sync {
    /// Group data arrived; `nsdu` is the TPDU (TPCI octet onward).
    fn group_data_ind(
        &self,
        source: IndividualAddress,
        gad: GroupAddress,
        priority: Priority,
        nsdu: &[u8],
    );
}

/// Network-layer group data service.
pub struct NetworkGroupDataService {
    link: Arc<LinkDataService>,
    listener: RwLock<Option<Weak<dyn NetworkGroupDataListener>>>,
}

impl NetworkGroupDataService {
    /// Create the service above a link layer.
    pub fn new(link: Arc<LinkDataService>) -> Self {
        Self {
            link,
            listener: RwLock::new(None),
        }
    }

    /// Install the upward listener (the transport layer).
    pub fn set_listener(&self, listener: Weak<dyn NetworkGroupDataListener>) {
        *self.listener.write().expect("listener lock poisoned") = Some(listener);
    }

    /// Send an NSDU to a group address.
    pub fn group_data_req(
        &self,
        gad: GroupAddress,
        priority: Priority,
        nsdu: &[u8],
    ) -> TransmissionResult {
        // Source is stamped by the link layer
        let ldata = match LData::group(IndividualAddress::null(), gad, priority, nsdu) {
            Ok(ldata) => ldata,
            Err(err) => {
                debug!("group_data_req: oversized NSDU: {err}");
                return TransmissionResult::SendFailed;
            }
        };
        self.link.data_req(Cemi::LDataReq(ldata))
    }
}

impl LinkDataListener for NetworkGroupDataService {
    fn data_ind(&self, cemi: &Cemi) {
        let ldata = cemi.ldata();
        let Some(gad) = ldata.destination_group() else {
            debug!("individually addressed frame dropped at network layer");
            return;
        };

        // Hop accounting only; a saturated count still reaches local objects
        let _hops_left = ldata.ctrl2.hop_count().saturating_sub(1);

        let listener = self
            .listener
            .read()
            .expect("listener lock poisoned")
            .as_ref()
            .and_then(Weak::upgrade);
        if let Some(listener) = listener {
            listener.group_data_ind(ldata.source, gad, ldata.priority(), &ldata.npdu);
        }
    }
}

impl std::fmt::Debug for NetworkGroupDataService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetworkGroupDataService").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use crate::settings::Settings;

    struct Recorder {
        seen: Mutex<Vec<(IndividualAddress, GroupAddress, Priority, Vec<u8>)>>,
    }

    impl NetworkGroupDataListener for Recorder {
        fn group_data_ind(
            &self,
            source: IndividualAddress,
            gad: GroupAddress,
            priority: Priority,
            nsdu: &[u8],
        ) {
            self.seen
                .lock()
                .unwrap()
                .push((source, gad, priority, nsdu.to_vec()));
        }
    }

    fn setup() -> (Arc<NetworkGroupDataService>, Arc<Recorder>) {
        let link = Arc::new(LinkDataService::new(
            &Settings::default(),
            IndividualAddress::new(1, 1, 1).unwrap(),
        ));
        let network = Arc::new(NetworkGroupDataService::new(link));
        let recorder = Arc::new(Recorder {
            seen: Mutex::new(Vec::new()),
        });
        network.set_listener(Arc::downgrade(&recorder) as Weak<dyn NetworkGroupDataListener>);
        (network, recorder)
    }

    #[test]
    fn test_group_indication_goes_up() {
        let (network, recorder) = setup();
        let src = IndividualAddress::new(2, 3, 4).unwrap();
        let gad = GroupAddress::new(1, 2, 3).unwrap();
        let cemi = Cemi::LDataInd(
            LData::group(src, gad, Priority::Urgent, &[0x00, 0x80, 0x2A]).unwrap(),
        );

        network.data_ind(&cemi);
        let seen = recorder.seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        let (s, g, p, nsdu) = &seen[0];
        assert_eq!(*s, src);
        assert_eq!(*g, gad);
        assert_eq!(*p, Priority::Urgent);
        assert_eq!(nsdu.as_slice(), &[0x00, 0x80, 0x2A]);
    }

    #[test]
    fn test_individually_addressed_dropped() {
        let (network, recorder) = setup();
        let mut ldata = LData::group(
            IndividualAddress::new(2, 3, 4).unwrap(),
            GroupAddress::new(1, 2, 3).unwrap(),
            Priority::Low,
            &[0x00, 0x80],
        )
        .unwrap();
        ldata.ctrl2 = crate::protocol::ControlField2::new(false, 6, 0);

        network.data_ind(&Cemi::LDataInd(ldata));
        assert!(recorder.seen.lock().unwrap().is_empty());
    }
}
