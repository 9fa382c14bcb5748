//! The layered protocol stack.
//!
//! Construction wires the layers bottom-up: link, network, transport,
//! application. Downward references are owning (`Arc`); upward listeners
//! are weak, so a stopped stack tears down without cycles. The binding
//! layer installs itself as the application layer's listener at weave.
//!
//! [`Stack::new`] builds everything but opens no sockets; that makes the
//! whole pipeline drivable in tests through
//! [`LinkDataService::put_in_frame`], [`LinkDataService::run_once`] and
//! [`LinkDataService::try_out_frame`]. [`Stack::start`] opens the
//! transceiver and spawns the three stack threads.

pub mod application;
pub mod link;
pub mod network;
pub mod queue;
pub mod transceiver;
pub mod transmission;
pub mod transport;

pub use application::{ApplicationGroupDataService, GroupValueListener};
pub use link::{LinkDataListener, LinkDataService};
pub use network::{NetworkGroupDataListener, NetworkGroupDataService};
pub use queue::{PriorityQueue, QueueError};
pub use transceiver::Transceiver;
pub use transmission::{Transmission, TransmissionResult};
pub use transport::{TransportGroupDataListener, TransportGroupDataService};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::thread::JoinHandle;

use log::{debug, info};

use crate::addressing::IndividualAddress;
use crate::error::{KnxError, Result};
use crate::settings::Settings;

/// The assembled four-layer stack of one device.
pub struct Stack {
    settings: Settings,
    link: Arc<LinkDataService>,
    network: Arc<NetworkGroupDataService>,
    transport: Arc<TransportGroupDataService>,
    application: Arc<ApplicationGroupDataService>,
    running: Arc<AtomicBool>,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl Stack {
    /// Wire the layers for the given individual address. No sockets yet.
    pub fn new(settings: Settings, individual_address: IndividualAddress) -> Self {
        let link = Arc::new(LinkDataService::new(&settings, individual_address));

        let network = Arc::new(NetworkGroupDataService::new(Arc::clone(&link)));
        link.set_listener(Arc::downgrade(&network) as Weak<dyn LinkDataListener>);

        let transport = Arc::new(TransportGroupDataService::new(Arc::clone(&network)));
        network.set_listener(Arc::downgrade(&transport) as Weak<dyn NetworkGroupDataListener>);

        let application = Arc::new(ApplicationGroupDataService::new(Arc::clone(&transport)));
        transport.set_listener(Arc::downgrade(&application) as Weak<dyn TransportGroupDataListener>);

        Self {
            settings,
            link,
            network,
            transport,
            application,
            running: Arc::new(AtomicBool::new(false)),
            threads: Mutex::new(Vec::new()),
        }
    }

    /// The stack's settings.
    pub const fn settings(&self) -> &Settings {
        &self.settings
    }

    /// The device's individual address.
    pub fn individual_address(&self) -> IndividualAddress {
        self.link.individual_address()
    }

    /// The link layer.
    pub const fn link(&self) -> &Arc<LinkDataService> {
        &self.link
    }

    /// The network layer.
    pub const fn network(&self) -> &Arc<NetworkGroupDataService> {
        &self.network
    }

    /// The transport layer.
    pub const fn transport(&self) -> &Arc<TransportGroupDataService> {
        &self.transport
    }

    /// The application layer, where the binding layer attaches.
    pub const fn application(&self) -> &Arc<ApplicationGroupDataService> {
        &self.application
    }

    /// Whether the stack threads are up.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// Open the transceiver and spawn the stack threads.
    ///
    /// # Errors
    ///
    /// Socket failures are fatal here; `ConfigErrorKind::BadState` if
    /// already started or previously stopped.
    pub fn start(&self) -> Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(KnxError::bad_state("stack already running"));
        }

        let transceiver = match Transceiver::open(&self.settings) {
            Ok(transceiver) => transceiver,
            Err(err) => {
                self.running.store(false, Ordering::SeqCst);
                return Err(err);
            }
        };

        let (rx, tx) = transceiver.spawn(Arc::clone(&self.running), Arc::clone(&self.link));

        let worker_link = Arc::clone(&self.link);
        let worker = std::thread::Builder::new()
            .name("knx-link".into())
            .spawn(move || {
                while worker_link.run_once() {}
                debug!("link worker ended");
            })
            .expect("spawn link worker");

        let mut threads = self.threads.lock().expect("thread list poisoned");
        threads.extend([rx, tx, worker]);

        info!(
            "stack up: {} on {}:{}",
            self.individual_address(),
            self.settings.multicast_addr,
            self.settings.multicast_port
        );
        Ok(())
    }

    /// Stop cooperatively: clear the running flag, close the queues
    /// (pending transmissions resolve `Cancelled`) and join all threads.
    ///
    /// The receive thread notices within one socket timeout. Idempotent.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.link.close();

        let handles: Vec<_> = self
            .threads
            .lock()
            .expect("thread list poisoned")
            .drain(..)
            .collect();
        for handle in handles {
            if handle.join().is_err() {
                log::error!("stack thread panicked");
            }
        }
        debug!("stack stopped");
    }
}

impl std::fmt::Debug for Stack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stack")
            .field("individual_address", &self.individual_address())
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}
