//! Devices: containers of functional blocks with one individual address.
//!
//! Lifecycle: `Created -> Registered -> Woven -> Running -> Stopping ->
//! Stopped`, with no skipping. Registration and weaving are driven through
//! [`Ets`]; `start` brings up the stack threads and the scheduler;
//! `main_loop` blocks until stopped or an external shutdown flag is set.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use log::{info, warn};

use crate::addressing::IndividualAddress;
use crate::binding::ets::Ets;
use crate::binding::functional_block::FunctionalBlock;
use crate::error::{KnxError, Result};
use crate::services::scheduler::Scheduler;
use crate::settings::Settings;
use crate::stack::Stack;

/// Device lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceState {
    /// Constructed, blocks may still be added.
    Created,
    /// Blocks are in the registry.
    Registered,
    /// Bindings are installed.
    Woven,
    /// Stack threads and scheduler are up.
    Running,
    /// Stop in progress.
    Stopping,
    /// Stopped; terminal.
    Stopped,
}

/// A virtual KNX device.
pub struct Device {
    name: String,
    individual_address: IndividualAddress,
    blocks: Mutex<Vec<Arc<FunctionalBlock>>>,
    stack: Arc<Stack>,
    ets: Arc<Ets>,
    scheduler: Arc<Scheduler>,
    state: Mutex<DeviceState>,
    state_changed: Condvar,
}

impl Device {
    /// Create a device and wire (but do not start) its stack.
    pub fn new(
        name: impl Into<String>,
        individual_address: IndividualAddress,
        settings: Settings,
        ets: Arc<Ets>,
        scheduler: Arc<Scheduler>,
    ) -> Self {
        if individual_address.is_null() {
            warn!("device individual address is null");
        }
        Self {
            name: name.into(),
            individual_address,
            blocks: Mutex::new(Vec::new()),
            stack: Arc::new(Stack::new(settings, individual_address)),
            ets,
            scheduler,
            state: Mutex::new(DeviceState::Created),
            state_changed: Condvar::new(),
        }
    }

    /// Device name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The device's individual address.
    pub const fn individual_address(&self) -> IndividualAddress {
        self.individual_address
    }

    /// The device's stack.
    pub const fn stack(&self) -> &Arc<Stack> {
        &self.stack
    }

    /// The binding service this device registers with.
    pub const fn ets(&self) -> &Arc<Ets> {
        &self.ets
    }

    /// The scheduler started alongside the stack.
    pub const fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    /// Current lifecycle state.
    pub fn state(&self) -> DeviceState {
        *self.state.lock().expect("device state poisoned")
    }

    /// Add a functional block. Only possible before registration.
    ///
    /// # Errors
    ///
    /// `ConfigErrorKind::DuplicateBlock` for a name already owned by this
    /// device, `ConfigErrorKind::BadState` after registration.
    pub fn add_block(&self, fb: Arc<FunctionalBlock>) -> Result<()> {
        if self.state() != DeviceState::Created {
            return Err(KnxError::bad_state("blocks must be added before register"));
        }
        let mut blocks = self.blocks.lock().expect("block list poisoned");
        if blocks.iter().any(|b| b.name() == fb.name()) {
            return Err(KnxError::duplicate_block(fb.name()));
        }
        blocks.push(fb);
        Ok(())
    }

    /// Snapshot of the device's blocks.
    pub fn blocks(&self) -> Vec<Arc<FunctionalBlock>> {
        self.blocks.lock().expect("block list poisoned").clone()
    }

    /// Find a block by name.
    pub fn block(&self, name: &str) -> Option<Arc<FunctionalBlock>> {
        self.blocks
            .lock()
            .expect("block list poisoned")
            .iter()
            .find(|fb| fb.name() == name)
            .cloned()
    }

    pub(crate) fn transition(&self, from: DeviceState, to: DeviceState) -> Result<()> {
        let mut state = self.state.lock().expect("device state poisoned");
        if *state != from {
            return Err(KnxError::bad_state(format!(
                "device {}: {from:?} -> {to:?} while {:?}",
                self.name, *state
            )));
        }
        *state = to;
        drop(state);
        self.state_changed.notify_all();
        Ok(())
    }

    /// Bring the device up: stack threads, then scheduler.
    ///
    /// # Errors
    ///
    /// `ConfigErrorKind::BadState` unless woven; transceiver errors are
    /// fatal and leave the device woven.
    pub fn start(&self) -> Result<()> {
        if self.state() != DeviceState::Woven {
            return Err(KnxError::bad_state("start requires a woven device"));
        }
        self.stack.start()?;
        self.scheduler.start();
        self.transition(DeviceState::Woven, DeviceState::Running)?;
        info!("device {} running as {}", self.name, self.individual_address);
        Ok(())
    }

    /// Block until the device leaves `Running` or `shutdown` is set.
    ///
    /// The flag is polled a few times per second so a signal handler
    /// only has to store `true`.
    pub fn main_loop(&self, shutdown: &AtomicBool) {
        let mut state = self.state.lock().expect("device state poisoned");
        while *state == DeviceState::Running && !shutdown.load(Ordering::Relaxed) {
            let (guard, _) = self
                .state_changed
                .wait_timeout(state, Duration::from_millis(200))
                .expect("device state poisoned");
            state = guard;
        }
    }

    /// Stop cooperatively: scheduler first, then the stack (queues close,
    /// pending transmissions cancel, threads join). Idempotent.
    pub fn stop(&self) {
        {
            let mut state = self.state.lock().expect("device state poisoned");
            if !matches!(*state, DeviceState::Running) {
                return;
            }
            *state = DeviceState::Stopping;
        }
        self.state_changed.notify_all();

        self.scheduler.stop();
        self.stack.stop();

        *self.state.lock().expect("device state poisoned") = DeviceState::Stopped;
        self.state_changed.notify_all();
        info!("device {} stopped", self.name);
    }

    /// Release the device's bindings. The sockets themselves are released
    /// when `stop` joins the transceiver threads.
    pub fn shutdown(&self) {
        self.ets.unweave(self);
    }
}

impl std::fmt::Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device")
            .field("name", &self.name)
            .field("individual_address", &self.individual_address)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}
