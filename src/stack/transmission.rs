//! Outbound transmission envelope.
//!
//! An encoded cEMI frame travelling the outbound queue together with its
//! confirmation latch. The requesting thread blocks in [`Transmission::wait`];
//! the transmit thread resolves the latch exactly once. If the timeout wins
//! the race, the waiter claims the slot with `ConfirmTimeout` and any later
//! resolution is ignored.

use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

use crate::protocol::constants::MAX_CEMI_SIZE;
use crate::protocol::Priority;

/// Outcome of a link-layer data request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransmissionResult {
    /// The frame went out on the wire.
    Ok,
    /// No confirmation within the configured timeout.
    ConfirmTimeout,
    /// The stack stopped before the frame was sent.
    Cancelled,
    /// The send failed (socket error, encode error, backpressure).
    SendFailed,
}

/// An outbound frame plus its confirmation latch.
#[derive(Debug)]
pub struct Transmission {
    frame: heapless::Vec<u8, MAX_CEMI_SIZE>,
    priority: Priority,
    result: Mutex<Option<TransmissionResult>>,
    cond: Condvar,
}

impl Transmission {
    /// Wrap an encoded cEMI frame.
    pub fn new(frame: heapless::Vec<u8, MAX_CEMI_SIZE>, priority: Priority) -> Self {
        Self {
            frame,
            priority,
            result: Mutex::new(None),
            cond: Condvar::new(),
        }
    }

    /// The encoded cEMI bytes.
    pub fn frame(&self) -> &[u8] {
        &self.frame
    }

    /// Queueing priority.
    pub const fn priority(&self) -> Priority {
        self.priority
    }

    /// Resolve the latch. The first resolution wins; later calls are no-ops.
    pub fn resolve(&self, result: TransmissionResult) {
        let mut slot = self.result.lock().expect("transmission lock poisoned");
        if slot.is_none() {
            *slot = Some(result);
            drop(slot);
            self.cond.notify_all();
        }
    }

    /// Block until resolved or until `timeout` elapses.
    ///
    /// On timeout the slot is claimed with `ConfirmTimeout` so the envelope
    /// cannot be resolved twice.
    pub fn wait(&self, timeout: Duration) -> TransmissionResult {
        let deadline = Instant::now() + timeout;
        let mut slot = self.result.lock().expect("transmission lock poisoned");
        loop {
            if let Some(result) = *slot {
                return result;
            }
            let now = Instant::now();
            if now >= deadline {
                *slot = Some(TransmissionResult::ConfirmTimeout);
                return TransmissionResult::ConfirmTimeout;
            }
            let (guard, _) = self
                .cond
                .wait_timeout(slot, deadline - now)
                .expect("transmission lock poisoned");
            slot = guard;
        }
    }

    /// Peek at the result without blocking.
    pub fn result(&self) -> Option<TransmissionResult> {
        *self.result.lock().expect("transmission lock poisoned")
    }
}
