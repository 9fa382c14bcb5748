//! Device process orchestration.
//!
//! Drives one device through its lifecycle for an admin tool: `check`
//! registers and weaves, `run` additionally starts the stack and blocks
//! in the main loop until a shutdown flag is raised. Unix daemonization
//! (double fork) is provided for the `--daemon` case.

use std::sync::atomic::AtomicBool;

use log::{info, warn};

use crate::binding::device::{Device, DeviceState};
use crate::error::Result;

/// Orchestrates a device's check/run lifecycle.
#[derive(Debug)]
pub struct DeviceRunner {
    device: Device,
}

impl DeviceRunner {
    /// Wrap a configured device.
    pub const fn new(device: Device) -> Self {
        Self { device }
    }

    /// The wrapped device.
    pub const fn device(&self) -> &Device {
        &self.device
    }

    /// Register and weave as far as the current state requires.
    fn prepare(&self) -> Result<()> {
        if self.device.state() == DeviceState::Created {
            self.device.ets().register(&self.device)?;
        }
        self.device.ets().clone().weave(&self.device)
    }

    /// Weave the device and return the group-object address table.
    ///
    /// # Errors
    ///
    /// Any configuration error found while registering or weaving.
    pub fn check(&self) -> Result<String> {
        self.prepare()?;
        let style = self.device.stack().settings().address_style;
        Ok(self.device.ets().groat(style))
    }

    /// Weave, start, and block until `shutdown` is raised or the device
    /// is stopped from elsewhere; then stop and release everything.
    ///
    /// # Errors
    ///
    /// Configuration errors from the weave, or transceiver errors from
    /// the stack start.
    pub fn run(&self, shutdown: &AtomicBool) -> Result<()> {
        self.prepare()?;
        self.device.start()?;
        info!("entering main loop, interrupt to stop");
        self.device.main_loop(shutdown);
        warn!("device execution cancelled");
        self.device.stop();
        self.device.shutdown();
        Ok(())
    }
}

/// Detach from the controlling terminal: double fork, new session,
/// root working directory, cleared umask.
///
/// # Errors
///
/// The underlying `fork`/`setsid` errno as an [`std::io::Error`].
#[cfg(unix)]
pub fn daemonize() -> std::io::Result<()> {
    // First fork: drop the parent
    match unsafe { libc::fork() } {
        -1 => return Err(std::io::Error::last_os_error()),
        0 => {}
        _ => unsafe { libc::_exit(0) },
    }

    if unsafe { libc::setsid() } == -1 {
        return Err(std::io::Error::last_os_error());
    }

    // Second fork: give up session leadership
    match unsafe { libc::fork() } {
        -1 => return Err(std::io::Error::last_os_error()),
        0 => {}
        _ => unsafe { libc::_exit(0) },
    }

    std::env::set_current_dir("/")?;
    unsafe {
        libc::umask(0);
    }
    Ok(())
}

/// Daemon mode is only available on Unix.
#[cfg(not(unix))]
pub fn daemonize() -> std::io::Result<()> {
    Err(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "daemon mode requires a Unix host",
    ))
}
