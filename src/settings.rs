//! Process-wide stack settings.
//!
//! One [`Settings`] value is built at startup and handed to every component
//! that needs it. There is deliberately no global: tests construct their own
//! copies with whatever timeouts and distributions they need.

use std::net::Ipv4Addr;
use std::time::Duration;

use crate::addressing::AddressStyle;

/// Default KNXnet/IP routing multicast group.
pub const DEFAULT_MULTICAST_ADDR: Ipv4Addr = Ipv4Addr::new(224, 0, 23, 12);

/// Default KNXnet/IP port.
pub const DEFAULT_MULTICAST_PORT: u16 = 3671;

/// Stack configuration.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Group address formatting, 2- or 3-level.
    pub address_style: AddressStyle,
    /// Routing multicast group.
    pub multicast_addr: Ipv4Addr,
    /// Routing UDP port.
    pub multicast_port: u16,
    /// Multicast TTL for the transmit socket.
    pub ttl: u32,
    /// Whether transmitted datagrams loop back to the local host.
    pub loopback: bool,
    /// Library log level.
    pub logger_level: log::LevelFilter,
    /// How long `data_req` waits for a confirmation.
    pub confirm_timeout: Duration,
    /// Weighted-round-robin distribution `[system, urgent, normal, low]`.
    pub priority_distribution: [u32; 4],
    /// Per-queue item bound; beyond it the lowest class is dropped first.
    pub queue_high_water: usize,
    /// Receive socket timeout; bounds how fast threads notice a stop.
    pub socket_timeout: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            address_style: AddressStyle::ThreeLevel,
            multicast_addr: DEFAULT_MULTICAST_ADDR,
            multicast_port: DEFAULT_MULTICAST_PORT,
            ttl: 32,
            loopback: false,
            logger_level: log::LevelFilter::Info,
            confirm_timeout: Duration::from_secs(3),
            priority_distribution: [8, 4, 2, 1],
            queue_high_water: 256,
            socket_timeout: Duration::from_secs(1),
        }
    }
}

impl Settings {
    /// Parse a logger level name (`trace`..`error`).
    pub fn parse_logger_level(name: &str) -> Option<log::LevelFilter> {
        match name {
            "trace" => Some(log::LevelFilter::Trace),
            "debug" => Some(log::LevelFilter::Debug),
            "info" => Some(log::LevelFilter::Info),
            "warning" | "warn" => Some(log::LevelFilter::Warn),
            "error" => Some(log::LevelFilter::Error),
            _ => None,
        }
    }
}
