//! KNXnet/IP and cEMI protocol encoding.
//!
//! Only the routing flavour of KNXnet/IP is implemented: cEMI `L_Data`
//! frames wrapped in a `ROUTING_INDICATION` header and multicast to the
//! bus group.

pub mod cemi;
pub mod constants;
pub mod frame;

pub use cemi::{Cemi, ControlField1, ControlField2, LData};
pub use constants::{MessageCode, Priority};
pub use frame::RoutingHeader;
