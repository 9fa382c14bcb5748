//! # knx-weave
//!
//! A host-side KNX stack: KNXnet/IP routing multicast at the bottom, a
//! functional-block runtime at the top. A process using this crate joins
//! the bus as one or more virtual KNX devices whose application logic
//! reacts to datapoint changes and scheduled triggers.
//!
//! ## Layers
//!
//! - `protocol` / `stack` - cEMI framing, the four-class priority queues,
//!   and the link/network/transport/application services with their
//!   worker threads.
//! - `dpt` - datapoint type codecs (boolean, scaled 8-bit, KNX float16,
//!   IEEE float32, ...), resolved by identifier.
//! - `binding` - datapoints, group objects with C/R/W/T/U flags, the GAD
//!   map, and the weave that ties blocks to the stack.
//! - `services` - the change notifier and the periodic scheduler.
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::atomic::AtomicBool;
//! use knx_weave::{
//!     AccessMode, Condition, Device, Ets, FunctionalBlock, GadMap, Notifier,
//!     Priority, Scheduler, Settings, Value,
//! };
//!
//! fn main() -> knx_weave::Result<()> {
//!     let fb = FunctionalBlock::builder("alert")
//!         .datapoint("temp_1", "9.001", AccessMode::Input, Value::Float(19.0))
//!         .group_object("temp_1", "CWU", Priority::Low)
//!         .on_datapoint("temp_1", Condition::Change, |_, event| {
//!             println!("{} -> {}", event.old_value, event.new_value);
//!         })
//!         .build()?;
//!
//!     let gad_map = GadMap::parse("temp_1 = 1/2/3\n")?;
//!     let ets = Ets::new(gad_map, Notifier::new());
//!     let device = Device::new(
//!         "demo",
//!         "1.1.1".parse()?,
//!         Settings::default(),
//!         ets.clone(),
//!         Scheduler::new(),
//!     );
//!     device.add_block(fb)?;
//!
//!     ets.register(&device)?;
//!     ets.weave(&device)?;
//!     device.start()?;
//!     device.main_loop(&AtomicBool::new(false));
//!     device.stop();
//!     Ok(())
//! }
//! ```

pub mod addressing;
pub mod binding;
pub mod dpt;
pub mod error;
pub mod protocol;
pub mod runner;
pub mod services;
pub mod settings;
pub mod stack;

// Re-export the types most applications touch
pub use addressing::{AddressStyle, GroupAddress, IndividualAddress};
pub use binding::{
    AccessMode, Condition, DatapointEvent, Device, DeviceState, Ets, Flags, FunctionalBlock,
    GadMap,
};
pub use dpt::{DptId, DptXlator, Value};
pub use error::{KnxError, Result};
pub use protocol::Priority;
pub use services::{Notifier, Scheduler};
pub use settings::Settings;
pub use stack::{Stack, TransmissionResult};
