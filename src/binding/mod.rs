//! The group-object / datapoint binding layer and device composition.
//!
//! This is the "ETS" side of the crate: datapoints and group objects are
//! declared on functional blocks, blocks are gathered into devices, and
//! [`Ets::weave`] resolves every group object against the GAD map and
//! attaches the result to the stack.

pub mod datapoint;
pub mod device;
pub mod ets;
pub mod functional_block;
pub mod gad_map;
pub mod group_object;

pub use datapoint::{AccessMode, Datapoint, DatapointSpec};
pub use device::{Device, DeviceState};
pub use ets::Ets;
pub use functional_block::{
    Condition, DatapointEvent, FunctionalBlock, FunctionalBlockBuilder, HandlerSpec,
};
pub use gad_map::GadMap;
pub use group_object::{Flags, GroupObject, GroupObjectSpec};
