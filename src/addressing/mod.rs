//! KNX addressing: individual addresses and group addresses.
//!
//! Both address kinds are 16-bit values with structured text forms.
//! Group addresses render in either 2-level or 3-level notation; the
//! choice is an [`AddressStyle`] fixed per process at startup.

pub mod group;
pub mod individual;

pub use group::{AddressStyle, GroupAddress};
pub use individual::IndividualAddress;
