//! Multi-agent roundtable: wire protocol and controller.

pub mod controller;
pub mod protocol;

pub use controller::{Roundtable, RoundtableStatus, RoundtableUpdate};
