//! Domain model module declarations.

pub mod approval;
pub mod event;
pub mod message;
pub mod roundtable;
