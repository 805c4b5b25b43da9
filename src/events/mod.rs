//! Session telemetry subscription: wire protocol, backoff and channel.

pub mod backoff;
pub mod channel;
pub mod protocol;

pub use channel::{ChannelStatus, ChannelUpdate, EventChannel};
pub use protocol::EventFilters;
