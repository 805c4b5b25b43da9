//! Single-agent streaming: wire protocol and session controller.

pub mod protocol;
pub mod session;

pub use session::{StreamOptions, StreamSession, StreamStatus, StreamUpdate};
