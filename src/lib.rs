#![forbid(unsafe_code)]

pub mod approval;
pub mod config;
pub mod errors;
pub mod events;
pub mod models;
pub mod roundtable;
pub mod stream;
pub mod transport;

pub use config::ConsoleConfig;
pub use errors::{AppError, Result};
