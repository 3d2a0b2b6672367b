//! procpipe core - platform-independent session machinery
//!
//! This crate provides byte channels, stream pumps, the process session with
//! its single exit outcome, session chaining, and the launcher traits that
//! platform crates implement.

mod chain;
mod channel;
mod config;
mod error;
mod outcome;
mod process;
mod pump;
mod session;

#[cfg(test)]
mod test_support;

pub use channel::*;
pub use config::*;
pub use error::*;
pub use outcome::*;
pub use process::*;
pub use pump::{pump_input, pump_output};
pub use session::*;

// Re-export the types that appear in the public API
pub use tokio_util::bytes::Bytes;
pub use tokio_util::sync::CancellationToken;
