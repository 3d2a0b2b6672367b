//! procpipe - asynchronous child process sessions
//!
//! Start a process with [`start`], drain its stdout channel while awaiting
//! [`ProcessSession::wait_exit`], and chain sessions with
//! [`ProcessSession::pipe_to`]. The [`execute`] and [`output`] functions
//! cover the common run-to-completion case.

mod codec;
mod exec;
mod factory;

pub use codec::Utf8Codec;
pub use exec::{Capture, ExecuteOptions, ExecutionOutput, execute, output};
pub use factory::PlatformLauncherFactory;

// Re-export core functionality
pub use procpipe_core::*;

/// Start a session with the launcher for the current platform
pub fn start(request: impl Into<StartRequest>) -> Result<ProcessSession, ProcessError> {
    ProcessSession::start(PlatformLauncherFactory::create_launcher(), request)
}
