use crate::config::CommandSpec;
use crate::error::ProcessError;
use async_trait::async_trait;
use std::io;
use tokio::io::{AsyncRead, AsyncWrite};

/// OS identifier of a child process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, derive_more::From, derive_more::Display)]
pub struct ProcessId(pub u32);

pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Which optional streams a launcher must redirect. Standard output is
/// always redirected so sessions can be chained.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StdioPlan {
    pub stdin: bool,
    pub stderr: bool,
}

/// Handle to a started child process
#[async_trait]
pub trait ProcessHandle: Send {
    /// Get the process ID (None once the process has been reaped)
    fn pid(&self) -> Option<ProcessId>;

    /// Take the write side of the child's stdin, if it was redirected
    fn take_stdin(&mut self) -> Option<BoxedWriter>;

    /// Take the read side of the child's stdout
    fn take_stdout(&mut self) -> Option<BoxedReader>;

    /// Take the read side of the child's stderr, if it was redirected
    fn take_stderr(&mut self) -> Option<BoxedReader>;

    /// Exit code if the process already exited, without blocking
    fn try_wait(&mut self) -> io::Result<Option<i32>>;

    /// Wait for the process to exit. Must be safe to drop before completion.
    async fn wait(&mut self) -> io::Result<i32>;

    /// Forcibly terminate the process. Succeeds if it already exited.
    async fn kill(&mut self) -> io::Result<()>;
}

/// Starts child processes for sessions
pub trait ProcessLauncher: Send + Sync {
    /// Start `command` with the requested redirections
    fn launch(
        &self,
        command: &CommandSpec,
        stdio: StdioPlan,
    ) -> Result<Box<dyn ProcessHandle>, ProcessError>;

    /// Get the platform name for logging and debugging
    fn platform_name(&self) -> &'static str;
}
