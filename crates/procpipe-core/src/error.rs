use std::io;
use std::sync::Arc;
use thiserror::Error;

/// Standard stream of a child process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, derive_more::Display)]
pub enum StreamKind {
    #[display("stdin")]
    Stdin,
    #[display("stdout")]
    Stdout,
    #[display("stderr")]
    Stderr,
}

/// Core error types for process sessions
///
/// I/O errors are kept behind an `Arc` so a single outcome can be handed to
/// every observer of a session.
#[derive(Error, Debug, Clone)]
pub enum ProcessError {
    #[error("Failed to start process `{program}`: {source}")]
    StartFailure {
        program: String,
        #[source]
        source: Arc<io::Error>,
    },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("I/O failure on {stream}: {source}")]
    StreamIo {
        stream: StreamKind,
        #[source]
        source: Arc<io::Error>,
    },

    #[error("Failed to wait for process exit: {0}")]
    WaitFailed(Arc<io::Error>),

    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    #[error("Session task failed: {0}")]
    Internal(String),
}

impl ProcessError {
    pub fn start_failure(program: impl Into<String>, source: io::Error) -> Self {
        ProcessError::StartFailure {
            program: program.into(),
            source: Arc::new(source),
        }
    }

    pub fn stream_io(stream: StreamKind, source: io::Error) -> Self {
        ProcessError::StreamIo {
            stream,
            source: Arc::new(source),
        }
    }

    /// Check if this error is the cancellation outcome
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ProcessError::Cancelled)
    }

    /// Check if this error is a fault raised while the process was running
    pub fn is_fault(&self) -> bool {
        matches!(
            self,
            ProcessError::StreamIo { .. } | ProcessError::WaitFailed(_) | ProcessError::Internal(_)
        )
    }

    /// Check if the OS refused to create the process
    pub fn is_start_failure(&self) -> bool {
        matches!(self, ProcessError::StartFailure { .. })
    }
}

/// Reason a byte channel ended with something other than a clean end-of-stream
#[derive(Error, Debug, Clone)]
pub enum ChannelError {
    #[error("channel cancelled")]
    Cancelled,

    #[error("channel closed by its reader")]
    Closed,

    #[error("channel already completed")]
    Completed,

    #[error("channel writer dropped without completing")]
    Abandoned,

    #[error(transparent)]
    Failed(#[from] ProcessError),
}

impl From<ChannelError> for io::Error {
    fn from(err: ChannelError) -> Self {
        let kind = match &err {
            ChannelError::Cancelled => io::ErrorKind::Interrupted,
            ChannelError::Closed | ChannelError::Completed => io::ErrorKind::BrokenPipe,
            ChannelError::Abandoned => io::ErrorKind::UnexpectedEof,
            ChannelError::Failed(_) => io::ErrorKind::Other,
        };
        io::Error::new(kind, err)
    }
}
