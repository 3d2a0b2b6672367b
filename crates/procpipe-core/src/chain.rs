use crate::error::ProcessError;
use crate::session::{ProcessSession, StartRequest};
use tracing::debug;

impl ProcessSession {
    /// Start `next` with this session's stdout as its stdin.
    ///
    /// The returned session owns this one and disposes it once it settles.
    /// This session is consumed even on error, so a failed call disposes it
    /// and terminates its process.
    pub fn pipe_to(mut self, next: impl Into<StartRequest>) -> Result<ProcessSession, ProcessError> {
        let mut next = next.into();
        if next.stdin.is_some() {
            return Err(ProcessError::ConfigurationError(
                "chained request must not bind its own stdin".to_string(),
            ));
        }
        if self.is_disposed() {
            return Err(ProcessError::ConfigurationError(format!(
                "cannot chain from disposed session `{}`",
                self.program()
            )));
        }
        let stdout = self.take_stdout().ok_or_else(|| {
            ProcessError::ConfigurationError(format!(
                "stdout of `{}` was already taken",
                self.program()
            ))
        })?;
        next.stdin = Some(stdout);

        let successor = ProcessSession::start(self.launcher(), next)?;
        debug!("Chained {} into {}", self.program(), successor.program());
        let predecessor = self;
        successor.on_settled(move |_| async move {
            predecessor.dispose().await;
        });
        Ok(successor)
    }
}
