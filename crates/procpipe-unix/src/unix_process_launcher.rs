use procpipe_core::{CommandSpec, ProcessError, ProcessHandle, ProcessLauncher, StdioPlan};
use std::io;

#[cfg(unix)]
mod unix_impl {
    use super::*;
    use async_trait::async_trait;
    use nix::errno::Errno;
    use nix::sys::signal::{self, Signal};
    use nix::unistd::Pid as NixPid;
    use std::os::unix::process::ExitStatusExt;
    use std::process::{ExitStatus, Stdio};
    use procpipe_core::{BoxedReader, BoxedWriter, ProcessId};
    use tokio::process::{Child, Command};
    use tracing::{debug, info, warn};

    /// Exit code for a status, mapping death by signal to `128 + signal`
    /// the way shells report it
    fn exit_code(status: ExitStatus) -> i32 {
        status
            .code()
            .or_else(|| status.signal().map(|signal| 128 + signal))
            .unwrap_or_default()
    }

    /// Unix-specific process handle implementation
    pub struct UnixProcessHandle {
        child: Child,
        program: String,
    }

    impl UnixProcessHandle {
        pub fn new(child: Child, program: String) -> Self {
            Self { child, program }
        }
    }

    #[async_trait]
    impl ProcessHandle for UnixProcessHandle {
        fn pid(&self) -> Option<ProcessId> {
            self.child.id().map(ProcessId::from)
        }

        fn take_stdin(&mut self) -> Option<BoxedWriter> {
            self.child
                .stdin
                .take()
                .map(|stdin| Box::new(stdin) as BoxedWriter)
        }

        fn take_stdout(&mut self) -> Option<BoxedReader> {
            self.child
                .stdout
                .take()
                .map(|stdout| Box::new(stdout) as BoxedReader)
        }

        fn take_stderr(&mut self) -> Option<BoxedReader> {
            self.child
                .stderr
                .take()
                .map(|stderr| Box::new(stderr) as BoxedReader)
        }

        fn try_wait(&mut self) -> io::Result<Option<i32>> {
            Ok(self.child.try_wait()?.map(exit_code))
        }

        async fn wait(&mut self) -> io::Result<i32> {
            let status = self.child.wait().await?;
            Ok(exit_code(status))
        }

        async fn kill(&mut self) -> io::Result<()> {
            if self.child.try_wait()?.is_some() {
                return Ok(());
            }

            // The child leads its own process group, so this reaches anything
            // it spawned as well
            if let Some(pid) = self.child.id() {
                match signal::killpg(NixPid::from_raw(pid as i32), Signal::SIGKILL) {
                    Ok(()) => info!("Sent SIGKILL to process group {pid} ({})", self.program),
                    Err(Errno::ESRCH) => debug!("Process group {pid} already terminated"),
                    Err(e) => warn!("Failed to send SIGKILL to process group {pid}: {e}"),
                }
            }

            match self.child.start_kill() {
                Ok(()) => Ok(()),
                // already reaped
                Err(e) if e.kind() == io::ErrorKind::InvalidInput => Ok(()),
                Err(e) => Err(e),
            }
        }
    }

    /// Launches children with tokio, each in a fresh process group
    #[derive(Debug, Default, Clone, Copy)]
    pub struct UnixProcessLauncher;

    impl UnixProcessLauncher {
        pub fn new() -> Self {
            Self
        }
    }

    impl ProcessLauncher for UnixProcessLauncher {
        fn launch(
            &self,
            command: &CommandSpec,
            stdio: StdioPlan,
        ) -> Result<Box<dyn ProcessHandle>, ProcessError> {
            let mut cmd = Command::new(&command.program);
            cmd.args(&command.args);

            if let Some(dir) = &command.working_directory {
                cmd.current_dir(dir);
            }
            cmd.envs(&command.env);

            cmd.stdout(Stdio::piped());
            cmd.stdin(if stdio.stdin {
                Stdio::piped()
            } else {
                Stdio::null()
            });
            cmd.stderr(if stdio.stderr {
                Stdio::piped()
            } else {
                Stdio::inherit()
            });

            // Create new process group for process tree termination
            cmd.process_group(0);
            cmd.kill_on_drop(true);

            let child = cmd
                .spawn()
                .map_err(|e| ProcessError::start_failure(command.program.clone(), e))?;

            if let Some(pid) = child.id() {
                info!(
                    "Spawned Unix process: {} (PID: {}) with args: {:?}",
                    command.program, pid, command.args
                );
            }

            Ok(Box::new(UnixProcessHandle::new(
                child,
                command.program.clone(),
            )))
        }

        fn platform_name(&self) -> &'static str {
            "Unix"
        }
    }

}

// Re-export the Unix implementation when on Unix systems
#[cfg(unix)]
pub use unix_impl::{UnixProcessHandle, UnixProcessLauncher};

// Stub for non-Unix systems, where launching always fails
#[cfg(not(unix))]
#[derive(Debug, Default, Clone, Copy)]
pub struct UnixProcessLauncher;

#[cfg(not(unix))]
impl UnixProcessLauncher {
    pub fn new() -> Self {
        Self
    }
}

#[cfg(not(unix))]
impl ProcessLauncher for UnixProcessLauncher {
    fn launch(
        &self,
        command: &CommandSpec,
        _stdio: StdioPlan,
    ) -> Result<Box<dyn ProcessHandle>, ProcessError> {
        Err(ProcessError::start_failure(
            command.program.clone(),
            io::Error::from(io::ErrorKind::Unsupported),
        ))
    }

    fn platform_name(&self) -> &'static str {
        "Unix"
    }
}
