use procpipe_core::{CommandSpec, ProcessError, ProcessHandle, ProcessLauncher, StdioPlan};
use std::io;

#[cfg(windows)]
mod windows_impl {
    use super::*;
    use async_trait::async_trait;
    use procpipe_core::{BoxedReader, BoxedWriter, ProcessId};
    use std::process::Stdio;
    use sysinfo::{Pid, ProcessesToUpdate, System};
    use tokio::process::{Child, Command};
    use tracing::{debug, info, warn};
    use windows::Win32::System::Threading::CREATE_NO_WINDOW;

    /// Windows-specific process handle implementation
    pub struct WindowsProcessHandle {
        child: Child,
        program: String,
    }

    impl WindowsProcessHandle {
        pub fn new(child: Child, program: String) -> Self {
            Self { child, program }
        }

        /// Kill every descendant of the child, deepest first. Windows has no
        /// process groups, so the tree is walked with a process snapshot.
        fn kill_descendants(&self, root: u32) {
            let mut system = System::new();
            system.refresh_processes(ProcessesToUpdate::All, true);

            let mut descendants = Vec::new();
            find_children_recursive(&system, root, &mut descendants);
            if descendants.is_empty() {
                return;
            }

            info!(
                pid = %root,
                count = descendants.len(),
                program = %self.program,
                "Terminating child processes"
            );
            for pid in descendants {
                match system.process(Pid::from_u32(pid)) {
                    Some(process) if process.kill() => debug!(pid = %pid, "Killed child process"),
                    Some(_) => warn!(pid = %pid, "Failed to kill child process"),
                    None => {}
                }
            }
        }
    }

    /// Collect all descendants of `parent_pid`, grandchildren before children
    fn find_children_recursive(system: &System, parent_pid: u32, result: &mut Vec<u32>) {
        for (pid, process) in system.processes() {
            if process.parent().is_some_and(|ppid| ppid.as_u32() == parent_pid) {
                let child_pid = pid.as_u32();
                find_children_recursive(system, child_pid, result);
                result.push(child_pid);
            }
        }
    }

    #[async_trait]
    impl ProcessHandle for WindowsProcessHandle {
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
            Ok(self
                .child
                .try_wait()?
                .map(|status| status.code().unwrap_or_default()))
        }

        async fn wait(&mut self) -> io::Result<i32> {
            let status = self.child.wait().await?;
            Ok(status.code().unwrap_or_default())
        }

        async fn kill(&mut self) -> io::Result<()> {
            if self.child.try_wait()?.is_some() {
                return Ok(());
            }
            if let Some(pid) = self.child.id() {
                self.kill_descendants(pid);
            }
            match self.child.start_kill() {
                Ok(()) => {
                    info!(program = %self.program, "Force killed process");
                    Ok(())
                }
                Err(e) if e.kind() == io::ErrorKind::InvalidInput => Ok(()),
                Err(e) => Err(e),
            }
        }
    }

    /// Launches children with tokio, optionally without a console window
    #[derive(Debug, Default, Clone, Copy)]
    pub struct WindowsProcessLauncher;

    impl WindowsProcessLauncher {
        pub fn new() -> Self {
            Self
        }
    }

    impl ProcessLauncher for WindowsProcessLauncher {
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

            if command.hide_window {
                cmd.creation_flags(CREATE_NO_WINDOW.0);
            }
            cmd.kill_on_drop(true);

            let child = cmd
                .spawn()
                .map_err(|e| ProcessError::start_failure(command.program.clone(), e))?;

            if let Some(pid) = child.id() {
                info!(
                    pid = %pid,
                    command = %command.program,
                    args = ?command.args,
                    "Spawned Windows process"
                );
            }

            Ok(Box::new(WindowsProcessHandle::new(
                child,
                command.program.clone(),
            )))
        }

        fn platform_name(&self) -> &'static str {
            "Windows"
        }
    }
}

#[cfg(windows)]
pub use windows_impl::{WindowsProcessHandle, WindowsProcessLauncher};

// Stub for non-Windows systems, where launching always fails
#[cfg(not(windows))]
#[derive(Debug, Default, Clone, Copy)]
pub struct WindowsProcessLauncher;

#[cfg(not(windows))]
impl WindowsProcessLauncher {
    pub fn new() -> Self {
        Self
    }
}

#[cfg(not(windows))]
impl ProcessLauncher for WindowsProcessLauncher {
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
        "Windows"
    }
}
