//! Scripted stand-in for an OS process, driven directly by tests.

use crate::config::CommandSpec;
use crate::error::ProcessError;
use crate::process::{BoxedReader, BoxedWriter, ProcessHandle, ProcessId, ProcessLauncher, StdioPlan};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::io::{DuplexStream, duplex};
use tokio::sync::watch;

pub const KILLED_EXIT_CODE: i32 = 137;

/// The "child" side of a scripted process
pub struct Script {
    pub stdout: DuplexStream,
    pub stderr: DuplexStream,
    pub stdin: DuplexStream,
    exit: watch::Sender<Option<i32>>,
    killed: Arc<AtomicBool>,
}

impl Script {
    pub fn exit(&self, code: i32) {
        self.exit.send_if_modified(|slot| {
            if slot.is_some() {
                return false;
            }
            *slot = Some(code);
            true
        });
    }

    pub fn was_killed(&self) -> bool {
        self.killed.load(Ordering::Acquire)
    }

    pub fn is_running(&self) -> bool {
        self.exit.borrow().is_none()
    }
}

pub struct ScriptedHandle {
    stdout: Option<BoxedReader>,
    stderr: Option<BoxedReader>,
    stdin: Option<BoxedWriter>,
    exit: watch::Sender<Option<i32>>,
    killed: Arc<AtomicBool>,
}

/// Create a handle and the script that controls it
pub fn scripted_process() -> (ScriptedHandle, Script) {
    let (child_stdout, parent_stdout) = duplex(1024);
    let (child_stderr, parent_stderr) = duplex(1024);
    let (parent_stdin, child_stdin) = duplex(1024);
    let (exit, _) = watch::channel(None);
    let killed = Arc::new(AtomicBool::new(false));
    (
        ScriptedHandle {
            stdout: Some(Box::new(parent_stdout)),
            stderr: Some(Box::new(parent_stderr)),
            stdin: Some(Box::new(parent_stdin)),
            exit: exit.clone(),
            killed: killed.clone(),
        },
        Script {
            stdout: child_stdout,
            stderr: child_stderr,
            stdin: child_stdin,
            exit,
            killed,
        },
    )
}

impl ScriptedHandle {
    pub fn with_stdout(mut self, stdout: BoxedReader) -> Self {
        self.stdout = Some(stdout);
        self
    }
}

#[async_trait]
impl ProcessHandle for ScriptedHandle {
    fn pid(&self) -> Option<ProcessId> {
        Some(ProcessId(4242))
    }

    fn take_stdin(&mut self) -> Option<BoxedWriter> {
        self.stdin.take()
    }

    fn take_stdout(&mut self) -> Option<BoxedReader> {
        self.stdout.take()
    }

    fn take_stderr(&mut self) -> Option<BoxedReader> {
        self.stderr.take()
    }

    fn try_wait(&mut self) -> io::Result<Option<i32>> {
        Ok(*self.exit.borrow())
    }

    async fn wait(&mut self) -> io::Result<i32> {
        let mut rx = self.exit.subscribe();
        let code = rx
            .wait_for(Option::is_some)
            .await
            .map_err(|_| io::Error::other("script dropped"))?;
        Ok((*code).unwrap_or_default())
    }

    async fn kill(&mut self) -> io::Result<()> {
        self.killed.store(true, Ordering::Release);
        self.exit.send_if_modified(|slot| {
            if slot.is_some() {
                return false;
            }
            *slot = Some(KILLED_EXIT_CODE);
            true
        });
        Ok(())
    }
}

/// Hands out prepared handles in order, or a start failure when none remain
#[derive(Default)]
pub struct ScriptedLauncher {
    handles: Mutex<VecDeque<ScriptedHandle>>,
    pub plans: Mutex<Vec<StdioPlan>>,
}

impl ScriptedLauncher {
    pub fn new(handles: impl IntoIterator<Item = ScriptedHandle>) -> Arc<Self> {
        Arc::new(Self {
            handles: Mutex::new(handles.into_iter().collect()),
            plans: Mutex::new(Vec::new()),
        })
    }
}

impl ProcessLauncher for ScriptedLauncher {
    fn launch(
        &self,
        command: &CommandSpec,
        stdio: StdioPlan,
    ) -> Result<Box<dyn ProcessHandle>, ProcessError> {
        self.plans.lock().unwrap().push(stdio);
        match self.handles.lock().unwrap().pop_front() {
            Some(handle) => Ok(Box::new(handle)),
            None => Err(ProcessError::start_failure(
                command.program.clone(),
                io::Error::from(io::ErrorKind::NotFound),
            )),
        }
    }

    fn platform_name(&self) -> &'static str {
        "scripted"
    }
}
