use crate::channel::{ByteReader, ByteWriter, byte_channel};
use crate::config::CommandSpec;
use crate::error::{ProcessError, StreamKind};
use crate::outcome::{ExitOutcome, OutcomeCell, notification_code};
use crate::process::{ProcessHandle, ProcessId, ProcessLauncher, StdioPlan};
use crate::pump::{pump_input, pump_output};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Everything needed to start a session
///
/// Redirection of stdin and stderr is decided by whether a channel end is
/// supplied. Standard output is always redirected into a channel owned by the
/// session.
#[derive(Debug, Default)]
pub struct StartRequest {
    pub command: CommandSpec,
    /// Read end whose bytes are fed to the child's stdin
    pub stdin: Option<ByteReader>,
    /// Write end receiving the child's stderr
    pub stderr: Option<ByteWriter>,
    pub cancellation: CancellationToken,
}

impl StartRequest {
    pub fn new(command: CommandSpec) -> Self {
        Self {
            command,
            ..Default::default()
        }
    }

    pub fn stdin(mut self, reader: ByteReader) -> Self {
        self.stdin = Some(reader);
        self
    }

    pub fn stderr(mut self, writer: ByteWriter) -> Self {
        self.stderr = Some(writer);
        self
    }

    pub fn cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }
}

impl From<CommandSpec> for StartRequest {
    fn from(command: CommandSpec) -> Self {
        Self::new(command)
    }
}

struct SessionShared {
    outcome: OutcomeCell,
    exit_code: OnceLock<i32>,
    /// Child of the caller's token; also cancelled by disposal and by faults
    abort: CancellationToken,
    disposed: AtomicBool,
}

enum Race {
    Exited(std::io::Result<i32>),
    Cancelled,
    Fault(ProcessError),
}

/// A running child process with its stream pumps and single exit outcome
///
/// Sessions must be started inside a tokio runtime. Dropping a session
/// disposes it in the background; call [`ProcessSession::dispose`] to wait
/// until the process is gone.
pub struct ProcessSession {
    command: CommandSpec,
    pid: Option<ProcessId>,
    launcher: Arc<dyn ProcessLauncher>,
    stdout: Option<ByteReader>,
    shared: Arc<SessionShared>,
    supervisor: Mutex<Option<JoinHandle<()>>>,
}

impl ProcessSession {
    /// Start the process and its pumps
    pub fn start(
        launcher: Arc<dyn ProcessLauncher>,
        request: impl Into<StartRequest>,
    ) -> Result<Self, ProcessError> {
        let StartRequest {
            command,
            stdin,
            stderr,
            cancellation,
        } = request.into();
        command.validate()?;

        let plan = StdioPlan {
            stdin: stdin.is_some(),
            stderr: stderr.is_some(),
        };
        let mut handle = launcher.launch(&command, plan)?;
        let pid = handle.pid();
        let label = match pid {
            Some(pid) => format!("{} (PID: {pid})", command.program),
            None => command.program.clone(),
        };
        info!(
            "Started session for {label} with args: {:?} on {}",
            command.args,
            launcher.platform_name()
        );

        let abort = cancellation.child_token();
        let exited = CancellationToken::new();
        let mut pumps = JoinSet::new();

        let (stdout_writer, stdout_reader) = byte_channel(command.pump.channel_capacity);
        match handle.take_stdout() {
            Some(source) => {
                pumps.spawn(pump_output(
                    source,
                    stdout_writer,
                    abort.clone(),
                    command.pump.clone(),
                    StreamKind::Stdout,
                ));
            }
            None => warn!("Launcher did not redirect stdout for {label}"),
        }

        if let Some(mut sink) = stderr {
            match handle.take_stderr() {
                Some(source) => {
                    pumps.spawn(pump_output(
                        source,
                        sink,
                        abort.clone(),
                        command.pump.clone(),
                        StreamKind::Stderr,
                    ));
                }
                None => {
                    warn!("Launcher did not redirect stderr for {label}");
                    sink.complete(None);
                }
            }
        }

        if let Some(mut source) = stdin {
            match handle.take_stdin() {
                Some(sink) => {
                    pumps.spawn(pump_input(sink, source, abort.clone(), exited.clone()));
                }
                None => {
                    warn!("Launcher did not redirect stdin for {label}");
                    source.complete(None);
                }
            }
        }

        let shared = Arc::new(SessionShared {
            outcome: OutcomeCell::new(),
            exit_code: OnceLock::new(),
            abort,
            disposed: AtomicBool::new(false),
        });
        let supervisor = tokio::spawn(supervise(handle, pumps, shared.clone(), exited, label));

        Ok(Self {
            command,
            pid,
            launcher,
            stdout: Some(stdout_reader),
            shared,
            supervisor: Mutex::new(Some(supervisor)),
        })
    }

    pub fn program(&self) -> &str {
        &self.command.program
    }

    pub fn args(&self) -> &[String] {
        &self.command.args
    }

    pub fn env(&self) -> &HashMap<String, String> {
        &self.command.env
    }

    pub fn command(&self) -> &CommandSpec {
        &self.command
    }

    pub fn pid(&self) -> Option<ProcessId> {
        self.pid
    }

    pub(crate) fn launcher(&self) -> Arc<dyn ProcessLauncher> {
        self.launcher.clone()
    }

    /// Take the read end of the child's stdout. Only the first call succeeds.
    pub fn take_stdout(&mut self) -> Option<ByteReader> {
        self.stdout.take()
    }

    pub fn stdout_mut(&mut self) -> Option<&mut ByteReader> {
        self.stdout.as_mut()
    }

    /// Exit code once the process has exited, even if the session has not
    /// settled yet
    pub fn exit_code(&self) -> Option<i32> {
        self.shared.exit_code.get().copied()
    }

    /// Settled outcome, if any
    pub fn outcome(&self) -> Option<ExitOutcome> {
        self.shared.outcome.get()
    }

    pub fn is_settled(&self) -> bool {
        self.shared.outcome.is_resolved()
    }

    pub fn is_disposed(&self) -> bool {
        self.shared.disposed.load(Ordering::Acquire)
    }

    /// Wait for the session to settle.
    ///
    /// Resolves to the exit code once the process exited and its output was
    /// fully pumped, [`ProcessError::Cancelled`] after cancellation or early
    /// disposal, or the fault that stopped the session.
    pub async fn wait_exit(&self) -> ExitOutcome {
        self.shared.outcome.wait().await
    }

    /// Run `hook` once with the settled outcome
    pub fn on_settled<F, Fut>(&self, hook: F)
    where
        F: FnOnce(ExitOutcome) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let outcome = self.shared.outcome.clone();
        tokio::spawn(async move {
            hook(outcome.wait().await).await;
        });
    }

    /// Call `callback` once with the exit code, or a negative sentinel when
    /// the session was cancelled or faulted
    pub fn on_exit<F>(&self, callback: F)
    where
        F: FnOnce(i32) + Send + 'static,
    {
        self.on_settled(move |outcome| async move { callback(notification_code(&outcome)) });
    }

    /// Terminate the process if it is still running and wait until it is gone.
    ///
    /// Idempotent and infallible. Before settlement this resolves the outcome
    /// to [`ProcessError::Cancelled`].
    pub async fn dispose(&self) {
        if !self.shared.disposed.swap(true, Ordering::AcqRel) {
            debug!("Disposing session for {}", self.command.program);
        }
        self.shared.abort.cancel();

        let supervisor = match self.supervisor.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(task) = supervisor {
            if let Err(e) = task.await {
                warn!("Session supervisor for {} failed: {e}", self.command.program);
                self.shared
                    .outcome
                    .resolve(Err(ProcessError::Internal(e.to_string())));
            }
        }
        let _ = self.shared.outcome.wait().await;
    }
}

impl Drop for ProcessSession {
    fn drop(&mut self) {
        // The supervisor keeps running and terminates the process
        self.shared.disposed.store(true, Ordering::Release);
        self.shared.abort.cancel();
    }
}

async fn supervise(
    mut handle: Box<dyn ProcessHandle>,
    mut pumps: JoinSet<Result<(), ProcessError>>,
    shared: Arc<SessionShared>,
    exited: CancellationToken,
    label: String,
) {
    let abort = shared.abort.clone();

    let race = loop {
        tokio::select! {
            biased;
            _ = abort.cancelled() => break Race::Cancelled,
            Some(joined) = pumps.join_next(), if !pumps.is_empty() => {
                if let Err(fault) = flatten(joined) {
                    if fault.is_fault() {
                        break Race::Fault(fault);
                    }
                }
            }
            status = handle.wait() => break Race::Exited(status),
        }
    };

    let outcome = match race {
        Race::Exited(Ok(code)) => {
            let _ = shared.exit_code.set(code);
            info!("Process {label} exited with code {code}");
            exited.cancel();
            match drain(&mut pumps).await {
                Some(fault) => Err(fault),
                None => Ok(code),
            }
        }
        Race::Exited(Err(e)) => {
            warn!("Error waiting for process {label}: {e}");
            abort.cancel();
            terminate(handle.as_mut(), &shared, &label).await;
            drain(&mut pumps).await;
            Err(ProcessError::WaitFailed(Arc::new(e)))
        }
        Race::Cancelled => {
            if shared.disposed.load(Ordering::Acquire) {
                info!("Session for {label} disposed before exit, terminating");
            } else {
                info!("Cancellation requested, terminating {label}");
            }
            terminate(handle.as_mut(), &shared, &label).await;
            drain(&mut pumps).await;
            Err(ProcessError::Cancelled)
        }
        Race::Fault(fault) => {
            warn!("Stream fault in {label}: {fault}");
            abort.cancel();
            terminate(handle.as_mut(), &shared, &label).await;
            drain(&mut pumps).await;
            Err(fault)
        }
    };

    shared.outcome.resolve(outcome);
}

/// Force the process down and reap it. Failures are logged, never raised.
async fn terminate(handle: &mut dyn ProcessHandle, shared: &SessionShared, label: &str) {
    match handle.try_wait() {
        Ok(Some(code)) => {
            let _ = shared.exit_code.set(code);
            debug!("Process {label} already exited with code {code}");
            return;
        }
        Ok(None) => {}
        Err(e) => debug!("Could not poll {label} before termination: {e}"),
    }

    if let Err(e) = handle.kill().await {
        warn!("Failed to kill process {label}: {e}");
    }
    match handle.wait().await {
        Ok(code) => {
            let _ = shared.exit_code.set(code);
            info!("Process {label} terminated with code {code}");
        }
        Err(e) => warn!("Error waiting for process {label} to exit: {e}"),
    }
}

/// Wait for every remaining pump, returning the first fault
async fn drain(pumps: &mut JoinSet<Result<(), ProcessError>>) -> Option<ProcessError> {
    let mut first_fault = None;
    while let Some(joined) = pumps.join_next().await {
        if let Err(fault) = flatten(joined) {
            if fault.is_fault() && first_fault.is_none() {
                first_fault = Some(fault);
            }
        }
    }
    first_fault
}

fn flatten(joined: Result<Result<(), ProcessError>, JoinError>) -> Result<(), ProcessError> {
    joined.unwrap_or_else(|e| Err(ProcessError::Internal(format!("pump task failed: {e}"))))
}
