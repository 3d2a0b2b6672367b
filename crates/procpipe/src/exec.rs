//! One-shot execution: start a process, feed it, capture its output and
//! return the exit code.

use crate::codec::Utf8Codec;
use crate::start;
use procpipe_core::{
    ByteReader, ByteWriter, CANCELLED_EXIT_CODE, CancellationToken, CommandSpec, ExitOutcome,
    ProcessError, StartRequest, StreamKind, byte_channel,
};
use std::fmt;
use std::io;
use tokio_stream::StreamExt;
use tokio_util::bytes::Bytes;
use tokio_util::codec::{Decoder, FramedRead, LinesCodec, LinesCodecError};
use tracing::{debug, warn};

/// What to do with bytes read from an output stream
#[derive(Default)]
pub enum Capture {
    /// Read and drop everything
    #[default]
    Discard,
    /// Hand every chunk over as it arrives
    Chunks(Box<dyn FnMut(Bytes) + Send>),
    /// Hand over decoded text as soon as complete code points arrive
    Text(Box<dyn FnMut(String) + Send>),
    /// Hand over one line at a time, without its terminator
    Lines(Box<dyn FnMut(String) + Send>),
}

impl Capture {
    pub fn chunks(callback: impl FnMut(Bytes) + Send + 'static) -> Self {
        Self::Chunks(Box::new(callback))
    }

    pub fn text(callback: impl FnMut(String) + Send + 'static) -> Self {
        Self::Text(Box::new(callback))
    }

    pub fn lines(callback: impl FnMut(String) + Send + 'static) -> Self {
        Self::Lines(Box::new(callback))
    }
}

impl fmt::Debug for Capture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Capture::Discard => "Discard",
            Capture::Chunks(_) => "Chunks",
            Capture::Text(_) => "Text",
            Capture::Lines(_) => "Lines",
        })
    }
}

/// Options for [`execute`]
#[derive(Debug, Default)]
pub struct ExecuteOptions {
    /// Bytes written to the child's stdin, which is then closed. Without
    /// input the child's stdin is not redirected.
    pub input: Option<Bytes>,
    pub stdout: Capture,
    /// `None` leaves stderr attached to the parent's stderr
    pub stderr: Option<Capture>,
    pub cancellation: CancellationToken,
}

impl ExecuteOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn input(mut self, input: impl Into<Bytes>) -> Self {
        self.input = Some(input.into());
        self
    }

    pub fn stdout(mut self, capture: Capture) -> Self {
        self.stdout = capture;
        self
    }

    pub fn stderr(mut self, capture: Capture) -> Self {
        self.stderr = Some(capture);
        self
    }

    pub fn cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }
}

/// Everything a finished process wrote
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionOutput {
    /// Exit code, or [`CANCELLED_EXIT_CODE`] when cancelled
    pub exit_code: i32,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl ExecutionOutput {
    pub fn stdout_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    pub fn stderr_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }
}

/// Run `command` to completion.
///
/// Output is drained concurrently with waiting for exit, so a child writing
/// more than the channel capacity never stalls. Cancellation is reported as
/// [`CANCELLED_EXIT_CODE`]; faults are returned as errors. The process is
/// gone when this returns.
pub async fn execute(command: CommandSpec, options: ExecuteOptions) -> Result<i32, ProcessError> {
    let ExecuteOptions {
        input,
        stdout,
        stderr,
        cancellation,
    } = options;
    let capacity = command.pump.channel_capacity;
    let (mut request, feeder) = prepare(command, input, cancellation);
    let mut stderr_drain = None;
    if let Some(capture) = stderr {
        let (writer, reader) = byte_channel(capacity);
        request = request.stderr(writer);
        stderr_drain = Some((reader, capture));
    }

    let mut session = start(request)?;
    let stdout_reader = session
        .take_stdout()
        .ok_or_else(|| ProcessError::Internal("stdout already taken".to_string()))?;

    let joined = tokio::try_join!(
        feed(feeder),
        drain(stdout_reader, stdout, StreamKind::Stdout),
        async {
            match stderr_drain {
                Some((reader, capture)) => drain(reader, capture, StreamKind::Stderr).await,
                None => Ok(()),
            }
        },
        async { Ok::<_, ProcessError>(session.wait_exit().await) },
    );
    session.dispose().await;

    match joined {
        Ok((_, _, _, outcome)) => exit_code(outcome, session.program()),
        Err(fault) => {
            warn!("Capturing output of {} failed: {fault}", session.program());
            Err(fault)
        }
    }
}

/// Run `command` with optional `input` and collect both output streams.
///
/// Output read before a cancellation is discarded.
pub async fn output(
    command: CommandSpec,
    input: Option<Bytes>,
    cancellation: CancellationToken,
) -> Result<ExecutionOutput, ProcessError> {
    let (stderr_writer, mut stderr) = byte_channel(command.pump.channel_capacity);
    let (request, feeder) = prepare(command, input, cancellation);

    let mut session = start(request.stderr(stderr_writer))?;
    let mut stdout = session
        .take_stdout()
        .ok_or_else(|| ProcessError::Internal("stdout already taken".to_string()))?;

    let ((), out, err, outcome) = tokio::join!(
        async {
            let _ = feed(feeder).await;
        },
        stdout.read_to_end(),
        stderr.read_to_end(),
        session.wait_exit(),
    );
    session.dispose().await;

    Ok(ExecutionOutput {
        exit_code: exit_code(outcome, session.program())?,
        stdout: out.unwrap_or_default(),
        stderr: err.unwrap_or_default(),
    })
}

/// Build the start request, redirecting stdin only when there is input
fn prepare(
    command: CommandSpec,
    input: Option<Bytes>,
    cancellation: CancellationToken,
) -> (StartRequest, Option<(ByteWriter, Bytes)>) {
    let capacity = command.pump.channel_capacity;
    let request = StartRequest::new(command).cancellation(cancellation);
    match input {
        Some(input) => {
            let (writer, reader) = byte_channel(capacity);
            (request.stdin(reader), Some((writer, input)))
        }
        None => (request, None),
    }
}

fn exit_code(outcome: ExitOutcome, program: &str) -> Result<i32, ProcessError> {
    match outcome {
        Ok(code) => Ok(code),
        Err(ProcessError::Cancelled) => {
            debug!("Execution of {program} was cancelled");
            Ok(CANCELLED_EXIT_CODE)
        }
        Err(fault) => Err(fault),
    }
}

async fn feed(feeder: Option<(ByteWriter, Bytes)>) -> Result<(), ProcessError> {
    let Some((mut writer, input)) = feeder else {
        return Ok(());
    };
    if let Err(e) = writer.send(&input).await {
        debug!("Child stopped accepting input: {e}");
    }
    writer.complete(None);
    Ok(())
}

/// Read `reader` to its end, handing data to `capture`.
///
/// Channel errors end the drain quietly since the session outcome already
/// reports them. Only undecodable output is an error here.
async fn drain(
    mut reader: ByteReader,
    capture: Capture,
    stream: StreamKind,
) -> Result<(), ProcessError> {
    let result = match capture {
        Capture::Discard => loop {
            match reader.read().await {
                Ok(Some(_)) => {}
                Ok(None) => break Ok(()),
                Err(e) => break Err(e),
            }
        },
        Capture::Chunks(mut callback) => loop {
            match reader.read().await {
                Ok(Some(chunk)) => callback(chunk),
                Ok(None) => break Ok(()),
                Err(e) => break Err(e),
            }
        },
        Capture::Text(callback) => {
            return decode(reader, Utf8Codec, callback, stream, |e| e).await;
        }
        Capture::Lines(callback) => {
            return decode(reader, LinesCodec::new(), callback, stream, lines_error).await;
        }
    };
    if let Err(e) = result {
        debug!("{stream} drain ended: {e}");
    }
    Ok(())
}

fn lines_error(e: LinesCodecError) -> io::Error {
    match e {
        LinesCodecError::Io(e) => e,
        other => io::Error::new(io::ErrorKind::InvalidData, other),
    }
}

/// Decode frames from `reader` into `callback`.
///
/// Channel errors surface from the `AsyncRead` adapter with their own kinds,
/// so `InvalidData` can only come from the decoder.
async fn decode<D>(
    reader: ByteReader,
    decoder: D,
    mut callback: Box<dyn FnMut(String) + Send>,
    stream: StreamKind,
    into_io: fn(D::Error) -> io::Error,
) -> Result<(), ProcessError>
where
    D: Decoder<Item = String> + Unpin,
{
    let mut frames = FramedRead::with_capacity(reader.into_async_read(), decoder, 1024);
    while let Some(frame) = frames.next().await {
        match frame.map_err(into_io) {
            Ok(item) => callback(item),
            Err(e) if e.kind() == io::ErrorKind::InvalidData => {
                return Err(ProcessError::stream_io(stream, e));
            }
            Err(e) => {
                debug!("{stream} drain ended: {e}");
                return Ok(());
            }
        }
    }
    Ok(())
}
