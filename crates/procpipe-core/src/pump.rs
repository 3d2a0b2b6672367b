//! Loops copying bytes between a child's OS streams and byte channels.

use crate::channel::{ByteReader, ByteWriter};
use crate::config::PumpConfig;
use crate::error::{ChannelError, ProcessError, StreamKind};
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Copy a child's output stream into `sink` until end-of-stream.
///
/// The sink is completed on every path: cleanly at end-of-stream or when the
/// reader went away, with a cancellation error on cancellation, and with the
/// fault itself on an I/O failure (which is also returned).
pub async fn pump_output<R>(
    mut source: R,
    mut sink: ByteWriter,
    cancel: CancellationToken,
    config: PumpConfig,
    stream: StreamKind,
) -> Result<(), ProcessError>
where
    R: AsyncRead + Unpin,
{
    let result = copy_output(&mut source, &mut sink, &cancel, &config, stream).await;
    match &result {
        Ok(()) => {
            sink.complete(None);
        }
        Err(ProcessError::Cancelled) => {
            debug!("{stream} pump cancelled");
            sink.complete(Some(ChannelError::Cancelled));
        }
        Err(fault) => {
            warn!("{stream} pump failed: {fault}");
            sink.complete(Some(ChannelError::Failed(fault.clone())));
        }
    }
    result
}

async fn copy_output<R>(
    source: &mut R,
    sink: &mut ByteWriter,
    cancel: &CancellationToken,
    config: &PumpConfig,
    stream: StreamKind,
) -> Result<(), ProcessError>
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; config.chunk_size];
    let linger = config.flush_linger();
    // Armed when the buffer turns non-empty, so steady output cannot postpone it
    let deadline = tokio::time::sleep(linger);
    tokio::pin!(deadline);

    loop {
        let read = {
            let next = source.read(&mut buf);
            tokio::pin!(next);
            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(ProcessError::Cancelled),
                    read = &mut next => break read,
                    _ = &mut deadline, if sink.buffered() > 0 => {
                        if !flush(sink, cancel).await? {
                            debug!("{stream} reader closed, stopping pump");
                            return Ok(());
                        }
                    }
                }
            }
        };

        let n = match read {
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(ProcessError::stream_io(stream, e)),
        };

        if n == 0 {
            flush(sink, cancel).await?;
            debug!("{stream} reached end of stream");
            return Ok(());
        }

        let was_empty = sink.buffered() == 0;
        if sink.write(&buf[..n]).is_err() {
            return Ok(());
        }
        if sink.buffered() >= config.flush_threshold {
            if !flush(sink, cancel).await? {
                // Dropping the source lets the child observe a broken pipe
                debug!("{stream} reader closed, stopping pump");
                return Ok(());
            }
        } else if was_empty {
            deadline.as_mut().reset(Instant::now() + linger);
        }
    }
}

/// Returns false when the channel's reader is gone
async fn flush(sink: &mut ByteWriter, cancel: &CancellationToken) -> Result<bool, ProcessError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(ProcessError::Cancelled),
        flushed = sink.flush() => Ok(flushed.is_ok()),
    }
}

/// Feed chunks from `source` into a child's stdin.
///
/// Stops at end-of-stream, when `exited` fires, or on cancellation (which
/// completes `source` with a cancellation error). The child's stdin is closed
/// on every path so it observes end-of-file. A broken pipe means the child
/// stopped reading and is not treated as a failure.
pub async fn pump_input<W>(
    mut sink: W,
    mut source: ByteReader,
    cancel: CancellationToken,
    exited: CancellationToken,
) -> Result<(), ProcessError>
where
    W: AsyncWrite + Unpin,
{
    let result = loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                source.complete(Some(ChannelError::Cancelled));
                break Err(ProcessError::Cancelled);
            }
            _ = exited.cancelled() => {
                source.complete(None);
                break Ok(());
            }
            next = source.read() => next,
        };

        let chunk = match next {
            Ok(Some(chunk)) => chunk,
            Ok(None) => break Ok(()),
            Err(ChannelError::Failed(fault)) if fault.is_fault() => {
                warn!("stdin source failed upstream: {fault}");
                break Err(fault);
            }
            Err(reason) => {
                debug!("stdin source ended: {reason}");
                break Ok(());
            }
        };

        let written = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                source.complete(Some(ChannelError::Cancelled));
                break Err(ProcessError::Cancelled);
            }
            written = write_chunk(&mut sink, &chunk) => written,
        };

        match written {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::BrokenPipe => {
                debug!("child closed stdin early");
                source.complete(None);
                break Ok(());
            }
            Err(e) => {
                let fault = ProcessError::stream_io(StreamKind::Stdin, e);
                source.complete(Some(ChannelError::Failed(fault.clone())));
                break Err(fault);
            }
        }
    };

    if let Err(e) = sink.shutdown().await {
        debug!("closing child stdin: {e}");
    }
    result
}

async fn write_chunk<W: AsyncWrite + Unpin>(sink: &mut W, chunk: &[u8]) -> io::Result<()> {
    sink.write_all(chunk).await?;
    sink.flush().await
}
