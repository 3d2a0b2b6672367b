//! Flow-controlled byte channels connecting sessions to their callers.
//!
//! A channel has exactly one write end and one read end. Writes are buffered
//! in the [`ByteWriter`] until flushed; a flush suspends while the channel
//! already holds `capacity` unread chunks, which is how a slow consumer slows
//! down a child process. The reader sees end-of-stream only after the writer
//! was completed, and sees the completion error if one was given.

use crate::error::ChannelError;
use std::io;
use std::pin::Pin;
use std::sync::{Arc, OnceLock};
use std::task::{Context, Poll, ready};
use tokio::sync::mpsc;
use tokio_stream::Stream;
use tokio_util::bytes::{Bytes, BytesMut};
use tokio_util::io::StreamReader;

#[derive(Debug, Default)]
struct Shared {
    /// Set once by the writer when it completes with an error
    writer_error: OnceLock<ChannelError>,
    /// Set once by the reader when it stops consuming
    reader_error: OnceLock<ChannelError>,
}

/// Create a channel whose writer suspends once `capacity` chunks are pending
pub fn byte_channel(capacity: usize) -> (ByteWriter, ByteReader) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let shared = Arc::new(Shared::default());
    (
        ByteWriter {
            tx: Some(tx),
            buffer: BytesMut::new(),
            shared: shared.clone(),
        },
        ByteReader {
            rx,
            shared,
            completed: false,
            finished: false,
        },
    )
}

/// Write end of a byte channel
#[derive(Debug)]
pub struct ByteWriter {
    tx: Option<mpsc::Sender<Bytes>>,
    buffer: BytesMut,
    shared: Arc<Shared>,
}

impl ByteWriter {
    /// Bytes written but not yet flushed
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_completed(&self) -> bool {
        self.tx.is_none()
    }

    /// True once the reader has gone away or completed its end
    pub fn is_closed(&self) -> bool {
        self.tx.as_ref().is_none_or(|tx| tx.is_closed())
    }

    /// Append bytes to the pending buffer without publishing them
    pub fn write(&mut self, data: &[u8]) -> Result<(), ChannelError> {
        if self.tx.is_none() {
            return Err(ChannelError::Completed);
        }
        self.buffer.extend_from_slice(data);
        Ok(())
    }

    /// Publish the pending buffer as one chunk, waiting for channel capacity
    pub async fn flush(&mut self) -> Result<(), ChannelError> {
        let Some(tx) = self.tx.as_ref() else {
            return Err(ChannelError::Completed);
        };
        if self.buffer.is_empty() {
            return Ok(());
        }
        let chunk = self.buffer.split().freeze();
        tx.send(chunk).await.map_err(|_| self.reader_error())
    }

    /// Write and flush a whole chunk
    pub async fn send(&mut self, chunk: impl AsRef<[u8]>) -> Result<(), ChannelError> {
        self.write(chunk.as_ref())?;
        self.flush().await
    }

    /// Close the write end. The reader drains what was already flushed and
    /// then observes end-of-stream, or `error` when one is given. Unflushed
    /// bytes are discarded. Returns false if the writer was already completed.
    pub fn complete(&mut self, error: Option<ChannelError>) -> bool {
        let Some(tx) = self.tx.take() else {
            return false;
        };
        self.buffer.clear();
        if let Some(error) = error {
            let _ = self.shared.writer_error.set(error);
        }
        // the error must be visible before the reader can observe the close
        drop(tx);
        true
    }

    fn reader_error(&self) -> ChannelError {
        self.shared
            .reader_error
            .get()
            .cloned()
            .unwrap_or(ChannelError::Closed)
    }
}

impl Drop for ByteWriter {
    fn drop(&mut self) {
        if self.tx.is_some() {
            self.complete(Some(ChannelError::Abandoned));
        }
    }
}

/// Read end of a byte channel
#[derive(Debug)]
pub struct ByteReader {
    rx: mpsc::Receiver<Bytes>,
    shared: Arc<Shared>,
    completed: bool,
    finished: bool,
}

impl ByteReader {
    /// Next chunk, `Ok(None)` at end-of-stream, or the writer's completion error
    pub async fn read(&mut self) -> Result<Option<Bytes>, ChannelError> {
        std::future::poll_fn(|cx| self.poll_read_chunk(cx)).await
    }

    pub fn poll_read_chunk(
        &mut self,
        cx: &mut Context<'_>,
    ) -> Poll<Result<Option<Bytes>, ChannelError>> {
        match ready!(self.rx.poll_recv(cx)) {
            Some(chunk) => Poll::Ready(Ok(Some(chunk))),
            None => Poll::Ready(match self.shared.writer_error.get() {
                Some(error) => Err(error.clone()),
                None => Ok(None),
            }),
        }
    }

    /// Drain the channel into one buffer
    pub async fn read_to_end(&mut self) -> Result<Vec<u8>, ChannelError> {
        let mut out = Vec::new();
        while let Some(chunk) = self.read().await? {
            out.extend_from_slice(&chunk);
        }
        Ok(out)
    }

    /// Stop consuming. Pending and future flushes on the writer fail with
    /// `error` (or [`ChannelError::Closed`]). Returns false if already completed.
    pub fn complete(&mut self, error: Option<ChannelError>) -> bool {
        if self.completed {
            return false;
        }
        self.completed = true;
        let _ = self
            .shared
            .reader_error
            .set(error.unwrap_or(ChannelError::Closed));
        self.rx.close();
        true
    }

    pub fn is_completed(&self) -> bool {
        self.completed
    }

    /// Adapt the reader to `AsyncRead` so it can be fed to `tokio_util` codecs
    pub fn into_async_read(self) -> StreamReader<Self, Bytes> {
        StreamReader::new(self)
    }
}

impl Stream for ByteReader {
    type Item = io::Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.finished {
            return Poll::Ready(None);
        }
        match ready!(this.poll_read_chunk(cx)) {
            Ok(Some(chunk)) => Poll::Ready(Some(Ok(chunk))),
            Ok(None) => {
                this.finished = true;
                Poll::Ready(None)
            }
            Err(error) => {
                this.finished = true;
                Poll::Ready(Some(Err(error.into())))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProcessError;
    use std::time::Duration;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn test_flushed_chunks_arrive_in_order() {
        let (mut writer, mut reader) = byte_channel(4);
        writer.send(b"hello ").await.unwrap();
        writer.write(b"wor").unwrap();
        writer.write(b"ld").unwrap();
        assert_eq!(writer.buffered(), 5);
        writer.flush().await.unwrap();
        assert!(writer.complete(None));

        assert_eq!(reader.read().await.unwrap().unwrap(), Bytes::from_static(b"hello "));
        assert_eq!(reader.read().await.unwrap().unwrap(), Bytes::from_static(b"world"));
        assert!(reader.read().await.unwrap().is_none());
        // end-of-stream is sticky
        assert!(reader.read().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_completion_error_reaches_reader_after_data() {
        let (mut writer, mut reader) = byte_channel(4);
        writer.send(b"partial").await.unwrap();
        writer.complete(Some(ChannelError::Cancelled));

        assert_eq!(reader.read().await.unwrap().unwrap(), Bytes::from_static(b"partial"));
        assert!(matches!(reader.read().await, Err(ChannelError::Cancelled)));
    }

    #[tokio::test]
    async fn test_complete_is_idempotent() {
        let (mut writer, mut reader) = byte_channel(1);
        assert!(writer.complete(None));
        assert!(!writer.complete(Some(ChannelError::Cancelled)));
        assert!(writer.is_completed());
        assert!(matches!(writer.write(b"x"), Err(ChannelError::Completed)));
        assert!(reader.read().await.unwrap().is_none());

        assert!(reader.complete(None));
        assert!(!reader.complete(Some(ChannelError::Cancelled)));
    }

    #[tokio::test]
    async fn test_completion_unblocks_pending_read() {
        let (mut writer, mut reader) = byte_channel(1);
        let pending = tokio::spawn(async move { reader.read().await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        writer.complete(Some(ChannelError::Failed(ProcessError::Cancelled)));

        let result = pending.await.unwrap();
        assert!(matches!(result, Err(ChannelError::Failed(ProcessError::Cancelled))));
    }

    #[tokio::test]
    async fn test_dropped_writer_is_abandoned() {
        let (writer, mut reader) = byte_channel(1);
        drop(writer);
        assert!(matches!(reader.read().await, Err(ChannelError::Abandoned)));
    }

    #[tokio::test]
    async fn test_flush_suspends_until_reader_catches_up() {
        let (mut writer, mut reader) = byte_channel(1);
        writer.send(b"first").await.unwrap();

        let blocked = tokio::time::timeout(Duration::from_millis(50), writer.send(b"second")).await;
        assert!(blocked.is_err(), "second flush should wait for capacity");

        assert_eq!(reader.read().await.unwrap().unwrap(), Bytes::from_static(b"first"));
        writer.send(b"third").await.unwrap();
        assert_eq!(reader.read().await.unwrap().unwrap(), Bytes::from_static(b"third"));
    }

    #[tokio::test]
    async fn test_reader_completion_fails_writer() {
        let (mut writer, mut reader) = byte_channel(1);
        writer.send(b"fill").await.unwrap();

        let flush = tokio::spawn(async move {
            let result = writer.send(b"more").await;
            (writer, result)
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        reader.complete(Some(ChannelError::Cancelled));

        let (writer, result) = flush.await.unwrap();
        assert!(matches!(result, Err(ChannelError::Cancelled)));
        assert!(writer.is_closed());
    }

    #[tokio::test]
    async fn test_async_read_adapter() {
        let (mut writer, reader) = byte_channel(4);
        writer.send(b"line one\n").await.unwrap();
        writer.send(b"line two\n").await.unwrap();
        writer.complete(None);

        let mut text = String::new();
        reader.into_async_read().read_to_string(&mut text).await.unwrap();
        assert_eq!(text, "line one\nline two\n");
    }

    #[tokio::test]
    async fn test_async_read_adapter_surfaces_failure() {
        let (mut writer, reader) = byte_channel(4);
        writer.send(b"abc").await.unwrap();
        writer.complete(Some(ChannelError::Cancelled));

        let mut out = Vec::new();
        let err = reader.into_async_read().read_to_end(&mut out).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::Interrupted);
    }
}
