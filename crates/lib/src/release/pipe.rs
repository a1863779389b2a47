//! In-memory byte pipe between a blocking producer and an async consumer.
//!
//! The producer side implements [`std::io::Write`] so it can sit under a
//! streaming encoder running on a blocking thread; the consumer side is a
//! [`Stream`] of chunks suitable as an upload body. The channel is bounded,
//! so a slow uploader applies backpressure to the encoder.
//!
//! Failure travels both ways. [`PipeWriter::close_with_error`] delivers an
//! error as the final item of the stream, and dropping the reader makes every
//! later write fail with `BrokenPipe`. Neither side can block forever on a
//! peer that has gone away.

use std::io::{self, Write};
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::{Bytes, BytesMut};
use futures::Stream;
use tokio::sync::mpsc;

use crate::consts::PIPE_CHUNK_SIZE;

/// Create a pipe holding at most `capacity` chunks in flight.
pub fn pipe(capacity: usize) -> (PipeWriter, PipeReader) {
  let (tx, rx) = mpsc::channel(capacity.max(1));
  (
    PipeWriter {
      tx: Some(tx),
      buf: BytesMut::with_capacity(PIPE_CHUNK_SIZE),
    },
    PipeReader { rx },
  )
}

/// Blocking write half. Must not be used from inside an async task.
#[derive(Debug)]
pub struct PipeWriter {
  tx: Option<mpsc::Sender<io::Result<Bytes>>>,
  buf: BytesMut,
}

impl PipeWriter {
  fn send(&mut self, item: io::Result<Bytes>) -> io::Result<()> {
    let tx = self
      .tx
      .as_ref()
      .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "pipe already closed"))?;
    tx.blocking_send(item)
      .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "pipe reader dropped"))
  }

  fn send_buffered(&mut self) -> io::Result<()> {
    if self.buf.is_empty() {
      return Ok(());
    }
    let chunk = self.buf.split().freeze();
    self.send(Ok(chunk))
  }

  /// Flush buffered bytes and signal end of stream.
  pub fn close(mut self) -> io::Result<()> {
    self.send_buffered()?;
    self.tx = None;
    Ok(())
  }

  /// Discard buffered bytes and end the stream with `err`.
  ///
  /// The reader yields `err` as its last item; later writes fail with
  /// `BrokenPipe`. Takes `&mut self` so it can be reached through an encoder
  /// wrapping the writer.
  pub fn close_with_error(&mut self, err: io::Error) {
    self.buf.clear();
    // A reader that has already gone away has its own error to report.
    let _ = self.send(Err(err));
    self.tx = None;
  }
}

impl Write for PipeWriter {
  fn write(&mut self, data: &[u8]) -> io::Result<usize> {
    let room = PIPE_CHUNK_SIZE - self.buf.len();
    let n = data.len().min(room);
    self.buf.extend_from_slice(&data[..n]);
    if self.buf.len() >= PIPE_CHUNK_SIZE {
      self.send_buffered()?;
    }
    Ok(n)
  }

  fn flush(&mut self) -> io::Result<()> {
    self.send_buffered()
  }
}

/// Async read half; yields chunks until the writer closes or fails.
#[derive(Debug)]
pub struct PipeReader {
  rx: mpsc::Receiver<io::Result<Bytes>>,
}

impl Stream for PipeReader {
  type Item = io::Result<Bytes>;

  fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
    self.rx.poll_recv(cx)
  }
}
