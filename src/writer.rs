//! Dedicated writer task for byte-stream transports.
//!
//! Outbound frames are encoded by the caller and queued on an unbounded
//! channel; a single task owns the write half and drains the queue, batching
//! whatever is ready into one `write_vectored` call.
//!
//! # Architecture
//!
//! ```text
//! Engine::post ─┐
//! Dispatcher   ─┼─► mpsc::UnboundedSender<OutboundFrame> ─► Writer Task ─► socket
//! RpcStream    ─┘
//! ```
//!
//! `post` never waits: enqueueing is synchronous, so frame order on the wire
//! equals the order of `send` calls.

use std::io::IoSlice;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::{ProcwireError, Result};
use crate::protocol::{encode_length_prefix, LENGTH_PREFIX_SIZE};

/// Maximum frames to batch in a single write operation.
const MAX_BATCH_SIZE: usize = 64;

/// An encoded frame ready to be written.
#[derive(Debug)]
pub struct OutboundFrame {
    /// 4-byte big-endian body length.
    pub prefix: [u8; LENGTH_PREFIX_SIZE],
    /// Codec-encoded frame body.
    pub body: Bytes,
}

impl OutboundFrame {
    /// Wrap an encoded body.
    ///
    /// # Errors
    ///
    /// Returns error if the body does not fit in a `u32` length prefix.
    #[inline]
    pub fn new(body: Bytes) -> Result<Self> {
        let len = u32::try_from(body.len()).map_err(|_| {
            ProcwireError::Protocol(format!("Frame body of {} bytes is too large", body.len()))
        })?;
        Ok(Self {
            prefix: encode_length_prefix(len),
            body,
        })
    }

    /// Total size on the wire (prefix + body).
    #[inline]
    pub fn size(&self) -> usize {
        LENGTH_PREFIX_SIZE + self.body.len()
    }
}

/// Handle for queueing frames on the writer task.
///
/// Cheaply cloneable.
#[derive(Clone)]
pub struct WriterHandle {
    tx: mpsc::UnboundedSender<OutboundFrame>,
    pending: Arc<AtomicUsize>,
}

impl WriterHandle {
    /// Queue a frame. Never waits.
    pub fn send(&self, frame: OutboundFrame) -> Result<()> {
        self.pending.fetch_add(1, Ordering::AcqRel);
        self.tx.send(frame).map_err(|_| {
            self.pending.fetch_sub(1, Ordering::Release);
            ProcwireError::ConnectionClosed
        })
    }

    /// Frames queued but not yet written.
    #[inline]
    pub fn pending_count(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }
}

/// Spawn the writer task and return a handle for queueing frames.
///
/// The task finishes cleanly once every handle is dropped and the queue is
/// drained, or with an error when the writer fails.
pub fn spawn_writer_task<W>(writer: W) -> (WriterHandle, JoinHandle<Result<()>>)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::unbounded_channel();
    let pending = Arc::new(AtomicUsize::new(0));

    let handle = WriterHandle {
        tx,
        pending: pending.clone(),
    };
    let task = tokio::spawn(writer_loop(rx, writer, pending));

    (handle, task)
}

async fn writer_loop<W>(
    mut rx: mpsc::UnboundedReceiver<OutboundFrame>,
    mut writer: W,
    pending: Arc<AtomicUsize>,
) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut batch = Vec::with_capacity(MAX_BATCH_SIZE);

    while let Some(first) = rx.recv().await {
        batch.push(first);
        while batch.len() < MAX_BATCH_SIZE {
            match rx.try_recv() {
                Ok(frame) => batch.push(frame),
                Err(_) => break,
            }
        }

        write_batch(&mut writer, &batch).await?;
        pending.fetch_sub(batch.len(), Ordering::Release);
        batch.clear();
    }

    let _ = writer.shutdown().await;
    Ok(())
}

/// Write a batch with scatter/gather I/O, resuming after partial writes.
async fn write_batch<W>(writer: &mut W, batch: &[OutboundFrame]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let total_size: usize = batch.iter().map(OutboundFrame::size).sum();
    let mut total_written = 0;

    while total_written < total_size {
        let slices = build_remaining_slices(batch, total_written);
        let written = writer.write_vectored(&slices).await?;
        if written == 0 {
            return Err(ProcwireError::Io(std::io::Error::new(
                std::io::ErrorKind::WriteZero,
                "write_vectored returned 0",
            )));
        }
        total_written += written;
    }

    writer.flush().await?;
    Ok(())
}

/// Build IoSlices for the bytes of `batch` after the first `skip_bytes`.
fn build_remaining_slices(batch: &[OutboundFrame], skip_bytes: usize) -> Vec<IoSlice<'_>> {
    let mut slices = Vec::with_capacity(batch.len() * 2);
    let mut offset = 0;

    for frame in batch {
        for part in [&frame.prefix[..], &frame.body[..]] {
            let end = offset + part.len();
            if !part.is_empty() && skip_bytes < end {
                slices.push(IoSlice::new(&part[skip_bytes.saturating_sub(offset)..]));
            }
            offset = end;
        }
    }

    slices
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::time::Duration;
    use tokio::io::{duplex, AsyncReadExt};

    fn frame(body: &'static [u8]) -> OutboundFrame {
        OutboundFrame::new(Bytes::from_static(body)).unwrap()
    }

    #[test]
    fn test_outbound_frame_prefix() {
        let f = frame(b"hello");
        assert_eq!(f.prefix, [0, 0, 0, 5]);
        assert_eq!(f.size(), LENGTH_PREFIX_SIZE + 5);
    }

    #[test]
    fn test_remaining_slices_no_skip() {
        let batch = vec![frame(b"hello")];
        let slices = build_remaining_slices(&batch, 0);
        assert_eq!(slices.len(), 2);
    }

    #[test]
    fn test_remaining_slices_partial_prefix() {
        let batch = vec![frame(b"hello")];
        let slices = build_remaining_slices(&batch, 3);
        assert_eq!(slices.len(), 2);
        assert_eq!(slices[0].len(), 1);
        assert_eq!(slices[1].len(), 5);
    }

    #[test]
    fn test_remaining_slices_into_second_frame() {
        let batch = vec![frame(b"ab"), frame(b"cdef")];
        // First frame (6 bytes) + 4-byte prefix + 1 body byte consumed.
        let slices = build_remaining_slices(&batch, 11);
        assert_eq!(slices.len(), 1);
        assert_eq!(&*slices[0], b"def");
    }

    #[tokio::test]
    async fn test_write_batch_layout() {
        let mut buf = Cursor::new(Vec::new());
        write_batch(&mut buf, &[frame(b"ab"), frame(b"")]).await.unwrap();

        assert_eq!(buf.into_inner(), vec![0, 0, 0, 2, b'a', b'b', 0, 0, 0, 0]);
    }

    #[tokio::test]
    async fn test_writer_task_preserves_order() {
        let (client, mut server) = duplex(4096);
        let (handle, _task) = spawn_writer_task(client);

        for i in 0..10u8 {
            handle
                .send(OutboundFrame::new(Bytes::copy_from_slice(&[i])).unwrap())
                .unwrap();
        }

        let mut buf = vec![0u8; 50];
        server.read_exact(&mut buf).await.unwrap();
        for i in 0..10usize {
            assert_eq!(&buf[i * 5..i * 5 + 4], &[0, 0, 0, 1]);
            assert_eq!(buf[i * 5 + 4], i as u8);
        }

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(handle.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_writer_shutdown_on_handle_drop() {
        let (client, _server) = duplex(4096);
        let (handle, task) = spawn_writer_task(client);

        drop(handle);
        assert!(task.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_send_after_writer_failure() {
        let (client, server) = duplex(64);
        drop(server);
        let (handle, task) = spawn_writer_task(client);

        handle.send(frame(b"lost")).unwrap();
        assert!(task.await.unwrap().is_err());
        assert!(matches!(
            handle.send(frame(b"x")),
            Err(ProcwireError::ConnectionClosed)
        ));
    }
}
