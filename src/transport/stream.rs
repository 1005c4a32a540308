//! Length-prefixed frames over any async byte stream.
//!
//! Wire layout per frame: 4-byte big-endian body length, then the body encoded
//! with the configured [`FrameCodec`]. A reader task feeds a [`FrameBuffer`]
//! and delivers decoded frames to the engine; a writer task owns the write
//! half (see [`crate::writer`]).
//!
//! # Example
//!
//! ```ignore
//! use procwire_rpc::transport::{StreamAdapter, StreamAdapterConfig};
//! use procwire_rpc::codec::FrameCodec;
//!
//! let (a, b) = tokio::io::duplex(64 * 1024);
//! let config = StreamAdapterConfig { codec: FrameCodec::MsgPack, ..Default::default() };
//! let adapter = StreamAdapter::from_stream(a, config);
//! ```

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;

use super::{ChannelAdapter, FrameCallback};
use crate::codec::FrameCodec;
use crate::error::{ProcwireError, Result};
use crate::protocol::{Frame, FrameBuffer, DEFAULT_MAX_FRAME_SIZE};
use crate::writer::{spawn_writer_task, OutboundFrame, WriterHandle};

type BoxedReader = Box<dyn AsyncRead + Unpin + Send>;
type BoxedWriter = Box<dyn AsyncWrite + Unpin + Send>;

/// Default read buffer size (64 KiB).
pub const DEFAULT_READ_BUFFER_SIZE: usize = 64 * 1024;

/// Configuration for [`StreamAdapter`].
#[derive(Debug, Clone)]
pub struct StreamAdapterConfig {
    /// Frame body encoding. Both ends must agree.
    pub codec: FrameCodec,
    /// Largest accepted or produced frame body.
    pub max_frame_size: u32,
    /// Bytes requested per read.
    pub read_buffer_size: usize,
}

impl Default for StreamAdapterConfig {
    fn default() -> Self {
        Self {
            codec: FrameCodec::default(),
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
        }
    }
}

/// Channel adapter over a split byte stream.
pub struct StreamAdapter {
    config: StreamAdapterConfig,
    /// Halves waiting for `start`.
    io: Mutex<Option<(BoxedReader, BoxedWriter)>>,
    writer: Mutex<Option<WriterHandle>>,
    shutdown: CancellationToken,
    /// Cancelled when the reader task ends (EOF, error or stop).
    closed: CancellationToken,
}

impl StreamAdapter {
    /// Create an adapter with default configuration.
    pub fn new<R, W>(reader: R, writer: W) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        Self::with_config(reader, writer, StreamAdapterConfig::default())
    }

    /// Create an adapter with custom configuration.
    pub fn with_config<R, W>(reader: R, writer: W, config: StreamAdapterConfig) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        Self {
            config,
            io: Mutex::new(Some((Box::new(reader), Box::new(writer)))),
            writer: Mutex::new(None),
            shutdown: CancellationToken::new(),
            closed: CancellationToken::new(),
        }
    }

    /// Create an adapter over a bidirectional stream.
    pub fn from_stream<S>(stream: S, config: StreamAdapterConfig) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, writer) = tokio::io::split(stream);
        Self::with_config(reader, writer, config)
    }

    /// Get the configuration.
    pub fn config(&self) -> &StreamAdapterConfig {
        &self.config
    }

    /// Frames queued but not yet written.
    pub fn pending_frames(&self) -> usize {
        self.writer
            .lock()
            .as_ref()
            .map(WriterHandle::pending_count)
            .unwrap_or(0)
    }

    /// Check if the inbound side has finished.
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Wait until the inbound side finishes (peer EOF, read error or `stop`).
    pub async fn closed(&self) {
        self.closed.cancelled().await
    }
}

impl ChannelAdapter for StreamAdapter {
    fn start(&self, on_frame: FrameCallback) -> Result<()> {
        let handle = Handle::try_current().map_err(|_| ProcwireError::NoRuntime)?;
        let (reader, writer) = self
            .io
            .lock()
            .take()
            .ok_or_else(|| ProcwireError::Protocol("Stream adapter already started".into()))?;

        let _guard = handle.enter();
        let (writer_handle, writer_task) = spawn_writer_task(writer);
        *self.writer.lock() = Some(writer_handle);

        handle.spawn(async move {
            match writer_task.await {
                Ok(Ok(())) => tracing::debug!("Writer task finished"),
                Ok(Err(e)) => tracing::error!("Writer task failed: {}", e),
                Err(e) => tracing::error!("Writer task panicked: {}", e),
            }
        });

        let config = self.config.clone();
        let shutdown = self.shutdown.clone();
        let closed = self.closed.clone();
        handle.spawn(async move {
            if let Err(e) = read_loop(reader, &config, &on_frame, &shutdown).await {
                tracing::error!("Reader task failed: {}", e);
            }
            closed.cancel();
        });

        Ok(())
    }

    fn post(&self, frame: Frame) -> Result<()> {
        let body = self.config.codec.encode_frame(&frame)?;
        if body.len() > self.config.max_frame_size as usize {
            return Err(ProcwireError::Protocol(format!(
                "Frame size {} exceeds maximum {}",
                body.len(),
                self.config.max_frame_size
            )));
        }

        let guard = self.writer.lock();
        let writer = guard.as_ref().ok_or(ProcwireError::ConnectionClosed)?;
        writer.send(OutboundFrame::new(Bytes::from(body))?)
    }

    fn stop(&self) -> Result<()> {
        self.shutdown.cancel();
        // Dropping the handle lets the writer drain its queue and exit.
        self.writer.lock().take();
        self.io.lock().take();
        Ok(())
    }
}

async fn read_loop(
    mut reader: BoxedReader,
    config: &StreamAdapterConfig,
    on_frame: &FrameCallback,
    shutdown: &CancellationToken,
) -> Result<()> {
    let mut frames = FrameBuffer::with_max_frame_size(config.max_frame_size);
    let mut buf = vec![0u8; config.read_buffer_size.max(1)];

    loop {
        let n = tokio::select! {
            _ = shutdown.cancelled() => return Ok(()),
            read = reader.read(&mut buf) => read?,
        };

        if n == 0 {
            if frames.is_mid_frame() {
                tracing::warn!(buffered = frames.len(), "Peer closed mid-frame");
            } else {
                tracing::debug!("Peer closed stream");
            }
            return Ok(());
        }

        for body in frames.push(&buf[..n])? {
            match config.codec.decode_frame(&body) {
                Ok(frame) => on_frame(frame),
                Err(e) => tracing::warn!(len = body.len(), "Dropping undecodable frame: {}", e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::encode_length_prefix;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::io::{duplex, AsyncWriteExt};
    use tokio::sync::mpsc;

    fn collector() -> (FrameCallback, mpsc::UnboundedReceiver<Frame>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let callback: FrameCallback = Arc::new(move |frame| {
            let _ = tx.send(frame);
        });
        (callback, rx)
    }

    fn pair(codec: FrameCodec) -> (StreamAdapter, StreamAdapter) {
        let (a, b) = duplex(64 * 1024);
        let config = StreamAdapterConfig {
            codec,
            ..Default::default()
        };
        (
            StreamAdapter::from_stream(a, config.clone()),
            StreamAdapter::from_stream(b, config),
        )
    }

    #[tokio::test]
    async fn test_frames_cross_in_order() {
        for codec in [FrameCodec::Json, FrameCodec::MsgPack] {
            let (left, right) = pair(codec);
            let (left_cb, _left_rx) = collector();
            let (right_cb, mut right_rx) = collector();
            left.start(left_cb).unwrap();
            right.start(right_cb).unwrap();

            for i in 0..20 {
                left.post(Frame::cancel(format!("c{}", i))).unwrap();
            }
            for i in 0..20 {
                assert_eq!(right_rx.recv().await.unwrap(), Frame::cancel(format!("c{}", i)));
            }
        }
    }

    #[tokio::test]
    async fn test_post_before_start_fails() {
        let (left, _right) = pair(FrameCodec::Json);
        assert!(matches!(
            left.post(Frame::end("x")),
            Err(ProcwireError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn test_oversized_outbound_rejected() {
        let (a, _b) = duplex(1024);
        let config = StreamAdapterConfig {
            max_frame_size: 16,
            ..Default::default()
        };
        let adapter = StreamAdapter::from_stream(a, config);
        let (cb, _rx) = collector();
        adapter.start(cb).unwrap();

        let big = Frame::cancel("a-correlation-id-longer-than-sixteen-bytes");
        assert!(matches!(adapter.post(big), Err(ProcwireError::Protocol(_))));
    }

    #[tokio::test]
    async fn test_undecodable_frame_skipped() {
        let (a, mut raw) = duplex(1024);
        let adapter = StreamAdapter::from_stream(a, StreamAdapterConfig::default());
        let (cb, mut rx) = collector();
        adapter.start(cb).unwrap();

        let good = br#"{"kind":"end","cid":"ok"}"#;
        raw.write_all(&encode_length_prefix(3)).await.unwrap();
        raw.write_all(b"???").await.unwrap();
        raw.write_all(&encode_length_prefix(good.len() as u32)).await.unwrap();
        raw.write_all(good).await.unwrap();

        assert_eq!(rx.recv().await.unwrap(), Frame::end("ok"));
    }

    #[tokio::test]
    async fn test_peer_eof_closes() {
        let (a, raw) = duplex(1024);
        let adapter = StreamAdapter::from_stream(a, StreamAdapterConfig::default());
        let (cb, _rx) = collector();
        adapter.start(cb).unwrap();

        drop(raw);
        tokio::time::timeout(Duration::from_secs(1), adapter.closed())
            .await
            .unwrap();
        assert!(adapter.is_closed());
    }

    #[tokio::test]
    async fn test_stop_ends_reader_and_rejects_posts() {
        let (left, _right) = pair(FrameCodec::Json);
        let (cb, _rx) = collector();
        left.start(cb).unwrap();

        left.stop().unwrap();
        tokio::time::timeout(Duration::from_secs(1), left.closed())
            .await
            .unwrap();
        assert!(matches!(
            left.post(Frame::end("x")),
            Err(ProcwireError::ConnectionClosed)
        ));
    }
}
