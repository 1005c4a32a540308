//! In-process channel adapter.
//!
//! [`MemoryAdapter::pair`] returns two connected ends: frames posted on one
//! end are delivered, in order, to the callback started on the other. Each
//! end pumps its inbound queue on a tokio task, so frames posted before the
//! peer starts are queued, not lost.
//!
//! # Example
//!
//! ```ignore
//! use procwire_rpc::transport::MemoryAdapter;
//! use procwire_rpc::Peer;
//!
//! let (left, right) = MemoryAdapter::pair();
//! let server = Peer::builder().unary("echo", |v: String, _| async move { Ok(v) }).build(right)?;
//! let client = Peer::builder().build(left)?;
//! ```

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::{ChannelAdapter, FrameCallback};
use crate::error::{ProcwireError, Result};
use crate::protocol::Frame;

/// One end of an in-process frame channel.
pub struct MemoryAdapter {
    /// Frames we post, delivered to the peer. `None` after `stop`.
    outbound: Mutex<Option<mpsc::UnboundedSender<Frame>>>,
    /// Frames the peer posts. Taken by `start`.
    inbound: Mutex<Option<mpsc::UnboundedReceiver<Frame>>>,
    /// Pump task delivering inbound frames to the callback.
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl MemoryAdapter {
    /// Create two connected ends.
    pub fn pair() -> (MemoryAdapter, MemoryAdapter) {
        let (left_tx, right_rx) = mpsc::unbounded_channel();
        let (right_tx, left_rx) = mpsc::unbounded_channel();

        (Self::new(left_tx, left_rx), Self::new(right_tx, right_rx))
    }

    fn new(outbound: mpsc::UnboundedSender<Frame>, inbound: mpsc::UnboundedReceiver<Frame>) -> Self {
        Self {
            outbound: Mutex::new(Some(outbound)),
            inbound: Mutex::new(Some(inbound)),
            pump: Mutex::new(None),
        }
    }

    /// Check if `start` has been called.
    pub fn is_started(&self) -> bool {
        self.inbound.lock().is_none()
    }
}

impl ChannelAdapter for MemoryAdapter {
    fn start(&self, on_frame: FrameCallback) -> Result<()> {
        let handle = Handle::try_current().map_err(|_| ProcwireError::NoRuntime)?;

        let mut rx = self
            .inbound
            .lock()
            .take()
            .ok_or_else(|| ProcwireError::Protocol("Memory adapter already started".into()))?;

        let task = handle.spawn(async move {
            while let Some(frame) = rx.recv().await {
                on_frame(frame);
            }
            tracing::debug!("Memory channel closed by peer");
        });

        *self.pump.lock() = Some(task);
        Ok(())
    }

    fn post(&self, frame: Frame) -> Result<()> {
        let guard = self.outbound.lock();
        let tx = guard.as_ref().ok_or(ProcwireError::ConnectionClosed)?;
        tx.send(frame).map_err(|_| ProcwireError::ConnectionClosed)
    }

    fn stop(&self) -> Result<()> {
        // Dropping the sender ends the peer's pump once it drains.
        self.outbound.lock().take();
        if let Some(task) = self.pump.lock().take() {
            task.abort();
        }
        Ok(())
    }
}

impl Drop for MemoryAdapter {
    fn drop(&mut self) {
        if let Some(task) = self.pump.get_mut().take() {
            task.abort();
        }
    }
}
