//! Transport module - the channel adapter contract and bundled adapters.
//!
//! The engine never touches a physical connection directly. It talks to one
//! [`ChannelAdapter`], which:
//! - delivers every inbound frame to the callback given to `start`, in the
//!   order the connection produced them
//! - accepts outbound frames through `post` (fire-and-forget)
//! - optionally releases the connection on `stop`
//!
//! Bundled adapters:
//! - [`MemoryAdapter`] - in-process pair, used for tests and embedded peers
//! - [`StreamAdapter`] - length-prefixed frames over any `AsyncRead + AsyncWrite`
//! - [`PipeListener`] / [`connect_pipe`] - Unix domain sockets feeding a
//!   [`StreamAdapter`] (Unix only)

mod memory;
#[cfg(unix)]
mod pipe;
mod stream;

pub use memory::MemoryAdapter;
#[cfg(unix)]
pub use pipe::{connect_pipe, generate_pipe_path, PipeListener};
pub use stream::{StreamAdapter, StreamAdapterConfig, DEFAULT_READ_BUFFER_SIZE};

use std::sync::Arc;

use crate::error::Result;
use crate::protocol::Frame;

/// Callback receiving inbound frames.
pub type FrameCallback = Arc<dyn Fn(Frame) + Send + Sync>;

/// Minimal contract between the engine and a physical channel.
pub trait ChannelAdapter: Send + Sync + 'static {
    /// Register the single callback invoked for every inbound frame.
    ///
    /// Called once per adapter, for the lifetime of the connection.
    fn start(&self, on_frame: FrameCallback) -> Result<()>;

    /// Send one outbound frame. Must not block.
    fn post(&self, frame: Frame) -> Result<()>;

    /// Release underlying connection resources.
    fn stop(&self) -> Result<()> {
        Ok(())
    }
}

impl<A: ChannelAdapter + ?Sized> ChannelAdapter for Arc<A> {
    fn start(&self, on_frame: FrameCallback) -> Result<()> {
        (**self).start(on_frame)
    }

    fn post(&self, frame: Frame) -> Result<()> {
        (**self).post(frame)
    }

    fn stop(&self) -> Result<()> {
        (**self).stop()
    }
}

impl<A: ChannelAdapter + ?Sized> ChannelAdapter for Box<A> {
    fn start(&self, on_frame: FrameCallback) -> Result<()> {
        (**self).start(on_frame)
    }

    fn post(&self, frame: Frame) -> Result<()> {
        (**self).post(frame)
    }

    fn stop(&self) -> Result<()> {
        (**self).stop()
    }
}
