//! Unix domain socket helpers producing [`StreamAdapter`]s.
//!
//! # Example
//!
//! ```ignore
//! use procwire_rpc::transport::{connect_pipe, generate_pipe_path, PipeListener};
//!
//! let path = generate_pipe_path();
//! let listener = PipeListener::bind(&path).await?;
//! let (server, client) = tokio::join!(
//!     listener.accept(Default::default()),
//!     connect_pipe(&path, Default::default()),
//! );
//! ```

use std::path::Path;

use tokio::net::{UnixListener, UnixStream};

use super::{StreamAdapter, StreamAdapterConfig};
use crate::error::Result;

/// Generate a unique socket path for this process.
///
/// Format: `{tmp}/procwire-rpc-{pid}-{random}.sock`
pub fn generate_pipe_path() -> String {
    let dir = std::env::temp_dir();
    let name = format!(
        "procwire-rpc-{}-{:016x}.sock",
        std::process::id(),
        rand::random::<u64>()
    );
    dir.join(name).to_string_lossy().into_owned()
}

/// Unix domain socket listener.
///
/// Removes the socket file when dropped.
pub struct PipeListener {
    listener: UnixListener,
    path: String,
}

impl PipeListener {
    /// Bind to a socket path, replacing any stale socket file.
    pub async fn bind(path: &str) -> Result<Self> {
        if Path::new(path).exists() {
            std::fs::remove_file(path)?;
        }

        let listener = UnixListener::bind(path)?;
        tracing::debug!(path, "Listening");

        Ok(Self {
            listener,
            path: path.to_string(),
        })
    }

    /// Accept one connection as a raw stream.
    pub async fn accept_stream(&self) -> Result<UnixStream> {
        let (stream, _addr) = self.listener.accept().await?;
        Ok(stream)
    }

    /// Accept one connection and wrap it in a [`StreamAdapter`].
    pub async fn accept(&self, config: StreamAdapterConfig) -> Result<StreamAdapter> {
        let stream = self.accept_stream().await?;
        let (reader, writer) = stream.into_split();
        Ok(StreamAdapter::with_config(reader, writer, config))
    }

    /// Get the socket path.
    pub fn path(&self) -> &str {
        &self.path
    }
}

impl Drop for PipeListener {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

/// Connect to a listening socket and wrap it in a [`StreamAdapter`].
pub async fn connect_pipe(path: &str, config: StreamAdapterConfig) -> Result<StreamAdapter> {
    let stream = UnixStream::connect(path).await?;
    let (reader, writer) = stream.into_split();
    Ok(StreamAdapter::with_config(reader, writer, config))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Frame;
    use crate::transport::{ChannelAdapter, FrameCallback};
    use std::sync::Arc;
    use tokio::sync::mpsc;

    #[test]
    fn test_generate_pipe_path_format() {
        let path = generate_pipe_path();
        let pid = std::process::id().to_string();

        assert!(path.contains("procwire-rpc-"));
        assert!(path.contains(&pid));
        assert!(path.ends_with(".sock"));
    }

    #[test]
    fn test_generate_pipe_path_uniqueness() {
        let paths: std::collections::HashSet<String> =
            (0..32).map(|_| generate_pipe_path()).collect();
        assert_eq!(paths.len(), 32);
    }

    #[tokio::test]
    async fn test_bind_connect_exchange() {
        let path = generate_pipe_path();
        let listener = PipeListener::bind(&path).await.unwrap();

        let (server, client) = tokio::join!(
            listener.accept(StreamAdapterConfig::default()),
            connect_pipe(&path, StreamAdapterConfig::default()),
        );
        let (server, client) = (server.unwrap(), client.unwrap());

        let (tx, mut rx) = mpsc::unbounded_channel();
        let on_frame: FrameCallback = Arc::new(move |frame| {
            let _ = tx.send(frame);
        });
        server.start(on_frame).unwrap();
        client.start(Arc::new(|_| {})).unwrap();

        client.post(Frame::cancel("over-the-socket")).unwrap();
        assert_eq!(rx.recv().await.unwrap(), Frame::cancel("over-the-socket"));

        drop(listener);
        assert!(!Path::new(&path).exists());
    }
}
