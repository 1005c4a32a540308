//! Client request and stream APIs.
//!
//! [`RpcClient`] issues calls over an [`Engine`]:
//! - [`request`](RpcClient::request) - one `req`, settled by the first of
//!   `res`, `err` or the local timeout
//! - [`stream`](RpcClient::stream) - one `req`, answered by `nxt`* and a
//!   terminal, consumed as a [`futures::Stream`]
//!
//! # Example
//!
//! ```ignore
//! use procwire_rpc::{CallOptions, RpcClient};
//! use futures::StreamExt;
//!
//! let client = RpcClient::new(engine);
//! let sum: i64 = client.request("math.add", &json!({"a": 2, "b": 5})).await?;
//!
//! let quick: String = client
//!     .request_with("echo", &"hi", CallOptions::new().timeout_ms(250))
//!     .await?;
//!
//! let mut ticks = client.stream::<_, u32>("ticks", &3);
//! while let Some(tick) = ticks.next().await {
//!     println!("{}", tick?);
//! }
//! ```

mod stream;

pub use stream::RpcStream;

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::codec::JsonCodec;
use crate::engine::Engine;
use crate::error::{ProcwireError, Result, RpcError};
use crate::protocol::{Frame, FrameKind, Meta, PROTOCOL_VERSION};

/// Default time a request waits for its answer.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Client-wide settings.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Applied when a call does not set its own timeout. Zero disables it.
    pub default_timeout: Duration,
    /// Identity stamped into default request metadata.
    pub sender: Option<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            default_timeout: DEFAULT_REQUEST_TIMEOUT,
            sender: None,
        }
    }
}

/// Per-call overrides.
#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    timeout: Option<Duration>,
    meta: Option<Meta>,
}

impl CallOptions {
    /// Options that defer to the client defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the timeout. Zero disables it.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set the timeout in milliseconds. Zero or negative disables it.
    pub fn timeout_ms(self, ms: i64) -> Self {
        self.timeout(Duration::from_millis(u64::try_from(ms).unwrap_or(0)))
    }

    /// Wait for the answer indefinitely.
    pub fn no_timeout(self) -> Self {
        self.timeout(Duration::ZERO)
    }

    /// Send this metadata instead of the client's default metadata.
    pub fn meta(mut self, meta: Meta) -> Self {
        self.meta = Some(meta);
        self
    }

    fn effective_timeout(&self, default: Duration) -> Option<Duration> {
        let timeout = self.timeout.unwrap_or(default);
        (!timeout.is_zero()).then_some(timeout)
    }
}

/// Issues requests and streams over an engine.
///
/// Cheap to clone.
#[derive(Clone)]
pub struct RpcClient {
    engine: Engine,
    config: Arc<ClientConfig>,
}

impl RpcClient {
    /// Create a client with default configuration.
    pub fn new(engine: Engine) -> Self {
        Self::with_config(engine, ClientConfig::default())
    }

    /// Create a client with custom configuration.
    pub fn with_config(engine: Engine, config: ClientConfig) -> Self {
        Self {
            engine,
            config: Arc::new(config),
        }
    }

    /// Get the engine.
    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Get the configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Call `method` and decode its result.
    pub async fn request<P, R>(&self, method: &str, payload: &P) -> Result<R>
    where
        P: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        self.request_with(method, payload, CallOptions::default())
            .await
    }

    /// Call `method` with per-call options and decode its result.
    pub async fn request_with<P, R>(
        &self,
        method: &str,
        payload: &P,
        options: CallOptions,
    ) -> Result<R>
    where
        P: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let payload = JsonCodec::to_value(payload)?;
        let result = self.call(method, Some(payload), options).await?;
        JsonCodec::from_value(result)
    }

    /// Call `method` with a raw payload and return the raw result.
    ///
    /// Dropping the returned future before it settles sends `can`; a local
    /// timeout does not.
    pub async fn call(
        &self,
        method: &str,
        payload: Option<Value>,
        options: CallOptions,
    ) -> Result<Option<Value>> {
        let cid = self.engine.generate_id();
        let mut replies = self.engine.subscribe({
            let cid = cid.clone();
            move |f| f.matches(&cid, &[FrameKind::Response, FrameKind::Error])
        });

        let timeout = options.effective_timeout(self.config.default_timeout);
        let meta = self.stamp_meta(options.meta);
        self.engine
            .post(Frame::request(cid.as_str(), method, payload, meta))?;
        let mut pending = CancelOnDrop::new(self.engine.clone(), cid.clone());

        let settled = match timeout {
            Some(limit) => match tokio::time::timeout(limit, replies.recv()).await {
                Ok(frame) => frame,
                Err(_) => {
                    tracing::debug!(cid = %cid, method, "Request timed out");
                    Some(Frame::error(cid.as_str(), &RpcError::timeout(method, limit)))
                }
            },
            None => replies.recv().await,
        };
        pending.disarm();

        match settled {
            Some(Frame::Response { result, .. }) => Ok(result),
            Some(frame) => match frame.to_rpc_error() {
                Some(err) => Err(err.into()),
                None => Err(ProcwireError::Protocol(format!(
                    "Unexpected {} frame for {}",
                    frame.kind(),
                    cid
                ))),
            },
            None => Err(ProcwireError::ConnectionClosed),
        }
    }

    /// Open a stream of `T` from `method`.
    ///
    /// Nothing is sent until the stream is first polled.
    pub fn stream<P, T>(&self, method: &str, payload: &P) -> RpcStream<T>
    where
        P: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.stream_with(method, payload, CallOptions::default())
    }

    /// Open a stream with per-call options.
    ///
    /// Timeouts do not apply to streams; metadata is forwarded.
    pub fn stream_with<P, T>(&self, method: &str, payload: &P, options: CallOptions) -> RpcStream<T>
    where
        P: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let payload = JsonCodec::to_value(payload).map(Some);
        let meta = self.stamp_meta(options.meta);
        RpcStream::new(self.engine.clone(), method.to_string(), payload, meta)
    }

    /// Caller-supplied metadata, or the default `{sender, version, ts}`.
    fn stamp_meta(&self, explicit: Option<Meta>) -> Option<Meta> {
        if explicit.is_some() {
            return explicit;
        }

        let mut meta = Meta::new();
        if let Some(sender) = &self.config.sender {
            meta.insert("sender".into(), Value::from(sender.as_str()));
        }
        meta.insert("version".into(), Value::from(PROTOCOL_VERSION));
        let ts = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        meta.insert("ts".into(), Value::from(ts));
        Some(meta)
    }
}

/// Sends `can` for `cid` when dropped while armed.
pub(crate) struct CancelOnDrop {
    engine: Engine,
    cid: Option<String>,
}

impl CancelOnDrop {
    pub(crate) fn new(engine: Engine, cid: String) -> Self {
        Self {
            engine,
            cid: Some(cid),
        }
    }

    /// The conversation settled; nothing to cancel.
    pub(crate) fn disarm(&mut self) {
        self.cid = None;
    }
}

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        if let Some(cid) = self.cid.take() {
            tracing::debug!(cid = %cid, "Canceling abandoned call");
            if let Err(e) = self.engine.post(Frame::cancel(cid)) {
                tracing::debug!("Cancel not sent: {}", e);
            }
        }
    }
}
