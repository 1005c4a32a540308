//! Symmetric endpoint: one engine, one client, one dispatcher.
//!
//! The [`PeerBuilder`] collects handlers and client settings, then attaches
//! everything to a channel adapter in the right order (dispatcher subscribed
//! before the adapter starts delivering).
//!
//! # Example
//!
//! ```ignore
//! use procwire_rpc::{transport::MemoryAdapter, Peer};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let (left, right) = MemoryAdapter::pair();
//!
//!     let _server = Peer::builder()
//!         .unary("echo", |data: String, _ctx| async move { Ok(data) })
//!         .stream("count", |n: i32, out| async move {
//!             for i in 0..n {
//!                 out.next(&i)?;
//!             }
//!             Ok(())
//!         })
//!         .build(right)?;
//!
//!     let client = Peer::builder().sender("main").build(left)?;
//!     let reply: String = client.request("echo", "hello").await?;
//!     Ok(())
//! }
//! ```

use std::future::Future;
use std::time::Duration;

use futures::Stream;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::client::{CallOptions, ClientConfig, RpcClient, RpcStream};
use crate::engine::Engine;
use crate::error::{HandlerResult, ProcwireError, Result};
use crate::handler::{Emitter, Handler, HandlerRegistry, RequestContext};
use crate::server::Dispatcher;
use crate::transport::ChannelAdapter;

/// Builder for configuring and creating a [`Peer`].
///
/// Registration errors (duplicate method names) are kept and reported by
/// [`build`](Self::build).
pub struct PeerBuilder {
    registry: HandlerRegistry,
    client_config: ClientConfig,
    error: Option<ProcwireError>,
}

impl PeerBuilder {
    /// Create a new peer builder.
    pub fn new() -> Self {
        Self {
            registry: HandlerRegistry::new(),
            client_config: ClientConfig::default(),
            error: None,
        }
    }

    /// Set the default request timeout. Zero disables it.
    pub fn default_timeout(mut self, timeout: Duration) -> Self {
        self.client_config.default_timeout = timeout;
        self
    }

    /// Set the sender identity stamped into request metadata.
    pub fn sender(mut self, sender: impl Into<String>) -> Self {
        self.client_config.sender = Some(sender.into());
        self
    }

    /// Register an async request/response handler.
    pub fn unary<F, T, R, Fut>(mut self, method: &str, handler: F) -> Self
    where
        F: Fn(T, RequestContext) -> Fut + Send + Sync + 'static,
        T: DeserializeOwned + Send + 'static,
        R: Serialize + Send + 'static,
        Fut: Future<Output = HandlerResult<R>> + Send + 'static,
    {
        let result = self.registry.register_unary(method, handler);
        self.keep_first_error(result)
    }

    /// Register a lazy sequence handler.
    pub fn sequence<F, T, R, S>(mut self, method: &str, handler: F) -> Self
    where
        F: Fn(T, RequestContext) -> S + Send + Sync + 'static,
        T: DeserializeOwned + Send + 'static,
        R: Serialize + Send + 'static,
        S: Stream<Item = HandlerResult<R>> + Send + 'static,
    {
        let result = self.registry.register_sequence(method, handler);
        self.keep_first_error(result)
    }

    /// Register a push-stream handler.
    pub fn stream<F, T, Fut>(mut self, method: &str, handler: F) -> Self
    where
        F: Fn(T, Emitter) -> Fut + Send + Sync + 'static,
        T: DeserializeOwned + Send + 'static,
        Fut: Future<Output = HandlerResult<()>> + Send + 'static,
    {
        let result = self.registry.register_stream(method, handler);
        self.keep_first_error(result)
    }

    /// Register a raw handler.
    pub fn handler<H: Handler>(mut self, method: &str, handler: H) -> Self {
        let result = self.registry.register(method, handler);
        self.keep_first_error(result)
    }

    fn keep_first_error(mut self, result: Result<()>) -> Self {
        if let Err(e) = result {
            self.error.get_or_insert(e);
        }
        self
    }

    /// Attach to `adapter` and start receiving.
    ///
    /// Must be called inside a tokio runtime.
    pub fn build<A: ChannelAdapter>(self, adapter: A) -> Result<Peer> {
        if let Some(e) = self.error {
            return Err(e);
        }

        let engine = Engine::new(adapter);
        let dispatcher = Dispatcher::with_registry(engine.clone(), self.registry)?;
        engine.start()?;

        tracing::debug!(
            methods = dispatcher.methods().len(),
            sender = self.client_config.sender.as_deref().unwrap_or("-"),
            "Peer started"
        );

        Ok(Peer {
            client: RpcClient::with_config(engine.clone(), self.client_config),
            dispatcher,
            engine,
        })
    }
}

impl Default for PeerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A running endpoint that can both call and serve.
#[derive(Clone)]
pub struct Peer {
    engine: Engine,
    client: RpcClient,
    dispatcher: Dispatcher,
}

impl Peer {
    /// Create a new peer builder.
    pub fn builder() -> PeerBuilder {
        PeerBuilder::new()
    }

    /// The shared engine.
    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// The client half.
    pub fn client(&self) -> &RpcClient {
        &self.client
    }

    /// The server half; handlers may still be added after `build`.
    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Call `method` on the remote peer.
    pub async fn request<P, R>(&self, method: &str, payload: &P) -> Result<R>
    where
        P: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        self.client.request(method, payload).await
    }

    /// Call `method` with per-call options.
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
        self.client.request_with(method, payload, options).await
    }

    /// Open a stream from `method` on the remote peer.
    pub fn stream<P, T>(&self, method: &str, payload: &P) -> RpcStream<T>
    where
        P: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.client.stream(method, payload)
    }

    /// Open a stream with per-call options.
    pub fn stream_with<P, T>(&self, method: &str, payload: &P, options: CallOptions) -> RpcStream<T>
    where
        P: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.client.stream_with(method, payload, options)
    }

    /// Stop the engine; pending calls fail with `ConnectionClosed`.
    pub fn stop(&self) -> Result<()> {
        self.engine.stop()
    }
}
