//! Server dispatcher.
//!
//! The [`Dispatcher`] registers one callback on the engine for inbound `req`
//! and `can` frames. For each request it:
//! 1. Looks up the handler (unknown method: `err` with `NOT_FOUND`)
//! 2. Opens a conversation keyed by the request cid
//! 3. Invokes the handler and drives its [`Reply`] on a spawned task
//! 4. Sends exactly one terminal frame, unless the caller cancels first
//!
//! A `can` for an in-flight cid moves the conversation to `Canceled` and
//! drops the handler's future, sequence or producer. Nothing is sent for
//! a canceled conversation.
//!
//! # Example
//!
//! ```ignore
//! let engine = Engine::new(adapter);
//! let dispatcher = Dispatcher::new(engine.clone())?;
//! dispatcher.register_unary("echo", |v: String, _ctx| async move { Ok(v) })?;
//! engine.start()?;
//! ```

mod conversation;
pub mod mapper;

pub(crate) use conversation::Conversation;
pub use conversation::ConversationState;

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Weak};

use futures::{FutureExt, Stream, StreamExt};
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::runtime::Handle;

use crate::engine::{Engine, Subscription};
use crate::error::{HandlerResult, ProcwireError, Result, RpcError};
use crate::handler::{
    BoxFuture, BoxStream, Emitter, Handler, HandlerKind, HandlerRegistry, PushProducer, Reply,
    RequestContext,
};
use crate::protocol::{Frame, FrameKind, Meta};
use conversation::ConversationTable;

struct DispatchInner {
    engine: Engine,
    registry: RwLock<HandlerRegistry>,
    conversations: ConversationTable,
    runtime: Handle,
    /// Keeps the engine callback registered for the dispatcher's lifetime.
    _subscription: Subscription,
}

/// Serves inbound requests from a registry of handlers.
///
/// Cheap to clone; clones share the registry and conversation table.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatchInner>,
}

impl Dispatcher {
    /// Attach an empty dispatcher to `engine`.
    ///
    /// Must be called inside a tokio runtime; handler work is spawned on it.
    pub fn new(engine: Engine) -> Result<Self> {
        Self::with_registry(engine, HandlerRegistry::new())
    }

    /// Attach a dispatcher serving an already-populated registry.
    pub fn with_registry(engine: Engine, registry: HandlerRegistry) -> Result<Self> {
        let runtime = Handle::try_current().map_err(|_| ProcwireError::NoRuntime)?;

        let inner = Arc::new_cyclic(|weak: &Weak<DispatchInner>| {
            let weak = weak.clone();
            let subscription = engine.on_frame(
                |frame| matches!(frame.kind(), FrameKind::Request | FrameKind::Cancel),
                move |frame| {
                    if let Some(inner) = weak.upgrade() {
                        inner.handle_frame(frame);
                    }
                },
            );

            DispatchInner {
                engine: engine.clone(),
                registry: RwLock::new(registry),
                conversations: ConversationTable::default(),
                runtime,
                _subscription: subscription,
            }
        });

        Ok(Self { inner })
    }

    /// Register a raw handler.
    pub fn register<H: Handler>(&self, method: &str, handler: H) -> Result<()> {
        self.inner.registry.write().register(method, handler)?;
        tracing::debug!(method, kind = %HandlerKind::Raw, "Registered handler");
        Ok(())
    }

    /// Register an async request/response handler.
    pub fn register_unary<F, T, R, Fut>(&self, method: &str, handler: F) -> Result<()>
    where
        F: Fn(T, RequestContext) -> Fut + Send + Sync + 'static,
        T: DeserializeOwned + Send + 'static,
        R: Serialize + Send + 'static,
        Fut: Future<Output = HandlerResult<R>> + Send + 'static,
    {
        self.inner.registry.write().register_unary(method, handler)?;
        tracing::debug!(method, kind = %HandlerKind::Unary, "Registered handler");
        Ok(())
    }

    /// Register a lazy sequence handler.
    pub fn register_sequence<F, T, R, S>(&self, method: &str, handler: F) -> Result<()>
    where
        F: Fn(T, RequestContext) -> S + Send + Sync + 'static,
        T: DeserializeOwned + Send + 'static,
        R: Serialize + Send + 'static,
        S: Stream<Item = HandlerResult<R>> + Send + 'static,
    {
        self.inner
            .registry
            .write()
            .register_sequence(method, handler)?;
        tracing::debug!(method, kind = %HandlerKind::Sequence, "Registered handler");
        Ok(())
    }

    /// Register a push-stream handler.
    pub fn register_stream<F, T, Fut>(&self, method: &str, handler: F) -> Result<()>
    where
        F: Fn(T, Emitter) -> Fut + Send + Sync + 'static,
        T: DeserializeOwned + Send + 'static,
        Fut: Future<Output = HandlerResult<()>> + Send + 'static,
    {
        self.inner.registry.write().register_stream(method, handler)?;
        tracing::debug!(method, kind = %HandlerKind::Stream, "Registered handler");
        Ok(())
    }

    /// Registered methods, sorted by name.
    pub fn methods(&self) -> Vec<(String, HandlerKind)> {
        self.inner.registry.read().methods()
    }

    /// Check if a method is registered.
    pub fn contains(&self, method: &str) -> bool {
        self.inner.registry.read().contains(method)
    }

    /// Number of conversations currently in flight.
    pub fn active(&self) -> usize {
        self.inner.conversations.len()
    }

    /// The engine this dispatcher serves.
    pub fn engine(&self) -> &Engine {
        &self.inner.engine
    }
}

impl DispatchInner {
    fn handle_frame(self: &Arc<Self>, frame: &Frame) {
        match frame {
            Frame::Request {
                cid,
                method,
                payload,
                meta,
            } => self.handle_request(cid, method, payload.clone(), meta.clone()),
            Frame::Cancel { cid } => self.handle_cancel(cid),
            _ => {}
        }
    }

    fn handle_request(
        self: &Arc<Self>,
        cid: &str,
        method: &str,
        payload: Option<Value>,
        meta: Option<Meta>,
    ) {
        let handler = self.registry.read().get_handler(method);
        let Some(handler) = handler else {
            tracing::debug!(cid, method, "Method not found");
            if let Err(e) = self
                .engine
                .post(Frame::error(cid, &RpcError::not_found(method)))
            {
                tracing::warn!(cid, "Failed to send NOT_FOUND: {}", e);
            }
            return;
        };

        let conversation = Arc::new(Conversation::new(cid, method, self.engine.clone()));
        if !self.conversations.insert(conversation.clone()) {
            tracing::warn!(cid, method, "Duplicate request id in flight, ignoring");
            return;
        }
        tracing::trace!(cid, method, "Request accepted");

        let ctx = RequestContext::with_token(cid, method, meta, conversation.token());
        let invoked =
            std::panic::catch_unwind(AssertUnwindSafe(|| handler.call(payload, ctx.clone())));

        let reply = match invoked {
            Ok(Ok(reply)) => reply,
            Ok(Err(e)) => {
                let err = mapper::from_handler_error(&e);
                tracing::debug!(cid, method, code = %err.code, "Handler rejected request: {}", err.message);
                self.settle(&conversation, |c| c.fail(&err));
                return;
            }
            Err(panic) => {
                let err = mapper::from_panic(panic);
                tracing::error!(cid, method, "Handler panicked: {}", err.message);
                self.settle(&conversation, |c| c.fail(&err));
                return;
            }
        };

        match reply {
            Reply::Value(value) => self.settle(&conversation, |c| c.respond(value)),
            Reply::Future(fut) => {
                self.runtime
                    .spawn(self.clone().drive_unary(conversation, fut));
            }
            Reply::Sequence(items) => {
                self.runtime
                    .spawn(self.clone().drive_sequence(conversation, items));
            }
            Reply::Stream(producer) => {
                let emitter = Emitter::new(conversation.clone(), ctx);
                self.runtime
                    .spawn(self.clone().drive_push(conversation, producer, emitter));
            }
        }
    }

    fn handle_cancel(&self, cid: &str) {
        if self.conversations.cancel(cid) {
            tracing::debug!(cid, "Conversation canceled by caller");
        } else {
            tracing::trace!(cid, "Cancel for unknown or finished conversation ignored");
        }
    }

    fn settle(&self, conversation: &Arc<Conversation>, f: impl FnOnce(&Conversation) -> bool) {
        f(conversation.as_ref());
        self.retire(conversation);
    }

    fn retire(&self, conversation: &Arc<Conversation>) {
        self.conversations.remove(conversation);
        tracing::trace!(
            cid = conversation.cid(),
            method = conversation.method(),
            state = ?conversation.state(),
            "Conversation retired"
        );
    }

    async fn drive_unary(
        self: Arc<Self>,
        conversation: Arc<Conversation>,
        fut: BoxFuture<'static, HandlerResult<Value>>,
    ) {
        let token = conversation.token();
        let outcome = tokio::select! {
            biased;
            _ = token.cancelled() => None,
            out = AssertUnwindSafe(fut).catch_unwind() => Some(out),
        };

        match outcome {
            None => tracing::debug!(cid = conversation.cid(), "Unary handler dropped after cancel"),
            Some(Ok(Ok(value))) => {
                conversation.respond(value);
            }
            Some(Ok(Err(e))) => {
                conversation.fail(&mapper::from_handler_error(&e));
            }
            Some(Err(panic)) => {
                let err = mapper::from_panic(panic);
                tracing::error!(cid = conversation.cid(), method = conversation.method(), "Handler panicked: {}", err.message);
                conversation.fail(&err);
            }
        }
        self.retire(&conversation);
    }

    async fn drive_sequence(
        self: Arc<Self>,
        conversation: Arc<Conversation>,
        mut items: BoxStream<'static, HandlerResult<Value>>,
    ) {
        conversation.begin();
        let token = conversation.token();

        loop {
            let item = tokio::select! {
                biased;
                _ = token.cancelled() => break,
                item = AssertUnwindSafe(items.next()).catch_unwind() => item,
            };

            match item {
                Ok(Some(Ok(value))) => {
                    if conversation.emit(value).is_err() {
                        break;
                    }
                }
                Ok(Some(Err(e))) => {
                    conversation.fail(&mapper::from_stream_error(&e));
                    break;
                }
                Ok(None) => {
                    conversation.complete();
                    break;
                }
                Err(panic) => {
                    let err = mapper::from_panic(panic);
                    tracing::error!(cid = conversation.cid(), method = conversation.method(), "Sequence panicked: {}", err.message);
                    conversation.fail(&err);
                    break;
                }
            }
        }
        self.retire(&conversation);
    }

    async fn drive_push(
        self: Arc<Self>,
        conversation: Arc<Conversation>,
        producer: PushProducer,
        emitter: Emitter,
    ) {
        conversation.begin();
        let token = conversation.token();

        let started = std::panic::catch_unwind(AssertUnwindSafe(move || producer(emitter)));
        let outcome = match started {
            Ok(fut) => tokio::select! {
                biased;
                _ = token.cancelled() => None,
                out = AssertUnwindSafe(fut).catch_unwind() => Some(out),
            },
            Err(panic) => Some(Err(panic)),
        };

        match outcome {
            None => tracing::debug!(cid = conversation.cid(), "Producer dropped after cancel"),
            Some(Ok(Ok(()))) => {
                conversation.complete();
            }
            Some(Ok(Err(e))) => {
                conversation.fail(&mapper::from_stream_error(&e));
            }
            Some(Err(panic)) => {
                let err = mapper::from_panic(panic);
                tracing::error!(cid = conversation.cid(), method = conversation.method(), "Producer panicked: {}", err.message);
                conversation.fail(&err);
            }
        }
        self.retire(&conversation);
    }
}
