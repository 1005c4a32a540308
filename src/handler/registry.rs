//! Handler registry for dispatching requests by method name.
//!
//! A handler turns `(payload, context)` into a [`Reply`]. The reply's variant
//! tells the dispatcher how to drive the conversation:
//!
//! | Reply              | frames sent                         |
//! |--------------------|-------------------------------------|
//! | `Value`            | `res`                               |
//! | `Future`           | `res` or `err` once it settles      |
//! | `Sequence`         | `nxt`* then `end` or `err`          |
//! | `Stream`           | `nxt`* then `end` or `err`          |
//!
//! Typed wrappers ([`UnaryHandler`], [`SequenceHandler`], [`StreamHandler`])
//! decode the payload and pick the variant, so most code never builds a
//! `Reply` by hand.
//!
//! # Example
//!
//! ```ignore
//! let mut registry = HandlerRegistry::new();
//!
//! registry.register_unary("math.add", |p: AddInput, _ctx| async move {
//!     Ok(p.a + p.b)
//! })?;
//!
//! registry.register_sequence("count", |n: u32, _ctx| {
//!     futures::stream::iter((0..n).map(Ok))
//! })?;
//!
//! registry.register_stream("ticks", |n: u32, out| async move {
//!     for i in 0..n {
//!         out.next(&i)?;
//!     }
//!     Ok(())
//! })?;
//! ```

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::Arc;

use futures::{Stream, StreamExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use super::{Emitter, RequestContext};
use crate::codec::JsonCodec;
use crate::error::{BoxError, HandlerResult, ProcwireError, Result, RpcError};

/// Boxed future for handler results.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Boxed stream for lazy sequences.
pub type BoxStream<'a, T> = Pin<Box<dyn Stream<Item = T> + Send + 'a>>;

/// Push-stream producer, started once with the conversation's [`Emitter`].
pub type PushProducer = Box<dyn FnOnce(Emitter) -> BoxFuture<'static, HandlerResult<()>> + Send>;

/// What a handler hands back to the dispatcher.
pub enum Reply {
    /// Ready value; answered with `res` immediately.
    Value(Value),
    /// Deferred value; answered with `res` or `err` when it settles.
    Future(BoxFuture<'static, HandlerResult<Value>>),
    /// Lazy pull sequence; each item becomes `nxt`.
    Sequence(BoxStream<'static, HandlerResult<Value>>),
    /// Push producer; each `Emitter::next` becomes `nxt`.
    Stream(PushProducer),
}

impl Reply {
    /// Ready value from anything serializable.
    pub fn value<T: Serialize>(value: &T) -> HandlerResult<Self> {
        Ok(Reply::Value(JsonCodec::to_value(value)?))
    }

    /// Deferred value.
    pub fn future<F>(fut: F) -> Self
    where
        F: Future<Output = HandlerResult<Value>> + Send + 'static,
    {
        Reply::Future(Box::pin(fut))
    }

    /// Lazy sequence.
    pub fn sequence<S>(stream: S) -> Self
    where
        S: Stream<Item = HandlerResult<Value>> + Send + 'static,
    {
        Reply::Sequence(Box::pin(stream))
    }

    /// Push stream.
    pub fn stream<F, Fut>(producer: F) -> Self
    where
        F: FnOnce(Emitter) -> Fut + Send + 'static,
        Fut: Future<Output = HandlerResult<()>> + Send + 'static,
    {
        Reply::Stream(Box::new(move |emitter| Box::pin(producer(emitter))))
    }

    /// Shape of this reply.
    pub fn kind(&self) -> HandlerKind {
        match self {
            Reply::Value(_) | Reply::Future(_) => HandlerKind::Unary,
            Reply::Sequence(_) => HandlerKind::Sequence,
            Reply::Stream(_) => HandlerKind::Stream,
        }
    }
}

impl fmt::Debug for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reply::Value(v) => f.debug_tuple("Value").field(v).finish(),
            Reply::Future(_) => f.write_str("Future(..)"),
            Reply::Sequence(_) => f.write_str("Sequence(..)"),
            Reply::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

/// Declared shape of a registered method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandlerKind {
    /// One `res` or `err`.
    Unary,
    /// Pull sequence of `nxt` frames.
    Sequence,
    /// Push stream of `nxt` frames.
    Stream,
    /// Raw [`Handler`]; shape decided per call by its [`Reply`].
    Raw,
}

impl HandlerKind {
    /// Lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            HandlerKind::Unary => "unary",
            HandlerKind::Sequence => "sequence",
            HandlerKind::Stream => "stream",
            HandlerKind::Raw => "raw",
        }
    }
}

impl fmt::Display for HandlerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Trait for handler functions.
///
/// `call` runs synchronously on the frame delivery path; anything slow belongs
/// in the returned future, sequence or producer.
pub trait Handler: Send + Sync + 'static {
    /// Handle a request with its raw payload.
    fn call(&self, payload: Option<Value>, ctx: RequestContext) -> HandlerResult<Reply>;
}

impl<F> Handler for F
where
    F: Fn(Option<Value>, RequestContext) -> HandlerResult<Reply> + Send + Sync + 'static,
{
    fn call(&self, payload: Option<Value>, ctx: RequestContext) -> HandlerResult<Reply> {
        self(payload, ctx)
    }
}

/// Decode a request payload, classifying failures as `INVALID_PAYLOAD`.
pub fn decode_payload<T: DeserializeOwned>(payload: Option<Value>) -> HandlerResult<T> {
    JsonCodec::from_value(payload)
        .map_err(|e| RpcError::invalid_payload(format!("Invalid payload: {}", e)).into())
}

fn encode_item<R: Serialize>(item: HandlerResult<R>) -> HandlerResult<Value> {
    item.and_then(|v| serde_json::to_value(&v).map_err(BoxError::from))
}

/// Async request/response handler: `Fn(T, RequestContext) -> Future<Output = HandlerResult<R>>`.
pub struct UnaryHandler<F, T, R, Fut> {
    handler: F,
    _phantom: PhantomData<fn(T) -> (R, Fut)>,
}

impl<F, T, R, Fut> UnaryHandler<F, T, R, Fut>
where
    F: Fn(T, RequestContext) -> Fut + Send + Sync + 'static,
    T: DeserializeOwned + Send + 'static,
    R: Serialize + Send + 'static,
    Fut: Future<Output = HandlerResult<R>> + Send + 'static,
{
    /// Create a new unary handler.
    pub fn new(handler: F) -> Self {
        Self {
            handler,
            _phantom: PhantomData,
        }
    }
}

impl<F, T, R, Fut> Handler for UnaryHandler<F, T, R, Fut>
where
    F: Fn(T, RequestContext) -> Fut + Send + Sync + 'static,
    T: DeserializeOwned + Send + 'static,
    R: Serialize + Send + 'static,
    Fut: Future<Output = HandlerResult<R>> + Send + 'static,
{
    fn call(&self, payload: Option<Value>, ctx: RequestContext) -> HandlerResult<Reply> {
        let input: T = decode_payload(payload)?;
        let fut = (self.handler)(input, ctx);
        Ok(Reply::future(async move { encode_item(fut.await) }))
    }
}

/// Lazy sequence handler: `Fn(T, RequestContext) -> Stream<Item = HandlerResult<R>>`.
///
/// Items are pulled one at a time; the stream is dropped on cancellation.
pub struct SequenceHandler<F, T, R, S> {
    handler: F,
    _phantom: PhantomData<fn(T) -> (R, S)>,
}

impl<F, T, R, S> SequenceHandler<F, T, R, S>
where
    F: Fn(T, RequestContext) -> S + Send + Sync + 'static,
    T: DeserializeOwned + Send + 'static,
    R: Serialize + Send + 'static,
    S: Stream<Item = HandlerResult<R>> + Send + 'static,
{
    /// Create a new sequence handler.
    pub fn new(handler: F) -> Self {
        Self {
            handler,
            _phantom: PhantomData,
        }
    }
}

impl<F, T, R, S> Handler for SequenceHandler<F, T, R, S>
where
    F: Fn(T, RequestContext) -> S + Send + Sync + 'static,
    T: DeserializeOwned + Send + 'static,
    R: Serialize + Send + 'static,
    S: Stream<Item = HandlerResult<R>> + Send + 'static,
{
    fn call(&self, payload: Option<Value>, ctx: RequestContext) -> HandlerResult<Reply> {
        let input: T = decode_payload(payload)?;
        let items = (self.handler)(input, ctx);
        Ok(Reply::sequence(items.map(encode_item)))
    }
}

/// Push-stream handler: `Fn(T, Emitter) -> Future<Output = HandlerResult<()>>`.
///
/// `Ok(())` completes the stream with `end`; `Err` fails it with `err`.
pub struct StreamHandler<F, T, Fut> {
    handler: Arc<F>,
    _phantom: PhantomData<fn(T) -> Fut>,
}

impl<F, T, Fut> StreamHandler<F, T, Fut>
where
    F: Fn(T, Emitter) -> Fut + Send + Sync + 'static,
    T: DeserializeOwned + Send + 'static,
    Fut: Future<Output = HandlerResult<()>> + Send + 'static,
{
    /// Create a new push-stream handler.
    pub fn new(handler: F) -> Self {
        Self {
            handler: Arc::new(handler),
            _phantom: PhantomData,
        }
    }
}

impl<F, T, Fut> Handler for StreamHandler<F, T, Fut>
where
    F: Fn(T, Emitter) -> Fut + Send + Sync + 'static,
    T: DeserializeOwned + Send + 'static,
    Fut: Future<Output = HandlerResult<()>> + Send + 'static,
{
    fn call(&self, payload: Option<Value>, _ctx: RequestContext) -> HandlerResult<Reply> {
        let input: T = decode_payload(payload)?;
        let handler = self.handler.clone();
        Ok(Reply::stream(move |emitter| (*handler)(input, emitter)))
    }
}

/// Entry for a registered method.
struct MethodEntry {
    handler: Arc<dyn Handler>,
    kind: HandlerKind,
}

/// Registry mapping method names to handlers.
#[derive(Default)]
pub struct HandlerRegistry {
    methods: HashMap<String, MethodEntry>,
}

impl HandlerRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a raw handler.
    ///
    /// # Errors
    ///
    /// [`ProcwireError::DuplicateMethod`] if `name` is taken.
    pub fn register<H: Handler>(&mut self, name: &str, handler: H) -> Result<()> {
        self.insert(name, HandlerKind::Raw, Arc::new(handler))
    }

    /// Register an async request/response handler.
    pub fn register_unary<F, T, R, Fut>(&mut self, name: &str, handler: F) -> Result<()>
    where
        F: Fn(T, RequestContext) -> Fut + Send + Sync + 'static,
        T: DeserializeOwned + Send + 'static,
        R: Serialize + Send + 'static,
        Fut: Future<Output = HandlerResult<R>> + Send + 'static,
    {
        self.insert(
            name,
            HandlerKind::Unary,
            Arc::new(UnaryHandler::new(handler)),
        )
    }

    /// Register a lazy sequence handler.
    pub fn register_sequence<F, T, R, S>(&mut self, name: &str, handler: F) -> Result<()>
    where
        F: Fn(T, RequestContext) -> S + Send + Sync + 'static,
        T: DeserializeOwned + Send + 'static,
        R: Serialize + Send + 'static,
        S: Stream<Item = HandlerResult<R>> + Send + 'static,
    {
        self.insert(
            name,
            HandlerKind::Sequence,
            Arc::new(SequenceHandler::new(handler)),
        )
    }

    /// Register a push-stream handler.
    pub fn register_stream<F, T, Fut>(&mut self, name: &str, handler: F) -> Result<()>
    where
        F: Fn(T, Emitter) -> Fut + Send + Sync + 'static,
        T: DeserializeOwned + Send + 'static,
        Fut: Future<Output = HandlerResult<()>> + Send + 'static,
    {
        self.insert(
            name,
            HandlerKind::Stream,
            Arc::new(StreamHandler::new(handler)),
        )
    }

    fn insert(&mut self, name: &str, kind: HandlerKind, handler: Arc<dyn Handler>) -> Result<()> {
        if self.methods.contains_key(name) {
            return Err(ProcwireError::DuplicateMethod(name.to_string()));
        }
        self.methods
            .insert(name.to_string(), MethodEntry { handler, kind });
        Ok(())
    }

    /// Move every entry of `other` into this registry.
    ///
    /// Fails without modifying `self` if any name collides.
    pub fn merge(&mut self, other: HandlerRegistry) -> Result<()> {
        if let Some(name) = other.methods.keys().find(|n| self.methods.contains_key(*n)) {
            return Err(ProcwireError::DuplicateMethod(name.clone()));
        }
        self.methods.extend(other.methods);
        Ok(())
    }

    /// Get a handler by method name.
    pub fn get_handler(&self, name: &str) -> Option<Arc<dyn Handler>> {
        self.methods.get(name).map(|e| e.handler.clone())
    }

    /// Get the declared kind of a method.
    pub fn get_kind(&self, name: &str) -> Option<HandlerKind> {
        self.methods.get(name).map(|e| e.kind)
    }

    /// Check if a method is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.methods.contains_key(name)
    }

    /// Registered methods, sorted by name.
    pub fn methods(&self) -> Vec<(String, HandlerKind)> {
        let mut out: Vec<_> = self
            .methods
            .iter()
            .map(|(name, e)| (name.clone(), e.kind))
            .collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }

    /// Number of registered methods.
    pub fn len(&self) -> usize {
        self.methods.len()
    }

    /// Check if no methods are registered.
    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::codes;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Deserialize)]
    struct AddInput {
        a: i64,
        b: i64,
    }

    fn ctx(method: &str) -> RequestContext {
        RequestContext::new("c1", method, None)
    }

    fn rpc_error(err: BoxError) -> RpcError {
        *err.downcast::<RpcError>().unwrap()
    }

    #[test]
    fn test_register_and_lookup() {
        let mut registry = HandlerRegistry::new();
        registry
            .register_unary("math.add", |p: AddInput, _ctx| async move { Ok(p.a + p.b) })
            .unwrap();
        registry
            .register_sequence("count", |n: u32, _ctx| {
                futures::stream::iter((0..n).map(Ok::<_, BoxError>))
            })
            .unwrap();
        registry
            .register_stream("ticks", |_: (), _out| async move { Ok(()) })
            .unwrap();

        assert!(registry.contains("math.add"));
        assert!(registry.get_handler("missing").is_none());
        assert_eq!(registry.len(), 3);
        assert_eq!(
            registry.methods(),
            vec![
                ("count".to_string(), HandlerKind::Sequence),
                ("math.add".to_string(), HandlerKind::Unary),
                ("ticks".to_string(), HandlerKind::Stream),
            ]
        );
    }

    #[test]
    fn test_duplicate_rejected() {
        let mut registry = HandlerRegistry::new();
        registry
            .register_unary("echo", |v: Value, _ctx| async move { Ok(v) })
            .unwrap();

        let again = registry.register_stream("echo", |_: (), _out| async move { Ok(()) });
        assert!(matches!(again, Err(ProcwireError::DuplicateMethod(name)) if name == "echo"));
        assert_eq!(registry.get_kind("echo"), Some(HandlerKind::Unary));
    }

    #[test]
    fn test_merge_detects_collision() {
        let mut left = HandlerRegistry::new();
        left.register_unary("a", |v: Value, _ctx| async move { Ok(v) })
            .unwrap();

        let mut right = HandlerRegistry::new();
        right
            .register_unary("b", |v: Value, _ctx| async move { Ok(v) })
            .unwrap();
        right
            .register_unary("a", |v: Value, _ctx| async move { Ok(v) })
            .unwrap();

        assert!(left.merge(right).is_err());
        assert_eq!(left.len(), 1);
    }

    #[tokio::test]
    async fn test_unary_handler_reply() {
        let handler = UnaryHandler::new(|p: AddInput, _ctx| async move { Ok(p.a + p.b) });
        let reply = handler
            .call(Some(json!({"a": 2, "b": 5})), ctx("math.add"))
            .unwrap();

        match reply {
            Reply::Future(fut) => assert_eq!(fut.await.unwrap(), json!(7)),
            other => panic!("unexpected reply: {:?}", other),
        }
    }

    #[test]
    fn test_invalid_payload_classified() {
        let handler = UnaryHandler::new(|p: AddInput, _ctx| async move { Ok(p.a + p.b) });
        let err = handler
            .call(Some(json!({"a": "two"})), ctx("math.add"))
            .unwrap_err();

        let rpc = rpc_error(err);
        assert_eq!(rpc.code, codes::INVALID_PAYLOAD);
        assert!(rpc.message.starts_with("Invalid payload"));
    }

    #[tokio::test]
    async fn test_sequence_handler_encodes_items() {
        let handler = SequenceHandler::new(|n: u32, _ctx| {
            futures::stream::iter((0..n).map(|i| Ok::<_, BoxError>(format!("item-{}", i))))
        });
        let reply = handler.call(Some(json!(2)), ctx("count")).unwrap();
        assert_eq!(reply.kind(), HandlerKind::Sequence);

        let Reply::Sequence(items) = reply else {
            panic!("expected sequence");
        };
        let items: Vec<Value> = items.map(|i| i.unwrap()).collect().await;
        assert_eq!(items, vec![json!("item-0"), json!("item-1")]);
    }

    #[test]
    fn test_raw_closure_handler() {
        let mut registry = HandlerRegistry::new();
        registry
            .register(
                "raw",
                |payload: Option<Value>, _ctx: RequestContext| -> HandlerResult<Reply> {
                    Ok(Reply::Value(payload.unwrap_or(Value::Null)))
                },
            )
            .unwrap();

        let handler = registry.get_handler("raw").unwrap();
        let reply = handler.call(Some(json!(1)), ctx("raw")).unwrap();
        assert!(matches!(reply, Reply::Value(v) if v == json!(1)));
        assert_eq!(registry.get_kind("raw"), Some(HandlerKind::Raw));
    }

    #[test]
    fn test_stream_reply_kind() {
        let handler = StreamHandler::new(|_: (), _out: Emitter| async move { Ok(()) });
        let reply = handler.call(None, ctx("ticks")).unwrap();
        assert_eq!(reply.kind(), HandlerKind::Stream);
    }
}
