//! Handler module - server-side method implementations.
//!
//! Provides:
//! - [`HandlerRegistry`] - maps method names to handlers
//! - [`Reply`] - tagged handler outcome (value, future, sequence, push stream)
//! - [`RequestContext`] - request identity, metadata and cancellation
//! - [`Emitter`] - sink for push-stream handlers
//!
//! # Example
//!
//! ```ignore
//! use procwire_rpc::handler::HandlerRegistry;
//!
//! let mut registry = HandlerRegistry::new();
//!
//! registry.register_unary("echo", |data: String, _ctx| async move { Ok(data) })?;
//!
//! registry.register_stream("count", |n: i32, out| async move {
//!     for i in 0..n {
//!         out.next(&i)?;
//!     }
//!     Ok(())
//! })?;
//! ```

mod context;
mod registry;

pub use context::{Emitter, RequestContext};
pub use registry::{
    decode_payload, BoxFuture, BoxStream, Handler, HandlerKind, HandlerRegistry, PushProducer,
    Reply, SequenceHandler, StreamHandler, UnaryHandler,
};
