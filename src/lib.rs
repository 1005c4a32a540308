//! # procwire-rpc
//!
//! Frame-based multiplexed RPC engine.
//!
//! Many independent conversations share one ordered, bidirectional message
//! channel. Each conversation is identified by a correlation id (`cid`) and is
//! either a single request/response or a request followed by a stream of
//! values, with cooperative cancellation and client-local timeouts.
//!
//! ## Architecture
//!
//! - **Frames** ([`protocol`]): six kinds (`req`, `res`, `err`, `nxt`, `end`,
//!   `can`), each carrying a `cid`
//! - **Engine** ([`Engine`]): owns one [`ChannelAdapter`](transport::ChannelAdapter),
//!   allocates cids and fans inbound frames out to subscribers
//! - **Client** ([`RpcClient`]): `request` races the answer against a local
//!   timeout; `stream` yields values lazily and sends `can` when abandoned
//! - **Server** ([`Dispatcher`]): routes `req` to registered handlers and
//!   drives each conversation to exactly one terminal frame
//! - **Transports** ([`transport`]): in-process pairs, length-prefixed byte
//!   streams (JSON or MessagePack), Unix domain sockets
//!
//! ## Example
//!
//! ```ignore
//! use procwire_rpc::{transport::MemoryAdapter, Peer};
//!
//! #[tokio::main]
//! async fn main() -> procwire_rpc::Result<()> {
//!     let (left, right) = MemoryAdapter::pair();
//!
//!     let _server = Peer::builder()
//!         .unary("math.add", |p: (i64, i64), _ctx| async move { Ok(p.0 + p.1) })
//!         .build(right)?;
//!     let client = Peer::builder().build(left)?;
//!
//!     let sum: i64 = client.request("math.add", &(2, 5)).await?;
//!     assert_eq!(sum, 7);
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod codec;
pub mod engine;
pub mod error;
pub mod handler;
pub mod peer;
pub mod protocol;
pub mod server;
pub mod transport;

mod writer;

pub use client::{CallOptions, ClientConfig, RpcClient, RpcStream, DEFAULT_REQUEST_TIMEOUT};
pub use engine::{Engine, FrameSubscription, Subscription};
pub use error::{codes, BoxError, HandlerResult, ProcwireError, Result, RpcError};
pub use handler::{Emitter, Handler, HandlerKind, HandlerRegistry, Reply, RequestContext};
pub use peer::{Peer, PeerBuilder};
pub use protocol::{Frame, FrameKind, Meta};
pub use server::{ConversationState, Dispatcher};
