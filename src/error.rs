//! Error types for procwire-rpc.
//!
//! Two layers:
//! - [`RpcError`] - the classified failure carried by `err` frames
//!   (`code` / `message` / optional `details`). Handlers return it for domain
//!   failures and callers receive it for remote or synthetic failures.
//! - [`ProcwireError`] - the crate-wide error, wrapping transport, codec and
//!   registration failures alongside [`RpcError`].

use std::time::Duration;

use serde_json::Value;
use thiserror::Error;

/// Well-known error codes.
pub mod codes {
    /// No handler registered for the requested method.
    pub const NOT_FOUND: &str = "NOT_FOUND";
    /// Client-local wait exceeded (synthetic, never sent by a server).
    pub const TIMEOUT: &str = "TIMEOUT";
    /// Uncaught or unclassified failure.
    pub const INTERNAL: &str = "INTERNAL";
    /// A stream producer or lazy sequence failed.
    pub const OPERATION_FAILED: &str = "OPERATION_FAILED";
    /// Payload could not be decoded into the expected type.
    pub const INVALID_PAYLOAD: &str = "INVALID_PAYLOAD";
    /// The underlying channel went away before settlement.
    pub const CONNECTION_CLOSED: &str = "CONNECTION_CLOSED";

    /// Marker embedded in every synthetic timeout message.
    pub const RPC_TIMEOUT_MARKER: &str = "RPC_TIMEOUT";
}

/// Classified RPC failure.
///
/// Carried verbatim through `err` frames: a handler returning
/// `RpcError::new("INVALID_ARGUMENT", "bad input")` makes the caller observe
/// exactly that code and message.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{code}: {message}")]
pub struct RpcError {
    /// Short uppercase identifier (see [`codes`] or any domain code).
    pub code: String,
    /// Human readable message.
    pub message: String,
    /// Optional structured details.
    pub details: Option<Value>,
}

impl RpcError {
    /// Create a new error with the given code and message.
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            details: None,
        }
    }

    /// Attach structured details.
    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    /// `NOT_FOUND` for an unregistered method.
    pub fn not_found(method: &str) -> Self {
        Self::new(codes::NOT_FOUND, format!("Method not found: {}", method))
    }

    /// Synthetic local timeout for `method`.
    ///
    /// The message always contains `RPC_TIMEOUT` and the method name.
    pub fn timeout(method: &str, after: Duration) -> Self {
        Self::new(
            codes::TIMEOUT,
            format!(
                "{}: {} timed out after {}ms",
                codes::RPC_TIMEOUT_MARKER,
                method,
                after.as_millis()
            ),
        )
    }

    /// `INTERNAL` with the given message.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(codes::INTERNAL, message)
    }

    /// `INVALID_PAYLOAD` with the given message.
    pub fn invalid_payload(message: impl Into<String>) -> Self {
        Self::new(codes::INVALID_PAYLOAD, message)
    }

    /// Check the error code.
    #[inline]
    pub fn is(&self, code: &str) -> bool {
        self.code == code
    }
}

/// Main error type for all procwire-rpc operations.
#[derive(Debug, Error)]
pub enum ProcwireError {
    /// I/O error on a byte-stream transport.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// MsgPack serialization error.
    #[error("MsgPack encode error: {0}")]
    MsgPackEncode(#[from] rmp_serde::encode::Error),

    /// MsgPack deserialization error.
    #[error("MsgPack decode error: {0}")]
    MsgPackDecode(#[from] rmp_serde::decode::Error),

    /// Protocol error (oversized frame, adapter misuse, etc.).
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// A handler is already registered under this method name.
    #[error("Method already registered: {0}")]
    DuplicateMethod(String),

    /// Channel closed unexpectedly.
    #[error("Connection closed")]
    ConnectionClosed,

    /// A server-side conversation already reached a final state
    /// (completed, failed or canceled) and accepts no more frames.
    #[error("Conversation closed")]
    ConversationClosed,

    /// An operation that spawns tasks was called outside a tokio runtime.
    #[error("No tokio runtime available")]
    NoRuntime,

    /// Classified RPC failure (remote `err` frame or synthetic timeout).
    #[error(transparent)]
    Rpc(#[from] RpcError),
}

impl ProcwireError {
    /// Error code as a caller would pattern-match on it.
    pub fn code(&self) -> &str {
        match self {
            ProcwireError::Rpc(e) => &e.code,
            ProcwireError::ConnectionClosed => codes::CONNECTION_CLOSED,
            ProcwireError::Json(_)
            | ProcwireError::MsgPackEncode(_)
            | ProcwireError::MsgPackDecode(_) => codes::INVALID_PAYLOAD,
            _ => codes::INTERNAL,
        }
    }

    /// The classified RPC error, if this is one.
    pub fn as_rpc(&self) -> Option<&RpcError> {
        match self {
            ProcwireError::Rpc(e) => Some(e),
            _ => None,
        }
    }
}

/// Result type alias using ProcwireError.
pub type Result<T> = std::result::Result<T, ProcwireError>;

/// Boxed error returned by handlers.
///
/// Anything implementing `std::error::Error` converts into it with `?`.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result type for handler functions.
pub type HandlerResult<T> = std::result::Result<T, BoxError>;
