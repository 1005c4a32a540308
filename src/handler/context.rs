//! Request context and stream emitter for handlers.
//!
//! - [`RequestContext`] - identity and metadata of the incoming request, plus
//!   a cancellation signal raised when the caller sends `can`
//! - [`Emitter`] - push-stream sink: each `next` becomes one `nxt` frame
//!
//! # Example
//!
//! ```ignore
//! async fn ticker(count: u32, out: Emitter) -> HandlerResult<()> {
//!     for i in 0..count {
//!         out.next(&i)?;
//!         tokio::time::sleep(Duration::from_millis(10)).await;
//!     }
//!     Ok(())
//! }
//! ```

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::codec::JsonCodec;
use crate::error::Result;
use crate::protocol::Meta;
use crate::server::Conversation;

/// Context passed to request handlers.
///
/// `Clone` and cheap to share across tasks spawned by a handler.
#[derive(Debug, Clone)]
pub struct RequestContext {
    cid: String,
    method: String,
    meta: Option<Meta>,
    cancel: CancellationToken,
}

impl RequestContext {
    /// Create a detached context (for calling handlers directly in tests).
    pub fn new(cid: impl Into<String>, method: impl Into<String>, meta: Option<Meta>) -> Self {
        Self::with_token(cid, method, meta, CancellationToken::new())
    }

    pub(crate) fn with_token(
        cid: impl Into<String>,
        method: impl Into<String>,
        meta: Option<Meta>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            cid: cid.into(),
            method: method.into(),
            meta,
            cancel,
        }
    }

    /// Correlation id of the request.
    #[inline]
    pub fn cid(&self) -> &str {
        &self.cid
    }

    /// Invoked method name.
    #[inline]
    pub fn method(&self) -> &str {
        &self.method
    }

    /// Request metadata, if the caller sent any.
    #[inline]
    pub fn meta(&self) -> Option<&Meta> {
        self.meta.as_ref()
    }

    /// Look up one metadata entry.
    pub fn meta_value(&self, key: &str) -> Option<&Value> {
        self.meta.as_ref().and_then(|m| m.get(key))
    }

    /// Check if the caller canceled this request.
    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Wait until the caller cancels this request.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await
    }
}

/// Sink for push-stream handlers.
///
/// Values are sent immediately, in call order, tagged with the method name
/// and a zero-based sequence number. Once the conversation is final
/// (completed, failed or canceled) every call returns
/// [`ProcwireError::ConversationClosed`](crate::ProcwireError::ConversationClosed),
/// so `out.next(&v)?` also serves as a cancellation check.
#[derive(Clone)]
pub struct Emitter {
    conversation: Arc<Conversation>,
    context: RequestContext,
}

impl Emitter {
    pub(crate) fn new(conversation: Arc<Conversation>, context: RequestContext) -> Self {
        Self {
            conversation,
            context,
        }
    }

    /// Emit one value.
    pub fn next<T: Serialize>(&self, value: &T) -> Result<()> {
        self.next_value(JsonCodec::to_value(value)?)
    }

    /// Emit one already-converted value.
    pub fn next_value(&self, value: Value) -> Result<()> {
        self.conversation.emit(value)
    }

    /// Context of the request being served.
    #[inline]
    pub fn context(&self) -> &RequestContext {
        &self.context
    }

    /// Check if the caller canceled the stream.
    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.context.is_cancelled()
    }

    /// Wait until the caller cancels the stream.
    pub async fn cancelled(&self) {
        self.context.cancelled().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_context_accessors() {
        let mut meta = Meta::new();
        meta.insert("sender".into(), json!("worker-1"));
        let ctx = RequestContext::new("c1", "math.add", Some(meta));

        assert_eq!(ctx.cid(), "c1");
        assert_eq!(ctx.method(), "math.add");
        assert_eq!(ctx.meta_value("sender"), Some(&json!("worker-1")));
        assert_eq!(ctx.meta_value("missing"), None);
        assert!(!ctx.is_cancelled());
    }

    #[tokio::test]
    async fn test_context_observes_cancellation() {
        let token = CancellationToken::new();
        let ctx = RequestContext::with_token("c1", "slow", None, token.clone());

        token.cancel();
        ctx.cancelled().await;
        assert!(ctx.is_cancelled());
    }
}
