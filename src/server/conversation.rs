//! Server-side conversation state.
//!
//! ```text
//!            ┌─────────┐  first nxt / driver start  ┌──────────┐
//!   req ───► │ Pending │ ──────────────────────────►│ Emitting │
//!            └────┬────┘                            └────┬─────┘
//!                 │ res / end        err         can     │
//!                 ▼                                      ▼
//!          Completed            Failed             Canceled
//! ```
//!
//! Transitions and the frames they produce happen under one lock, so after a
//! conversation turns final nothing else is posted for its cid.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::engine::Engine;
use crate::error::{ProcwireError, Result, RpcError};
use crate::protocol::Frame;

/// Lifecycle of one served request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversationState {
    Pending,
    Emitting,
    Completed,
    Failed,
    Canceled,
}

impl ConversationState {
    /// Check if no further frames may be sent.
    #[inline]
    pub fn is_final(&self) -> bool {
        matches!(
            self,
            ConversationState::Completed | ConversationState::Failed | ConversationState::Canceled
        )
    }
}

struct Progress {
    state: ConversationState,
    seq: u64,
}

/// One in-flight request on the server side.
pub struct Conversation {
    cid: String,
    method: String,
    engine: Engine,
    progress: Mutex<Progress>,
    cancel: CancellationToken,
}

impl Conversation {
    pub(crate) fn new(cid: &str, method: &str, engine: Engine) -> Self {
        Self {
            cid: cid.to_string(),
            method: method.to_string(),
            engine,
            progress: Mutex::new(Progress {
                state: ConversationState::Pending,
                seq: 0,
            }),
            cancel: CancellationToken::new(),
        }
    }

    pub fn cid(&self) -> &str {
        &self.cid
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn state(&self) -> ConversationState {
        self.progress.lock().state
    }

    pub(crate) fn token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Mark a stream as started.
    pub(crate) fn begin(&self) {
        let mut progress = self.progress.lock();
        if progress.state == ConversationState::Pending {
            progress.state = ConversationState::Emitting;
        }
    }

    /// Send one `nxt` frame.
    pub(crate) fn emit(&self, data: Value) -> Result<()> {
        let mut progress = self.progress.lock();
        if progress.state.is_final() {
            return Err(ProcwireError::ConversationClosed);
        }
        progress.state = ConversationState::Emitting;

        let seq = progress.seq;
        progress.seq += 1;
        self.engine.post(Frame::next(
            self.cid.as_str(),
            data,
            Some(self.method.clone()),
            Some(seq),
        ))
    }

    /// Settle a unary request with `res`.
    pub(crate) fn respond(&self, result: Value) -> bool {
        self.finish(
            Frame::response(self.cid.as_str(), Some(result)),
            ConversationState::Completed,
        )
    }

    /// Settle a stream with `end`.
    pub(crate) fn complete(&self) -> bool {
        self.finish(Frame::end(self.cid.as_str()), ConversationState::Completed)
    }

    /// Settle with `err`.
    pub(crate) fn fail(&self, err: &RpcError) -> bool {
        self.finish(Frame::error(self.cid.as_str(), err), ConversationState::Failed)
    }

    /// Move to `Canceled` and signal the producer. Sends nothing.
    pub(crate) fn cancel(&self) -> bool {
        let mut progress = self.progress.lock();
        if progress.state.is_final() {
            return false;
        }
        progress.state = ConversationState::Canceled;
        self.cancel.cancel();
        true
    }

    fn finish(&self, frame: Frame, next: ConversationState) -> bool {
        let mut progress = self.progress.lock();
        if progress.state.is_final() {
            tracing::trace!(cid = %self.cid, kind = %frame.kind(), state = ?progress.state, "Terminal suppressed");
            return false;
        }
        progress.state = next;

        if let Err(e) = self.engine.post(frame) {
            tracing::warn!(cid = %self.cid, method = %self.method, "Failed to send terminal frame: {}", e);
        }
        true
    }
}

/// In-flight conversations keyed by cid.
#[derive(Default)]
pub(crate) struct ConversationTable {
    active: Mutex<HashMap<String, Arc<Conversation>>>,
}

impl ConversationTable {
    /// Track a conversation. Returns `false` if its cid is already in flight.
    pub(crate) fn insert(&self, conversation: Arc<Conversation>) -> bool {
        let mut active = self.active.lock();
        if active.contains_key(conversation.cid()) {
            return false;
        }
        active.insert(conversation.cid().to_string(), conversation);
        true
    }

    /// Forget a conversation, unless its cid was reused by a newer one.
    pub(crate) fn remove(&self, conversation: &Arc<Conversation>) {
        let mut active = self.active.lock();
        if active
            .get(conversation.cid())
            .is_some_and(|c| Arc::ptr_eq(c, conversation))
        {
            active.remove(conversation.cid());
        }
    }

    /// Cancel and forget the conversation for `cid`, if any.
    pub(crate) fn cancel(&self, cid: &str) -> bool {
        let conversation = self.active.lock().remove(cid);
        conversation.is_some_and(|c| c.cancel())
    }

    pub(crate) fn len(&self) -> usize {
        self.active.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::FrameKind;
    use crate::transport::MemoryAdapter;
    use serde_json::json;

    fn engine_pair() -> (Engine, Engine) {
        let (left, right) = MemoryAdapter::pair();
        (
            Engine::connect(left).unwrap(),
            Engine::connect(right).unwrap(),
        )
    }

    #[tokio::test]
    async fn test_emit_then_complete() {
        let (server, client) = engine_pair();
        let mut seen = client.subscribe(|_| true);
        let conv = Conversation::new("c1", "ticks", server);

        conv.emit(json!("a")).unwrap();
        assert_eq!(conv.state(), ConversationState::Emitting);
        conv.emit(json!("b")).unwrap();
        assert!(conv.complete());
        assert_eq!(conv.state(), ConversationState::Completed);

        assert_eq!(
            seen.recv().await.unwrap(),
            Frame::next("c1", json!("a"), Some("ticks".into()), Some(0))
        );
        assert_eq!(
            seen.recv().await.unwrap(),
            Frame::next("c1", json!("b"), Some("ticks".into()), Some(1))
        );
        assert_eq!(seen.recv().await.unwrap(), Frame::end("c1"));
    }

    #[tokio::test]
    async fn test_single_terminal() {
        let (server, client) = engine_pair();
        let mut seen = client.subscribe(|_| true);
        let conv = Conversation::new("c1", "m", server);

        assert!(conv.fail(&RpcError::internal("first")));
        assert!(!conv.respond(json!(1)));
        assert!(!conv.complete());
        assert!(!conv.cancel());
        assert!(matches!(
            conv.emit(json!(2)),
            Err(ProcwireError::ConversationClosed)
        ));

        let frame = seen.recv().await.unwrap();
        assert_eq!(frame.kind(), FrameKind::Error);
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(seen.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_cancel_silences_conversation() {
        let (server, client) = engine_pair();
        let mut seen = client.subscribe(|_| true);
        let conv = Conversation::new("c1", "m", server);
        let token = conv.token();

        conv.begin();
        assert!(conv.cancel());
        assert!(token.is_cancelled());
        assert_eq!(conv.state(), ConversationState::Canceled);
        assert!(conv.emit(json!(1)).is_err());
        assert!(!conv.complete());

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(seen.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_table_cancel_and_reuse() {
        let (server, _client) = engine_pair();
        let table = ConversationTable::default();

        let first = Arc::new(Conversation::new("c1", "m", server.clone()));
        assert!(table.insert(first.clone()));
        assert!(!table.insert(Arc::new(Conversation::new("c1", "m", server.clone()))));

        assert!(table.cancel("c1"));
        assert!(!table.cancel("c1"));
        assert_eq!(table.len(), 0);

        // A stale removal must not evict a newer conversation with the same cid.
        let second = Arc::new(Conversation::new("c1", "m", server));
        assert!(table.insert(second.clone()));
        table.remove(&first);
        assert_eq!(table.len(), 1);
        table.remove(&second);
        assert_eq!(table.len(), 0);
    }
}
