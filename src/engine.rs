//! Correlation engine.
//!
//! The engine owns the single [`ChannelAdapter`] and multiplexes many logical
//! conversations over it:
//!
//! ```text
//!                  ┌──────────────────────────────┐
//!   RpcClient ────►│            Engine            │
//!   RpcStream ────►│  post ─────────────► adapter │───► peer
//!   Dispatcher ───►│                              │
//!                  │  subscribers (in order) ◄────│◄─── peer
//!                  │   - queue (FrameSubscription)│
//!                  │   - callback (Subscription)  │
//!                  └──────────────────────────────┘
//! ```
//!
//! Every inbound frame is offered to every live subscriber in registration
//! order; subscribers select frames with their own predicate (usually
//! `cid` + kind). A frame nobody wants is ignored, which is the normal fate of
//! late replies and duplicate cancellations.
//!
//! # Example
//!
//! ```ignore
//! use procwire_rpc::{Engine, protocol::{Frame, FrameKind}};
//!
//! let engine = Engine::new(adapter);
//! let cid = engine.generate_id();
//! let mut replies = engine.subscribe({
//!     let cid = cid.clone();
//!     move |f| f.matches(&cid, &[FrameKind::Response, FrameKind::Error])
//! });
//! engine.start()?;
//! engine.post(Frame::request(cid, "echo", None, None))?;
//! let reply = replies.recv().await;
//! ```

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};

use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::error::{ProcwireError, Result};
use crate::protocol::{CidGenerator, Frame};
use crate::transport::{ChannelAdapter, FrameCallback};

type FramePredicate = Box<dyn Fn(&Frame) -> bool + Send + Sync>;
type FrameHandler = Arc<dyn Fn(&Frame) + Send + Sync>;

/// Where a subscriber's matching frames go.
#[derive(Clone)]
enum Sink {
    Queue(mpsc::UnboundedSender<Frame>),
    Callback(FrameHandler),
}

impl Sink {
    fn is_closed(&self) -> bool {
        match self {
            Sink::Queue(tx) => tx.is_closed(),
            Sink::Callback(_) => false,
        }
    }
}

struct Subscriber {
    id: u64,
    filter: FramePredicate,
    sink: Sink,
}

struct EngineInner {
    adapter: Box<dyn ChannelAdapter>,
    cids: CidGenerator,
    subscribers: Mutex<Vec<Subscriber>>,
    next_subscriber_id: AtomicU64,
    started: AtomicBool,
    closed: AtomicBool,
}

impl EngineInner {
    /// Fan one inbound frame out to every matching subscriber.
    ///
    /// Matching happens under the lock; delivery happens after it is released
    /// so callbacks may subscribe, unsubscribe or post.
    fn dispatch(&self, frame: Frame) {
        let targets: Vec<Sink> = {
            let mut subscribers = self.subscribers.lock();
            subscribers.retain(|s| !s.sink.is_closed());
            subscribers
                .iter()
                .filter(|s| (s.filter)(&frame))
                .map(|s| s.sink.clone())
                .collect()
        };

        if targets.is_empty() {
            tracing::trace!(cid = frame.cid(), kind = %frame.kind(), "Unmatched frame ignored");
            return;
        }

        for sink in targets {
            match sink {
                Sink::Queue(tx) => {
                    let _ = tx.send(frame.clone());
                }
                Sink::Callback(callback) => callback(&frame),
            }
        }
    }

    fn add(&self, filter: FramePredicate, sink: Sink) -> u64 {
        let id = self.next_subscriber_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers.lock().push(Subscriber { id, filter, sink });
        id
    }

    fn remove(&self, id: u64) {
        self.subscribers.lock().retain(|s| s.id != id);
    }
}

impl Drop for EngineInner {
    fn drop(&mut self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            if let Err(e) = self.adapter.stop() {
                tracing::warn!("Adapter stop failed: {}", e);
            }
        }
    }
}

/// Frame multiplexer over one channel adapter.
///
/// Cheap to clone; clones share the adapter and subscriber table.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

impl Engine {
    /// Create an engine over `adapter` without starting it.
    ///
    /// Register subscribers (e.g. a [`Dispatcher`](crate::Dispatcher)) and then
    /// call [`start`](Self::start) so no early inbound frame is missed.
    pub fn new<A: ChannelAdapter>(adapter: A) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                adapter: Box::new(adapter),
                cids: CidGenerator::new(),
                subscribers: Mutex::new(Vec::new()),
                next_subscriber_id: AtomicU64::new(1),
                started: AtomicBool::new(false),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Create an engine and start it immediately.
    pub fn connect<A: ChannelAdapter>(adapter: A) -> Result<Self> {
        let engine = Self::new(adapter);
        engine.start()?;
        Ok(engine)
    }

    /// Start receiving inbound frames from the adapter.
    ///
    /// The adapter callback holds only a weak reference to the engine, so an
    /// adapter outliving the engine delivers into the void.
    pub fn start(&self) -> Result<()> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(ProcwireError::ConnectionClosed);
        }
        if self.inner.started.swap(true, Ordering::AcqRel) {
            return Err(ProcwireError::Protocol("Engine already started".into()));
        }

        let weak: Weak<EngineInner> = Arc::downgrade(&self.inner);
        let on_frame: FrameCallback = Arc::new(move |frame| {
            if let Some(inner) = weak.upgrade() {
                inner.dispatch(frame);
            }
        });

        self.inner.adapter.start(on_frame)
    }

    /// Send one frame through the adapter.
    pub fn post(&self, frame: Frame) -> Result<()> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(ProcwireError::ConnectionClosed);
        }
        self.inner.adapter.post(frame)
    }

    /// Allocate a fresh correlation id.
    #[inline]
    pub fn generate_id(&self) -> String {
        self.inner.cids.next_id()
    }

    /// Subscribe to inbound frames matching `filter`.
    ///
    /// Matching frames are queued in arrival order until read. The
    /// subscription is removed when the returned value is dropped.
    pub fn subscribe<F>(&self, filter: F) -> FrameSubscription
    where
        F: Fn(&Frame) -> bool + Send + Sync + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        if self.inner.closed.load(Ordering::Acquire) {
            // Closed engine: hand out an already-finished queue.
            drop(tx);
            return FrameSubscription {
                guard: Subscription::detached(),
                rx,
            };
        }

        let id = self.inner.add(Box::new(filter), Sink::Queue(tx));
        FrameSubscription {
            guard: Subscription::new(id, &self.inner),
            rx,
        }
    }

    /// Register a synchronous callback for inbound frames matching `filter`.
    ///
    /// The callback runs on the adapter's delivery task, in frame order, and
    /// must not block. It is removed when the returned guard is dropped.
    pub fn on_frame<F, H>(&self, filter: F, handler: H) -> Subscription
    where
        F: Fn(&Frame) -> bool + Send + Sync + 'static,
        H: Fn(&Frame) + Send + Sync + 'static,
    {
        if self.inner.closed.load(Ordering::Acquire) {
            return Subscription::detached();
        }
        let id = self
            .inner
            .add(Box::new(filter), Sink::Callback(Arc::new(handler)));
        Subscription::new(id, &self.inner)
    }

    /// Stop the adapter and close every subscription.
    ///
    /// Pending queue readers observe the end of their queue. Idempotent.
    pub fn stop(&self) -> Result<()> {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let dropped = std::mem::take(&mut *self.inner.subscribers.lock());
        tracing::debug!(subscribers = dropped.len(), "Engine stopped");
        drop(dropped);
        self.inner.adapter.stop()
    }

    /// Check if the engine has been stopped.
    #[inline]
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        let mut subscribers = self.inner.subscribers.lock();
        subscribers.retain(|s| !s.sink.is_closed());
        subscribers.len()
    }
}

/// Registration guard; unsubscribes on drop.
pub struct Subscription {
    id: u64,
    engine: Weak<EngineInner>,
}

impl Subscription {
    fn new(id: u64, inner: &Arc<EngineInner>) -> Self {
        Self {
            id,
            engine: Arc::downgrade(inner),
        }
    }

    fn detached() -> Self {
        Self {
            id: 0,
            engine: Weak::new(),
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(inner) = self.engine.upgrade() {
            inner.remove(self.id);
        }
    }
}

/// Queue of inbound frames selected by a predicate.
pub struct FrameSubscription {
    guard: Subscription,
    rx: mpsc::UnboundedReceiver<Frame>,
}

impl FrameSubscription {
    /// Wait for the next matching frame.
    ///
    /// Returns `None` once the engine is stopped or dropped.
    pub async fn recv(&mut self) -> Option<Frame> {
        self.rx.recv().await
    }

    /// Take a queued frame without waiting.
    pub fn try_recv(&mut self) -> Option<Frame> {
        self.rx.try_recv().ok()
    }

    /// Poll for the next matching frame.
    pub fn poll_recv(&mut self, cx: &mut Context<'_>) -> Poll<Option<Frame>> {
        self.rx.poll_recv(cx)
    }

    /// Remove the subscription, discarding queued frames.
    pub fn unsubscribe(self) {
        drop(self.guard);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::FrameKind;
    use crate::transport::MemoryAdapter;
    use std::time::Duration;

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    #[tokio::test]
    async fn test_fan_out_by_predicate() {
        let (left, right) = MemoryAdapter::pair();
        let engine = Engine::connect(left).unwrap();

        let mut for_a = engine.subscribe(|f| f.cid() == "a");
        let mut ends = engine.subscribe(|f| f.kind() == FrameKind::End);

        right.post(Frame::end("a")).unwrap();
        right.post(Frame::cancel("b")).unwrap();
        right.post(Frame::end("c")).unwrap();

        assert_eq!(for_a.recv().await, Some(Frame::end("a")));
        assert_eq!(ends.recv().await, Some(Frame::end("a")));
        assert_eq!(ends.recv().await, Some(Frame::end("c")));

        settle().await;
        assert!(for_a.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_outbound_passes_through() {
        let (left, right) = MemoryAdapter::pair();
        let engine = Engine::connect(left).unwrap();
        let peer = Engine::connect(right).unwrap();
        let mut seen = peer.subscribe(|_| true);

        engine.post(Frame::cancel("x")).unwrap();
        assert_eq!(seen.recv().await, Some(Frame::cancel("x")));
    }

    #[tokio::test]
    async fn test_unsubscribe_on_drop() {
        let (left, _right) = MemoryAdapter::pair();
        let engine = Engine::connect(left).unwrap();

        let sub = engine.subscribe(|_| true);
        let guard = engine.on_frame(|_| true, |_| {});
        assert_eq!(engine.subscriber_count(), 2);

        drop(sub);
        assert_eq!(engine.subscriber_count(), 1);
        drop(guard);
        assert_eq!(engine.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_callbacks_run_in_frame_order() {
        let (left, right) = MemoryAdapter::pair();
        let engine = Engine::new(left);

        let (tx, mut rx) = mpsc::unbounded_channel();
        let _guard = engine.on_frame(
            |f| f.kind() == FrameKind::Cancel,
            move |f| {
                let _ = tx.send(f.cid().to_string());
            },
        );
        engine.start().unwrap();

        for i in 0..10 {
            right.post(Frame::cancel(format!("c{}", i))).unwrap();
        }
        for i in 0..10 {
            assert_eq!(rx.recv().await.unwrap(), format!("c{}", i));
        }
    }

    #[tokio::test]
    async fn test_unmatched_frames_ignored() {
        let (left, right) = MemoryAdapter::pair();
        let engine = Engine::connect(left).unwrap();
        let mut sub = engine.subscribe(|f| f.cid() == "wanted");

        right.post(Frame::end("other")).unwrap();
        right.post(Frame::end("wanted")).unwrap();

        assert_eq!(sub.recv().await, Some(Frame::end("wanted")));
    }

    #[tokio::test]
    async fn test_stop_closes_subscriptions() {
        let (left, _right) = MemoryAdapter::pair();
        let engine = Engine::connect(left).unwrap();
        let mut sub = engine.subscribe(|_| true);

        engine.stop().unwrap();
        engine.stop().unwrap();

        assert!(engine.is_closed());
        assert_eq!(sub.recv().await, None);
        assert!(matches!(
            engine.post(Frame::end("x")),
            Err(ProcwireError::ConnectionClosed)
        ));

        let mut late = engine.subscribe(|_| true);
        assert_eq!(late.recv().await, None);
    }

    #[tokio::test]
    async fn test_double_start_rejected() {
        let (left, _right) = MemoryAdapter::pair();
        let engine = Engine::connect(left).unwrap();
        assert!(matches!(engine.start(), Err(ProcwireError::Protocol(_))));
    }

    #[tokio::test]
    async fn test_generated_ids_distinct() {
        let (left, _right) = MemoryAdapter::pair();
        let engine = Engine::new(left);
        assert_ne!(engine.generate_id(), engine.generate_id());
    }
}
