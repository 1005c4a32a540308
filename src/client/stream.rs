//! Client side of a streaming call.

use std::marker::PhantomData;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::stream::{FusedStream, Stream};
use serde::de::DeserializeOwned;
use serde_json::Value;

use super::CancelOnDrop;
use crate::engine::{Engine, FrameSubscription};
use crate::error::{ProcwireError, Result};
use crate::protocol::{Frame, FrameKind, Meta};

enum State {
    /// Not polled yet; nothing sent.
    Idle {
        method: String,
        payload: Result<Option<Value>>,
        meta: Option<Meta>,
    },
    /// `req` sent; waiting for `nxt` / `end` / `err`.
    Open {
        frames: FrameSubscription,
        cancel: CancelOnDrop,
    },
    Done,
}

/// Lazy, cancelable sequence of values from a streaming call.
///
/// The `req` is sent on the first poll. Dropping the stream (or calling
/// [`cancel`](Self::cancel)) before the server finishes sends one `can`.
pub struct RpcStream<T> {
    engine: Engine,
    cid: Option<String>,
    state: State,
    _marker: PhantomData<fn() -> T>,
}

impl<T> RpcStream<T> {
    pub(crate) fn new(
        engine: Engine,
        method: String,
        payload: Result<Option<Value>>,
        meta: Option<Meta>,
    ) -> Self {
        Self {
            engine,
            cid: None,
            state: State::Idle {
                method,
                payload,
                meta,
            },
            _marker: PhantomData,
        }
    }

    /// Correlation id, once the request has been sent.
    pub fn cid(&self) -> Option<&str> {
        self.cid.as_deref()
    }

    /// Stop consuming.
    ///
    /// Sends `can` if the request is in flight; a stream never polled sends
    /// nothing. Buffered values are discarded. Idempotent.
    pub fn cancel(&mut self) {
        self.state = State::Done;
    }

    fn open(&mut self) -> Result<()> {
        let State::Idle {
            method,
            payload,
            meta,
        } = std::mem::replace(&mut self.state, State::Done)
        else {
            return Ok(());
        };
        let payload = payload?;

        let cid = self.engine.generate_id();
        let frames = self.engine.subscribe({
            let cid = cid.clone();
            move |f| f.matches(&cid, &[FrameKind::Next, FrameKind::End, FrameKind::Error])
        });
        self.engine
            .post(Frame::request(cid.as_str(), method, payload, meta))?;

        self.state = State::Open {
            frames,
            cancel: CancelOnDrop::new(self.engine.clone(), cid.clone()),
        };
        self.cid = Some(cid);
        Ok(())
    }
}

impl<T: DeserializeOwned> Stream for RpcStream<T> {
    type Item = Result<T>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        loop {
            match &mut this.state {
                State::Idle { .. } => {
                    if let Err(e) = this.open() {
                        return Poll::Ready(Some(Err(e)));
                    }
                }
                State::Open { frames, cancel } => {
                    let frame = match frames.poll_recv(cx) {
                        Poll::Ready(frame) => frame,
                        Poll::Pending => return Poll::Pending,
                    };

                    match frame {
                        Some(Frame::Next { data, .. }) => {
                            return match serde_json::from_value::<T>(data) {
                                Ok(value) => Poll::Ready(Some(Ok(value))),
                                Err(e) => {
                                    // Undecodable value: give up and cancel.
                                    this.state = State::Done;
                                    Poll::Ready(Some(Err(ProcwireError::Json(e))))
                                }
                            };
                        }
                        Some(Frame::End { .. }) => {
                            cancel.disarm();
                            this.state = State::Done;
                            return Poll::Ready(None);
                        }
                        Some(frame @ Frame::Error { .. }) => {
                            cancel.disarm();
                            this.state = State::Done;
                            if let Some(err) = frame.to_rpc_error() {
                                return Poll::Ready(Some(Err(err.into())));
                            }
                        }
                        Some(_) => {}
                        None => {
                            cancel.disarm();
                            this.state = State::Done;
                            return Poll::Ready(Some(Err(ProcwireError::ConnectionClosed)));
                        }
                    }
                }
                State::Done => return Poll::Ready(None),
            }
        }
    }
}

impl<T: DeserializeOwned> FusedStream for RpcStream<T> {
    fn is_terminated(&self) -> bool {
        matches!(self.state, State::Done)
    }
}
