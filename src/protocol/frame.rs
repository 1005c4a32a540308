//! Frame enum with typed accessors.
//!
//! A frame is one wire-level message. Six kinds exist, each carrying the
//! correlation id (`cid`) of the conversation it belongs to:
//!
//! ```text
//! ┌──────┬──────────────────────────────────────┬──────────────────────────┐
//! │ kind │ fields                               │ meaning                  │
//! ├──────┼──────────────────────────────────────┼──────────────────────────┤
//! │ req  │ cid, method, payload?, meta?         │ open a conversation      │
//! │ res  │ cid, ok=true, result?                │ unary success terminal   │
//! │ err  │ cid, ok=false, message, code, details│ failure terminal         │
//! │ nxt  │ cid, data, method?, seq?             │ one stream value         │
//! │ end  │ cid                                  │ stream success terminal  │
//! │ can  │ cid                                  │ cancellation request     │
//! └──────┴──────────────────────────────────────┴──────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```
//! use procwire_rpc::protocol::{Frame, FrameKind};
//! use serde_json::json;
//!
//! let frame = Frame::request("c1", "math.add", Some(json!({"a": 2, "b": 5})), None);
//! assert_eq!(frame.cid(), "c1");
//! assert_eq!(frame.kind(), FrameKind::Request);
//!
//! let wire = serde_json::to_value(&frame).unwrap();
//! assert_eq!(wire["kind"], "req");
//! ```

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::error::RpcError;

/// Opaque transport metadata (sender identity, protocol version, timestamp).
///
/// Passed through by the engine without interpretation.
pub type Meta = Map<String, Value>;

/// A single wire frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Frame {
    /// Open a conversation invoking `method`.
    #[serde(rename = "req")]
    Request {
        cid: String,
        method: String,
        #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
        payload: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        meta: Option<Meta>,
    },

    /// Unary success terminal.
    #[serde(rename = "res")]
    Response {
        cid: String,
        #[serde(default = "ok_true")]
        ok: bool,
        #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
        result: Option<Value>,
    },

    /// Failure terminal, unary or stream.
    #[serde(rename = "err")]
    Error {
        cid: String,
        #[serde(default)]
        ok: bool,
        message: String,
        code: String,
        #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
        details: Option<Value>,
    },

    /// One emitted stream value.
    #[serde(rename = "nxt")]
    Next {
        cid: String,
        #[serde(default)]
        data: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        method: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        seq: Option<u64>,
    },

    /// Stream success terminal.
    #[serde(rename = "end")]
    End { cid: String },

    /// Cancellation request.
    #[serde(rename = "can")]
    Cancel { cid: String },
}

fn ok_true() -> bool {
    true
}

/// A present field is `Some`, even when it holds `null`; only a missing
/// field is `None`.
fn present<'de, D>(deserializer: D) -> std::result::Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

/// Frame discriminant, handy for filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameKind {
    Request,
    Response,
    Error,
    Next,
    End,
    Cancel,
}

impl FrameKind {
    /// Wire tag (`req`, `res`, ...).
    pub fn as_str(&self) -> &'static str {
        match self {
            FrameKind::Request => "req",
            FrameKind::Response => "res",
            FrameKind::Error => "err",
            FrameKind::Next => "nxt",
            FrameKind::End => "end",
            FrameKind::Cancel => "can",
        }
    }
}

impl fmt::Display for FrameKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Frame {
    /// Build a `req` frame.
    pub fn request(
        cid: impl Into<String>,
        method: impl Into<String>,
        payload: Option<Value>,
        meta: Option<Meta>,
    ) -> Self {
        Frame::Request {
            cid: cid.into(),
            method: method.into(),
            payload,
            meta,
        }
    }

    /// Build a `res` frame.
    pub fn response(cid: impl Into<String>, result: Option<Value>) -> Self {
        Frame::Response {
            cid: cid.into(),
            ok: true,
            result,
        }
    }

    /// Build an `err` frame from a classified error.
    pub fn error(cid: impl Into<String>, err: &RpcError) -> Self {
        Frame::Error {
            cid: cid.into(),
            ok: false,
            message: err.message.clone(),
            code: err.code.clone(),
            details: err.details.clone(),
        }
    }

    /// Build a `nxt` frame.
    pub fn next(
        cid: impl Into<String>,
        data: Value,
        method: Option<String>,
        seq: Option<u64>,
    ) -> Self {
        Frame::Next {
            cid: cid.into(),
            data,
            method,
            seq,
        }
    }

    /// Build an `end` frame.
    pub fn end(cid: impl Into<String>) -> Self {
        Frame::End { cid: cid.into() }
    }

    /// Build a `can` frame.
    pub fn cancel(cid: impl Into<String>) -> Self {
        Frame::Cancel { cid: cid.into() }
    }

    /// Correlation id of the conversation this frame belongs to.
    #[inline]
    pub fn cid(&self) -> &str {
        match self {
            Frame::Request { cid, .. }
            | Frame::Response { cid, .. }
            | Frame::Error { cid, .. }
            | Frame::Next { cid, .. }
            | Frame::End { cid }
            | Frame::Cancel { cid } => cid,
        }
    }

    /// Frame kind.
    #[inline]
    pub fn kind(&self) -> FrameKind {
        match self {
            Frame::Request { .. } => FrameKind::Request,
            Frame::Response { .. } => FrameKind::Response,
            Frame::Error { .. } => FrameKind::Error,
            Frame::Next { .. } => FrameKind::Next,
            Frame::End { .. } => FrameKind::End,
            Frame::Cancel { .. } => FrameKind::Cancel,
        }
    }

    /// Check if this frame ends a conversation (`res`, `err` or `end`).
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Frame::Response { .. } | Frame::Error { .. } | Frame::End { .. }
        )
    }

    /// Check if this frame belongs to `cid` and is one of `kinds`.
    #[inline]
    pub fn matches(&self, cid: &str, kinds: &[FrameKind]) -> bool {
        self.cid() == cid && kinds.contains(&self.kind())
    }

    /// Convert an `err` frame into the error it carries.
    pub fn to_rpc_error(&self) -> Option<RpcError> {
        match self {
            Frame::Error {
                message,
                code,
                details,
                ..
            } => Some(RpcError {
                code: code.clone(),
                message: message.clone(),
                details: details.clone(),
            }),
            _ => None,
        }
    }
}
