//! Protocol module - frame model, correlation ids, and byte-stream framing.
//!
//! - [`Frame`] - the six-kind tagged union exchanged between peers
//! - [`CidGenerator`] - collision-resistant correlation ids
//! - [`FrameBuffer`] - length-prefix accumulator for byte-stream transports

mod cid;
mod frame;
mod frame_buffer;

pub use cid::CidGenerator;
pub use frame::{Frame, FrameKind, Meta};
pub use frame_buffer::{
    encode_length_prefix, FrameBuffer, DEFAULT_MAX_FRAME_SIZE, LENGTH_PREFIX_SIZE,
};

/// Protocol version reported in default request metadata.
pub const PROTOCOL_VERSION: &str = "1.0.0";
