//! Codec module - frame and payload serialization.
//!
//! - [`JsonCodec`] - JSON via `serde_json`; also converts typed values to and
//!   from the `serde_json::Value` payloads frames carry
//! - [`MsgPackCodec`] - MessagePack via `rmp-serde` (`to_vec_named`)
//! - [`FrameCodec`] - runtime choice between the two for byte-stream transports
//!
//! # Design
//!
//! Codecs are marker structs with static methods rather than trait objects, so
//! call sites pick a codec at compile time. [`FrameCodec`] exists only where
//! the choice is configuration.
//!
//! # Example
//!
//! ```
//! use procwire_rpc::codec::FrameCodec;
//! use procwire_rpc::protocol::Frame;
//!
//! let frame = Frame::end("c1");
//! for codec in [FrameCodec::Json, FrameCodec::MsgPack] {
//!     let bytes = codec.encode_frame(&frame).unwrap();
//!     assert_eq!(codec.decode_frame(&bytes).unwrap(), frame);
//! }
//! ```

mod json;
mod msgpack;

pub use json::JsonCodec;
pub use msgpack::MsgPackCodec;

use crate::error::Result;
use crate::protocol::Frame;

/// Wire encoding for frames on byte-stream transports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FrameCodec {
    /// UTF-8 JSON text.
    #[default]
    Json,
    /// MessagePack, structs as maps.
    MsgPack,
}

impl FrameCodec {
    /// Encode one frame.
    pub fn encode_frame(&self, frame: &Frame) -> Result<Vec<u8>> {
        match self {
            FrameCodec::Json => JsonCodec::encode(frame),
            FrameCodec::MsgPack => MsgPackCodec::encode(frame),
        }
    }

    /// Decode one frame.
    pub fn decode_frame(&self, bytes: &[u8]) -> Result<Frame> {
        match self {
            FrameCodec::Json => JsonCodec::decode(bytes),
            FrameCodec::MsgPack => MsgPackCodec::decode(bytes),
        }
    }
}
