//! MsgPack codec using `rmp-serde`.
//!
//! **Always** use `to_vec_named`, never `to_vec`.
//!
//! Frames are an internally tagged enum: the `kind` tag is written as one more
//! struct field. `to_vec` serializes structs positionally (as arrays), which
//! drops the field names the tag lookup depends on, so decoding fails.
//! `to_vec_named` writes structs as maps and keeps frames self-describing.
//!
//! # Example
//!
//! ```
//! use procwire_rpc::codec::MsgPackCodec;
//! use procwire_rpc::protocol::Frame;
//!
//! let frame = Frame::cancel("c1");
//! let encoded = MsgPackCodec::encode(&frame).unwrap();
//! let decoded: Frame = MsgPackCodec::decode(&encoded).unwrap();
//! assert_eq!(decoded, frame);
//! ```

use crate::error::Result;

/// MessagePack codec for structured data.
pub struct MsgPackCodec;

impl MsgPackCodec {
    /// Encode a value to MsgPack bytes (struct-as-map format).
    ///
    /// # Errors
    ///
    /// Returns error if the value cannot be serialized.
    #[inline]
    pub fn encode<T: serde::Serialize>(value: &T) -> Result<Vec<u8>> {
        Ok(rmp_serde::to_vec_named(value)?)
    }

    /// Decode MsgPack bytes to a value.
    ///
    /// # Errors
    ///
    /// Returns error if the bytes cannot be deserialized to type T.
    #[inline]
    pub fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T> {
        Ok(rmp_serde::from_slice(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ProcwireError, RpcError};
    use crate::protocol::{Frame, Meta};
    use serde_json::json;

    #[test]
    fn test_request_frame_with_nested_payload() {
        let mut meta = Meta::new();
        meta.insert("sender".into(), json!("main"));

        let frame = Frame::request(
            "c1",
            "kb.search",
            Some(json!({"query": "rust", "limit": 5, "filters": ["a", "b"], "exact": false})),
            Some(meta),
        );

        let encoded = MsgPackCodec::encode(&frame).unwrap();
        let decoded: Frame = MsgPackCodec::decode(&encoded).unwrap();
        assert_eq!(decoded, frame);
    }

    #[test]
    fn test_error_frame_keeps_details() {
        let err = RpcError::new("INVALID_ARGUMENT", "bad input").with_details(json!({"field": "a"}));
        let frame = Frame::error("c2", &err);

        let encoded = MsgPackCodec::encode(&frame).unwrap();
        let decoded: Frame = MsgPackCodec::decode(&encoded).unwrap();
        assert_eq!(decoded.to_rpc_error(), Some(err));
    }

    #[test]
    fn test_frames_encode_as_maps() {
        let encoded = MsgPackCodec::encode(&Frame::end("c3")).unwrap();

        // fixmap with 2 entries (kind, cid); array format would be 0x9X
        assert_eq!(
            encoded[0], 0x82,
            "Expected map format (0x82), got {:02X}",
            encoded[0]
        );
    }

    #[test]
    fn test_decode_error_on_invalid_data() {
        let result: Result<Frame> = MsgPackCodec::decode(b"not valid msgpack");
        assert!(matches!(result, Err(ProcwireError::MsgPackDecode(_))));
    }
}
