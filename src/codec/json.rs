//! JSON codec using `serde_json`.
//!
//! Besides whole-frame encoding, this is where typed values cross into and out
//! of the `serde_json::Value` payloads that frames carry.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::error::Result;

/// JSON codec for frames and payload values.
pub struct JsonCodec;

impl JsonCodec {
    /// Encode a value to JSON bytes.
    #[inline]
    pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(value)?)
    }

    /// Decode JSON bytes to a value.
    #[inline]
    pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Convert a typed value into a payload value.
    #[inline]
    pub fn to_value<T: Serialize + ?Sized>(value: &T) -> Result<Value> {
        Ok(serde_json::to_value(value)?)
    }

    /// Convert an optional payload value into a typed value.
    ///
    /// An absent payload decodes from `null`, so `()` and `Option<T>`
    /// parameters accept requests that carry no payload.
    #[inline]
    pub fn from_value<T: DeserializeOwned>(value: Option<Value>) -> Result<T> {
        Ok(serde_json::from_value(value.unwrap_or(Value::Null))?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Frame;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Serialize, Deserialize, PartialEq, Debug)]
    struct AddInput {
        a: i64,
        b: i64,
    }

    #[test]
    fn test_frame_text_form() {
        let encoded = JsonCodec::encode(&Frame::cancel("c1")).unwrap();
        assert_eq!(encoded, br#"{"kind":"can","cid":"c1"}"#);

        let decoded: Frame = JsonCodec::decode(&encoded).unwrap();
        assert_eq!(decoded, Frame::cancel("c1"));
    }

    #[test]
    fn test_unsized_payload_conversion() {
        let text: &str = "hello";
        assert_eq!(JsonCodec::to_value::<str>(text).unwrap(), json!("hello"));

        let items: &[u8] = &[1, 2, 3];
        assert_eq!(JsonCodec::to_value::<[u8]>(items).unwrap(), json!([1, 2, 3]));
    }

    #[test]
    fn test_typed_payload_conversion() {
        let value = JsonCodec::to_value(&AddInput { a: 2, b: 5 }).unwrap();
        assert_eq!(value, json!({"a": 2, "b": 5}));

        let input: AddInput = JsonCodec::from_value(Some(value)).unwrap();
        assert_eq!(input, AddInput { a: 2, b: 5 });
    }

    #[test]
    fn test_absent_payload_decodes_from_null() {
        assert!(JsonCodec::from_value::<()>(None).is_ok());

        let opt: Option<i32> = JsonCodec::from_value(None).unwrap();
        assert_eq!(opt, None);

        let missing: Result<AddInput> = JsonCodec::from_value(None);
        assert!(missing.is_err());
    }
}
