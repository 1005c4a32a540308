//! Classification of handler failures into wire errors.
//!
//! - an [`RpcError`] (directly or inside [`ProcwireError::Rpc`]) is carried
//!   verbatim, so handlers choose their own codes
//! - anything else keeps its message and gets a fallback code:
//!   `INTERNAL` for request/response handlers, `OPERATION_FAILED` for
//!   sequences and push streams
//! - panics become `INTERNAL` with the panic message

use std::any::Any;

use crate::error::{codes, BoxError, ProcwireError, RpcError};

/// Classify an error with the given fallback code.
pub fn classify(err: &BoxError, fallback_code: &str) -> RpcError {
    if let Some(rpc) = err.downcast_ref::<RpcError>() {
        return rpc.clone();
    }
    if let Some(ProcwireError::Rpc(rpc)) = err.downcast_ref::<ProcwireError>() {
        return rpc.clone();
    }
    RpcError::new(fallback_code, err.to_string())
}

/// Classify a failed request/response handler.
pub fn from_handler_error(err: &BoxError) -> RpcError {
    classify(err, codes::INTERNAL)
}

/// Classify a failed sequence or push stream.
pub fn from_stream_error(err: &BoxError) -> RpcError {
    classify(err, codes::OPERATION_FAILED)
}

/// Classify a caught panic payload.
pub fn from_panic(payload: Box<dyn Any + Send>) -> RpcError {
    let message = if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "handler panicked".to_string()
    };
    RpcError::internal(message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_rpc_error_passes_through() {
        let err: BoxError = RpcError::new("INVALID_ARGUMENT", "bad input")
            .with_details(json!({"field": "a"}))
            .into();

        let mapped = from_handler_error(&err);
        assert_eq!(mapped.code, "INVALID_ARGUMENT");
        assert_eq!(mapped.message, "bad input");
        assert_eq!(mapped.details, Some(json!({"field": "a"})));
    }

    #[test]
    fn test_wrapped_rpc_error_passes_through() {
        let err: BoxError = ProcwireError::Rpc(RpcError::new("LIMIT", "too many")).into();
        assert_eq!(from_stream_error(&err).code, "LIMIT");
    }

    #[test]
    fn test_fallback_codes() {
        let err: BoxError = "disk on fire".into();

        let unary = from_handler_error(&err);
        assert_eq!(unary.code, codes::INTERNAL);
        assert_eq!(unary.message, "disk on fire");

        assert_eq!(from_stream_error(&err).code, codes::OPERATION_FAILED);
    }

    #[test]
    fn test_panic_payloads() {
        let caught = std::panic::catch_unwind(|| panic!("boom")).unwrap_err();
        assert_eq!(from_panic(caught).message, "boom");

        let caught = std::panic::catch_unwind(|| panic!("code {}", 7)).unwrap_err();
        assert_eq!(from_panic(caught).message, "code 7");

        let caught = std::panic::catch_unwind(|| std::panic::panic_any(42u8)).unwrap_err();
        let mapped = from_panic(caught);
        assert_eq!(mapped.code, codes::INTERNAL);
        assert_eq!(mapped.message, "handler panicked");
    }
}
