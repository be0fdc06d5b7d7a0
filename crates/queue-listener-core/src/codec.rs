//! Message body decoding, encoding and validation.
//!
//! Bodies travel as UTF-8 JSON text. Decoding is pure: the same bytes always
//! produce the same [`Value`].

use bytes::Bytes;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;

#[cfg(test)]
#[path = "codec_tests.rs"]
mod tests;

/// Caller-supplied validation and transform step
///
/// Returning `None` marks the message invalid. Any `Some` value is handed to
/// the handler in place of the decoded body.
pub type Validator = Arc<dyn Fn(&Value) -> Option<Value> + Send + Sync>;

/// Errors produced while decoding a message body
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("Message body is not valid UTF-8: {0}")]
    InvalidUtf8(#[from] std::str::Utf8Error),

    #[error("Message body is not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),
}

/// Errors produced while encoding an outgoing payload
#[derive(Debug, thiserror::Error)]
pub enum EncodeError {
    #[error("Payload could not be serialized to JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Decode a message body as JSON
pub fn decode(body: &[u8]) -> Result<Value, DecodeError> {
    let text = std::str::from_utf8(body)?;
    Ok(serde_json::from_str(text)?)
}

/// Encode a payload as a JSON message body
pub fn encode<T>(payload: &T) -> Result<Bytes, EncodeError>
where
    T: Serialize + ?Sized,
{
    Ok(Bytes::from(serde_json::to_vec(payload)?))
}

/// Apply an optional validator to a decoded body
///
/// Without a validator the decoded body is passed through unchanged.
pub fn validate(validator: Option<&Validator>, decoded: &Value) -> Option<Value> {
    match validator {
        Some(validator) => validator(decoded),
        None => Some(decoded.clone()),
    }
}
