//! Failure taxonomy for queue transport.
//!
//! Every provider reports failures as a [`QueueError`]. The client layer then
//! decides which of them reach the caller: receive failures become empty
//! batches and stale receipts on delete are ignored, everything else is
//! returned.

use std::time::Duration;
use thiserror::Error;

/// Failure reported by a queue provider or the client layer
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Queue {queue_name} does not exist")]
    QueueNotFound { queue_name: String },

    #[error("Receipt {receipt} is stale or the message was already deleted")]
    MessageNotFound { receipt: String },

    #[error("Queue call timed out after {duration:?}")]
    Timeout { duration: Duration },

    #[error("Queue endpoint unreachable: {message}")]
    ConnectionFailed { message: String },

    #[error("Queue credentials rejected: {message}")]
    AuthenticationFailed { message: String },

    #[error("Message body is {size} bytes, limit is {max_size}")]
    MessageTooLarge { size: usize, max_size: usize },

    #[error("Message rejected by provider: {message}")]
    InvalidMessage { message: String },

    #[error("{provider} returned {code}: {message}")]
    ProviderError {
        provider: String,
        code: String,
        message: String,
    },

    #[error("Provider payload error: {0}")]
    SerializationError(#[from] SerializationError),

    #[error("Provider misconfigured: {0}")]
    ConfigurationError(#[from] ConfigurationError),

    #[error("Invalid argument: {0}")]
    ValidationError(#[from] ValidationError),
}

impl QueueError {
    /// Whether repeating the same call later may succeed
    ///
    /// Unclassified provider errors count as transient.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. } | Self::ConnectionFailed { .. } | Self::ProviderError { .. }
        )
    }

    /// Whether the error is a stale or already-consumed receipt
    ///
    /// Under at-least-once delivery this is an expected race, not a caller
    /// error.
    pub fn is_receipt_race(&self) -> bool {
        matches!(self, Self::MessageNotFound { .. })
    }
}

/// Failure converting between provider wire data and messages
#[derive(Debug, Error)]
pub enum SerializationError {
    #[error("JSON encoding failed: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Message body is not valid UTF-8")]
    InvalidUtf8,

    #[error("Unexpected provider response: {message}")]
    UnexpectedResponse { message: String },
}

/// Provider settings that cannot be used
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("{message}")]
    Invalid { message: String },

    #[error("{key} is not set")]
    Missing { key: String },
}

/// Rejected caller-supplied value
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("{field} is required")]
    Required { field: String },

    #[error("{field} is malformed: {message}")]
    InvalidFormat { field: String, message: String },

    #[error("{field} is out of range: {message}")]
    OutOfRange { field: String, message: String },
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
