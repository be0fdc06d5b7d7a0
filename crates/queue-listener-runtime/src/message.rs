//! Queue names, handles, message identifiers and the messages themselves.

use crate::error::ValidationError;
use crate::provider::ProviderType;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

// ============================================================================
// Core Domain Identifiers
// ============================================================================

/// Suffix marking a FIFO queue name.
const FIFO_SUFFIX: &str = ".fifo";

/// Validated queue name following SQS naming rules
///
/// 1-80 characters of ASCII alphanumerics, hyphens and underscores. A trailing
/// `.fifo` suffix is permitted and counts towards the length limit.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct QueueName(String);

impl QueueName {
    /// Validate `name` against SQS naming rules
    pub fn new(name: String) -> Result<Self, ValidationError> {
        if name.is_empty() || name.len() > 80 {
            return Err(ValidationError::OutOfRange {
                field: "queue_name".to_string(),
                message: "must be 1-80 characters".to_string(),
            });
        }

        let base = name.strip_suffix(FIFO_SUFFIX).unwrap_or(&name);
        if base.is_empty() {
            return Err(ValidationError::InvalidFormat {
                field: "queue_name".to_string(),
                message: "name cannot consist of the .fifo suffix alone".to_string(),
            });
        }

        if !base
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(ValidationError::InvalidFormat {
                field: "queue_name".to_string(),
                message: "only ASCII alphanumeric, hyphens, and underscores allowed".to_string(),
            });
        }

        Ok(Self(name))
    }

    /// The name as sent to the provider
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Check if the name designates a FIFO queue
    pub fn is_fifo(&self) -> bool {
        self.0.ends_with(FIFO_SUFFIX)
    }
}

impl std::fmt::Display for QueueName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for QueueName {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s.to_string())
    }
}

impl TryFrom<String> for QueueName {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<QueueName> for String {
    fn from(name: QueueName) -> Self {
        name.0
    }
}

/// Provider-specific handle for a resolved queue
///
/// Obtained from [`crate::QueueClient::resolve_queue`]. For SQS the `url` is the
/// queue URL returned by `GetQueueUrl`; the in-memory provider uses a
/// `memory://` pseudo-URL.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueueHandle {
    name: QueueName,
    url: String,
}

impl QueueHandle {
    /// Create a new handle for a resolved queue
    pub fn new(name: QueueName, url: String) -> Self {
        Self { name, url }
    }

    /// Logical queue name
    pub fn name(&self) -> &QueueName {
        &self.name
    }

    /// Provider-specific queue address
    pub fn url(&self) -> &str {
        &self.url
    }
}

impl std::fmt::Display for QueueHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.name, self.url)
    }
}

/// Identifier assigned to a message when it is sent
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(String);

impl MessageId {
    /// Generate a random ID, as the in-memory provider does on send
    pub fn new() -> Self {
        let id = uuid::Uuid::new_v4();
        Self(id.to_string())
    }

    /// Wrap a provider-assigned message ID
    pub fn from_string(id: String) -> Self {
        Self(id)
    }

    /// The identifier as reported by the provider
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for MessageId {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(ValidationError::Required {
                field: "message_id".to_string(),
            });
        }

        Ok(Self(s.to_string()))
    }
}

/// UTC instant used for send times and visibility deadlines
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Current wall-clock time
    pub fn now() -> Self {
        Self(Utc::now())
    }

    pub fn as_datetime(&self) -> DateTime<Utc> {
        self.0
    }

    /// Timestamp offset into the future by `duration`
    ///
    /// Durations too large for chrono saturate at the maximum representable
    /// time.
    pub fn after(&self, duration: Duration) -> Self {
        let delta = chrono::Duration::from_std(duration).unwrap_or(chrono::Duration::MAX);
        Self(
            self.0
                .checked_add_signed(delta)
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
        )
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.format("%Y-%m-%d %H:%M:%S UTC"))
    }
}

// ============================================================================
// Message Types
// ============================================================================

/// A message to be sent through the queue system
#[derive(Debug, Clone)]
pub struct Message {
    pub body: Bytes,
    pub attributes: HashMap<String, String>,
}

impl Message {
    /// Create new message with body
    pub fn new(body: Bytes) -> Self {
        Self {
            body,
            attributes: HashMap::new(),
        }
    }

    /// Add message attribute
    pub fn with_attribute(mut self, key: String, value: String) -> Self {
        self.attributes.insert(key, value);
        self
    }

    /// Body as UTF-8 text, as required by the SQS wire format
    pub fn body_text(&self) -> Option<&str> {
        std::str::from_utf8(&self.body).ok()
    }
}

/// A message received from the queue with processing metadata
#[derive(Debug, Clone)]
pub struct ReceivedMessage {
    pub message_id: MessageId,
    pub body: Bytes,
    pub attributes: HashMap<String, String>,
    pub receipt_handle: ReceiptHandle,
    pub delivery_count: u32,
    pub received_at: Timestamp,
}

/// Opaque token for acknowledging or re-timing received messages
///
/// Valid only for the visibility window of the delivery that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiptHandle {
    handle: String,
    expires_at: Timestamp,
    provider_type: ProviderType,
}

impl ReceiptHandle {
    /// Create new receipt handle
    pub fn new(handle: String, expires_at: Timestamp, provider_type: ProviderType) -> Self {
        Self {
            handle,
            expires_at,
            provider_type,
        }
    }

    /// Get handle string
    pub fn handle(&self) -> &str {
        &self.handle
    }

    /// Check if receipt handle is expired
    pub fn is_expired(&self) -> bool {
        Timestamp::now() >= self.expires_at
    }

    /// Get time until expiry
    pub fn time_until_expiry(&self) -> Duration {
        let now = Timestamp::now();
        if now >= self.expires_at {
            Duration::ZERO
        } else {
            (self.expires_at.as_datetime() - now.as_datetime())
                .to_std()
                .unwrap_or(Duration::ZERO)
        }
    }

    /// Get provider type
    pub fn provider_type(&self) -> ProviderType {
        self.provider_type
    }
}

// ============================================================================
// Receive Options
// ============================================================================

/// Configuration options for receiving messages from queues
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiveOptions {
    /// Maximum number of messages to receive in a batch
    pub max_messages: u32,
    /// How long received messages stay hidden from other consumers
    pub visibility_timeout: Duration,
    /// Long-poll duration when the queue is empty
    pub wait_time: Duration,
}

impl Default for ReceiveOptions {
    fn default() -> Self {
        Self {
            max_messages: 10,
            visibility_timeout: Duration::from_secs(30),
            wait_time: Duration::from_secs(20),
        }
    }
}

impl ReceiveOptions {
    /// Create new receive options with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Set maximum number of messages to receive
    pub fn with_max_messages(mut self, max: u32) -> Self {
        self.max_messages = max;
        self
    }

    /// Set visibility timeout
    pub fn with_visibility_timeout(mut self, timeout: Duration) -> Self {
        self.visibility_timeout = timeout;
        self
    }

    /// Set long-poll wait time
    pub fn with_wait_time(mut self, wait_time: Duration) -> Self {
        self.wait_time = wait_time;
        self
    }
}

#[cfg(test)]
#[path = "message_tests.rs"]
mod tests;
