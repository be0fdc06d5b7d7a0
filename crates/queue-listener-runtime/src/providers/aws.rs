//! AWS SQS provider implementation using the SQS JSON protocol over HTTP.
//!
//! Requests are plain `POST /` calls carrying an `X-Amz-Target:
//! AmazonSQS.<Operation>` header and a JSON body, signed with AWS Signature
//! Version 4. Working at the HTTP level keeps the provider testable against a
//! mock server and lets the endpoint be pointed at LocalStack or ElasticMQ.
//!
//! ## Supported operations
//!
//! - `GetQueueUrl` (cached per provider)
//! - `ReceiveMessage` (long polling, at most 10 messages, at most 20 seconds)
//! - `DeleteMessage`
//! - `SendMessage`
//! - `ChangeMessageVisibility`
//!
//! ## Authentication
//!
//! Only static credentials (`access_key_id` / `secret_access_key`) are
//! supported. Without them every operation fails with
//! [`QueueError::AuthenticationFailed`].

use crate::client::QueueProvider;
use crate::error::{ConfigurationError, QueueError, SerializationError};
use crate::message::{
    Message, MessageId, QueueHandle, QueueName, ReceiptHandle, ReceiveOptions, ReceivedMessage,
    Timestamp,
};
use crate::provider::{AwsSqsConfig, ProviderType};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use reqwest::Client as HttpClient;
use serde::Deserialize;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, instrument};

#[cfg(test)]
#[path = "aws_tests.rs"]
mod tests;

/// Content type of every SQS JSON protocol request.
const JSON_CONTENT_TYPE: &str = "application/x-amz-json-1.0";

/// Prefix of the `X-Amz-Target` header value.
const TARGET_PREFIX: &str = "AmazonSQS";

/// Message attribute that selects the FIFO message group.
pub const MESSAGE_GROUP_ATTRIBUTE: &str = "MessageGroupId";

/// Message group used for FIFO queues when the message does not name one.
const DEFAULT_MESSAGE_GROUP: &str = "default";

/// SQS caps on a single `ReceiveMessage` call.
const MAX_RECEIVE_BATCH: u32 = 10;
const MAX_WAIT_TIME_SECONDS: u64 = 20;
const MAX_VISIBILITY_TIMEOUT_SECONDS: u64 = 12 * 60 * 60;

// ============================================================================
// Error Types
// ============================================================================

/// AWS SQS specific errors
#[derive(Debug, thiserror::Error)]
pub enum AwsError {
    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("SQS service error: {code} - {message}")]
    ServiceError { code: String, message: String },

    #[error("Queue not found: {0}")]
    QueueNotFound(String),

    #[error("Invalid receipt handle: {0}")]
    InvalidReceipt(String),

    #[error("Message rejected: {0}")]
    InvalidMessage(String),

    #[error("Message too large: {size} bytes (max: {max_size})")]
    MessageTooLarge { size: usize, max_size: usize },

    #[error("Unexpected response: {0}")]
    SerializationError(String),
}

impl AwsError {
    /// Check if error is transient and should be retried
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Authentication(_) => false,
            Self::NetworkError(_) => true,
            Self::Timeout(_) => true,
            Self::ServiceError { .. } => true,
            Self::QueueNotFound(_) => false,
            Self::InvalidReceipt(_) => false,
            Self::InvalidMessage(_) => false,
            Self::MessageTooLarge { .. } => false,
            Self::SerializationError(_) => false,
        }
    }

    /// Map AWS error to QueueError
    pub fn to_queue_error(self) -> QueueError {
        match self {
            Self::Authentication(message) => QueueError::AuthenticationFailed { message },
            Self::NetworkError(message) => QueueError::ConnectionFailed { message },
            Self::Timeout(duration) => QueueError::Timeout { duration },
            Self::ServiceError { code, message } => QueueError::ProviderError {
                provider: ProviderType::AwsSqs.to_string(),
                code,
                message,
            },
            Self::QueueNotFound(queue_name) => QueueError::QueueNotFound { queue_name },
            Self::InvalidReceipt(receipt) => QueueError::MessageNotFound { receipt },
            Self::InvalidMessage(message) => QueueError::InvalidMessage { message },
            Self::MessageTooLarge { size, max_size } => {
                QueueError::MessageTooLarge { size, max_size }
            }
            Self::SerializationError(message) => {
                QueueError::SerializationError(SerializationError::UnexpectedResponse { message })
            }
        }
    }

    /// Classify an SQS error code and HTTP status
    fn from_response(code: &str, message: String, status: u16) -> Self {
        match code {
            "QueueDoesNotExist"
            | "NonExistentQueue"
            | "AWS.SimpleQueueService.NonExistentQueue" => Self::QueueNotFound(message),
            "ReceiptHandleIsInvalid" | "InvalidReceiptHandle" | "MessageNotInflight" => {
                Self::InvalidReceipt(message)
            }
            "InvalidClientTokenId"
            | "UnrecognizedClientException"
            | "SignatureDoesNotMatch"
            | "IncompleteSignature"
            | "MissingAuthenticationToken"
            | "AccessDenied"
            | "AccessDeniedException" => Self::Authentication(format!("{}: {}", code, message)),
            "InvalidParameterValue" | "InvalidParameterValueException" | "InvalidMessageContents" => {
                Self::InvalidMessage(message)
            }
            _ if status == 401 || status == 403 => {
                Self::Authentication(format!("{}: {}", code, message))
            }
            _ => Self::ServiceError {
                code: code.to_string(),
                message,
            },
        }
    }
}

impl From<AwsError> for QueueError {
    fn from(error: AwsError) -> Self {
        error.to_queue_error()
    }
}

// ============================================================================
// AWS Signature V4 Signing
// ============================================================================

type HmacSha256 = Hmac<Sha256>;

/// AWS Signature Version 4 signer for SQS JSON requests
///
/// Signs `content-type`, `host`, `x-amz-date` and `x-amz-target` together with
/// the SHA-256 of the request body.
#[derive(Clone)]
struct AwsV4Signer {
    access_key: String,
    secret_key: String,
    region: String,
    service: String,
}

impl AwsV4Signer {
    fn new(access_key: String, secret_key: String, region: String) -> Self {
        Self {
            access_key,
            secret_key,
            region,
            service: "sqs".to_string(),
        }
    }

    /// Produce the `Authorization` and `x-amz-date` headers for a request
    fn sign_request(
        &self,
        host: &str,
        target: &str,
        body: &str,
        timestamp: &DateTime<Utc>,
    ) -> Result<Vec<(&'static str, String)>, AwsError> {
        let date_stamp = timestamp.format("%Y%m%d").to_string();
        let amz_date = timestamp.format("%Y%m%dT%H%M%SZ").to_string();

        let canonical_headers = format!(
            "content-type:{}\nhost:{}\nx-amz-date:{}\nx-amz-target:{}\n",
            JSON_CONTENT_TYPE, host, amz_date, target
        );
        let signed_headers = "content-type;host;x-amz-date;x-amz-target";
        let payload_hash = hex::encode(Sha256::digest(body.as_bytes()));

        let canonical_request = format!(
            "POST\n/\n\n{}\n{}\n{}",
            canonical_headers, signed_headers, payload_hash
        );

        let algorithm = "AWS4-HMAC-SHA256";
        let credential_scope = format!(
            "{}/{}/{}/aws4_request",
            date_stamp, self.region, self.service
        );
        let string_to_sign = format!(
            "{}\n{}\n{}\n{}",
            algorithm,
            amz_date,
            credential_scope,
            hex::encode(Sha256::digest(canonical_request.as_bytes()))
        );

        let signature = self.calculate_signature(&string_to_sign, &date_stamp)?;

        let authorization = format!(
            "{} Credential={}/{}, SignedHeaders={}, Signature={}",
            algorithm, self.access_key, credential_scope, signed_headers, signature
        );

        Ok(vec![("authorization", authorization), ("x-amz-date", amz_date)])
    }

    /// Derive the signing key through the date/region/service HMAC chain and
    /// sign `string_to_sign` with it
    fn calculate_signature(
        &self,
        string_to_sign: &str,
        date_stamp: &str,
    ) -> Result<String, AwsError> {
        let k_secret = format!("AWS4{}", self.secret_key);
        let k_date = hmac_sha256(k_secret.as_bytes(), date_stamp.as_bytes())?;
        let k_region = hmac_sha256(&k_date, self.region.as_bytes())?;
        let k_service = hmac_sha256(&k_region, self.service.as_bytes())?;
        let k_signing = hmac_sha256(&k_service, b"aws4_request")?;
        let signature = hmac_sha256(&k_signing, string_to_sign.as_bytes())?;

        Ok(hex::encode(signature))
    }
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Result<Vec<u8>, AwsError> {
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|e| AwsError::Authentication(format!("Invalid signing key: {}", e)))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}

// ============================================================================
// Wire Types
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct GetQueueUrlResponse {
    queue_url: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct SendMessageResponse {
    message_id: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ReceiveMessageResponse {
    #[serde(default)]
    messages: Vec<SqsMessage>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct SqsMessage {
    message_id: String,
    receipt_handle: String,
    body: String,
    #[serde(default)]
    attributes: HashMap<String, String>,
    #[serde(default)]
    message_attributes: HashMap<String, SqsMessageAttribute>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct SqsMessageAttribute {
    string_value: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ErrorResponse {
    #[serde(rename = "__type", default)]
    error_type: Option<String>,
    #[serde(alias = "Message", default)]
    message: Option<String>,
}

// ============================================================================
// AWS SQS Provider
// ============================================================================

/// AWS SQS queue provider implementation
///
/// Thread-safe; share it across tasks behind an `Arc`. Resolved queue URLs are
/// cached in a `RwLock`-protected map.
pub struct AwsSqsProvider {
    http_client: HttpClient,
    signer: Option<AwsV4Signer>,
    config: AwsSqsConfig,
    endpoint: String,
    host: String,
    queue_url_cache: Arc<RwLock<HashMap<QueueName, String>>>,
}

impl AwsSqsProvider {
    /// Create new AWS SQS provider
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::Invalid`] if the configuration fails
    /// validation or the HTTP client cannot be built.
    pub fn new(config: AwsSqsConfig) -> Result<Self, ConfigurationError> {
        config.validate()?;

        let endpoint = config.endpoint();
        let parsed = url::Url::parse(&endpoint).map_err(|e| ConfigurationError::Invalid {
            message: format!("Invalid endpoint '{}': {}", endpoint, e),
        })?;
        let host = match (parsed.host_str(), parsed.port()) {
            (Some(host), Some(port)) => format!("{}:{}", host, port),
            (Some(host), None) => host.to_string(),
            (None, _) => {
                return Err(ConfigurationError::Invalid {
                    message: format!("Endpoint '{}' has no host", endpoint),
                })
            }
        };

        let signer = match (&config.access_key_id, &config.secret_access_key) {
            (Some(access_key), Some(secret_key)) => Some(AwsV4Signer::new(
                access_key.clone(),
                secret_key.clone(),
                config.region.clone(),
            )),
            _ => None,
        };

        let http_client = HttpClient::builder()
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .build()
            .map_err(|e| ConfigurationError::Invalid {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self {
            http_client,
            signer,
            config,
            endpoint,
            host,
            queue_url_cache: Arc::new(RwLock::new(HashMap::new())),
        })
    }

    /// Endpoint requests are sent to
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Get queue URL for a queue name, with caching
    async fn get_queue_url(&self, queue_name: &QueueName) -> Result<String, AwsError> {
        {
            let cache = self.queue_url_cache.read().await;
            if let Some(url) = cache.get(queue_name) {
                return Ok(url.clone());
            }
        }

        let response: GetQueueUrlResponse = self
            .make_request("GetQueueUrl", json!({ "QueueName": queue_name.as_str() }))
            .await
            .map_err(|e| match e {
                AwsError::QueueNotFound(_) => AwsError::QueueNotFound(queue_name.to_string()),
                other => other,
            })?;

        let mut cache = self.queue_url_cache.write().await;
        cache.insert(queue_name.clone(), response.queue_url.clone());

        Ok(response.queue_url)
    }

    /// Sign and send one SQS JSON request, decoding the success body as `T`
    async fn make_request<T>(&self, operation: &str, payload: Value) -> Result<T, AwsError>
    where
        T: for<'de> Deserialize<'de>,
    {
        let signer = self
            .signer
            .as_ref()
            .ok_or_else(|| AwsError::Authentication("No credentials configured".to_string()))?;

        let target = format!("{}.{}", TARGET_PREFIX, operation);
        let body = payload.to_string();
        let auth_headers = signer.sign_request(&self.host, &target, &body, &Utc::now())?;

        let mut request = self
            .http_client
            .post(format!("{}/", self.endpoint))
            .header("content-type", JSON_CONTENT_TYPE)
            .header("x-amz-target", &target);
        for (key, value) in auth_headers {
            request = request.header(key, value);
        }

        let response = request.body(body).send().await.map_err(|e| {
            if e.is_timeout() {
                AwsError::Timeout(Duration::from_secs(self.config.request_timeout_seconds))
            } else if e.is_connect() {
                AwsError::NetworkError(format!("Connection failed: {}", e))
            } else {
                AwsError::NetworkError(format!("HTTP request failed: {}", e))
            }
        })?;

        let status = response.status();
        let query_error = response
            .headers()
            .get("x-amzn-query-error")
            .and_then(|v| v.to_str().ok())
            .map(|v| v.split(';').next().unwrap_or(v).to_string());
        let response_body = response
            .text()
            .await
            .map_err(|e| AwsError::NetworkError(format!("Failed to read response body: {}", e)))?;

        if !status.is_success() {
            return Err(Self::parse_error_response(
                &response_body,
                query_error,
                status.as_u16(),
            ));
        }

        // DeleteMessage and ChangeMessageVisibility answer with an empty body
        let response_body = if response_body.trim().is_empty() {
            "{}"
        } else {
            response_body.as_str()
        };

        serde_json::from_str(response_body).map_err(|e| {
            AwsError::SerializationError(format!("Failed to parse {} response: {}", operation, e))
        })
    }

    /// Classify an error response body
    ///
    /// The legacy query error code in `x-amzn-query-error` takes precedence over
    /// the JSON `__type`, whose namespace prefix is stripped.
    fn parse_error_response(body: &str, query_error: Option<String>, status: u16) -> AwsError {
        let parsed: ErrorResponse = serde_json::from_str(body).unwrap_or_default();

        let code = query_error
            .or_else(|| {
                parsed
                    .error_type
                    .as_deref()
                    .map(|t| t.rsplit('#').next().unwrap_or(t).to_string())
            })
            .unwrap_or_else(|| format!("Http{}", status));
        let message = parsed
            .message
            .unwrap_or_else(|| "Unknown error".to_string());

        AwsError::from_response(&code, message, status)
    }

    fn convert_message(
        message: SqsMessage,
        visibility_timeout: Duration,
        received_at: &Timestamp,
    ) -> ReceivedMessage {
        let delivery_count = message
            .attributes
            .get("ApproximateReceiveCount")
            .and_then(|v| v.parse().ok())
            .unwrap_or(1);

        let mut attributes = message.attributes;
        for (key, value) in message.message_attributes {
            if let Some(text) = value.string_value {
                attributes.insert(key, text);
            }
        }

        ReceivedMessage {
            message_id: MessageId::from_string(message.message_id),
            body: Bytes::from(message.body),
            attributes,
            receipt_handle: ReceiptHandle::new(
                message.receipt_handle,
                received_at.after(visibility_timeout),
                ProviderType::AwsSqs,
            ),
            delivery_count,
            received_at: received_at.clone(),
        }
    }
}

impl fmt::Debug for AwsSqsProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AwsSqsProvider")
            .field("config", &self.config)
            .field("endpoint", &self.endpoint)
            .finish()
    }
}

#[async_trait]
impl QueueProvider for AwsSqsProvider {
    #[instrument(skip(self, queue), fields(queue = %queue))]
    async fn resolve_queue(&self, queue: &QueueName) -> Result<QueueHandle, QueueError> {
        let url = self.get_queue_url(queue).await?;
        Ok(QueueHandle::new(queue.clone(), url))
    }

    #[instrument(skip(self, queue, options), fields(queue = %queue.name()))]
    async fn receive_messages(
        &self,
        queue: &QueueHandle,
        options: &ReceiveOptions,
    ) -> Result<Vec<ReceivedMessage>, QueueError> {
        let max_messages = options.max_messages.clamp(1, MAX_RECEIVE_BATCH);
        let wait_time_seconds = options.wait_time.as_secs().min(MAX_WAIT_TIME_SECONDS);
        let visibility_timeout = options
            .visibility_timeout
            .min(Duration::from_secs(MAX_VISIBILITY_TIMEOUT_SECONDS));

        let response: ReceiveMessageResponse = self
            .make_request(
                "ReceiveMessage",
                json!({
                    "QueueUrl": queue.url(),
                    "MaxNumberOfMessages": max_messages,
                    "VisibilityTimeout": visibility_timeout.as_secs(),
                    "WaitTimeSeconds": wait_time_seconds,
                    "AttributeNames": ["All"],
                    "MessageAttributeNames": ["All"],
                }),
            )
            .await?;

        let received_at = Timestamp::now();
        let messages: Vec<ReceivedMessage> = response
            .messages
            .into_iter()
            .map(|m| Self::convert_message(m, visibility_timeout, &received_at))
            .collect();

        debug!(count = messages.len(), "ReceiveMessage completed");
        Ok(messages)
    }

    #[instrument(skip(self, queue, receipt), fields(queue = %queue.name()))]
    async fn delete_message(
        &self,
        queue: &QueueHandle,
        receipt: &ReceiptHandle,
    ) -> Result<(), QueueError> {
        let _: Value = self
            .make_request(
                "DeleteMessage",
                json!({
                    "QueueUrl": queue.url(),
                    "ReceiptHandle": receipt.handle(),
                }),
            )
            .await?;
        Ok(())
    }

    #[instrument(skip(self, queue, message), fields(queue = %queue.name()))]
    async fn send_message(
        &self,
        queue: &QueueHandle,
        message: &Message,
    ) -> Result<MessageId, QueueError> {
        let body = message
            .body_text()
            .ok_or(QueueError::SerializationError(SerializationError::InvalidUtf8))?;

        let max_size = ProviderType::AwsSqs.max_message_size();
        if body.len() > max_size {
            return Err(AwsError::MessageTooLarge {
                size: body.len(),
                max_size,
            }
            .into());
        }

        let mut payload = json!({
            "QueueUrl": queue.url(),
            "MessageBody": body,
        });

        let message_attributes: serde_json::Map<String, Value> = message
            .attributes
            .iter()
            .filter(|(key, _)| key.as_str() != MESSAGE_GROUP_ATTRIBUTE)
            .map(|(key, value)| {
                (
                    key.clone(),
                    json!({ "DataType": "String", "StringValue": value }),
                )
            })
            .collect();
        if !message_attributes.is_empty() {
            payload["MessageAttributes"] = Value::Object(message_attributes);
        }

        if queue.name().is_fifo() {
            let group = message
                .attributes
                .get(MESSAGE_GROUP_ATTRIBUTE)
                .map(String::as_str)
                .unwrap_or(DEFAULT_MESSAGE_GROUP);
            payload["MessageGroupId"] = json!(group);
            payload["MessageDeduplicationId"] = json!(uuid::Uuid::new_v4().to_string());
        }

        let response: SendMessageResponse = self.make_request("SendMessage", payload).await?;
        Ok(MessageId::from_string(response.message_id))
    }

    #[instrument(skip(self, queue, receipt), fields(queue = %queue.name()))]
    async fn change_visibility(
        &self,
        queue: &QueueHandle,
        receipt: &ReceiptHandle,
        timeout: Duration,
    ) -> Result<(), QueueError> {
        let seconds = timeout.as_secs().min(MAX_VISIBILITY_TIMEOUT_SECONDS);
        let _: Value = self
            .make_request(
                "ChangeMessageVisibility",
                json!({
                    "QueueUrl": queue.url(),
                    "ReceiptHandle": receipt.handle(),
                    "VisibilityTimeout": seconds,
                }),
            )
            .await?;
        Ok(())
    }

    fn provider_type(&self) -> ProviderType {
        ProviderType::AwsSqs
    }
}
