//! Client traits and implementations for queue operations.

use crate::error::QueueError;
use crate::message::{
    Message, MessageId, QueueHandle, QueueName, ReceiptHandle, ReceiveOptions, ReceivedMessage,
};
use crate::provider::{ProviderConfig, ProviderType};
use crate::providers::{AwsSqsProvider, InMemoryProvider};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};

#[cfg(test)]
#[path = "client_tests.rs"]
mod tests;

/// Caller-facing interface for queue operations across all providers
///
/// Unlike [`QueueProvider`], implementations apply the listener's error policy:
/// receive failures degrade to an empty batch and receipt races on delete are
/// swallowed.
#[async_trait]
pub trait QueueClient: Send + Sync {
    /// Resolve a logical queue name to a provider handle
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::QueueNotFound`] if the queue does not exist and
    /// [`QueueError::ConnectionFailed`] if the provider endpoint is unreachable.
    async fn resolve_queue(&self, queue: &QueueName) -> Result<QueueHandle, QueueError>;

    /// Long-poll a batch of messages
    ///
    /// Provider errors are logged and reported as an empty batch.
    async fn fetch_messages(
        &self,
        queue: &QueueHandle,
        options: &ReceiveOptions,
    ) -> Vec<ReceivedMessage>;

    /// Delete a processed message
    ///
    /// Deleting a stale or already-deleted receipt succeeds.
    async fn delete_message(
        &self,
        queue: &QueueHandle,
        receipt: &ReceiptHandle,
    ) -> Result<(), QueueError>;

    /// Enqueue a message
    async fn send_message(
        &self,
        queue: &QueueHandle,
        message: Message,
    ) -> Result<MessageId, QueueError>;

    /// Change how long an in-flight message stays hidden
    async fn change_visibility(
        &self,
        queue: &QueueHandle,
        receipt: &ReceiptHandle,
        timeout: Duration,
    ) -> Result<(), QueueError>;

    /// Get provider type
    fn provider_type(&self) -> ProviderType;
}

/// Interface implemented by specific queue providers (SQS, in-memory)
///
/// Providers report every failure; policy is applied by [`QueueClient`].
#[async_trait]
pub trait QueueProvider: Send + Sync {
    /// Resolve queue name to handle
    async fn resolve_queue(&self, queue: &QueueName) -> Result<QueueHandle, QueueError>;

    /// Receive up to `options.max_messages` messages
    async fn receive_messages(
        &self,
        queue: &QueueHandle,
        options: &ReceiveOptions,
    ) -> Result<Vec<ReceivedMessage>, QueueError>;

    /// Delete message by receipt
    async fn delete_message(
        &self,
        queue: &QueueHandle,
        receipt: &ReceiptHandle,
    ) -> Result<(), QueueError>;

    /// Send single message
    async fn send_message(
        &self,
        queue: &QueueHandle,
        message: &Message,
    ) -> Result<MessageId, QueueError>;

    /// Change visibility timeout of an in-flight message
    async fn change_visibility(
        &self,
        queue: &QueueHandle,
        receipt: &ReceiptHandle,
        timeout: Duration,
    ) -> Result<(), QueueError>;

    /// Get provider type
    fn provider_type(&self) -> ProviderType;
}

/// Factory for creating queue clients with appropriate providers
pub struct QueueClientFactory;

impl QueueClientFactory {
    /// Create queue client from configuration
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::ConfigurationError`] if the configuration is invalid
    /// or the provider cannot be initialised.
    pub fn create_client(config: &ProviderConfig) -> Result<Arc<dyn QueueClient>, QueueError> {
        config.validate()?;

        let provider: Arc<dyn QueueProvider> = match config {
            ProviderConfig::InMemory(in_memory_config) => {
                Arc::new(InMemoryProvider::new(in_memory_config.clone()))
            }
            ProviderConfig::AwsSqs(aws_config) => Arc::new(AwsSqsProvider::new(aws_config.clone())?),
        };

        Ok(Arc::new(StandardQueueClient::new(provider)))
    }

    /// Create test client with in-memory provider
    pub fn create_test_client() -> Arc<dyn QueueClient> {
        Arc::new(StandardQueueClient::new(Arc::new(
            InMemoryProvider::default(),
        )))
    }
}

/// Standard queue client implementation
pub struct StandardQueueClient {
    provider: Arc<dyn QueueProvider>,
}

impl StandardQueueClient {
    /// Create new standard queue client with provider
    pub fn new(provider: Arc<dyn QueueProvider>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl QueueClient for StandardQueueClient {
    async fn resolve_queue(&self, queue: &QueueName) -> Result<QueueHandle, QueueError> {
        self.provider.resolve_queue(queue).await
    }

    async fn fetch_messages(
        &self,
        queue: &QueueHandle,
        options: &ReceiveOptions,
    ) -> Vec<ReceivedMessage> {
        match self.provider.receive_messages(queue, options).await {
            Ok(messages) => {
                debug!(queue = %queue.name(), count = messages.len(), "Fetched messages");
                messages
            }
            Err(e) if e.is_transient() => {
                warn!(
                    queue = %queue.name(),
                    error = %e,
                    "Receive failed with transient error; treating as empty batch"
                );
                Vec::new()
            }
            Err(e) => {
                error!(
                    queue = %queue.name(),
                    error = %e,
                    "Receive failed; treating as empty batch"
                );
                Vec::new()
            }
        }
    }

    async fn delete_message(
        &self,
        queue: &QueueHandle,
        receipt: &ReceiptHandle,
    ) -> Result<(), QueueError> {
        match self.provider.delete_message(queue, receipt).await {
            Err(e) if e.is_receipt_race() => {
                warn!(
                    queue = %queue.name(),
                    error = %e,
                    "Receipt already deleted or expired; ignoring"
                );
                Ok(())
            }
            other => other,
        }
    }

    async fn send_message(
        &self,
        queue: &QueueHandle,
        message: Message,
    ) -> Result<MessageId, QueueError> {
        self.provider.send_message(queue, &message).await
    }

    async fn change_visibility(
        &self,
        queue: &QueueHandle,
        receipt: &ReceiptHandle,
        timeout: Duration,
    ) -> Result<(), QueueError> {
        self.provider
            .change_visibility(queue, receipt, timeout)
            .await
    }

    fn provider_type(&self) -> ProviderType {
        self.provider.provider_type()
    }
}
