//! # Queue Listener Runtime
//!
//! Provider-agnostic queue client used by the queue listener, with an AWS SQS
//! provider and an in-memory provider for tests and local development.
//!
//! ## Module Organization
//!
//! - [`error`] - Error types for all queue operations
//! - [`message`] - Queue names, messages and receipt handles
//! - [`provider`] - Provider types and configuration
//! - [`client`] - Client traits and implementations
//! - [`providers`] - Concrete provider backends

pub mod client;
pub mod error;
pub mod message;
pub mod provider;
pub mod providers;

pub use client::{QueueClient, QueueClientFactory, QueueProvider, StandardQueueClient};
pub use error::{ConfigurationError, QueueError, SerializationError, ValidationError};
pub use message::{
    Message, MessageId, QueueHandle, QueueName, ReceiptHandle, ReceiveOptions, ReceivedMessage,
    Timestamp,
};
pub use provider::{
    AwsSqsConfig, InMemoryConfig, ProviderConfig, ProviderType, SQS_ENDPOINT_ENV,
};
pub use providers::{AwsError, AwsSqsProvider, InMemoryProvider, MESSAGE_GROUP_ATTRIBUTE};

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
