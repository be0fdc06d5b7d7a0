//! # Queue Listener
//!
//! Application-facing entry point: register handlers, post payloads, then
//! hand the listener to the poll scheduler.
//!
//! ```rust,no_run
//! use futures::FutureExt;
//! use queue_listener_core::{ListenerConfig, QueueListener, Registration};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut listener = QueueListener::from_config(ListenerConfig::default())?;
//!
//! listener.register_sync("orders", Registration::new(), |order| {
//!     println!("processing {order}");
//!     Ok(true)
//! })?;
//!
//! listener.post("orders", &serde_json::json!({"amt": 5})).await?;
//! listener.run_until(tokio::signal::ctrl_c().map(|_| ())).await;
//! # Ok(())
//! # }
//! ```

use crate::codec::{self, EncodeError};
use crate::config::ListenerConfig;
use crate::dispatch::{Dispatcher, HandlerError};
use crate::registry::{HandlerKind, Registration, Registry, RegistryError};
use crate::scheduler::PollScheduler;
use queue_listener_runtime::{
    ConfigurationError, Message, MessageId, QueueClient, QueueClientFactory, QueueError,
    QueueName, ValidationError,
};
use serde::Serialize;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

#[cfg(test)]
#[path = "listener_tests.rs"]
mod tests;

/// Errors raised by the listener facade
#[derive(Debug, thiserror::Error)]
pub enum ListenerError {
    #[error("Invalid queue name: {0}")]
    InvalidQueueName(#[from] ValidationError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("Failed to encode payload: {0}")]
    Encode(#[from] EncodeError),

    #[error("Queue operation failed: {0}")]
    Queue(#[from] QueueError),

    #[error("Invalid listener configuration: {0}")]
    Configuration(#[from] ConfigurationError),
}

/// Handlers, queue client and configuration for one listening process
pub struct QueueListener {
    client: Arc<dyn QueueClient>,
    registry: Registry,
    config: ListenerConfig,
}

impl QueueListener {
    /// Create a listener over an existing client
    ///
    /// `config.provider` is ignored; the client is used as given.
    pub fn new(client: Arc<dyn QueueClient>, config: ListenerConfig) -> Self {
        Self {
            client,
            registry: Registry::new(),
            config,
        }
    }

    /// Validate `config` and build its queue client
    pub fn from_config(config: ListenerConfig) -> Result<Self, ListenerError> {
        config.validate()?;
        let client = QueueClientFactory::create_client(&config.provider)?;
        info!(provider = ?config.provider.provider_type(), "Queue listener created");
        Ok(Self::new(client, config))
    }

    /// Register a pre-built handler for `queue`
    pub fn register(
        &mut self,
        queue: &str,
        handler: HandlerKind,
        registration: Registration,
    ) -> Result<HandlerKind, ListenerError> {
        let queue = QueueName::new(queue.to_string())?;
        Ok(self.registry.register(queue, handler, registration)?)
    }

    /// Register a synchronous handler, returning it for direct use
    pub fn register_sync<F>(
        &mut self,
        queue: &str,
        registration: Registration,
        handler: F,
    ) -> Result<Arc<F>, ListenerError>
    where
        F: Fn(Value) -> Result<bool, HandlerError> + Send + Sync + 'static,
    {
        let queue = QueueName::new(queue.to_string())?;
        Ok(self.registry.register_sync(queue, registration, handler)?)
    }

    /// Register an asynchronous handler, returning it for direct use
    pub fn register_async<F, Fut>(
        &mut self,
        queue: &str,
        registration: Registration,
        handler: F,
    ) -> Result<Arc<F>, ListenerError>
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<bool, HandlerError>> + Send + 'static,
    {
        let queue = QueueName::new(queue.to_string())?;
        Ok(self.registry.register_async(queue, registration, handler)?)
    }

    /// Encode `payload` as JSON and enqueue it on `queue`
    ///
    /// # Errors
    ///
    /// Returns [`ListenerError::Encode`] if the payload cannot be serialized
    /// and [`ListenerError::Queue`] if resolving the queue or sending fails.
    pub async fn post<T>(&self, queue: &str, payload: &T) -> Result<MessageId, ListenerError>
    where
        T: Serialize + ?Sized,
    {
        let queue = QueueName::new(queue.to_string())?;
        let body = codec::encode(payload)?;
        let handle = self.client.resolve_queue(&queue).await?;
        let message_id = self.client.send_message(&handle, Message::new(body)).await?;

        debug!(queue = %queue, message_id = %message_id, "Posted message");
        Ok(message_id)
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn client(&self) -> &Arc<dyn QueueClient> {
        &self.client
    }

    pub fn config(&self) -> &ListenerConfig {
        &self.config
    }

    /// Scheduler over a snapshot of the current registrations, using the
    /// configured poll interval
    pub fn scheduler(&self) -> PollScheduler {
        self.scheduler_with_interval(self.config.poll_interval())
    }

    /// Poll all registered queues forever, sleeping `poll_interval` between
    /// cycles
    pub async fn run_scheduler(self, poll_interval: Duration) {
        self.scheduler_with_interval(poll_interval).run().await
    }

    /// Poll all registered queues until `shutdown` completes
    pub async fn run_until<F>(self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        self.scheduler().run_until(shutdown).await
    }

    fn scheduler_with_interval(&self, poll_interval: Duration) -> PollScheduler {
        let dispatcher = Dispatcher::new(self.client.clone(), self.config.to_receive_options())
            .with_handler_error_propagation(self.config.propagate_handler_errors);

        PollScheduler::new(
            Arc::new(dispatcher),
            Arc::new(self.registry.clone()),
            poll_interval,
        )
    }
}

impl std::fmt::Debug for QueueListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueListener")
            .field("provider", &self.client.provider_type())
            .field("registry", &self.registry)
            .field("config", &self.config)
            .finish()
    }
}
