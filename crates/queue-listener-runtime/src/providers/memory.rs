//! In-memory queue provider implementation for testing and development.
//!
//! Behaves like a standard SQS queue within one process:
//! - messages become available in the order they were sent
//! - a received message is hidden for its visibility timeout and reappears
//!   with a fresh receipt if it is not deleted in time
//! - every delivery increments the message's delivery count
//! - receives long-poll and are woken early by sends
//! - optionally, messages received too often are moved to a dead-letter store

use crate::client::QueueProvider;
use crate::error::QueueError;
use crate::message::{
    Message, MessageId, QueueHandle, QueueName, ReceiptHandle, ReceiveOptions, ReceivedMessage,
    Timestamp,
};
use crate::provider::{InMemoryConfig, ProviderType};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, RwLock, RwLockWriteGuard};
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{debug, warn};

#[cfg(test)]
#[path = "memory_tests.rs"]
mod tests;

/// How often a long poll re-checks for messages whose visibility expired.
const LONG_POLL_RECHECK: Duration = Duration::from_millis(50);

// ============================================================================
// Internal Storage Structures
// ============================================================================

/// Thread-safe storage for all queues
#[derive(Default)]
struct QueueStorage {
    queues: HashMap<QueueName, InMemoryQueue>,
    next_sequence: u64,
}

/// Internal queue state for a single queue
#[derive(Default)]
struct InMemoryQueue {
    /// Visible messages, ordered by sequence
    available: VecDeque<StoredMessage>,
    /// Received but not yet deleted, keyed by receipt
    in_flight: HashMap<String, InFlightMessage>,
    dead_letter: Vec<StoredMessage>,
}

impl InMemoryQueue {
    fn len(&self) -> usize {
        self.available.len() + self.in_flight.len()
    }

    /// Return messages whose visibility window has passed to the available set
    fn release_expired(&mut self, now: &Timestamp) {
        let expired: Vec<String> = self
            .in_flight
            .iter()
            .filter(|(_, m)| m.visible_at <= *now)
            .map(|(receipt, _)| receipt.clone())
            .collect();

        for receipt in expired {
            if let Some(in_flight) = self.in_flight.remove(&receipt) {
                self.make_available(in_flight.message);
            }
        }
    }

    fn make_available(&mut self, message: StoredMessage) {
        let position = self
            .available
            .iter()
            .position(|m| m.sequence > message.sequence)
            .unwrap_or(self.available.len());
        self.available.insert(position, message);
    }
}

#[derive(Clone)]
struct StoredMessage {
    sequence: u64,
    message_id: MessageId,
    body: Bytes,
    attributes: HashMap<String, String>,
    delivery_count: u32,
}

struct InFlightMessage {
    message: StoredMessage,
    visible_at: Timestamp,
}

// ============================================================================
// InMemoryProvider
// ============================================================================

/// In-memory queue provider
///
/// Cloning the provider shares its queues.
#[derive(Clone)]
pub struct InMemoryProvider {
    storage: Arc<RwLock<QueueStorage>>,
    config: InMemoryConfig,
    arrivals: Arc<Notify>,
}

impl Default for InMemoryProvider {
    fn default() -> Self {
        Self::new(InMemoryConfig::default())
    }
}

impl InMemoryProvider {
    /// Create new in-memory provider with configuration
    pub fn new(config: InMemoryConfig) -> Self {
        Self {
            storage: Arc::new(RwLock::new(QueueStorage::default())),
            config,
            arrivals: Arc::new(Notify::new()),
        }
    }

    /// Create a queue; creating an existing queue is a no-op
    pub fn create_queue(&self, queue: &QueueName) -> Result<(), QueueError> {
        let mut storage = self.write_storage()?;
        storage.queues.entry(queue.clone()).or_default();
        Ok(())
    }

    /// Number of messages in the queue, visible or in flight
    pub fn message_count(&self, queue: &QueueName) -> Result<usize, QueueError> {
        let storage = self.storage.read().map_err(|_| lock_poisoned())?;
        storage
            .queues
            .get(queue)
            .map(InMemoryQueue::len)
            .ok_or_else(|| queue_not_found(queue))
    }

    /// Messages moved to the queue's dead-letter store, oldest first
    pub fn dead_letter_messages(&self, queue: &QueueName) -> Result<Vec<Message>, QueueError> {
        let storage = self.storage.read().map_err(|_| lock_poisoned())?;
        let queue_state = storage
            .queues
            .get(queue)
            .ok_or_else(|| queue_not_found(queue))?;

        Ok(queue_state
            .dead_letter
            .iter()
            .map(|m| Message {
                body: m.body.clone(),
                attributes: m.attributes.clone(),
            })
            .collect())
    }

    fn write_storage(&self) -> Result<RwLockWriteGuard<'_, QueueStorage>, QueueError> {
        self.storage.write().map_err(|_| lock_poisoned())
    }

    /// Take up to `max` visible messages, marking them in flight
    fn take_batch(
        &self,
        queue: &QueueName,
        max: usize,
        visibility_timeout: Duration,
    ) -> Result<Vec<ReceivedMessage>, QueueError> {
        let mut storage = self.write_storage()?;
        let queue_state = storage
            .queues
            .get_mut(queue)
            .ok_or_else(|| queue_not_found(queue))?;

        let now = Timestamp::now();
        queue_state.release_expired(&now);

        let visible_at = now.after(visibility_timeout);
        let mut batch = Vec::new();

        while batch.len() < max {
            let Some(mut stored) = queue_state.available.pop_front() else {
                break;
            };
            stored.delivery_count += 1;

            if self.config.enable_dead_letter_queue
                && stored.delivery_count > self.config.max_delivery_count
            {
                warn!(
                    queue = %queue,
                    message_id = %stored.message_id,
                    delivery_count = stored.delivery_count,
                    "Moving message to dead-letter store"
                );
                queue_state.dead_letter.push(stored);
                continue;
            }

            let receipt = uuid::Uuid::new_v4().to_string();
            batch.push(ReceivedMessage {
                message_id: stored.message_id.clone(),
                body: stored.body.clone(),
                attributes: stored.attributes.clone(),
                receipt_handle: ReceiptHandle::new(
                    receipt.clone(),
                    visible_at.clone(),
                    ProviderType::InMemory,
                ),
                delivery_count: stored.delivery_count,
                received_at: now.clone(),
            });
            queue_state.in_flight.insert(
                receipt,
                InFlightMessage {
                    message: stored,
                    visible_at: visible_at.clone(),
                },
            );
        }

        Ok(batch)
    }
}

fn lock_poisoned() -> QueueError {
    QueueError::ProviderError {
        provider: ProviderType::InMemory.to_string(),
        code: "LockPoisoned".to_string(),
        message: "Queue storage lock was poisoned".to_string(),
    }
}

fn queue_not_found(queue: &QueueName) -> QueueError {
    QueueError::QueueNotFound {
        queue_name: queue.to_string(),
    }
}

fn memory_url(queue: &QueueName) -> String {
    format!("memory://{}", queue)
}

impl std::fmt::Debug for InMemoryProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryProvider")
            .field("config", &self.config)
            .finish()
    }
}

#[async_trait]
impl QueueProvider for InMemoryProvider {
    async fn resolve_queue(&self, queue: &QueueName) -> Result<QueueHandle, QueueError> {
        let mut storage = self.write_storage()?;
        if !storage.queues.contains_key(queue) {
            if !self.config.auto_create_queues {
                return Err(queue_not_found(queue));
            }
            storage.queues.insert(queue.clone(), InMemoryQueue::default());
        }

        Ok(QueueHandle::new(queue.clone(), memory_url(queue)))
    }

    async fn receive_messages(
        &self,
        queue: &QueueHandle,
        options: &ReceiveOptions,
    ) -> Result<Vec<ReceivedMessage>, QueueError> {
        let max = options
            .max_messages
            .clamp(1, ProviderType::InMemory.max_batch_size()) as usize;
        let deadline = tokio::time::Instant::now() + options.wait_time;

        loop {
            // Registered before checking so a send in between is not missed
            let arrival = self.arrivals.notified();

            let batch = self.take_batch(queue.name(), max, options.visibility_timeout)?;
            if !batch.is_empty() {
                debug!(queue = %queue.name(), count = batch.len(), "Received messages");
                return Ok(batch);
            }

            let now = tokio::time::Instant::now();
            if now >= deadline {
                return Ok(batch);
            }

            let _ = tokio::time::timeout((deadline - now).min(LONG_POLL_RECHECK), arrival).await;
        }
    }

    async fn delete_message(
        &self,
        queue: &QueueHandle,
        receipt: &ReceiptHandle,
    ) -> Result<(), QueueError> {
        let mut storage = self.write_storage()?;
        let queue_state = storage
            .queues
            .get_mut(queue.name())
            .ok_or_else(|| queue_not_found(queue.name()))?;

        match queue_state.in_flight.remove(receipt.handle()) {
            Some(_) => Ok(()),
            None => Err(QueueError::MessageNotFound {
                receipt: receipt.handle().to_string(),
            }),
        }
    }

    async fn send_message(
        &self,
        queue: &QueueHandle,
        message: &Message,
    ) -> Result<MessageId, QueueError> {
        if message.body.len() > self.config.max_message_size {
            return Err(QueueError::MessageTooLarge {
                size: message.body.len(),
                max_size: self.config.max_message_size,
            });
        }

        let message_id = MessageId::new();
        {
            let mut storage = self.write_storage()?;
            let sequence = storage.next_sequence;

            if !self.config.auto_create_queues && !storage.queues.contains_key(queue.name()) {
                return Err(queue_not_found(queue.name()));
            }
            let queue_state = storage.queues.entry(queue.name().clone()).or_default();

            if queue_state.len() >= self.config.max_queue_size {
                return Err(QueueError::ProviderError {
                    provider: ProviderType::InMemory.to_string(),
                    code: "QueueFull".to_string(),
                    message: format!(
                        "Queue {} holds the maximum of {} messages",
                        queue.name(),
                        self.config.max_queue_size
                    ),
                });
            }

            queue_state.available.push_back(StoredMessage {
                sequence,
                message_id: message_id.clone(),
                body: message.body.clone(),
                attributes: message.attributes.clone(),
                delivery_count: 0,
            });
            storage.next_sequence += 1;
        }

        self.arrivals.notify_waiters();
        Ok(message_id)
    }

    async fn change_visibility(
        &self,
        queue: &QueueHandle,
        receipt: &ReceiptHandle,
        timeout: Duration,
    ) -> Result<(), QueueError> {
        {
            let mut storage = self.write_storage()?;
            let queue_state = storage
                .queues
                .get_mut(queue.name())
                .ok_or_else(|| queue_not_found(queue.name()))?;

            let not_found = || QueueError::MessageNotFound {
                receipt: receipt.handle().to_string(),
            };

            if timeout.is_zero() {
                let in_flight = queue_state
                    .in_flight
                    .remove(receipt.handle())
                    .ok_or_else(not_found)?;
                queue_state.make_available(in_flight.message);
            } else {
                let in_flight = queue_state
                    .in_flight
                    .get_mut(receipt.handle())
                    .ok_or_else(not_found)?;
                in_flight.visible_at = Timestamp::now().after(timeout);
                return Ok(());
            }
        }

        self.arrivals.notify_waiters();
        Ok(())
    }

    fn provider_type(&self) -> ProviderType {
        ProviderType::InMemory
    }
}
