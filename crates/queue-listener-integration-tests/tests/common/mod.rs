//! Common test utilities for queue-listener integration tests
//!
//! This module provides:
//! - A listener wired to an in-memory provider the test can inspect
//! - Helpers for seeding raw message bodies and counting what is left
//! - A recorder for the values handlers and callbacks observe

#![allow(dead_code)]

use queue_listener_core::{ListenerConfig, QueueListener};
use queue_listener_runtime::{
    InMemoryProvider, Message, QueueClient, QueueName, QueueProvider, StandardQueueClient,
};
use serde_json::Value;
use std::sync::{Arc, Mutex};

// ============================================================================
// In-memory harness
// ============================================================================

/// A listener whose queues live in a provider the test can reach directly
pub struct Harness {
    pub provider: InMemoryProvider,
    pub listener: QueueListener,
}

impl Harness {
    /// Listener with no long poll and a zero visibility timeout, so anything
    /// left undeleted is visible again on the very next cycle
    pub fn new() -> Self {
        let mut config = ListenerConfig::default();
        config.receive.wait_time_seconds = 0;
        config.receive.visibility_timeout_seconds = 0;
        Self::with_config(config)
    }

    pub fn with_config(config: ListenerConfig) -> Self {
        let provider = InMemoryProvider::default();
        let client: Arc<dyn QueueClient> =
            Arc::new(StandardQueueClient::new(Arc::new(provider.clone())));

        Self {
            listener: QueueListener::new(client, config),
            provider,
        }
    }

    /// Enqueue a raw body, bypassing JSON encoding
    pub async fn send_raw(&self, queue: &str, body: &str) {
        let handle = self
            .provider
            .resolve_queue(&queue_name(queue))
            .await
            .unwrap();
        self.provider
            .send_message(&handle, &Message::new(body.to_string().into()))
            .await
            .unwrap();
    }

    /// Messages still on the queue, visible or in flight
    pub fn remaining(&self, queue: &str) -> usize {
        self.provider.message_count(&queue_name(queue)).unwrap_or(0)
    }
}

pub fn queue_name(queue: &str) -> QueueName {
    QueueName::new(queue.to_string()).unwrap()
}

// ============================================================================
// Recorder
// ============================================================================

/// Collects values seen by handlers and callbacks
#[derive(Clone, Default)]
pub struct Recorder {
    seen: Arc<Mutex<Vec<Value>>>,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, value: Value) {
        self.seen.lock().unwrap().push(value);
    }

    pub fn values(&self) -> Vec<Value> {
        self.seen.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.seen.lock().unwrap().len()
    }
}
