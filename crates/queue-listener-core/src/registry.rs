//! # Handler Registry
//!
//! Maps queue names to the handler and callbacks that process their messages.
//!
//! The registry is an ordinary value: build it during start-up, then hand it to
//! the [`crate::scheduler::PollScheduler`] as an `Arc<Registry>`, after which it
//! can no longer be changed. All handlers in one registry share a single
//! concurrency kind; mixing synchronous and asynchronous handlers is rejected
//! when the second kind is registered.

use crate::codec::{self, DecodeError, Validator};
use crate::dispatch::{panic_message, HandlerError};
use bytes::Bytes;
use futures::future::BoxFuture;
use futures::FutureExt;
use queue_listener_runtime::{MessageId, QueueName};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, error};

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;

/// Synchronous handler: returns `Ok(true)` once the message is fully processed
pub type SyncHandlerFn = dyn Fn(Value) -> Result<bool, HandlerError> + Send + Sync;

/// Asynchronous handler: resolves to `Ok(true)` once the message is fully
/// processed
pub type AsyncHandlerFn =
    dyn Fn(Value) -> BoxFuture<'static, Result<bool, HandlerError>> + Send + Sync;

/// Callback receiving the decoded body of a message
pub type BodyCallback = Arc<dyn Fn(&Value) + Send + Sync>;

/// Callback receiving a message that failed decoding or validation
pub type InvalidCallback = Arc<dyn Fn(&InvalidMessage) + Send + Sync>;

// ============================================================================
// Handler Kinds
// ============================================================================

/// Scheduling model shared by every handler in a registry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConcurrencyKind {
    Sync,
    Async,
}

impl fmt::Display for ConcurrencyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sync => write!(f, "synchronous"),
            Self::Async => write!(f, "asynchronous"),
        }
    }
}

/// A registered handler, tagged with its calling convention
#[derive(Clone)]
pub enum HandlerKind {
    Sync(Arc<SyncHandlerFn>),
    Async(Arc<AsyncHandlerFn>),
}

impl HandlerKind {
    /// Wrap a synchronous handler
    pub fn sync<F>(handler: F) -> Self
    where
        F: Fn(Value) -> Result<bool, HandlerError> + Send + Sync + 'static,
    {
        Self::Sync(Arc::new(handler))
    }

    /// Wrap an asynchronous handler
    pub fn from_async<F, Fut>(handler: F) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<bool, HandlerError>> + Send + 'static,
    {
        Self::Async(Arc::new(move |body: Value| handler(body).boxed()))
    }

    /// Get the scheduling model of this handler
    pub fn concurrency(&self) -> ConcurrencyKind {
        match self {
            Self::Sync(_) => ConcurrencyKind::Sync,
            Self::Async(_) => ConcurrencyKind::Async,
        }
    }
}

impl fmt::Debug for HandlerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HandlerKind::{:?}", self.concurrency())
    }
}

// ============================================================================
// Invalid Messages
// ============================================================================

/// What to do with a message that fails decoding or validation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum InvalidMessagePolicy {
    /// Leave the message on the queue for manual inspection
    #[default]
    Retain,
    /// Delete the message after `on_invalid` has run
    Delete,
}

/// Why a message was classified invalid
#[derive(Debug)]
pub enum InvalidReason {
    /// The body was not UTF-8 JSON
    Decode(DecodeError),
    /// The validator returned `None` for the decoded body
    Rejected(Value),
    /// The validator panicked on the decoded body
    ValidatorPanicked(String),
}

/// A message that never reached its handler
#[derive(Debug)]
pub struct InvalidMessage {
    pub message_id: MessageId,
    pub body: Bytes,
    pub reason: InvalidReason,
}

// ============================================================================
// Registration
// ============================================================================

/// Optional validator, callbacks and invalid-message policy for a handler
#[derive(Clone, Default)]
pub struct Registration {
    validator: Option<Validator>,
    on_invalid: Option<InvalidCallback>,
    on_success: Option<BodyCallback>,
    on_fail: Option<BodyCallback>,
    invalid_policy: InvalidMessagePolicy,
}

impl Registration {
    /// Create an empty registration: no validator, no callbacks, invalid
    /// messages retained
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate and optionally transform decoded bodies before dispatch
    pub fn with_validator<F>(mut self, validator: F) -> Self
    where
        F: Fn(&Value) -> Option<Value> + Send + Sync + 'static,
    {
        self.validator = Some(Arc::new(validator));
        self
    }

    /// Called for every message that fails decoding or validation
    pub fn on_invalid<F>(mut self, callback: F) -> Self
    where
        F: Fn(&InvalidMessage) + Send + Sync + 'static,
    {
        self.on_invalid = Some(Arc::new(callback));
        self
    }

    /// Called with the decoded body after a successful message is deleted
    pub fn on_success<F>(mut self, callback: F) -> Self
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.on_success = Some(Arc::new(callback));
        self
    }

    /// Called with the decoded body when the handler fails or errors
    pub fn on_fail<F>(mut self, callback: F) -> Self
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.on_fail = Some(Arc::new(callback));
        self
    }

    /// Choose whether invalid messages are retained or deleted
    pub fn with_invalid_policy(mut self, policy: InvalidMessagePolicy) -> Self {
        self.invalid_policy = policy;
        self
    }
}

/// Handler and callbacks registered for one queue
#[derive(Clone)]
pub struct HandlerEntry {
    queue_name: QueueName,
    handler: HandlerKind,
    registration: Registration,
}

impl HandlerEntry {
    /// Queue this entry polls
    pub fn queue_name(&self) -> &QueueName {
        &self.queue_name
    }

    /// The registered handler
    pub fn handler(&self) -> &HandlerKind {
        &self.handler
    }

    /// Policy for messages that fail decoding or validation
    pub fn invalid_policy(&self) -> InvalidMessagePolicy {
        self.registration.invalid_policy
    }

    /// Run the validator, or pass the body through when none is registered
    ///
    /// A panicking validator rejects the message instead of unwinding into
    /// the dispatch cycle.
    pub fn validate(&self, decoded: &Value) -> Result<Value, InvalidReason> {
        let validator = self.registration.validator.as_ref();
        match catch_unwind(AssertUnwindSafe(|| codec::validate(validator, decoded))) {
            Ok(Some(payload)) => Ok(payload),
            Ok(None) => Err(InvalidReason::Rejected(decoded.clone())),
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                error!(queue = %self.queue_name, panic = %message, "Validator panicked");
                Err(InvalidReason::ValidatorPanicked(message))
            }
        }
    }

    pub(crate) fn notify_invalid(&self, message: &InvalidMessage) {
        if let Some(callback) = &self.registration.on_invalid {
            self.guard_callback("on_invalid", || callback(message));
        }
    }

    pub(crate) fn notify_success(&self, decoded: &Value) {
        if let Some(callback) = &self.registration.on_success {
            self.guard_callback("on_success", || callback(decoded));
        }
    }

    pub(crate) fn notify_fail(&self, decoded: &Value) {
        if let Some(callback) = &self.registration.on_fail {
            self.guard_callback("on_fail", || callback(decoded));
        }
    }

    /// A panicking callback is logged and does not abort the batch
    fn guard_callback(&self, name: &str, callback: impl FnOnce()) {
        if catch_unwind(AssertUnwindSafe(callback)).is_err() {
            error!(queue = %self.queue_name, callback = name, "Callback panicked");
        }
    }
}

impl fmt::Debug for HandlerEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerEntry")
            .field("queue_name", &self.queue_name)
            .field("handler", &self.handler)
            .field("has_validator", &self.registration.validator.is_some())
            .field("invalid_policy", &self.registration.invalid_policy)
            .finish()
    }
}

// ============================================================================
// Registry
// ============================================================================

/// Errors raised while registering handlers
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error(
        "Cannot register {requested} handler for queue {queue}: registry already holds {registered} handlers"
    )]
    NotSupported {
        queue: QueueName,
        registered: ConcurrencyKind,
        requested: ConcurrencyKind,
    },
}

/// Mapping from queue name to handler entry, in registration order
#[derive(Debug, Default, Clone)]
pub struct Registry {
    entries: Vec<HandlerEntry>,
    index: HashMap<QueueName, usize>,
}

impl Registry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `queue` and return it unchanged
    ///
    /// Registering a queue again replaces its entry in place.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::NotSupported`] if the handler's concurrency
    /// kind differs from the handlers already registered.
    pub fn register(
        &mut self,
        queue: QueueName,
        handler: HandlerKind,
        registration: Registration,
    ) -> Result<HandlerKind, RegistryError> {
        let requested = handler.concurrency();
        if let Some(registered) = self.kind() {
            if registered != requested {
                return Err(RegistryError::NotSupported {
                    queue,
                    registered,
                    requested,
                });
            }
        }

        let entry = HandlerEntry {
            queue_name: queue.clone(),
            handler: handler.clone(),
            registration,
        };

        match self.index.get(&queue) {
            Some(&position) => {
                debug!(queue = %queue, "Replacing registered handler");
                self.entries[position] = entry;
            }
            None => {
                debug!(queue = %queue, kind = %requested, "Registered handler");
                self.index.insert(queue, self.entries.len());
                self.entries.push(entry);
            }
        }

        Ok(handler)
    }

    /// Register a synchronous handler, returning it for direct use
    pub fn register_sync<F>(
        &mut self,
        queue: QueueName,
        registration: Registration,
        handler: F,
    ) -> Result<Arc<F>, RegistryError>
    where
        F: Fn(Value) -> Result<bool, HandlerError> + Send + Sync + 'static,
    {
        let handler = Arc::new(handler);
        let erased: Arc<SyncHandlerFn> = handler.clone();
        self.register(queue, HandlerKind::Sync(erased), registration)?;
        Ok(handler)
    }

    /// Register an asynchronous handler, returning it for direct use
    pub fn register_async<F, Fut>(
        &mut self,
        queue: QueueName,
        registration: Registration,
        handler: F,
    ) -> Result<Arc<F>, RegistryError>
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<bool, HandlerError>> + Send + 'static,
    {
        let handler = Arc::new(handler);
        let shared = handler.clone();
        let erased: Arc<AsyncHandlerFn> = Arc::new(move |body: Value| shared(body).boxed());
        self.register(queue, HandlerKind::Async(erased), registration)?;
        Ok(handler)
    }

    /// Get the entry registered for `queue`
    pub fn get(&self, queue: &QueueName) -> Option<&HandlerEntry> {
        self.index.get(queue).map(|&position| &self.entries[position])
    }

    /// All entries in registration order
    pub fn all_entries(&self) -> &[HandlerEntry] {
        &self.entries
    }

    /// Concurrency kind shared by the registered handlers, if any
    pub fn kind(&self) -> Option<ConcurrencyKind> {
        self.entries.first().map(|e| e.handler.concurrency())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
