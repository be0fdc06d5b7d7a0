//! # Dispatch Loop
//!
//! Fetches one batch from one queue, resolves every message to a
//! [`DispatchResult`] and applies the deletion policy:
//!
//! - `Success`: delete, then `on_success`
//! - `Fail` / `Error`: retain for redelivery, then `on_fail`
//! - `Invalid`: `on_invalid`; retained unless the entry's policy deletes it
//!
//! Asynchronous handlers fan out across the whole batch and every outcome is
//! captured independently. Synchronous handlers run one message at a time, in
//! provider order, on the blocking thread pool.

use crate::codec;
use crate::registry::{
    AsyncHandlerFn, HandlerEntry, HandlerKind, InvalidMessage, InvalidMessagePolicy,
    InvalidReason, SyncHandlerFn,
};
use futures::future::join_all;
use futures::FutureExt;
use queue_listener_runtime::{
    MessageId, QueueClient, QueueHandle, QueueName, ReceiveOptions, ReceivedMessage,
};
use serde_json::Value;
use std::any::Any;
use std::error::Error as StdError;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

#[cfg(test)]
#[path = "dispatch_tests.rs"]
mod tests;

// ============================================================================
// Outcomes
// ============================================================================

/// Error raised by a handler while processing one message
#[derive(Debug, Clone, thiserror::Error)]
pub enum HandlerError {
    #[error("Handler failed: {0}")]
    Failed(#[source] Arc<dyn StdError + Send + Sync>),

    #[error("Handler panicked: {0}")]
    Panicked(String),
}

impl HandlerError {
    /// Wrap any error returned by handler code
    pub fn failed<E>(error: E) -> Self
    where
        E: Into<Box<dyn StdError + Send + Sync>>,
    {
        Self::Failed(Arc::from(error.into()))
    }

    fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        Self::Panicked(panic_message(payload.as_ref()))
    }
}

/// Text of a panic payload, when it carries any
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string())
}

/// Terminal outcome of one message within a cycle
#[derive(Debug, Clone)]
pub enum DispatchResult {
    /// Handler returned `Ok(true)`; the message was deleted
    Success,
    /// Handler returned `Ok(false)`; the message was retained
    Fail,
    /// Decoding or validation failed; the handler was not called
    Invalid,
    /// Handler returned an error or panicked; the message was retained
    Error(HandlerError),
}

impl DispatchResult {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}

/// Outcome recorded for one message
#[derive(Debug, Clone)]
pub struct MessageOutcome {
    pub message_id: MessageId,
    pub result: DispatchResult,
}

/// Summary of one dispatch of one queue
#[derive(Debug, Clone)]
pub struct CycleReport {
    pub queue: QueueName,
    pub outcomes: Vec<MessageOutcome>,
    /// Messages deleted from the queue this cycle
    pub deleted: usize,
    /// Deletes that were attempted and failed
    pub delete_failures: usize,
}

impl CycleReport {
    /// Create an empty report for `queue`
    pub fn empty(queue: QueueName) -> Self {
        Self {
            queue,
            outcomes: Vec::new(),
            deleted: 0,
            delete_failures: 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    pub fn successes(&self) -> usize {
        self.count(|r| matches!(r, DispatchResult::Success))
    }

    pub fn failures(&self) -> usize {
        self.count(|r| matches!(r, DispatchResult::Fail))
    }

    pub fn invalid(&self) -> usize {
        self.count(|r| matches!(r, DispatchResult::Invalid))
    }

    pub fn errors(&self) -> usize {
        self.count(|r| matches!(r, DispatchResult::Error(_)))
    }

    /// Outcome recorded for a message, if it was part of this cycle
    pub fn outcome(&self, message_id: &MessageId) -> Option<&DispatchResult> {
        self.outcomes
            .iter()
            .find(|o| &o.message_id == message_id)
            .map(|o| &o.result)
    }

    fn count(&self, predicate: impl Fn(&DispatchResult) -> bool) -> usize {
        self.outcomes.iter().filter(|o| predicate(&o.result)).count()
    }

    fn record(&mut self, message_id: MessageId, result: DispatchResult) {
        self.outcomes.push(MessageOutcome { message_id, result });
    }
}

/// Errors surfaced by a dispatch
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// A synchronous handler failed and handler errors are propagated
    ///
    /// Raised only after the whole batch has been resolved; `report` holds
    /// every outcome, and `source` is the first handler error.
    #[error("Handler error on queue {queue}: {source}")]
    Handler {
        queue: QueueName,
        source: HandlerError,
        report: CycleReport,
    },
}

impl DispatchError {
    /// The report of the batch that produced this error
    pub fn report(&self) -> &CycleReport {
        match self {
            Self::Handler { report, .. } => report,
        }
    }

    pub fn into_report(self) -> CycleReport {
        match self {
            Self::Handler { report, .. } => report,
        }
    }
}

// ============================================================================
// Dispatcher
// ============================================================================

/// A decoded and validated message awaiting its handler
struct Pending {
    message: ReceivedMessage,
    decoded: Value,
    payload: Value,
}

/// Runs the fetch / decode / dispatch / acknowledge cycle for one queue
pub struct Dispatcher {
    client: Arc<dyn QueueClient>,
    receive_options: ReceiveOptions,
    propagate_handler_errors: bool,
}

impl Dispatcher {
    /// Create a dispatcher that propagates synchronous handler errors
    pub fn new(client: Arc<dyn QueueClient>, receive_options: ReceiveOptions) -> Self {
        Self {
            client,
            receive_options,
            propagate_handler_errors: true,
        }
    }

    /// Choose whether synchronous handler errors are returned as
    /// [`DispatchError::Handler`] or only recorded in the report
    pub fn with_handler_error_propagation(mut self, propagate: bool) -> Self {
        self.propagate_handler_errors = propagate;
        self
    }

    pub fn receive_options(&self) -> &ReceiveOptions {
        &self.receive_options
    }

    /// Fetch and process one batch for the entry's queue
    ///
    /// Resolution and receive failures are logged and produce an empty
    /// report.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::Handler`] when a synchronous handler failed
    /// and error propagation is enabled.
    pub async fn dispatch_queue(&self, entry: &HandlerEntry) -> Result<CycleReport, DispatchError> {
        let queue = entry.queue_name();
        let mut report = CycleReport::empty(queue.clone());

        let handle = match self.client.resolve_queue(queue).await {
            Ok(handle) => handle,
            Err(e) => {
                warn!(queue = %queue, error = %e, "Could not resolve queue; skipping this cycle");
                return Ok(report);
            }
        };

        let messages = self
            .client
            .fetch_messages(&handle, &self.receive_options)
            .await;
        if messages.is_empty() {
            debug!(queue = %queue, "No messages");
            return Ok(report);
        }

        let pending = self
            .classify(entry, &handle, messages, &mut report)
            .await;

        let resolved = match entry.handler() {
            HandlerKind::Async(handler) => run_async(handler, pending).await,
            HandlerKind::Sync(handler) => run_sync(handler, pending).await,
        };

        let mut first_error = None;
        for (pending, outcome) in resolved {
            let message_id = pending.message.message_id.clone();
            match outcome {
                Ok(true) => {
                    self.acknowledge(&handle, &pending.message, &mut report)
                        .await;
                    entry.notify_success(&pending.decoded);
                    report.record(message_id, DispatchResult::Success);
                }
                Ok(false) => {
                    debug!(queue = %queue, message_id = %message_id, "Handler declined message");
                    entry.notify_fail(&pending.decoded);
                    report.record(message_id, DispatchResult::Fail);
                }
                Err(e) => {
                    error!(
                        queue = %queue,
                        message_id = %message_id,
                        error = %e,
                        "Handler error; message retained for redelivery"
                    );
                    entry.notify_fail(&pending.decoded);
                    if first_error.is_none() {
                        first_error = Some(e.clone());
                    }
                    report.record(message_id, DispatchResult::Error(e));
                }
            }
        }

        info!(
            queue = %queue,
            succeeded = report.successes(),
            failed = report.failures(),
            invalid = report.invalid(),
            errors = report.errors(),
            deleted = report.deleted,
            "Dispatch cycle complete"
        );

        let propagate =
            self.propagate_handler_errors && matches!(entry.handler(), HandlerKind::Sync(_));
        match first_error {
            Some(source) if propagate => Err(DispatchError::Handler {
                queue: queue.clone(),
                source,
                report,
            }),
            _ => Ok(report),
        }
    }

    /// Decode and validate a batch, settling invalid messages on the way
    async fn classify(
        &self,
        entry: &HandlerEntry,
        handle: &QueueHandle,
        messages: Vec<ReceivedMessage>,
        report: &mut CycleReport,
    ) -> Vec<Pending> {
        let mut pending = Vec::with_capacity(messages.len());

        for message in messages {
            let reason = match codec::decode(&message.body) {
                Ok(decoded) => match entry.validate(&decoded) {
                    Ok(payload) => {
                        pending.push(Pending {
                            message,
                            decoded,
                            payload,
                        });
                        continue;
                    }
                    Err(reason) => reason,
                },
                Err(e) => InvalidReason::Decode(e),
            };

            warn!(
                queue = %handle.name(),
                message_id = %message.message_id,
                reason = ?reason,
                "Invalid message"
            );

            let invalid = InvalidMessage {
                message_id: message.message_id.clone(),
                body: message.body.clone(),
                reason,
            };
            entry.notify_invalid(&invalid);

            if entry.invalid_policy() == InvalidMessagePolicy::Delete {
                self.acknowledge(handle, &message, report).await;
            }
            report.record(message.message_id, DispatchResult::Invalid);
        }

        pending
    }

    async fn acknowledge(
        &self,
        handle: &QueueHandle,
        message: &ReceivedMessage,
        report: &mut CycleReport,
    ) {
        match self
            .client
            .delete_message(handle, &message.receipt_handle)
            .await
        {
            Ok(()) => report.deleted += 1,
            Err(e) => {
                error!(
                    queue = %handle.name(),
                    message_id = %message.message_id,
                    error = %e,
                    "Failed to delete message; it will be redelivered"
                );
                report.delete_failures += 1;
            }
        }
    }
}

/// Run every message concurrently, capturing errors and panics per message
async fn run_async(
    handler: &Arc<AsyncHandlerFn>,
    pending: Vec<Pending>,
) -> Vec<(Pending, Result<bool, HandlerError>)> {
    let payloads: Vec<Value> = pending.iter().map(|p| p.payload.clone()).collect();
    let calls = payloads.into_iter().map(|payload| {
        let handler = Arc::clone(handler);
        AssertUnwindSafe(async move { handler(payload).await })
            .catch_unwind()
            .map(settle_async)
    });

    let outcomes = join_all(calls).await;
    pending.into_iter().zip(outcomes).collect()
}

/// Turn a caught panic into a handler error
fn settle_async(
    outcome: std::thread::Result<Result<bool, HandlerError>>,
) -> Result<bool, HandlerError> {
    outcome.unwrap_or_else(|panic| Err(HandlerError::from_panic(panic)))
}

/// Run messages one at a time in order on the blocking pool
async fn run_sync(
    handler: &Arc<SyncHandlerFn>,
    pending: Vec<Pending>,
) -> Vec<(Pending, Result<bool, HandlerError>)> {
    let mut resolved = Vec::with_capacity(pending.len());

    for p in pending {
        let handler = Arc::clone(handler);
        let payload = p.payload.clone();
        let outcome = match tokio::task::spawn_blocking(move || handler(payload)).await {
            Ok(outcome) => outcome,
            Err(join_error) if join_error.is_panic() => {
                Err(HandlerError::from_panic(join_error.into_panic()))
            }
            Err(join_error) => Err(HandlerError::failed(join_error)),
        };
        resolved.push((p, outcome));
    }

    resolved
}
