//! # Queue Listener Core
//!
//! Registers JSON message handlers against named queues and drives them with a
//! polling scheduler.
//!
//! Each poll cycle receives a batch per queue, decodes and validates every
//! message, runs the queue's handler and deletes only the messages whose
//! handler reported success. Everything else stays on the queue and is
//! redelivered once its visibility timeout lapses.
//!
//! ## Module Organization
//!
//! - [`codec`] - JSON body decoding, encoding and validation
//! - [`registry`] - Queue-to-handler mapping and registration options
//! - [`dispatch`] - One fetch / dispatch / acknowledge cycle for one queue
//! - [`scheduler`] - Repeated cycles across all registered queues
//! - [`config`] - Listener configuration
//! - [`listener`] - Application-facing facade

pub mod codec;
pub mod config;
pub mod dispatch;
pub mod listener;
pub mod registry;
pub mod scheduler;

pub use codec::{decode, encode, validate, DecodeError, EncodeError, Validator};
pub use config::{ListenerConfig, ReceiveSettings};
pub use dispatch::{
    CycleReport, DispatchError, DispatchResult, Dispatcher, HandlerError, MessageOutcome,
};
pub use listener::{ListenerError, QueueListener};
pub use registry::{
    ConcurrencyKind, HandlerEntry, HandlerKind, InvalidMessage, InvalidMessagePolicy,
    InvalidReason, Registration, Registry, RegistryError,
};
pub use scheduler::PollScheduler;

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
