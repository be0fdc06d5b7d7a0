//! # Poll Scheduler
//!
//! Drives repeated dispatch cycles over every registered queue.
//!
//! A cycle with a synchronous registry visits each queue in registration
//! order, finishing one before starting the next. A cycle with an
//! asynchronous registry dispatches every queue at once and waits for all of
//! them. Handler errors surfaced by a dispatch are logged here and never stop
//! the loop.

use crate::dispatch::{CycleReport, Dispatcher};
use crate::registry::{ConcurrencyKind, HandlerEntry, Registry};
use futures::future::join_all;
use futures::FutureExt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

#[cfg(test)]
#[path = "scheduler_tests.rs"]
mod tests;

/// Repeatedly dispatches every queue in a registry
pub struct PollScheduler {
    dispatcher: Arc<Dispatcher>,
    registry: Arc<Registry>,
    poll_interval: Duration,
}

impl PollScheduler {
    pub fn new(dispatcher: Arc<Dispatcher>, registry: Arc<Registry>, poll_interval: Duration) -> Self {
        Self {
            dispatcher,
            registry,
            poll_interval,
        }
    }

    /// Pause between the end of one cycle and the start of the next
    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Dispatch every registered queue once
    ///
    /// Reports are returned in registration order.
    pub async fn run_cycle(&self) -> Vec<CycleReport> {
        let entries = self.registry.all_entries();

        match self.registry.kind() {
            None => Vec::new(),
            Some(ConcurrencyKind::Sync) => {
                let mut reports = Vec::with_capacity(entries.len());
                for entry in entries {
                    reports.push(self.dispatch(entry).await);
                }
                reports
            }
            Some(ConcurrencyKind::Async) => {
                join_all(entries.iter().map(|entry| self.dispatch(entry))).await
            }
        }
    }

    /// Run cycles forever, sleeping `poll_interval` between them
    ///
    /// Returns only when the enclosing task is cancelled.
    pub async fn run(&self) {
        self.run_until(std::future::pending::<()>()).await
    }

    /// Run cycles until `shutdown` completes
    ///
    /// `shutdown` is checked before each cycle and during the sleep between
    /// cycles. A cycle that has already started always runs to completion,
    /// including its long poll.
    pub async fn run_until<F>(&self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        info!(
            queues = self.registry.len(),
            poll_interval_ms = self.poll_interval.as_millis() as u64,
            "Poll scheduler started"
        );

        tokio::pin!(shutdown);
        let mut cycles: u64 = 0;

        loop {
            if shutdown.as_mut().now_or_never().is_some() {
                break;
            }

            let reports = self.run_cycle().await;
            cycles += 1;
            debug!(
                cycle = cycles,
                processed = reports.iter().map(|r| r.outcomes.len()).sum::<usize>(),
                "Poll cycle complete"
            );

            tokio::select! {
                _ = &mut shutdown => break,
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }

        info!(cycles, "Poll scheduler stopped");
    }

    async fn dispatch(&self, entry: &HandlerEntry) -> CycleReport {
        match self.dispatcher.dispatch_queue(entry).await {
            Ok(report) => report,
            Err(e) => {
                error!(queue = %entry.queue_name(), error = %e, "Dispatch failed; continuing with next queue");
                e.into_report()
            }
        }
    }
}
