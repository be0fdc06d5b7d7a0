//! Integration tests for end-to-end listener scenarios
//!
//! These tests verify:
//! - A mixed batch of valid and non-JSON messages on one queue
//! - Posting a payload and receiving it on the next poll cycle
//! - Several queues served by one scheduler
//! - The scheduler running as a spawned task

mod common;

use common::{Harness, Recorder};
use queue_listener_core::{InvalidReason, Registration};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Verify one valid and one non-JSON message: one handler call, one invalid
/// callback, only the valid message deleted
#[tokio::test]
async fn test_valid_and_non_json_messages() -> anyhow::Result<()> {
    let mut harness = Harness::new();
    harness.send_raw("orders", r#"{"amt":5}"#).await;
    harness.send_raw("orders", "not-json").await;

    let calls = Arc::new(AtomicUsize::new(0));
    let decode_failures = Arc::new(AtomicUsize::new(0));
    let handled = Recorder::new();

    let counter = calls.clone();
    let failures = decode_failures.clone();
    let log = handled.clone();
    harness.listener.register_sync(
        "orders",
        Registration::new().on_invalid(move |m| {
            if matches!(m.reason, InvalidReason::Decode(_)) && m.body == "not-json" {
                failures.fetch_add(1, Ordering::SeqCst);
            }
        }),
        move |order| {
            counter.fetch_add(1, Ordering::SeqCst);
            log.record(order);
            Ok(true)
        },
    )?;

    let report = harness.listener.scheduler().run_cycle().await.remove(0);

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(handled.values(), vec![json!({"amt": 5})]);
    assert_eq!(decode_failures.load(Ordering::SeqCst), 1);
    assert_eq!(report.successes(), 1);
    assert_eq!(report.invalid(), 1);
    assert_eq!(report.deleted, 1);
    assert_eq!(harness.remaining("orders"), 1);
    Ok(())
}

/// Verify a posted payload is what the next poll cycle decodes
#[tokio::test]
async fn test_post_then_poll() -> anyhow::Result<()> {
    let mut harness = Harness::new();
    let handled = Recorder::new();
    let log = handled.clone();
    harness
        .listener
        .register_sync("orders", Registration::new(), move |order| {
            log.record(order);
            Ok(true)
        })?;

    let message_id = harness.listener.post("orders", &json!({"amt": 7})).await?;
    let report = harness.listener.scheduler().run_cycle().await.remove(0);

    assert_eq!(handled.values(), vec![json!({"amt": 7})]);
    assert!(report.outcome(&message_id).is_some_and(|r| r.is_success()));
    Ok(())
}

/// Verify one scheduler serves every registered queue each cycle
#[tokio::test]
async fn test_multiple_queues_one_cycle() -> anyhow::Result<()> {
    let mut harness = Harness::new();
    let handled = Recorder::new();

    for queue in ["orders", "refunds", "invoices"] {
        let log = handled.clone();
        harness
            .listener
            .register_sync(queue, Registration::new(), move |body| {
                log.record(body);
                Ok(true)
            })?;
        harness
            .listener
            .post(queue, &json!({ "queue": queue }))
            .await?;
    }

    let reports = harness.listener.scheduler().run_cycle().await;

    assert_eq!(reports.len(), 3);
    assert_eq!(
        handled.values(),
        vec![
            json!({"queue": "orders"}),
            json!({"queue": "refunds"}),
            json!({"queue": "invoices"}),
        ]
    );
    Ok(())
}

/// Verify the scheduler runs as a spawned task until that task is aborted
#[tokio::test]
async fn test_spawned_scheduler_serves_queues() -> anyhow::Result<()> {
    let Harness {
        provider,
        mut listener,
    } = Harness::new();

    let handled = Arc::new(tokio::sync::Notify::new());
    let signal = handled.clone();
    listener.register_sync(
        "orders",
        Registration::new().on_success(move |_| signal.notify_one()),
        |_| Ok(true),
    )?;
    listener.post("orders", &json!({"amt": 5})).await?;

    let scheduler = listener.scheduler();
    let single_cycle = tokio::spawn(async move { scheduler.run_cycle().await });
    assert_eq!(single_cycle.await?[0].successes(), 1);
    handled.notified().await;

    listener.post("orders", &json!({"amt": 6})).await?;
    let task = tokio::spawn(listener.run_scheduler(Duration::from_millis(10)));
    tokio::time::timeout(Duration::from_secs(5), handled.notified()).await?;

    task.abort();
    assert!(task.await.unwrap_err().is_cancelled());
    assert_eq!(provider.message_count(&common::queue_name("orders"))?, 0);
    Ok(())
}
