//! Integration tests for handler registration
//!
//! These tests verify:
//! - Synchronous and asynchronous handlers cannot share a listener
//! - A rejected registration leaves existing registrations untouched
//! - Re-registering a queue replaces its handler

mod common;

use common::Harness;
use queue_listener_core::{
    ConcurrencyKind, HandlerError, ListenerError, Registration, RegistryError,
};
use serde_json::Value;

/// Verify an async registration after a sync one is rejected
#[test]
fn test_async_after_sync_is_not_supported() {
    let mut harness = Harness::new();
    harness
        .listener
        .register_sync("orders", Registration::new(), |_| Ok(true))
        .unwrap();

    let result = harness
        .listener
        .register_async("refunds", Registration::new(), |_: Value| async {
            Ok::<_, HandlerError>(true)
        });

    match result {
        Err(ListenerError::Registry(RegistryError::NotSupported {
            registered,
            requested,
            ..
        })) => {
            assert_eq!(registered, ConcurrencyKind::Sync);
            assert_eq!(requested, ConcurrencyKind::Async);
        }
        other => panic!("Expected NotSupported, got {:?}", other.map(|_| ())),
    }
    assert_eq!(harness.listener.registry().len(), 1);
}

/// Verify a sync registration after an async one is rejected
#[test]
fn test_sync_after_async_is_not_supported() {
    let mut harness = Harness::new();
    harness
        .listener
        .register_async("orders", Registration::new(), |_: Value| async {
            Ok::<_, HandlerError>(true)
        })
        .unwrap();

    let result = harness
        .listener
        .register_sync("refunds", Registration::new(), |_| Ok(true));

    assert!(matches!(
        result,
        Err(ListenerError::Registry(RegistryError::NotSupported { .. }))
    ));
    assert_eq!(
        harness.listener.registry().kind(),
        Some(ConcurrencyKind::Async)
    );
}

/// Verify the latest registration for a queue is the one dispatched
#[tokio::test]
async fn test_reregistration_replaces_handler() {
    let mut harness = Harness::new();
    harness.send_raw("orders", r#"{"amt":5}"#).await;

    harness
        .listener
        .register_sync("orders", Registration::new(), |_| Ok(false))
        .unwrap();
    harness
        .listener
        .register_sync("orders", Registration::new(), |_| Ok(true))
        .unwrap();

    let reports = harness.listener.scheduler().run_cycle().await;

    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].successes(), 1);
    assert_eq!(harness.remaining("orders"), 0);
}
