//! Tests for the handler registry.

use super::*;
use serde_json::json;

fn queue(name: &str) -> QueueName {
    QueueName::new(name.to_string()).unwrap()
}

fn accept_all(_: Value) -> Result<bool, HandlerError> {
    Ok(true)
}

// ============================================================================
// Registration Tests
// ============================================================================

mod registration {
    use super::*;

    /// Verify entries keep registration order
    #[test]
    fn test_entries_in_registration_order() {
        let mut registry = Registry::new();
        for name in ["orders", "refunds", "invoices"] {
            registry
                .register_sync(queue(name), Registration::new(), accept_all)
                .unwrap();
        }

        let names: Vec<&str> = registry
            .all_entries()
            .iter()
            .map(|e| e.queue_name().as_str())
            .collect();
        assert_eq!(names, vec!["orders", "refunds", "invoices"]);
        assert_eq!(registry.len(), 3);
    }

    /// Verify re-registering a queue replaces the entry in place
    #[test]
    fn test_last_registration_wins() {
        let mut registry = Registry::new();
        registry
            .register_sync(queue("orders"), Registration::new(), accept_all)
            .unwrap();
        registry
            .register_sync(queue("refunds"), Registration::new(), accept_all)
            .unwrap();
        registry
            .register_sync(
                queue("orders"),
                Registration::new().with_invalid_policy(InvalidMessagePolicy::Delete),
                |_| Ok(false),
            )
            .unwrap();

        assert_eq!(registry.len(), 2);
        let first = &registry.all_entries()[0];
        assert_eq!(first.queue_name().as_str(), "orders");
        assert_eq!(first.invalid_policy(), InvalidMessagePolicy::Delete);

        match first.handler() {
            HandlerKind::Sync(handler) => assert!(!handler(json!({})).unwrap()),
            other => panic!("Expected synchronous handler, got {:?}", other),
        }
    }

    /// Verify the registered handler is returned for direct invocation
    #[test]
    fn test_register_sync_returns_callable_handler() {
        let mut registry = Registry::new();
        let handler = registry
            .register_sync(queue("orders"), Registration::new(), |v: Value| {
                Ok(v["amt"].as_i64().unwrap_or(0) > 0)
            })
            .unwrap();

        assert!(handler(json!({"amt": 5})).unwrap());
        assert!(!handler(json!({"amt": 0})).unwrap());
    }

    /// Verify the asynchronous handler is returned for direct invocation
    #[tokio::test]
    async fn test_register_async_returns_callable_handler() {
        let mut registry = Registry::new();
        let handler = registry
            .register_async(queue("orders"), Registration::new(), |v: Value| async move {
                Ok::<_, HandlerError>(v.is_object())
            })
            .unwrap();

        assert!(handler(json!({})).await.unwrap());
        assert_eq!(registry.kind(), Some(ConcurrencyKind::Async));
    }

    /// Verify `register` accepts a pre-built handler and returns it
    #[test]
    fn test_register_with_handler_kind() {
        let mut registry = Registry::new();
        let returned = registry
            .register(queue("orders"), HandlerKind::sync(accept_all), Registration::new())
            .unwrap();

        assert_eq!(returned.concurrency(), ConcurrencyKind::Sync);
        assert!(registry.get(&queue("orders")).is_some());
    }
}

// ============================================================================
// Concurrency Kind Tests
// ============================================================================

mod concurrency_kind {
    use super::*;

    /// Verify an async handler cannot join a synchronous registry
    #[test]
    fn test_async_after_sync_rejected() {
        let mut registry = Registry::new();
        registry
            .register_sync(queue("orders"), Registration::new(), accept_all)
            .unwrap();

        let result = registry.register_async(queue("refunds"), Registration::new(), |_| async {
            Ok::<_, HandlerError>(true)
        });

        match result {
            Err(RegistryError::NotSupported {
                queue,
                registered,
                requested,
            }) => {
                assert_eq!(queue.as_str(), "refunds");
                assert_eq!(registered, ConcurrencyKind::Sync);
                assert_eq!(requested, ConcurrencyKind::Async);
            }
            Ok(_) => panic!("Mixed registration must be rejected"),
        }
        assert_eq!(registry.len(), 1);
        assert!(registry.get(&queue("refunds")).is_none());
    }

    /// Verify a sync handler cannot join an asynchronous registry, even when
    /// replacing an existing queue
    #[test]
    fn test_sync_after_async_rejected() {
        let mut registry = Registry::new();
        registry
            .register(
                queue("orders"),
                HandlerKind::from_async(|_| async { Ok::<_, HandlerError>(true) }),
                Registration::new(),
            )
            .unwrap();

        let result = registry.register_sync(queue("orders"), Registration::new(), accept_all);

        assert!(matches!(result, Err(RegistryError::NotSupported { .. })));
        assert_eq!(registry.kind(), Some(ConcurrencyKind::Async));
    }

    /// Verify an empty registry reports no kind
    #[test]
    fn test_empty_registry() {
        let registry = Registry::new();

        assert!(registry.is_empty());
        assert_eq!(registry.kind(), None);
        assert!(registry.get(&queue("orders")).is_none());
        assert!(registry.all_entries().is_empty());
    }

    /// Verify the error message names both kinds
    #[test]
    fn test_not_supported_message() {
        let error = RegistryError::NotSupported {
            queue: queue("orders"),
            registered: ConcurrencyKind::Sync,
            requested: ConcurrencyKind::Async,
        };

        let message = error.to_string();
        assert!(message.contains("asynchronous"));
        assert!(message.contains("synchronous"));
        assert!(message.contains("orders"));
    }
}

// ============================================================================
// Entry Tests
// ============================================================================

mod entry {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Verify the validator transforms bodies and a missing validator passes
    /// them through
    #[test]
    fn test_validate() {
        let mut registry = Registry::new();
        registry
            .register_sync(
                queue("orders"),
                Registration::new().with_validator(|v| v.get("amt").cloned()),
                accept_all,
            )
            .unwrap();
        registry
            .register_sync(queue("refunds"), Registration::new(), accept_all)
            .unwrap();

        let orders = registry.get(&queue("orders")).unwrap();
        assert_eq!(orders.validate(&json!({"amt": 5})).ok(), Some(json!(5)));
        assert!(matches!(
            orders.validate(&json!({"other": 1})),
            Err(InvalidReason::Rejected(body)) if body == json!({"other": 1})
        ));

        let refunds = registry.get(&queue("refunds")).unwrap();
        assert_eq!(refunds.validate(&json!("raw")).ok(), Some(json!("raw")));
    }

    /// Verify a panicking validator rejects the message instead of unwinding
    #[test]
    fn test_panicking_validator_rejects() {
        let mut registry = Registry::new();
        registry
            .register_sync(
                queue("orders"),
                Registration::new().with_validator(|_| panic!("schema lookup failed")),
                accept_all,
            )
            .unwrap();

        let entry = registry.get(&queue("orders")).unwrap();
        match entry.validate(&json!({"amt": 5})) {
            Err(InvalidReason::ValidatorPanicked(message)) => {
                assert_eq!(message, "schema lookup failed")
            }
            other => panic!("Expected validator panic, got {:?}", other),
        }
    }

    /// Verify callbacks are invoked and a panicking callback is contained
    #[test]
    fn test_callbacks_are_guarded() {
        let successes = Arc::new(AtomicUsize::new(0));
        let counter = successes.clone();

        let mut registry = Registry::new();
        registry
            .register_sync(
                queue("orders"),
                Registration::new()
                    .on_success(move |_| {
                        counter.fetch_add(1, Ordering::SeqCst);
                    })
                    .on_fail(|_| panic!("callback exploded")),
                accept_all,
            )
            .unwrap();

        let entry = registry.get(&queue("orders")).unwrap();
        entry.notify_success(&json!({}));
        entry.notify_fail(&json!({}));
        entry.notify_invalid(&InvalidMessage {
            message_id: MessageId::new(),
            body: Bytes::from_static(b"not-json"),
            reason: InvalidReason::Rejected(Value::Null),
        });

        assert_eq!(successes.load(Ordering::SeqCst), 1);
    }

    /// Verify Debug output hides the closures
    #[test]
    fn test_entry_debug() {
        let mut registry = Registry::new();
        registry
            .register_sync(queue("orders"), Registration::new(), accept_all)
            .unwrap();

        let rendered = format!("{:?}", registry.get(&queue("orders")).unwrap());
        assert!(rendered.contains("orders"));
        assert!(rendered.contains("HandlerKind::Sync"));
    }
}
