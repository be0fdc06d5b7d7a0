//! End-to-end tests for the queue-listener binary.

use assert_cmd::Command;
use predicates::prelude::*;
use std::io::Write;

fn queue_listener() -> Command {
    let mut command = Command::cargo_bin("queue-listener").unwrap();
    command.env_remove("QUEUE_LISTENER_CONFIG").env_remove("RUST_LOG");
    command
}

#[test]
fn test_help_lists_commands() {
    queue_listener()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("listen"))
        .stdout(predicate::str::contains("post"))
        .stdout(predicate::str::contains("config"));
}

#[test]
fn test_config_prints_defaults_as_json() {
    let output = queue_listener()
        .args(["config", "--format", "json"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    let config: serde_json::Value = serde_json::from_slice(&output).unwrap();
    assert_eq!(config["provider"]["type"], "in_memory");
    assert_eq!(config["receive"]["wait_time_seconds"], 20);
}

#[test]
fn test_config_applies_environment_overrides() {
    queue_listener()
        .env("QUEUE_LISTENER__POLL_INTERVAL_SECONDS", "9")
        .args(["config", "--format", "toml"])
        .assert()
        .success()
        .stdout(predicate::str::contains("poll_interval_seconds = 9"));
}

#[test]
fn test_config_file_flag() {
    let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
    writeln!(file, "[receive]\nmax_messages = 3").unwrap();

    queue_listener()
        .arg("--config")
        .arg(file.path())
        .args(["config", "--format", "yaml"])
        .assert()
        .success()
        .stdout(predicate::str::contains("max_messages: 3"));
}

#[test]
fn test_missing_config_file_exit_code() {
    queue_listener()
        .args(["--config", "/nonexistent/listener.toml", "config"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("Configuration file not found"));
}

#[test]
fn test_post_prints_message_id() {
    queue_listener()
        .args(["post", "--queue", "orders", "--payload", r#"{"amt":5}"#])
        .assert()
        .success()
        .stdout(predicate::str::is_match(r"^[0-9a-f-]{36}\n$").unwrap());
}

#[test]
fn test_post_rejects_invalid_json() {
    queue_listener()
        .args(["post", "--queue", "orders", "--payload", "not-json"])
        .assert()
        .code(4)
        .stderr(predicate::str::contains("payload"));
}

#[test]
fn test_listen_once_reports_each_queue() {
    queue_listener()
        .env("QUEUE_LISTENER__RECEIVE__WAIT_TIME_SECONDS", "0")
        .args(["listen", "--queue", "orders", "--queue", "refunds", "--once"])
        .assert()
        .success()
        .stdout(predicate::str::contains(
            "orders: 0 succeeded, 0 failed, 0 invalid, 0 errors",
        ))
        .stdout(predicate::str::contains("refunds: 0 succeeded"));
}

#[test]
fn test_listen_rejects_invalid_queue_name() {
    queue_listener()
        .env("QUEUE_LISTENER__RECEIVE__WAIT_TIME_SECONDS", "0")
        .args(["listen", "--queue", "bad name!", "--once"])
        .assert()
        .code(2);
}

#[test]
fn test_completions() {
    queue_listener()
        .args(["completions", "bash"])
        .assert()
        .success()
        .stdout(predicate::str::contains("queue-listener"));
}

#[test]
fn test_listen_rejects_zero_interval() {
    queue_listener()
        .env("QUEUE_LISTENER__RECEIVE__WAIT_TIME_SECONDS", "0")
        .args(["listen", "--queue", "orders", "--interval", "0", "--once"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("poll_interval_seconds"));
}
