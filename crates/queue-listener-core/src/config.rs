//! Listener configuration.
//!
//! Every field has a default, so an empty document deserializes to a working
//! in-memory listener.

use queue_listener_runtime::{ConfigurationError, ProviderConfig, ReceiveOptions};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;

/// Longest long-poll wait SQS accepts
pub const MAX_WAIT_TIME_SECONDS: u64 = 20;

/// Longest visibility timeout SQS accepts (12 hours)
pub const MAX_VISIBILITY_TIMEOUT_SECONDS: u64 = 43_200;

/// Top-level listener configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Batch size, visibility and long-poll settings
    pub receive: ReceiveSettings,

    /// Pause between poll cycles
    pub poll_interval_seconds: u64,

    /// Return synchronous handler errors to the scheduler instead of only
    /// recording them
    pub propagate_handler_errors: bool,

    /// Queue provider
    pub provider: ProviderConfig,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            receive: ReceiveSettings::default(),
            poll_interval_seconds: 1,
            propagate_handler_errors: true,
            provider: ProviderConfig::default(),
        }
    }
}

/// Settings applied to every receive call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReceiveSettings {
    pub max_messages: u32,
    pub visibility_timeout_seconds: u64,
    pub wait_time_seconds: u64,
}

impl Default for ReceiveSettings {
    fn default() -> Self {
        Self {
            max_messages: 10,
            visibility_timeout_seconds: 30,
            wait_time_seconds: 20,
        }
    }
}

impl ListenerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_seconds)
    }

    /// Receive options used by the dispatcher
    pub fn to_receive_options(&self) -> ReceiveOptions {
        ReceiveOptions::new()
            .with_max_messages(self.receive.max_messages)
            .with_visibility_timeout(Duration::from_secs(self.receive.visibility_timeout_seconds))
            .with_wait_time(Duration::from_secs(self.receive.wait_time_seconds))
    }

    /// Validate the configuration
    ///
    /// Checks that:
    /// - the poll interval is at least one second
    /// - the batch size is between 1 and the provider's batch limit
    /// - the wait time is at most 20 seconds
    /// - the visibility timeout is at most 12 hours
    /// - an SQS request timeout outlasts the long poll
    /// - the provider settings are valid
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.poll_interval_seconds == 0 {
            return Err(ConfigurationError::Invalid {
                message: "poll_interval_seconds must be at least 1".to_string(),
            });
        }

        let max_batch = self.provider.provider_type().max_batch_size();
        if self.receive.max_messages == 0 || self.receive.max_messages > max_batch {
            return Err(ConfigurationError::Invalid {
                message: format!(
                    "receive.max_messages must be between 1 and {}, got {}",
                    max_batch, self.receive.max_messages
                ),
            });
        }

        if self.receive.wait_time_seconds > MAX_WAIT_TIME_SECONDS {
            return Err(ConfigurationError::Invalid {
                message: format!(
                    "receive.wait_time_seconds must be at most {}, got {}",
                    MAX_WAIT_TIME_SECONDS, self.receive.wait_time_seconds
                ),
            });
        }

        if self.receive.visibility_timeout_seconds > MAX_VISIBILITY_TIMEOUT_SECONDS {
            return Err(ConfigurationError::Invalid {
                message: format!(
                    "receive.visibility_timeout_seconds must be at most {}, got {}",
                    MAX_VISIBILITY_TIMEOUT_SECONDS, self.receive.visibility_timeout_seconds
                ),
            });
        }

        if let ProviderConfig::AwsSqs(aws) = &self.provider {
            if aws.request_timeout_seconds <= self.receive.wait_time_seconds {
                return Err(ConfigurationError::Invalid {
                    message: format!(
                        "provider.request_timeout_seconds ({}) must exceed receive.wait_time_seconds ({})",
                        aws.request_timeout_seconds, self.receive.wait_time_seconds
                    ),
                });
            }
        }

        self.provider.validate()
    }
}
