//! Provider types and configuration.

use crate::error::ConfigurationError;
use serde::{Deserialize, Serialize};

/// Environment variable holding the SQS endpoint override.
pub const SQS_ENDPOINT_ENV: &str = "SQS_ENDPOINT_URL";

/// Enumeration of supported queue providers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProviderType {
    AwsSqs,
    InMemory,
}

impl ProviderType {
    /// Get maximum message size for provider
    pub fn max_message_size(&self) -> usize {
        match self {
            Self::AwsSqs => 256 * 1024,          // 256KB
            Self::InMemory => 10 * 1024 * 1024, // 10MB
        }
    }

    /// Get the largest batch a single receive can return
    pub fn max_batch_size(&self) -> u32 {
        match self {
            Self::AwsSqs => 10,
            Self::InMemory => 100,
        }
    }
}

impl std::fmt::Display for ProviderType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AwsSqs => write!(f, "AwsSqs"),
            Self::InMemory => write!(f, "InMemory"),
        }
    }
}

/// Provider-specific configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProviderConfig {
    AwsSqs(AwsSqsConfig),
    InMemory(InMemoryConfig),
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self::InMemory(InMemoryConfig::default())
    }
}

impl ProviderConfig {
    /// Get the provider type this configuration builds
    pub fn provider_type(&self) -> ProviderType {
        match self {
            Self::AwsSqs(_) => ProviderType::AwsSqs,
            Self::InMemory(_) => ProviderType::InMemory,
        }
    }

    /// Validate the provider configuration
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        match self {
            Self::AwsSqs(config) => config.validate(),
            Self::InMemory(config) => config.validate(),
        }
    }
}

/// AWS SQS configuration
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AwsSqsConfig {
    pub region: String,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    /// Endpoint override (LocalStack, ElasticMQ). Defaults to the regional
    /// AWS endpoint.
    pub endpoint_url: Option<String>,
    /// HTTP request timeout; must exceed the long-poll wait time
    pub request_timeout_seconds: u64,
}

impl Default for AwsSqsConfig {
    fn default() -> Self {
        Self {
            region: "us-east-1".to_string(),
            access_key_id: None,
            secret_access_key: None,
            endpoint_url: None,
            request_timeout_seconds: 30,
        }
    }
}

impl std::fmt::Debug for AwsSqsConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AwsSqsConfig")
            .field("region", &self.region)
            .field("access_key_id", &self.access_key_id)
            .field(
                "secret_access_key",
                &self.secret_access_key.as_ref().map(|_| "<redacted>"),
            )
            .field("endpoint_url", &self.endpoint_url)
            .field("request_timeout_seconds", &self.request_timeout_seconds)
            .finish()
    }
}

impl AwsSqsConfig {
    /// Build configuration from the standard AWS environment variables
    ///
    /// Reads `AWS_REGION` (falling back to `AWS_DEFAULT_REGION`),
    /// `AWS_ACCESS_KEY_ID`, `AWS_SECRET_ACCESS_KEY` and the endpoint override
    /// in `SQS_ENDPOINT_URL`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::Missing`] if no region is set.
    pub fn from_env() -> Result<Self, ConfigurationError> {
        let region = non_empty_env("AWS_REGION")
            .or_else(|| non_empty_env("AWS_DEFAULT_REGION"))
            .ok_or_else(|| ConfigurationError::Missing {
                key: "AWS_REGION".to_string(),
            })?;

        let mut config = Self {
            region,
            ..Self::default()
        };
        config.fill_from_env(true);
        Ok(config)
    }

    /// Fill settings left unset from the standard AWS environment variables
    ///
    /// Credentials are only taken from the environment when neither key is
    /// configured. The region is replaced by `AWS_REGION` or
    /// `AWS_DEFAULT_REGION` unless `keep_region` is set.
    pub fn fill_from_env(&mut self, keep_region: bool) {
        if !keep_region {
            if let Some(region) =
                non_empty_env("AWS_REGION").or_else(|| non_empty_env("AWS_DEFAULT_REGION"))
            {
                self.region = region;
            }
        }

        if self.access_key_id.is_none() && self.secret_access_key.is_none() {
            self.access_key_id = non_empty_env("AWS_ACCESS_KEY_ID");
            self.secret_access_key = non_empty_env("AWS_SECRET_ACCESS_KEY");
        }

        if self.endpoint_url.is_none() {
            self.endpoint_url = non_empty_env(SQS_ENDPOINT_ENV);
        }
    }

    /// Validate region, credentials pairing and endpoint
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.region.is_empty() {
            return Err(ConfigurationError::Invalid {
                message: "Region cannot be empty".to_string(),
            });
        }

        if self.access_key_id.is_some() != self.secret_access_key.is_some() {
            return Err(ConfigurationError::Invalid {
                message: "access_key_id and secret_access_key must be set together".to_string(),
            });
        }

        if let Some(endpoint) = &self.endpoint_url {
            url::Url::parse(endpoint).map_err(|e| ConfigurationError::Invalid {
                message: format!("Invalid endpoint_url '{}': {}", endpoint, e),
            })?;
        }

        if self.request_timeout_seconds == 0 {
            return Err(ConfigurationError::Invalid {
                message: "request_timeout_seconds must be greater than zero".to_string(),
            });
        }

        Ok(())
    }

    /// Endpoint to send requests to
    pub fn endpoint(&self) -> String {
        match &self.endpoint_url {
            Some(url) => url.trim_end_matches('/').to_string(),
            None => format!("https://sqs.{}.amazonaws.com", self.region),
        }
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

/// In-memory provider configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InMemoryConfig {
    pub max_queue_size: usize,
    pub max_message_size: usize,
    /// Create queues on first send instead of requiring `create_queue`
    pub auto_create_queues: bool,
    /// Move a message to the queue's dead-letter store once it has been
    /// received more than `max_delivery_count` times
    pub enable_dead_letter_queue: bool,
    pub max_delivery_count: u32,
}

impl Default for InMemoryConfig {
    fn default() -> Self {
        Self {
            max_queue_size: 10000,
            max_message_size: ProviderType::AwsSqs.max_message_size(),
            auto_create_queues: true,
            enable_dead_letter_queue: false,
            max_delivery_count: 5,
        }
    }
}

impl InMemoryConfig {
    /// Validate limits
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.max_queue_size == 0 {
            return Err(ConfigurationError::Invalid {
                message: "max_queue_size must be greater than zero".to_string(),
            });
        }

        let ceiling = ProviderType::InMemory.max_message_size();
        if self.max_message_size == 0 || self.max_message_size > ceiling {
            return Err(ConfigurationError::Invalid {
                message: format!("max_message_size must be between 1 and {}", ceiling),
            });
        }

        if self.enable_dead_letter_queue && self.max_delivery_count == 0 {
            return Err(ConfigurationError::Invalid {
                message: "max_delivery_count must be at least 1 when dead-lettering".to_string(),
            });
        }

        Ok(())
    }
}

#[cfg(test)]
#[path = "provider_tests.rs"]
mod tests;
