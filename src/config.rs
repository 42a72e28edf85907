//! Channel configuration: a YAML mapping of channel name to pipeline layout.
//!
//! ```yaml
//! AlertsChannel:
//!   worker:
//!     class: http
//!     url: https://api.telegram.org
//!     bot_id: "123456789:bot-token"
//!     chat_id: 123456789
//!   queue:
//!     class: memory
//!     queue_size: 100
//!   minRetryAfter: 5
//!   maxRetryAfter: 7200
//!   maxAttempts: 5
//!   retryBase: 4.0
//! ```
//!
//! The `class` keys are resolved against the queue and worker registries at
//! collection build time; every other key inside `worker` is handed to the
//! matching worker factory untouched.

use std::collections::BTreeMap;
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::backoff::BackoffPolicy;
use crate::error::{ProxyError, Result};

const DEFAULT_QUEUE_SIZE: usize = 100;

/// Full proxy configuration: channel name to channel layout.
///
/// A `BTreeMap` keeps channel start-up ordering deterministic.
pub type ProxyConfig = BTreeMap<String, ChannelConfig>;

/// One channel's pipeline layout.
#[derive(Debug, Clone, Deserialize)]
pub struct ChannelConfig {
    /// Worker block: `class` plus worker-specific options.
    pub worker: WorkerConfig,
    /// Queue block: `class` plus capacity.
    pub queue: QueueConfig,
    /// Floor for retry delays, seconds.
    #[serde(rename = "minRetryAfter")]
    pub min_retry_after: Option<u64>,
    /// Ceiling for retry delays, seconds.
    #[serde(rename = "maxRetryAfter")]
    pub max_retry_after: Option<u64>,
    /// Delivery attempts per message.
    #[serde(rename = "maxAttempts")]
    pub max_attempts: Option<u32>,
    /// Exponential backoff base.
    #[serde(rename = "retryBase")]
    pub retry_base: Option<f64>,
}

impl ChannelConfig {
    /// The channel's retry policy, falling back to the crate defaults for
    /// whatever the config leaves out.
    pub fn backoff(&self) -> BackoffPolicy {
        let defaults = BackoffPolicy::default();
        BackoffPolicy {
            min_wait: self.min_retry_after.unwrap_or(defaults.min_wait),
            max_wait: self.max_retry_after.unwrap_or(defaults.max_wait),
            base: self.retry_base.unwrap_or(defaults.base),
            max_attempts: self.max_attempts.unwrap_or(defaults.max_attempts),
        }
    }
}

/// The `worker` block of a channel.
#[derive(Debug, Clone, Deserialize)]
pub struct WorkerConfig {
    /// Registered worker name.
    pub class: String,
    /// Worker-specific options, passed to the factory as-is.
    #[serde(flatten)]
    pub options: serde_yaml::Mapping,
}

impl WorkerConfig {
    /// Deserialize the option block into a worker's config type.
    pub fn parse_options<T: DeserializeOwned>(&self) -> Result<T> {
        serde_yaml::from_value(serde_yaml::Value::Mapping(self.options.clone()))
            .map_err(|err| ProxyError::InvalidConfig(format!("worker options: {err}")))
    }
}

/// The `queue` block of a channel.
#[derive(Debug, Clone, Deserialize)]
pub struct QueueConfig {
    /// Registered queue name.
    pub class: String,
    /// Queue capacity in messages.
    #[serde(default = "default_queue_size")]
    pub queue_size: usize,
}

fn default_queue_size() -> usize {
    DEFAULT_QUEUE_SIZE
}

/// Parse a configuration document.
pub fn parse(raw: &str) -> Result<ProxyConfig> {
    serde_yaml::from_str(raw).map_err(|err| ProxyError::InvalidConfig(err.to_string()))
}

/// Read and parse a configuration file.
pub fn load(path: impl AsRef<Path>) -> Result<ProxyConfig> {
    let path = path.as_ref();
    let raw = std::fs::read_to_string(path).map_err(|err| {
        ProxyError::InvalidConfig(format!("failed to read config file {}: {err}", path.display()))
    })?;
    parse(&raw)
}
