//! Workflow configuration.
//!
//! Defaults match the demo deployment. Environment overrides:
//!
//! | Variable | Field |
//! |---|---|
//! | `BROKERDESK_AUTO_REPLY_DELAY_MS` | `auto_reply_delay` |
//! | `BROKERDESK_REPLY_POLL_MS` | `reply_poll_interval` |
//! | `BROKERDESK_CONFLICT_RETRIES` | `conflict_retry.max_attempts` |
//! | `BROKERDESK_LOCALE` | `locale` |

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use brokerdesk_orders::Locale;

use crate::retry::RetryPolicy;

pub const ENV_AUTO_REPLY_DELAY_MS: &str = "BROKERDESK_AUTO_REPLY_DELAY_MS";
pub const ENV_REPLY_POLL_MS: &str = "BROKERDESK_REPLY_POLL_MS";
pub const ENV_CONFLICT_RETRIES: &str = "BROKERDESK_CONFLICT_RETRIES";
pub const ENV_LOCALE: &str = "BROKERDESK_LOCALE";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid configuration document: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowConfig {
    /// Delay between a client message and its automatic staff reply.
    #[serde(with = "duration_ms")]
    pub auto_reply_delay: Duration,
    /// How often the reply worker looks for due replies.
    #[serde(with = "duration_ms")]
    pub reply_poll_interval: Duration,
    /// Retry policy used by callers that retry on `Conflict`.
    pub conflict_retry: RetryPolicy,
    /// Language of rendered system messages for newly placed orders.
    pub locale: Locale,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            auto_reply_delay: Duration::from_secs(2),
            reply_poll_interval: Duration::from_millis(100),
            conflict_retry: RetryPolicy::default(),
            locale: Locale::En,
        }
    }
}

impl WorkflowConfig {
    /// Defaults overridden by `BROKERDESK_*` environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for each variable.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(ms) = parse_var::<u64>(&lookup, ENV_AUTO_REPLY_DELAY_MS) {
            config.auto_reply_delay = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_var::<u64>(&lookup, ENV_REPLY_POLL_MS) {
            config.reply_poll_interval = Duration::from_millis(ms.max(1));
        }
        if let Some(attempts) = parse_var::<u32>(&lookup, ENV_CONFLICT_RETRIES) {
            config.conflict_retry.max_attempts = attempts.max(1);
        }
        if let Some(locale) = parse_var::<Locale>(&lookup, ENV_LOCALE) {
            config.locale = locale;
        }

        config
    }

    /// Parse a JSON document; missing fields keep their defaults.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn auto_reply_delay_chrono(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.auto_reply_delay).unwrap_or(chrono::Duration::MAX)
    }
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    let raw = lookup(key)?;
    match raw.trim().parse::<T>() {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(variable = key, value = %raw, error = %e, "ignoring invalid configuration value");
            None
        }
    }
}

/// Serialize a `Duration` as whole milliseconds.
pub mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}
