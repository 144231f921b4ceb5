//! Runtime configuration.
//!
//! Defaults mirror a local beacon/execution node pair with 6 second slots and
//! 32 slot epochs.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::retry::{Backoff, RetryPolicy};
use crate::tracker::DEFAULT_SLOTS_PER_EPOCH;

/// Default beacon node HTTP endpoint.
pub const DEFAULT_BEACON_ENDPOINT: &str = "http://127.0.0.1:3500";

/// Default execution node JSON-RPC endpoint.
pub const DEFAULT_EXECUTION_ENDPOINT: &str = "http://127.0.0.1:8545";

/// Default interval between head polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);

/// Default slot length.
pub const DEFAULT_SLOT_DURATION: Duration = Duration::from_secs(6);

/// Default cap on a single beacon response (4 MiB).
pub const DEFAULT_MAX_RESPONSE_BYTES: usize = 4 * 1024 * 1024;

/// Default per-request timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Largest accepted slots-per-epoch value.
const MAX_SLOTS_PER_EPOCH: u64 = 1 << 16;

/// When the current epoch's duties are fetched again for cross-checking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ValidationPolicy {
    /// On every transition.
    #[default]
    Always,
    /// Only on the first transition after startup.
    ///
    /// The first transition has no cached schedule to compare against, so
    /// under this policy the compatibility check never runs. Later
    /// transitions only fetch the current epoch when it is missing from
    /// the cache, for example after missed epochs.
    FirstRunOnly,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("slots per epoch must be in 1..={max}, got {value}")]
    SlotsPerEpoch { value: u64, max: u64 },

    #[error("{0} must be greater than zero")]
    ZeroDuration(&'static str),

    #[error("max retries must be at least 1")]
    ZeroRetries,

    #[error("max response size must be greater than zero")]
    ZeroResponseSize,

    #[error("invalid {name} endpoint: {value}")]
    Endpoint { name: &'static str, value: String },
}

/// Configuration of the synchronizer.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Beacon node HTTP endpoint.
    pub beacon_endpoint: String,
    /// Execution node JSON-RPC endpoint.
    pub execution_endpoint: String,
    /// Interval between head polls.
    pub poll_interval: Duration,
    /// Number of slots per epoch.
    pub slots_per_epoch: u64,
    /// Wall-clock length of a slot.
    pub slot_duration: Duration,
    /// Unix time of slot 0.
    pub genesis_time: u64,
    /// Attempts per outbound call, including the first.
    pub max_retries: u32,
    /// Base delay between attempts.
    pub retry_delay: Duration,
    pub backoff: Backoff,
    /// Largest accepted beacon response.
    pub max_response_bytes: usize,
    /// Per-request timeout.
    pub request_timeout: Duration,
    pub validation_policy: ValidationPolicy,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            beacon_endpoint: DEFAULT_BEACON_ENDPOINT.to_string(),
            execution_endpoint: DEFAULT_EXECUTION_ENDPOINT.to_string(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            slots_per_epoch: DEFAULT_SLOTS_PER_EPOCH,
            slot_duration: DEFAULT_SLOT_DURATION,
            genesis_time: unix_now(),
            max_retries: 5,
            retry_delay: Duration::from_secs(5),
            backoff: Backoff::Linear,
            max_response_bytes: DEFAULT_MAX_RESPONSE_BYTES,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            validation_policy: ValidationPolicy::Always,
        }
    }
}

impl SyncConfig {
    /// Checks that every value is usable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.slots_per_epoch == 0 || self.slots_per_epoch > MAX_SLOTS_PER_EPOCH {
            return Err(ConfigError::SlotsPerEpoch {
                value: self.slots_per_epoch,
                max: MAX_SLOTS_PER_EPOCH,
            });
        }
        if self.poll_interval.is_zero() {
            return Err(ConfigError::ZeroDuration("poll interval"));
        }
        if self.slot_duration.is_zero() {
            return Err(ConfigError::ZeroDuration("slot duration"));
        }
        if self.request_timeout.is_zero() {
            return Err(ConfigError::ZeroDuration("request timeout"));
        }
        if self.max_retries == 0 {
            return Err(ConfigError::ZeroRetries);
        }
        if self.max_response_bytes == 0 {
            return Err(ConfigError::ZeroResponseSize);
        }
        check_endpoint("beacon", &self.beacon_endpoint)?;
        check_endpoint("execution", &self.execution_endpoint)?;
        Ok(())
    }

    /// Retry policy shared by all outbound calls.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_retries,
            delay: self.retry_delay,
            backoff: self.backoff,
        }
    }
}

fn check_endpoint(name: &'static str, value: &str) -> Result<(), ConfigError> {
    let valid = ["http://", "https://"]
        .iter()
        .any(|scheme| value.len() > scheme.len() && value.starts_with(scheme));
    if !valid {
        return Err(ConfigError::Endpoint {
            name,
            value: value.to_string(),
        });
    }
    Ok(())
}

/// Current Unix time in seconds.
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = SyncConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.slots_per_epoch, 32);
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.max_response_bytes, 4_194_304);
        assert!(config.genesis_time > 0);
    }

    #[test]
    fn test_invalid_values() {
        let config = SyncConfig {
            slots_per_epoch: 0,
            ..SyncConfig::default()
        };
        assert_eq!(
            config.validate(),
            Err(ConfigError::SlotsPerEpoch {
                value: 0,
                max: MAX_SLOTS_PER_EPOCH
            })
        );

        let config = SyncConfig {
            poll_interval: Duration::ZERO,
            ..SyncConfig::default()
        };
        assert_eq!(
            config.validate(),
            Err(ConfigError::ZeroDuration("poll interval"))
        );

        let config = SyncConfig {
            max_retries: 0,
            ..SyncConfig::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::ZeroRetries));
    }

    #[test]
    fn test_endpoint_validation() {
        let config = SyncConfig {
            execution_endpoint: "127.0.0.1:8545".into(),
            ..SyncConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Endpoint {
                name: "execution",
                ..
            })
        ));
    }

    #[test]
    fn test_retry_policy_from_config() {
        let config = SyncConfig {
            max_retries: 3,
            retry_delay: Duration::from_secs(10),
            backoff: Backoff::Exponential,
            ..SyncConfig::default()
        };
        let policy = config.retry_policy();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.delay, Duration::from_secs(10));
        assert_eq!(policy.backoff, Backoff::Exponential);
    }
}
