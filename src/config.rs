//! Runtime tunables.
//!
//! Every numeric constant the switchboard relies on lives here. The
//! structure deserializes with missing fields filled from the defaults, so
//! surrounding glue can load it from any serde format; durations are
//! expressed in milliseconds.

use crate::backend::domain::HealthPolicy;
use crate::streaming::adapters::QueuePolicy;
use crate::tool_registry::services::DEFAULT_DISCOVERY_WINDOW;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Error returned for unusable configuration values.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// A value that must be positive is zero.
    #[error("configuration value '{0}' must be greater than zero")]
    ZeroValue(&'static str),
    /// The circuit backoff cap is below its base.
    #[error("circuit_open_cap must not be shorter than circuit_open_base")]
    InvertedCircuitBackoff,
}

/// Configuration of a [`crate::runtime::Switchboard`].
///
/// # Examples
///
/// ```
/// use switchboard::config::SwitchboardConfig;
///
/// let config = SwitchboardConfig::default();
/// assert_eq!(config.failure_threshold, 3);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SwitchboardConfig {
    /// Consecutive retryable failures that open a backend's circuit.
    pub failure_threshold: u32,
    /// Open interval after the first trip.
    #[serde(with = "millis")]
    pub circuit_open_base: Duration,
    /// Upper bound on the open interval after repeated trips.
    #[serde(with = "millis")]
    pub circuit_open_cap: Duration,
    /// Attempt timeout for backends that declare none.
    #[serde(with = "millis")]
    pub backend_timeout: Duration,
    /// Hard timeout of a single tool call.
    #[serde(with = "millis")]
    pub tool_timeout: Duration,
    /// Lifetime of cached tool results.
    #[serde(with = "millis")]
    pub cache_ttl: Duration,
    /// Maximum number of cached tool results.
    pub cache_capacity: usize,
    /// External tools discovered less than this apart tie on recency.
    #[serde(with = "millis")]
    pub discovery_window: Duration,
    /// Deliveries a consumer queue holds before the consumer is stalled.
    pub queue_capacity: usize,
    /// Extra deliveries buffered for a stalled consumer within its grace.
    pub queue_overflow: usize,
    /// How long a stalled consumer is tolerated before it is dropped.
    #[serde(with = "millis")]
    pub slow_consumer_grace: Duration,
}

impl Default for SwitchboardConfig {
    fn default() -> Self {
        let health = HealthPolicy::default();
        let queue = QueuePolicy::default();
        Self {
            failure_threshold: health.failure_threshold,
            circuit_open_base: health.open_base,
            circuit_open_cap: health.open_cap,
            backend_timeout: Duration::from_secs(30),
            tool_timeout: Duration::from_secs(10),
            cache_ttl: Duration::from_secs(300),
            cache_capacity: 1024,
            discovery_window: DEFAULT_DISCOVERY_WINDOW,
            queue_capacity: queue.capacity,
            queue_overflow: queue.overflow,
            slow_consumer_grace: queue.grace,
        }
    }
}

impl SwitchboardConfig {
    /// Creates a configuration that tolerates flaky backends and slow
    /// consumers for longer.
    #[must_use]
    pub fn tolerant() -> Self {
        Self {
            failure_threshold: 5,
            circuit_open_base: Duration::from_secs(10),
            queue_capacity: 256,
            queue_overflow: 256,
            slow_consumer_grace: Duration::from_secs(10),
            ..Self::default()
        }
    }

    /// Creates a configuration with tight limits.
    ///
    /// Useful for resource-constrained deployments.
    #[must_use]
    pub const fn strict() -> Self {
        Self {
            failure_threshold: 2,
            circuit_open_base: Duration::from_secs(60),
            circuit_open_cap: Duration::from_secs(600),
            backend_timeout: Duration::from_secs(15),
            tool_timeout: Duration::from_secs(5),
            cache_ttl: Duration::from_secs(60),
            cache_capacity: 128,
            discovery_window: DEFAULT_DISCOVERY_WINDOW,
            queue_capacity: 16,
            queue_overflow: 0,
            slow_consumer_grace: Duration::from_millis(500),
        }
    }

    /// Checks that every value is usable.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ZeroValue`] naming the first zero value and
    /// [`ConfigError::InvertedCircuitBackoff`] when the cap is below the
    /// base.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("failure_threshold", self.failure_threshold > 0),
            ("circuit_open_base", !self.circuit_open_base.is_zero()),
            ("backend_timeout", !self.backend_timeout.is_zero()),
            ("tool_timeout", !self.tool_timeout.is_zero()),
            ("cache_capacity", self.cache_capacity > 0),
            ("queue_capacity", self.queue_capacity > 0),
        ];
        if let Some(&(field, _)) = positive.iter().find(|(_, ok)| !ok) {
            return Err(ConfigError::ZeroValue(field));
        }
        if self.circuit_open_cap < self.circuit_open_base {
            return Err(ConfigError::InvertedCircuitBackoff);
        }
        Ok(())
    }

    /// Returns the circuit breaker policy.
    #[must_use]
    pub const fn health_policy(&self) -> HealthPolicy {
        HealthPolicy {
            failure_threshold: self.failure_threshold,
            open_base: self.circuit_open_base,
            open_cap: self.circuit_open_cap,
        }
    }

    /// Returns the consumer queue policy.
    #[must_use]
    pub const fn queue_policy(&self) -> QueuePolicy {
        QueuePolicy {
            capacity: self.queue_capacity,
            overflow: self.queue_overflow,
            grace: self.slow_consumer_grace,
        }
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
