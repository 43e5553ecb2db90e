//! Replication core configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::{duration_ms, ConfigError, ConfigResult};
use crate::record::CURRENCY_EPSILON;

/// Timers and limits of the replication core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplicationConfig {
    /// Hard deadline for an operation's transaction
    #[serde(rename = "operation_timeout_ms", with = "duration_ms")]
    pub operation_timeout: Duration,

    /// How long a confirmed operation stays visible before removal
    #[serde(rename = "confirmed_grace_ms", with = "duration_ms")]
    pub confirmed_grace: Duration,

    /// Delay between `failed` and `rolled_back`
    #[serde(rename = "rollback_delay_ms", with = "duration_ms")]
    pub rollback_delay: Duration,

    /// How long a rolled-back operation stays visible before removal
    #[serde(rename = "rolled_back_grace_ms", with = "duration_ms")]
    pub rolled_back_grace: Duration,

    /// Low-severity conflicts dismiss themselves after this long
    #[serde(rename = "low_conflict_expiry_ms", with = "duration_ms")]
    pub low_conflict_expiry: Duration,

    /// Capacity of the change-notification channel
    pub event_capacity: usize,

    /// Amounts closer than this are equal
    pub currency_epsilon: f64,
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            operation_timeout: Duration::from_secs(10),
            confirmed_grace: Duration::from_secs(2),
            rollback_delay: Duration::from_secs(3),
            rolled_back_grace: Duration::from_secs(2),
            low_conflict_expiry: Duration::from_secs(10),
            event_capacity: 256,
            currency_epsilon: CURRENCY_EPSILON,
        }
    }
}

impl ReplicationConfig {
    /// Override the operation deadline.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = timeout;
        self
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.operation_timeout.is_zero() {
            return Err(ConfigError::invalid(
                "replication.operation_timeout_ms",
                "must be greater than zero",
            ));
        }
        if self.event_capacity == 0 {
            return Err(ConfigError::invalid(
                "replication.event_capacity",
                "must be greater than zero",
            ));
        }
        if self.currency_epsilon.is_nan() || self.currency_epsilon <= 0.0 {
            return Err(ConfigError::invalid(
                "replication.currency_epsilon",
                format!("must be positive, got {}", self.currency_epsilon),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ReplicationConfig::default();
        assert_eq!(config.operation_timeout, Duration::from_secs(10));
        assert_eq!(config.rollback_delay, Duration::from_secs(3));
        assert_eq!(config.currency_epsilon, 0.01);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let config = ReplicationConfig::default().with_timeout(Duration::ZERO);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_nan_epsilon_rejected() {
        let config = ReplicationConfig {
            currency_epsilon: f64::NAN,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
