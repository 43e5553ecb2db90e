//! Delivery engine configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::{duration_ms, ConfigError, ConfigResult};

/// Rate limit, batching, retry and cache settings of the delivery engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeliveryConfig {
    /// Notifications initiated per window
    pub rate_limit: u32,
    #[serde(rename = "rate_window_ms", with = "duration_ms")]
    pub rate_window: Duration,

    /// Recipients per batch
    pub batch_size: usize,
    #[serde(rename = "inter_batch_delay_ms", with = "duration_ms")]
    pub inter_batch_delay: Duration,

    /// First retry waits this long; attempt n waits `base * 2^(n-1)`
    #[serde(rename = "retry_base_ms", with = "duration_ms")]
    pub retry_base: Duration,
    /// Attempts (including the first) before an entry is dropped
    pub max_attempts: u32,
    /// Entries older than this are dropped regardless of attempts
    #[serde(rename = "max_age_ms", with = "duration_ms")]
    pub max_age: Duration,
    /// Retry queue bound; oldest entries are evicted beyond it
    pub queue_capacity: usize,
    #[serde(rename = "sweep_interval_ms", with = "duration_ms")]
    pub sweep_interval: Duration,

    pub token_cache_capacity: usize,
    #[serde(rename = "token_ttl_ms", with = "duration_ms")]
    pub token_ttl: Duration,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            rate_limit: 60,
            rate_window: Duration::from_secs(60),
            batch_size: 10,
            inter_batch_delay: Duration::from_millis(500),
            retry_base: Duration::from_secs(1),
            max_attempts: 5,
            max_age: Duration::from_secs(60 * 60),
            queue_capacity: 1000,
            sweep_interval: Duration::from_secs(5),
            token_cache_capacity: 512,
            token_ttl: Duration::from_secs(60 * 60),
        }
    }
}

impl DeliveryConfig {
    pub fn validate(&self) -> ConfigResult<()> {
        let positive: [(&'static str, bool); 8] = [
            ("delivery.rate_limit", self.rate_limit > 0),
            ("delivery.rate_window_ms", !self.rate_window.is_zero()),
            ("delivery.batch_size", self.batch_size > 0),
            ("delivery.retry_base_ms", !self.retry_base.is_zero()),
            ("delivery.max_attempts", self.max_attempts > 0),
            ("delivery.queue_capacity", self.queue_capacity > 0),
            ("delivery.sweep_interval_ms", !self.sweep_interval.is_zero()),
            ("delivery.token_cache_capacity", self.token_cache_capacity > 0),
        ];
        for (field, ok) in positive {
            if !ok {
                return Err(ConfigError::invalid(field, "must be greater than zero"));
            }
        }
        Ok(())
    }
}
