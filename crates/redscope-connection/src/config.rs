//! Client pool configuration

use std::time::Duration;

use redscope_core::{Database, RedscopeError, Result};
use redscope_driver_redis::{ConnectionOptions, MULTIPLEXED_CONNECTOR, RetryStrategy};
use serde::{Deserialize, Serialize};

/// Configuration for the Redis client pool and the factory feeding it
///
/// All durations are stored in milliseconds so the struct maps one to one
/// onto a `[redis_clients]` TOML table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientsConfig {
    /// Clients unused for longer than this are evicted by the sweep
    max_idle_threshold_ms: u64,
    /// How often the sweep runs
    idle_sync_interval_ms: u64,
    /// Connection attempts before giving up
    retry_times: u32,
    /// Delay step between connection attempts
    retry_delay_ms: u64,
    connect_timeout_ms: u64,
    /// Per-command timeout, overridden by the database timeout when set
    response_timeout_ms: u64,
    /// Node connector used until a feature flag selects another one
    default_connector: String,
}

impl ClientsConfig {
    /// Parse a config from TOML; missing keys keep their defaults
    pub fn from_toml_str(input: &str) -> Result<Self> {
        let config: Self = toml::from_str(input)
            .map_err(|e| RedscopeError::Configuration(format!("Invalid clients config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.idle_sync_interval_ms == 0 {
            return Err(RedscopeError::Configuration(
                "idle_sync_interval_ms must be greater than 0".to_string(),
            ));
        }
        if self.default_connector.trim().is_empty() {
            return Err(RedscopeError::Configuration(
                "default_connector must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    pub fn with_max_idle_threshold_ms(mut self, threshold_ms: u64) -> Self {
        self.max_idle_threshold_ms = threshold_ms;
        self
    }

    pub fn with_idle_sync_interval_ms(mut self, interval_ms: u64) -> Self {
        self.idle_sync_interval_ms = interval_ms;
        self
    }

    pub fn with_retry(mut self, retry_times: u32, retry_delay_ms: u64) -> Self {
        self.retry_times = retry_times;
        self.retry_delay_ms = retry_delay_ms;
        self
    }

    pub fn with_timeouts_ms(mut self, connect_timeout_ms: u64, response_timeout_ms: u64) -> Self {
        self.connect_timeout_ms = connect_timeout_ms;
        self.response_timeout_ms = response_timeout_ms;
        self
    }

    pub fn with_default_connector(mut self, name: impl Into<String>) -> Self {
        self.default_connector = name.into();
        self
    }

    pub fn max_idle_threshold(&self) -> Duration {
        Duration::from_millis(self.max_idle_threshold_ms)
    }

    pub fn idle_sync_interval(&self) -> Duration {
        Duration::from_millis(self.idle_sync_interval_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }

    pub fn default_connector(&self) -> &str {
        &self.default_connector
    }

    pub fn retry_strategy(&self) -> RetryStrategy {
        RetryStrategy::new(self.retry_times, self.retry_delay_ms)
    }

    /// Options for connecting to `database`: retries enabled, configured
    /// timeouts unless the database sets its own
    pub fn connection_options(&self, database: &Database) -> ConnectionOptions {
        ConnectionOptions::default()
            .with_retry(true)
            .with_retry_strategy(self.retry_strategy())
            .with_timeouts(self.connect_timeout(), self.response_timeout())
            .for_database(database)
    }
}

impl Default for ClientsConfig {
    /// Defaults:
    /// - max_idle_threshold: 1 hour
    /// - idle_sync_interval: 1 hour
    /// - retry: 3 attempts, 500ms step
    /// - connect/response timeout: 30 seconds
    /// - default_connector: multiplexed
    fn default() -> Self {
        Self {
            max_idle_threshold_ms: 3_600_000,
            idle_sync_interval_ms: 3_600_000,
            retry_times: 3,
            retry_delay_ms: 500,
            connect_timeout_ms: 30_000,
            response_timeout_ms: 30_000,
            default_connector: MULTIPLEXED_CONNECTOR.to_string(),
        }
    }
}
