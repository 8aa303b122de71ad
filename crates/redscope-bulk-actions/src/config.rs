//! Bulk action configuration

use std::time::Duration;

use redscope_core::{RedscopeError, Result};
use serde::{Deserialize, Serialize};

/// Tunables for bulk actions and bulk uploads
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BulkActionsConfig {
    /// Minimum time between two progress broadcasts of one action
    overview_interval_ms: u64,
    /// Commands sent per round trip during an upload
    import_batch_size: usize,
}

impl Default for BulkActionsConfig {
    fn default() -> Self {
        Self {
            overview_interval_ms: 1000,
            import_batch_size: 10_000,
        }
    }
}

impl BulkActionsConfig {
    /// Parse a config from TOML; missing keys keep their defaults
    pub fn from_toml_str(input: &str) -> Result<Self> {
        let config: Self = toml::from_str(input).map_err(|e| {
            RedscopeError::Configuration(format!("Invalid bulk actions config: {}", e))
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.import_batch_size == 0 {
            return Err(RedscopeError::Configuration(
                "import_batch_size must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    pub fn with_overview_interval_ms(mut self, interval_ms: u64) -> Self {
        self.overview_interval_ms = interval_ms;
        self
    }

    pub fn with_import_batch_size(mut self, batch_size: usize) -> Self {
        self.import_batch_size = batch_size;
        self
    }

    pub fn overview_interval(&self) -> Duration {
        Duration::from_millis(self.overview_interval_ms)
    }

    pub fn import_batch_size(&self) -> usize {
        self.import_batch_size
    }
}
