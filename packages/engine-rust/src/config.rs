//! Engine configuration.
//!
//! Every section has a `Default` and deserializes from JSON with missing
//! fields falling back to those defaults.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

/// Top-level configuration for a mediation engine instance.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Identifier of this engine node, used in logs.
    pub node_id: String,
    /// Saga finalization settings.
    pub saga: SagaConfig,
    /// Dispatch pipeline settings.
    pub dispatch: DispatchConfig,
}

/// Retry settings applied when finalizing sagas.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SagaConfig {
    /// Maximum number of retries after the first failed finalization attempt.
    pub max_retry_attempts: u32,
    /// Fixed delay between finalization attempts in milliseconds.
    pub retry_delay_ms: u64,
}

impl Default for SagaConfig {
    fn default() -> Self {
        Self {
            max_retry_attempts: 5,
            retry_delay_ms: 5000,
        }
    }
}

impl SagaConfig {
    /// Delay between finalization attempts.
    #[must_use]
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

/// Settings for the dispatch loop and its middleware.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Default timeout for a delivery in milliseconds, when the delivery sets none.
    pub default_timeout_ms: u64,
    /// Maximum number of in-flight deliveries before load shedding.
    pub max_concurrent_deliveries: u32,
    /// Capacity of the bounded submission channel.
    pub channel_capacity: usize,
    /// Interval between dispatch loop housekeeping ticks in milliseconds.
    pub tick_interval_ms: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: 30_000,
            max_concurrent_deliveries: 1000,
            channel_capacity: 256,
            tick_interval_ms: 10_000,
        }
    }
}

impl DispatchConfig {
    /// Default per-delivery timeout.
    #[must_use]
    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }

    #[must_use]
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }
}

impl EngineConfig {
    /// Parses a JSON document.
    ///
    /// # Errors
    ///
    /// Returns an error if the document is not valid JSON for this shape.
    pub fn from_json_str(json: &str) -> anyhow::Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Reads and parses a JSON file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("reading {}: {e}", path.display()))?;
        Self::from_json_str(&raw)
    }
}
