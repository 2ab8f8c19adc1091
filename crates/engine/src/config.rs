//! Engine configuration.
//!
//! Every section deserializes with defaults, so an empty JSON object is a
//! valid configuration. [`EngineConfig::validate`] must pass before the
//! engine is built from it.

use std::time::Duration;

use domain::{CostBudget, HiveError};
use serde::{Deserialize, Serialize};

use crate::cache::CacheConfig;
use crate::retry::RetryConfig;

/// Top-level engine configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    /// Global spend ceiling in USD. `None` means unlimited.
    #[serde(default)]
    pub max_total_cost: Option<f64>,
    #[serde(default)]
    pub swarm: SwarmConfig,
    #[serde(default)]
    pub batch: BatchConfig,
}

/// Swarm loop settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwarmConfig {
    /// Number of workers registered by the composition root.
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_true")]
    pub stop_when_empty: bool,
    /// Safety bound on loop iterations. `None` runs until stopped.
    #[serde(default)]
    pub max_iterations: Option<u64>,
}

impl Default for SwarmConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            poll_interval_ms: default_poll_interval_ms(),
            stop_when_empty: true,
            max_iterations: None,
        }
    }
}

impl SwarmConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Batch processing settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchConfig {
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default)]
    pub delay_between_batches_ms: u64,
    #[serde(default = "default_max_retries_per_item")]
    pub max_retries_per_item: u32,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            delay_between_batches_ms: 0,
            max_retries_per_item: default_max_retries_per_item(),
        }
    }
}

impl BatchConfig {
    /// The inter-chunk delay, or `None` when it is zero.
    pub fn delay_between_batches(&self) -> Option<Duration> {
        (self.delay_between_batches_ms > 0)
            .then(|| Duration::from_millis(self.delay_between_batches_ms))
    }
}

fn default_workers() -> usize {
    4
}
fn default_poll_interval_ms() -> u64 {
    1_000
}
fn default_true() -> bool {
    true
}
fn default_concurrency() -> usize {
    5
}
fn default_max_retries_per_item() -> u32 {
    3
}

impl EngineConfig {
    /// Parses a JSON document, filling missing fields with defaults.
    pub fn from_json(raw: &str) -> Result<Self, HiveError> {
        let config: Self = serde_json::from_str(raw)
            .map_err(|e| HiveError::configuration(format!("invalid engine config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects settings the engine cannot run with.
    pub fn validate(&self) -> Result<(), HiveError> {
        if self.retry.max_attempts == 0 {
            return Err(HiveError::configuration("retry.max_attempts must be at least 1"));
        }
        if !self.retry.factor.is_finite() || self.retry.factor < 1.0 {
            return Err(HiveError::configuration(format!(
                "retry.factor must be a finite number >= 1 (got {})",
                self.retry.factor
            )));
        }
        if self.retry.initial_delay_ms > self.retry.max_delay_ms {
            return Err(HiveError::configuration(format!(
                "retry.initial_delay_ms ({}) exceeds retry.max_delay_ms ({})",
                self.retry.initial_delay_ms, self.retry.max_delay_ms
            )));
        }
        if self.cache.max_entries == 0 {
            return Err(HiveError::configuration("cache.max_entries must be at least 1"));
        }
        if let Some(limit) = self.max_total_cost {
            if CostBudget::new(limit).is_none() {
                return Err(HiveError::configuration(format!(
                    "max_total_cost must be a positive number (got {limit})"
                )));
            }
        }
        if self.swarm.workers == 0 {
            return Err(HiveError::configuration("swarm.workers must be at least 1"));
        }
        if self.swarm.poll_interval_ms == 0 {
            return Err(HiveError::configuration("swarm.poll_interval_ms must be positive"));
        }
        if self.batch.concurrency == 0 {
            return Err(HiveError::configuration("batch.concurrency must be at least 1"));
        }
        Ok(())
    }

    /// The configured spend ceiling.
    pub fn budget(&self) -> Option<CostBudget> {
        self.max_total_cost.and_then(CostBudget::new)
    }
}
