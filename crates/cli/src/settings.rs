//! Run settings read from `HIVE_*` environment variables.

use std::str::FromStr;

use domain::HiveError;
use engine::EngineConfig;

/// Everything the binary needs besides the provider connection.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub engine: EngineConfig,
    /// Persona prompt sent as the system message of every task.
    pub system_prompt: Option<String>,
    /// Sampling temperature; `0` makes answers cacheable.
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

impl Settings {
    pub fn from_env() -> Result<Self, HiveError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds settings from `lookup`, starting from engine defaults.
    ///
    /// | Variable | Field |
    /// |----------|-------|
    /// | `HIVE_WORKERS` | `swarm.workers` |
    /// | `HIVE_POLL_INTERVAL_MS` | `swarm.poll_interval_ms` |
    /// | `HIVE_MAX_TOTAL_COST` | `max_total_cost` (USD) |
    /// | `HIVE_MAX_ATTEMPTS` | `retry.max_attempts` |
    /// | `HIVE_CACHE_ENABLED` | `cache.enabled` |
    /// | `HIVE_CACHE_TTL_SECS` | `cache.ttl_secs` |
    /// | `HIVE_CACHE_MAX_ENTRIES` | `cache.max_entries` |
    /// | `HIVE_SYSTEM_PROMPT` | persona prompt |
    /// | `HIVE_TEMPERATURE` | sampling temperature |
    /// | `HIVE_MAX_TOKENS` | completion length cap |
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, HiveError> {
        let mut engine = EngineConfig::default();
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(raw) = var("HIVE_WORKERS") {
            engine.swarm.workers = parse("HIVE_WORKERS", &raw)?;
        }
        if let Some(raw) = var("HIVE_POLL_INTERVAL_MS") {
            engine.swarm.poll_interval_ms = parse("HIVE_POLL_INTERVAL_MS", &raw)?;
        }
        if let Some(raw) = var("HIVE_MAX_TOTAL_COST") {
            engine.max_total_cost = Some(parse("HIVE_MAX_TOTAL_COST", &raw)?);
        }
        if let Some(raw) = var("HIVE_MAX_ATTEMPTS") {
            engine.retry.max_attempts = parse("HIVE_MAX_ATTEMPTS", &raw)?;
        }
        if let Some(raw) = var("HIVE_CACHE_ENABLED") {
            engine.cache.enabled = parse("HIVE_CACHE_ENABLED", &raw)?;
        }
        if let Some(raw) = var("HIVE_CACHE_TTL_SECS") {
            engine.cache.ttl_secs = parse("HIVE_CACHE_TTL_SECS", &raw)?;
        }
        if let Some(raw) = var("HIVE_CACHE_MAX_ENTRIES") {
            engine.cache.max_entries = parse("HIVE_CACHE_MAX_ENTRIES", &raw)?;
        }
        engine.validate()?;

        let temperature = match var("HIVE_TEMPERATURE") {
            Some(raw) => {
                let t: f32 = parse("HIVE_TEMPERATURE", &raw)?;
                if !(0.0..=2.0).contains(&t) {
                    return Err(HiveError::configuration(format!(
                        "HIVE_TEMPERATURE must be between 0 and 2 (got {t})"
                    )));
                }
                Some(t)
            }
            None => None,
        };
        let max_tokens = var("HIVE_MAX_TOKENS")
            .map(|raw| parse("HIVE_MAX_TOKENS", &raw))
            .transpose()?;

        Ok(Self {
            engine,
            system_prompt: var("HIVE_SYSTEM_PROMPT"),
            temperature,
            max_tokens,
        })
    }
}

fn parse<T: FromStr>(key: &str, raw: &str) -> Result<T, HiveError> {
    raw.trim()
        .parse()
        .map_err(|_| HiveError::configuration(format!("{key} has an invalid value '{raw}'")))
}
