//! Provider connection settings.

use std::fmt;
use std::time::Duration;

use domain::{HiveError, ModelName, ProviderName};

/// OpenAI's public endpoint; any compatible server can be substituted.
pub const DEFAULT_API_BASE: &str = "https://api.openai.com/v1";

pub const DEFAULT_MODEL: &str = "gpt-4o-mini";

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Connection settings for an OpenAI-compatible chat completions endpoint.
#[derive(Clone)]
pub struct ProviderConfig {
    /// Label used in errors and logs.
    pub name: ProviderName,
    /// Base URL without the trailing `/chat/completions`.
    pub api_base: String,
    pub api_key: String,
    /// Model used when the caller does not pick one.
    pub default_model: ModelName,
    pub timeout: Duration,
}

// The key never appears in logs.
impl fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("name", &self.name)
            .field("api_base", &self.api_base)
            .field("api_key", &mask_api_key(&self.api_key))
            .field("default_model", &self.default_model)
            .field("timeout", &self.timeout)
            .finish()
    }
}

fn mask_api_key(key: &str) -> String {
    if key.len() <= 8 || !key.is_ascii() {
        return "****".to_string();
    }
    format!("{}...{}", &key[..4], &key[key.len() - 4..])
}

impl ProviderConfig {
    /// Settings for `api_key` against the default endpoint and model.
    pub fn new(api_key: impl Into<String>) -> Result<Self, HiveError> {
        Ok(Self {
            name: provider_name("openai")?,
            api_base: DEFAULT_API_BASE.to_string(),
            api_key: api_key.into(),
            default_model: model_name(DEFAULT_MODEL)?,
            timeout: DEFAULT_TIMEOUT,
        })
    }

    /// Reads `HIVE_API_KEY` (required), `HIVE_API_BASE`, `HIVE_MODEL` and
    /// `HIVE_REQUEST_TIMEOUT_SECS` from the process environment.
    pub fn from_env() -> Result<Self, HiveError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// [`from_env`](Self::from_env) over an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, HiveError> {
        let api_key = lookup("HIVE_API_KEY")
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| HiveError::configuration("HIVE_API_KEY is not set"))?;
        let mut config = Self::new(api_key)?;

        if let Some(base) = lookup("HIVE_API_BASE") {
            config = config.with_api_base(base)?;
        }
        if let Some(model) = lookup("HIVE_MODEL") {
            config.default_model = model_name(&model)?;
        }
        if let Some(raw) = lookup("HIVE_REQUEST_TIMEOUT_SECS") {
            let secs: u64 = raw.trim().parse().map_err(|_| {
                HiveError::configuration(format!(
                    "HIVE_REQUEST_TIMEOUT_SECS must be a whole number of seconds (got '{raw}')"
                ))
            })?;
            if secs == 0 {
                return Err(HiveError::configuration(
                    "HIVE_REQUEST_TIMEOUT_SECS must be positive",
                ));
            }
            config.timeout = Duration::from_secs(secs);
        }
        Ok(config)
    }

    pub fn with_api_base(mut self, base: impl Into<String>) -> Result<Self, HiveError> {
        let base = base.into();
        let base = base.trim().trim_end_matches('/');
        if !(base.starts_with("http://") || base.starts_with("https://")) {
            return Err(HiveError::configuration(format!(
                "API base must be an http(s) URL (got '{base}')"
            )));
        }
        self.api_base = base.to_string();
        Ok(self)
    }

    pub fn with_name(mut self, name: &str) -> Result<Self, HiveError> {
        self.name = provider_name(name)?;
        Ok(self)
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub(crate) fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.api_base)
    }
}

fn provider_name(name: &str) -> Result<ProviderName, HiveError> {
    ProviderName::new(name)
        .ok_or_else(|| HiveError::configuration("provider name must not be empty"))
}

fn model_name(model: &str) -> Result<ModelName, HiveError> {
    ModelName::new(model.trim())
        .ok_or_else(|| HiveError::configuration("model name must not be empty"))
}
