//! Bounded exponential-backoff retry around async operations.
//!
//! The delay after failed attempt `n` (1-based) is
//! `min(initial_delay * factor^(n-1) + jitter, max_delay)`, raised to a
//! provider's `Retry-After` hint when one is present (still capped at
//! `max_delay`). Jitter is drawn from a [`StdRng`] owned by the policy so
//! tests can seed it.

use std::fmt::Display;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use domain::{Classify, HiveError, RetryClass};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Backoff parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts including the first one. Values below 1 behave as 1.
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub factor: f64,
    /// Upper bound of the uniform random jitter added to each delay.
    pub jitter_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 1_000,
            max_delay_ms: 30_000,
            factor: 2.0,
            jitter_ms: 250,
        }
    }
}

impl RetryConfig {
    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

/// Passed to the `on_retry` hook before each backoff sleep.
#[derive(Debug)]
pub struct RetryEvent<'a, E> {
    /// The attempt that just failed (1-based).
    pub attempt: u32,
    /// Sleep before the next attempt.
    pub delay: Duration,
    pub error: &'a E,
}

type ClassifyFn<E> = Arc<dyn Fn(&E) -> RetryClass + Send + Sync>;
type OnRetryFn<E> = Arc<dyn Fn(&RetryEvent<'_, E>) + Send + Sync>;

/// Retry policy for fallible async operations.
pub struct RetryPolicy<E = HiveError> {
    config: RetryConfig,
    rng: Mutex<StdRng>,
    classify: ClassifyFn<E>,
    on_retry: Option<OnRetryFn<E>>,
}

impl<E: Classify + 'static> RetryPolicy<E> {
    /// Creates a policy seeded from OS entropy, classifying errors with
    /// [`Classify::retry_class`].
    pub fn new(config: RetryConfig) -> Self {
        Self::from_rng(config, StdRng::from_entropy())
    }

    /// Creates a policy whose jitter sequence is fully determined by `seed`.
    pub fn seeded(config: RetryConfig, seed: u64) -> Self {
        Self::from_rng(config, StdRng::seed_from_u64(seed))
    }

    fn from_rng(config: RetryConfig, rng: StdRng) -> Self {
        Self {
            config,
            rng: Mutex::new(rng),
            classify: Arc::new(|e: &E| e.retry_class()),
            on_retry: None,
        }
    }
}

impl<E: 'static> RetryPolicy<E> {
    /// Replaces the transient/permanent classifier. Errors accepted by
    /// `retry_if` are retried on the policy's own schedule.
    pub fn with_retry_if(mut self, retry_if: impl Fn(&E) -> bool + Send + Sync + 'static) -> Self {
        self.classify = Arc::new(move |e: &E| {
            if retry_if(e) {
                RetryClass::Transient { after: None }
            } else {
                RetryClass::Permanent
            }
        });
        self
    }

    /// Installs an observation hook called before every backoff sleep.
    pub fn with_on_retry(
        mut self,
        on_retry: impl Fn(&RetryEvent<'_, E>) + Send + Sync + 'static,
    ) -> Self {
        self.on_retry = Some(Arc::new(on_retry));
        self
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Computes the sleep after failed attempt `attempt` (1-based), consuming
    /// one jitter sample.
    pub fn backoff_delay(&self, attempt: u32, hint: Option<Duration>) -> Duration {
        let max_ms = self.config.max_delay_ms as f64;
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let base_ms = self.config.initial_delay_ms as f64 * self.config.factor.powi(exponent);
        let base_ms = if base_ms.is_finite() {
            base_ms.clamp(0.0, max_ms)
        } else {
            max_ms
        };
        let jitter_ms = if self.config.jitter_ms == 0 {
            0
        } else {
            let mut rng = self.rng.lock().unwrap_or_else(|e| e.into_inner());
            rng.gen_range(0..=self.config.jitter_ms)
        };
        let delay = Duration::from_millis((base_ms + jitter_ms as f64).min(max_ms) as u64);
        match hint {
            Some(after) => delay.max(after).min(self.config.max_delay()),
            None => delay,
        }
    }

    /// Runs `operation` until it succeeds, fails permanently, or the attempt
    /// budget is spent. The last error is returned unchanged.
    pub async fn retry<T, F, Fut>(&self, mut operation: F) -> Result<T, E>
    where
        E: Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            let error = match operation().await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(attempts = attempt, "Operation succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(error) => error,
            };

            let hint = match (self.classify)(&error) {
                RetryClass::Transient { after } => after,
                RetryClass::Permanent => {
                    debug!(attempt, error = %error, "Non-retryable error");
                    return Err(error);
                }
            };

            if attempt >= max_attempts {
                warn!(max_attempts, error = %error, "Retry attempts exhausted");
                return Err(error);
            }

            let delay = self.backoff_delay(attempt, hint);
            if let Some(on_retry) = &self.on_retry {
                on_retry(&RetryEvent {
                    attempt,
                    delay,
                    error: &error,
                });
            }
            warn!(
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Attempt failed, retrying"
            );
            tokio::time::sleep(delay).await;
        }
    }
}

impl<E> std::fmt::Debug for RetryPolicy<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("config", &self.config)
            .field("has_on_retry", &self.on_retry.is_some())
            .finish()
    }
}
