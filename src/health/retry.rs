//! Centralized retry with exponential backoff
//!
//! Every external call in the engine goes through [`RetryExecutor::with_retry`]
//! rather than ad-hoc retry loops at call sites. The executor consults the
//! health registry before attempting (an open circuit refuses the call
//! outright) and forwards every attempt's outcome back to it.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, warn};

use super::registry::HealthRegistry;

/// Retry/backoff parameters for one dependency call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Retries after the initial attempt (2 means 3 attempts total)
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// First backoff delay in milliseconds
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Backoff ceiling in milliseconds
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Multiplier applied per attempt
    #[serde(default = "default_exponential_base")]
    pub exponential_base: f64,

    /// Scale each delay by a uniform factor in [0.5, 1.0]
    #[serde(default = "default_jitter")]
    pub jitter: bool,
}

fn default_max_retries() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    1_000
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_exponential_base() -> f64 {
    2.0
}

fn default_jitter() -> bool {
    true
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            exponential_base: default_exponential_base(),
            jitter: default_jitter(),
        }
    }
}

impl RetryConfig {
    /// Nominal (pre-jitter) delay after the given zero-based attempt:
    /// `min(base_delay * exponential_base^attempt, max_delay)`
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = self.exponential_base.powi(attempt as i32);
        let ms = (self.base_delay_ms as f64 * factor).min(self.max_delay_ms as f64);
        Duration::from_millis(ms as u64)
    }
}

/// Why a guarded call did not produce a value
#[derive(Debug, Error)]
pub enum RetryError<E> {
    /// The circuit was open; no attempt was made and no retry consumed
    #[error("circuit open for {service}")]
    CircuitOpen { service: String },

    /// Every attempt failed; carries the final attempt's error
    #[error("{service} failed after {attempts} attempts: {error}")]
    Exhausted {
        service: String,
        attempts: u32,
        error: E,
    },
}

impl<E> RetryError<E> {
    /// Whether the call was refused because the circuit is open
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, RetryError::CircuitOpen { .. })
    }

    /// The final attempt's error, if any attempt was made
    pub fn into_last_error(self) -> Option<E> {
        match self {
            RetryError::CircuitOpen { .. } => None,
            RetryError::Exhausted { error, .. } => Some(error),
        }
    }
}

/// Executes fallible operations with bounded retries and backoff
#[derive(Clone)]
pub struct RetryExecutor {
    registry: Arc<HealthRegistry>,
}

impl RetryExecutor {
    /// Create an executor backed by the given registry
    pub fn new(registry: Arc<HealthRegistry>) -> Self {
        Self { registry }
    }

    /// The health registry this executor reports into
    pub fn registry(&self) -> &Arc<HealthRegistry> {
        &self.registry
    }

    /// Run `operation` with bounded retries and exponential backoff
    ///
    /// The circuit is checked once up front: open means an immediate
    /// [`RetryError::CircuitOpen`] with no attempt made. Every attempt's
    /// outcome is forwarded to the registry. After the final attempt the
    /// last error is surfaced as [`RetryError::Exhausted`].
    pub async fn with_retry<T, E, F, Fut>(
        &self,
        service: &str,
        config: &RetryConfig,
        mut operation: F,
    ) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        self.registry.register(service);

        if self.registry.is_circuit_open(service) {
            debug!(%service, "with_retry: circuit open, refusing call");
            return Err(RetryError::CircuitOpen {
                service: service.to_string(),
            });
        }

        let mut attempt: u32 = 0;
        loop {
            match operation().await {
                Ok(value) => {
                    self.registry.record_success(service);
                    debug!(%service, attempt, "with_retry: attempt succeeded");
                    return Ok(value);
                }
                Err(error) => {
                    self.registry.record_failure(service, &error.to_string());
                    warn!(%service, attempt, %error, "with_retry: attempt failed");

                    if attempt >= config.max_retries {
                        return Err(RetryError::Exhausted {
                            service: service.to_string(),
                            attempts: attempt + 1,
                            error,
                        });
                    }

                    let mut delay = config.delay_for(attempt);
                    if config.jitter {
                        let factor = rand::rng().random_range(0.5..=1.0);
                        delay = delay.mul_f64(factor);
                    }
                    debug!(%service, ?delay, "with_retry: backing off");
                    sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}
