//! Centralized retry policy for storage-boundary calls.
//!
//! One policy value replaces per-call backoff decorators: capped
//! exponential delay with ±25% jitter so concurrent retries don't
//! stampede the collaborator.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use serde::Deserialize;
use tracing::warn;

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u16,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            backoff_base_ms: 50,
            backoff_max_ms: 2_000,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    fn base_delay_ms(&self, attempt: u16) -> u64 {
        if attempt == 0 {
            return 0;
        }

        let exp = (attempt.saturating_sub(1)) as i32;
        let scaled = (self.config.backoff_base_ms as f64) * 2f64.powi(exp);
        let capped = scaled.min(self.config.backoff_max_ms as f64);
        capped.max(0.0) as u64
    }

    pub fn jittered_delay_ms(&self, attempt: u16, rng: &mut impl Rng) -> u64 {
        let base = self.base_delay_ms(attempt);
        if base == 0 {
            return 0;
        }

        let upper_cap = self.config.backoff_max_ms.max(1);
        let capped = base.min(upper_cap);
        let spread = (capped as f64 * 0.25).max(1.0);
        let lower = (capped as f64 - spread).max(1.0);
        let upper = (capped as f64 + spread).min(upper_cap as f64);

        rng.random_range(lower..=upper).round() as u64
    }

    /// Run `op` until it succeeds or the attempt budget is exhausted,
    /// sleeping the jittered backoff between attempts. The final error is
    /// returned unchanged.
    pub async fn run<T, E, F, Fut>(&self, label: &str, mut op: F) -> std::result::Result<T, E>
    where
        E: std::fmt::Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
    {
        let attempts = self.config.max_attempts.max(1);
        let mut last_err = None;
        for attempt in 1..=attempts {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    if attempt < attempts {
                        let delay = {
                            let mut rng = rand::rng();
                            self.jittered_delay_ms(attempt, &mut rng)
                        };
                        warn!(
                            "{label} failed (attempt {attempt}/{attempts}): {e}; \
                             retrying in {delay}ms"
                        );
                        tokio::time::sleep(Duration::from_millis(delay)).await;
                    }
                    last_err = Some(e);
                }
            }
        }
        Err(last_err.expect("at least one attempt was made"))
    }
}
