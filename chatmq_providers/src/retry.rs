use std::fmt::Display;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::sleep;
use tracing::warn;

/// Backoff schedule for opening a completion request.
///
/// One attempt is made per entry of `base_delays_secs` (sleeping that long
/// after a failure), then `final_retries` more attempts spaced by
/// `final_delay_secs`. An empty schedule with no final retries means a
/// single attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    #[serde(default = "RetryPolicy::default_base_delays")]
    pub base_delays_secs: Vec<u64>,
    #[serde(default)]
    pub final_retries: usize,
    #[serde(default = "RetryPolicy::default_final_delay")]
    pub final_delay_secs: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delays_secs: Self::default_base_delays(),
            final_retries: 0,
            final_delay_secs: Self::default_final_delay(),
        }
    }
}

impl RetryPolicy {
    fn default_base_delays() -> Vec<u64> {
        vec![2, 4]
    }

    const fn default_final_delay() -> u64 {
        10
    }

    /// A policy that never retries.
    #[must_use]
    pub const fn none() -> Self {
        Self {
            base_delays_secs: Vec::new(),
            final_retries: 0,
            final_delay_secs: 0,
        }
    }

    /// Total number of attempts this policy allows.
    #[must_use]
    pub fn max_attempts(&self) -> usize {
        (self.base_delays_secs.len() + self.final_retries).max(1)
    }

    fn delay_after(&self, attempt: usize) -> Duration {
        let secs = self
            .base_delays_secs
            .get(attempt - 1)
            .copied()
            .unwrap_or(self.final_delay_secs);
        Duration::from_secs(secs)
    }

    /// Run `operation` until it succeeds or the schedule is exhausted.
    ///
    /// Returns the last error when every attempt fails.
    pub async fn run<F, Fut, T, E>(&self, mut operation: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
        E: Display,
    {
        let max_attempts = self.max_attempts();
        let mut attempt = 1;
        loop {
            match operation().await {
                Ok(result) => return Ok(result),
                Err(e) if attempt >= max_attempts => return Err(e),
                Err(e) => {
                    let delay = self.delay_after(attempt);
                    warn!(
                        "Request failed (attempt {attempt}/{max_attempts}): {e}. Retrying after {}s...",
                        delay.as_secs()
                    );
                    sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}
