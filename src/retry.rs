//! Bounded retry with linear or exponential backoff.
//!
//! One [`RetryPolicy`] is configured at startup and shared by every outbound
//! call through [`crate::client::Retrying`].

use log::{debug, warn};
use std::future::Future;
use std::time::Duration;

use crate::errors::Result;

/// Upper bound on a single backoff delay.
const MAX_RETRY_DELAY: Duration = Duration::from_secs(60);

/// How the delay grows between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Backoff {
    /// `delay * attempt`
    #[default]
    Linear,
    /// `delay * 2^(attempt - 1)`
    Exponential,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    /// Base delay between attempts.
    pub delay: Duration,
    pub backoff: Backoff,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            delay: Duration::from_secs(5),
            backoff: Backoff::Linear,
        }
    }
}

impl RetryPolicy {
    /// A policy that makes exactly one attempt.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            delay: Duration::ZERO,
            backoff: Backoff::Linear,
        }
    }

    /// Delay to wait after the given failed attempt (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let delay = match self.backoff {
            Backoff::Linear => self.delay.saturating_mul(attempt.max(1)),
            Backoff::Exponential => {
                let factor = 1u32
                    .checked_shl(attempt.saturating_sub(1))
                    .unwrap_or(u32::MAX);
                self.delay.saturating_mul(factor)
            }
        };
        delay.min(MAX_RETRY_DELAY)
    }

    /// Runs `op` until it succeeds, fails with a non-retryable error, or the
    /// attempts run out. The last error is returned.
    pub async fn retry<T, F, Fut>(&self, what: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if attempt < max_attempts && e.is_retryable() => {
                    let delay = self.delay_for(attempt);
                    debug!(
                        "Retrying {} (attempt {}/{}) in {:?}: {}",
                        what, attempt, max_attempts, delay, e
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    if e.is_retryable() {
                        warn!("{} failed after {} attempts: {}", what, attempt, e);
                    }
                    return Err(e);
                }
            }
        }
    }
}
