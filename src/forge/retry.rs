use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tokio_retry2::strategy::{jitter, ExponentialBackoff};
use tokio_retry2::{Retry, RetryError};
use tracing::warn;

use crate::generation::{GenerationError, ProviderError};

pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(30);

/// Errors that can tell a transient failure from a permanent one
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

impl Retryable for ProviderError {
    fn is_retryable(&self) -> bool {
        ProviderError::is_retryable(self)
    }
}

impl Retryable for GenerationError {
    fn is_retryable(&self) -> bool {
        GenerationError::is_retryable(self)
    }
}

/// Exponential backoff with jitter, capped at `max_delay`. One attempt means no retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::single_attempt()
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay: DEFAULT_MAX_DELAY,
        }
    }

    pub fn single_attempt() -> Self {
        Self::new(1, Duration::from_millis(500))
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    /// Delays before each retry: base, 2x base, 4x base... jittered, then
    /// capped at `max_delay`
    pub fn delays(&self) -> impl Iterator<Item = Duration> {
        let factor = (self.base_delay.as_millis() as u64 / 2).max(1);
        let max_delay = self.max_delay;

        // jitter may scale a delay by up to 1.5x; the cap must follow it
        ExponentialBackoff::from_millis(2)
            .factor(factor)
            .max_delay(max_delay)
            .map(jitter)
            .map(move |delay| delay.min(max_delay))
            .take(self.max_attempts.saturating_sub(1) as usize)
    }

    /// Run `operation` until it succeeds, fails permanently or the attempts
    /// are used up. The last error is returned unchanged.
    pub async fn run<F, Fut, T, E>(&self, step: &'static str, mut operation: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Retryable + Display,
    {
        let max_attempts = self.max_attempts;
        let mut attempt = 0u32;

        Retry::spawn(self.delays(), || {
            attempt += 1;
            let current = attempt;
            let future = operation();

            async move {
                match future.await {
                    Ok(value) => Ok(value),
                    Err(e) if e.is_retryable() && current < max_attempts => {
                        warn!(step, attempt = current, max_attempts, "Transient failure, retrying: {}", e);
                        Err(RetryError::Transient {
                            err: e,
                            retry_after: None,
                        })
                    }
                    Err(e) => Err(RetryError::Permanent(e)),
                }
            }
        })
        .await
    }
}
