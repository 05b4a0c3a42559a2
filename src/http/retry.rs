//! Bounded retries for cluster calls

use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::debug;

use super::client::HttpError;

/// Retry policy configuration
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first one
    pub max_attempts: u32,
    /// Pause between two attempts
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }

    /// Single attempt, no retry
    pub fn once() -> Self {
        Self::new(1, Duration::ZERO)
    }

    /// Run `f` until it succeeds or the attempts are used up; the last
    /// error is returned.
    pub async fn execute<F, Fut, T>(&self, mut f: F) -> Result<T, HttpError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, HttpError>>,
    {
        let attempts = self.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            match f(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) if attempt >= attempts => return Err(e),
                Err(e) => {
                    debug!("Attempt {}/{} failed: {}", attempt, attempts, e);
                    attempt += 1;
                    if !self.delay.is_zero() {
                        sleep(self.delay).await;
                    }
                }
            }
        }
    }
}
