//! Bounded retry with exponential backoff
//!
//! Used at call sites that talk to the network and may hit transient
//! failures: report delivery and deployment-agent calls. Only errors that
//! [`ClientError::is_transient`] accepts are retried.

use keel_client::ClientError;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Upper bound on a single backoff delay
const MAX_DELAY: Duration = Duration::from_secs(10);

/// How many times to try and how long to wait in between
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, initial_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_delay,
            max_delay: MAX_DELAY.max(initial_delay),
        }
    }

    /// Delay to wait after the given (1-based) failed attempt
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_delay
            .saturating_mul(factor)
            .min(self.max_delay)
    }
}

/// Runs `op` until it succeeds, fails permanently, or the budget is spent
///
/// Returns the final result together with the number of attempts made.
pub async fn retry<T, F, Fut>(
    policy: &RetryPolicy,
    what: &str,
    mut op: F,
) -> (Result<T, ClientError>, u32)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ClientError>>,
{
    let mut attempt = 0;

    loop {
        attempt += 1;

        match op().await {
            Ok(value) => return (Ok(value), attempt),
            Err(e) if !e.is_transient() || attempt >= policy.max_attempts => {
                return (Err(e), attempt);
            }
            Err(e) => {
                let delay = policy.delay_after(attempt);
                warn!(
                    "{} failed (attempt {}/{}): {}; retrying in {:?}",
                    what, attempt, policy.max_attempts, e, delay
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}
