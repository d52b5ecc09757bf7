//! Bounded fixed-delay retry for gateway calls.

use std::future::Future;
use std::time::Duration;

use backoff::backoff::Backoff;

use crate::config::PairSettings;

/// A fixed number of attempts with a fixed delay between them. Exhausting
/// the attempts surfaces the last error to the caller.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn new(attempts: u32, delay: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            delay,
        }
    }

    pub fn from_settings(settings: &PairSettings) -> Self {
        Self::new(
            settings.order_retry_attempts,
            Duration::from_millis(settings.order_retry_delay_ms),
        )
    }

    fn bounded(&self) -> BoundedBackoff {
        BoundedBackoff {
            delay: self.delay,
            attempts: self.attempts,
            remaining: self.attempts - 1,
        }
    }
}

/// `backoff::Backoff` that yields `attempts - 1` retries at a constant
/// delay, then gives up.
#[derive(Debug)]
struct BoundedBackoff {
    delay: Duration,
    attempts: u32,
    remaining: u32,
}

impl Backoff for BoundedBackoff {
    fn next_backoff(&mut self) -> Option<Duration> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        Some(self.delay)
    }

    fn reset(&mut self) {
        self.remaining = self.attempts - 1;
    }
}

/// Run `op` under `policy`, treating every error as retryable until the
/// attempts are exhausted.
pub async fn with_retry<T, E, Op, Fut>(policy: RetryPolicy, mut op: Op) -> Result<T, E>
where
    Op: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    backoff::future::retry(policy.bounded(), || {
        let fut = op();
        async move { fut.await.map_err(backoff::Error::transient) }
    })
    .await
}
