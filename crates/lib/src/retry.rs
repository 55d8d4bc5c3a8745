//! Bounded retry with exponential backoff and jitter, for transient collaborator failures
//! (transport connect/reconnect, outbound delivery). Knows nothing about what it retries.

use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const BASE_DELAY: Duration = Duration::from_millis(100);
const MAX_DELAY: Duration = Duration::from_secs(2);

#[derive(Debug, thiserror::Error)]
pub enum RetryError<E> {
    /// The token fired while waiting between attempts.
    #[error("retry cancelled")]
    Cancelled,
    /// The last observed failure.
    #[error(transparent)]
    Failed(E),
}

impl<E> RetryError<E> {
    /// The operation's own error, if that is what ended the retry.
    pub fn into_failure(self) -> Option<E> {
        match self {
            RetryError::Failed(e) => Some(e),
            RetryError::Cancelled => None,
        }
    }
}

/// Run `op` up to `attempts` times (at least once), sleeping [`backoff`] between failures.
///
/// A failure observed after `shutdown` has fired is returned as-is without waiting.
/// If `shutdown` fires during a wait, returns [`RetryError::Cancelled`].
pub async fn retry<T, E, F, Fut>(
    shutdown: &CancellationToken,
    attempts: usize,
    mut op: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let attempts = attempts.max(1);
    let mut attempt = 0;
    loop {
        let err = match op().await {
            Ok(v) => return Ok(v),
            Err(e) => e,
        };
        attempt += 1;
        if shutdown.is_cancelled() || attempt >= attempts {
            return Err(RetryError::Failed(err));
        }
        let delay = backoff(attempt as u32 - 1);
        log::debug!("retry: attempt {} of {} failed, waiting {:?}", attempt, attempts, delay);
        tokio::select! {
            _ = shutdown.cancelled() => return Err(RetryError::Cancelled),
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

/// Delay before the retry following zero-based `attempt`: 100ms doubling per attempt,
/// capped at 2s, with uniform jitter of ±50% of the capped value.
pub fn backoff(attempt: u32) -> Duration {
    let capped = BASE_DELAY
        .checked_mul(1u32.checked_shl(attempt).unwrap_or(u32::MAX))
        .unwrap_or(MAX_DELAY)
        .min(MAX_DELAY);
    let ms = capped.as_millis() as u64;
    let jittered = ms / 2 + rand::thread_rng().gen_range(0..ms);
    Duration::from_millis(jittered)
}
