use tokio::time::Duration;
use tokio_retry::strategy::{jitter, ExponentialBackoff};

// Delays double from the base delay, capped at the max delay.
const RETRY_BASE: u64 = 2;
const RETRY_FACTOR: u64 = 25;
const RETRY_MAX_DELAY: Duration = Duration::from_secs(2);

/// Backoff between attempts of a remote call. Yields `retries` delays, so the call is attempted
/// at most `retries + 1` times.
pub(crate) fn retry_strategy(retries: usize) -> impl Iterator<Item = Duration> {
    ExponentialBackoff::from_millis(RETRY_BASE)
        .factor(RETRY_FACTOR)
        .max_delay(RETRY_MAX_DELAY)
        .map(jitter)
        .take(retries)
}
