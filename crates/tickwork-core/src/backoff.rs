//! Retry backoff.

use std::time::Duration;

const BASE_SECS: u64 = 10;
const MAX_SECS: u64 = 3600;

/// Delay before retry attempt `attempt`: `min(2^attempt * 10s, 1h)`.
pub fn retry_delay(attempt: u32) -> Duration {
    let secs = 2u64
        .checked_pow(attempt)
        .and_then(|factor| factor.checked_mul(BASE_SECS))
        .map_or(MAX_SECS, |secs| secs.min(MAX_SECS));
    Duration::from_secs(secs)
}
