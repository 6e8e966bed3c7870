use std::time::Duration;

use rand::Rng;

const BASE_DELAY_MS: u64 = 1000;
const JITTER_MS: u64 = 1000;
const MAX_DELAY: Duration = Duration::from_secs(30);

/// Delay before the `retry`th reattempt (0-based): exponential backoff
/// with uniform jitter, capped at [`MAX_DELAY`].
pub fn backoff_delay(retry: u32) -> Duration {
    delay_with_jitter(retry, rand::rng().random_range(0..JITTER_MS))
}

fn delay_with_jitter(retry: u32, jitter_ms: u64) -> Duration {
    let exp = match 1u64.checked_shl(retry) {
        Some(factor) => BASE_DELAY_MS.saturating_mul(factor),
        None => u64::MAX,
    };
    Duration::from_millis(exp.saturating_add(jitter_ms)).min(MAX_DELAY)
}
