//! Retry delay calculation with jitter.

use std::time::Duration;
use rand::Rng;

/// Linear retry delay: `base * attempt`, capped, plus 0-10% jitter so
/// concurrent retries do not land in step.
pub fn retry_delay(attempt: u32, base_ms: u64, max_ms: u64) -> Duration {
    if attempt == 0 {
        return Duration::from_millis(0);
    }

    let delay_ms = base_ms.saturating_mul(attempt as u64);
    let capped_delay = delay_ms.min(max_ms);

    let jitter_range = capped_delay / 10;
    let jitter = if jitter_range > 0 {
        rand::thread_rng().gen_range(0..jitter_range)
    } else {
        0
    };

    Duration::from_millis(capped_delay + jitter)
}

/// Delay before retrying a rate-limited call. The server's
/// `Retry-After` hint wins when present, capped at `max_ms`; otherwise
/// fall back to the computed linear delay.
pub fn rate_limit_delay(retry_after_ms: Option<u64>, fallback: Duration, max_ms: u64) -> Duration {
    match retry_after_ms {
        Some(hint_ms) => Duration::from_millis(hint_ms.min(max_ms)),
        None => fallback,
    }
}
