//! Exponential backoff with jitter for step retries.
//!
//! `backoff(retry_count) = min(BACKOFF_MAX, BACKOFF_BASE * 2^retry_count) *
//! uniform(0.5, 1.0)` per §4.1.

use std::time::Duration;

use rand::Rng;

/// Computes the backoff duration for the given (1-indexed) retry attempt.
pub fn backoff(retry_count: u32, base_ms: u64, max_ms: u64) -> Duration {
    let exp = base_ms.saturating_mul(1u64 << retry_count.min(32));
    let capped = exp.min(max_ms);
    let jitter = rand::thread_rng().gen_range(0.5..=1.0);
    Duration::from_millis((capped as f64 * jitter) as u64)
}

/// Like [`backoff`] but with an injectable jitter fraction, for
/// deterministic unit tests.
pub fn backoff_with_jitter(retry_count: u32, base_ms: u64, max_ms: u64, jitter: f64) -> Duration {
    let exp = base_ms.saturating_mul(1u64 << retry_count.min(32));
    let capped = exp.min(max_ms);
    Duration::from_millis((capped as f64 * jitter.clamp(0.5, 1.0)) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grows_exponentially_until_cap() {
        assert_eq!(backoff_with_jitter(0, 500, 30_000, 1.0), Duration::from_millis(500));
        assert_eq!(backoff_with_jitter(1, 500, 30_000, 1.0), Duration::from_millis(1000));
        assert_eq!(backoff_with_jitter(2, 500, 30_000, 1.0), Duration::from_millis(2000));
    }

    #[test]
    fn caps_at_backoff_max() {
        assert_eq!(backoff_with_jitter(10, 500, 30_000, 1.0), Duration::from_millis(30_000));
    }

    #[test]
    fn jitter_is_bounded() {
        for _ in 0..50 {
            let d = backoff(3, 500, 30_000);
            assert!(d.as_millis() >= 2000 && d.as_millis() <= 4000);
        }
    }
}
