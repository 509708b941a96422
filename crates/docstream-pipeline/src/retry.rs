use rand::Rng;
use std::time::Duration;

use docstream_core::ErrorCategory;

/// Cap for exponential backoff so high retry counts stay bounded.
const MAX_BACKOFF_SECS: u64 = 300;

/// Linear step applied per retry when the engine rate-limits us. Backing off
/// harder than the exponential curve gives the engine room to recover.
const RATE_LIMIT_STEP_SECS: u64 = 120;

/// Delay before the given retry attempt (`retry_count` is the attempt number
/// after the increment, so the first retry passes 1).
///
/// RateLimit backs off linearly at two minutes per attempt; every other
/// retryable category backs off exponentially from `base_secs` with random
/// jitter of up to one extra base interval.
pub fn retry_delay(category: ErrorCategory, retry_count: i32, base_secs: u64) -> Duration {
    let attempt = retry_count.max(1) as u32;

    if category == ErrorCategory::RateLimit {
        return Duration::from_secs(RATE_LIMIT_STEP_SECS * attempt as u64);
    }

    let exponential = base_secs
        .saturating_mul(2_u64.saturating_pow(attempt - 1))
        .min(MAX_BACKOFF_SECS);
    let jitter_ms = rand::rng().random_range(0..=base_secs.max(1) * 1000);
    Duration::from_secs(exponential) + Duration::from_millis(jitter_ms)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limit_backs_off_linearly() {
        assert_eq!(
            retry_delay(ErrorCategory::RateLimit, 1, 5),
            Duration::from_secs(120)
        );
        assert_eq!(
            retry_delay(ErrorCategory::RateLimit, 3, 5),
            Duration::from_secs(360)
        );
    }

    #[test]
    fn transient_backs_off_exponentially_with_jitter() {
        let base = 5;
        for (attempt, floor) in [(1, 5u64), (2, 10), (3, 20)] {
            let delay = retry_delay(ErrorCategory::Transient, attempt, base);
            assert!(delay >= Duration::from_secs(floor));
            assert!(delay <= Duration::from_secs(floor + base + 1));
        }
    }

    #[test]
    fn exponential_backoff_is_capped() {
        let delay = retry_delay(ErrorCategory::Transient, 30, 5);
        assert!(delay <= Duration::from_secs(MAX_BACKOFF_SECS + 6));
    }

    #[test]
    fn zero_attempt_treated_as_first() {
        let delay = retry_delay(ErrorCategory::RateLimit, 0, 5);
        assert_eq!(delay, Duration::from_secs(120));
    }
}
