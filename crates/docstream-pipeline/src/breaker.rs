use std::sync::Mutex;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    /// Submissions flow normally.
    Closed,
    /// Too many consecutive failures; submissions are deferred.
    Open,
    /// Cooldown elapsed; the next submission probes the engine.
    HalfOpen,
}

impl BreakerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            BreakerState::Closed => "closed",
            BreakerState::Open => "open",
            BreakerState::HalfOpen => "half_open",
        }
    }
}

struct BreakerInner {
    consecutive_failures: u32,
    opened_at: Option<Instant>,
}

/// Circuit breaker over engine submissions.
///
/// Opens after `threshold` consecutive failures. While open, the drain loop
/// defers due items instead of submitting them. After `cooldown` the breaker
/// half-opens and lets one submission probe the engine; the next success
/// closes it and resets the failure counter.
pub struct CircuitBreaker {
    threshold: u32,
    cooldown: Duration,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(threshold: u32, cooldown: Duration) -> Self {
        Self {
            threshold,
            cooldown,
            inner: Mutex::new(BreakerInner {
                consecutive_failures: 0,
                opened_at: None,
            }),
        }
    }

    pub fn state(&self) -> BreakerState {
        let inner = match self.inner.lock() {
            Ok(inner) => inner,
            Err(poisoned) => poisoned.into_inner(),
        };
        match inner.opened_at {
            Some(opened_at) if opened_at.elapsed() < self.cooldown => BreakerState::Open,
            Some(_) => BreakerState::HalfOpen,
            None => BreakerState::Closed,
        }
    }

    pub fn record_success(&self) {
        let mut inner = match self.inner.lock() {
            Ok(inner) => inner,
            Err(poisoned) => poisoned.into_inner(),
        };
        if inner.opened_at.is_some() || inner.consecutive_failures > 0 {
            tracing::info!("Circuit breaker reset after successful submission");
        }
        inner.consecutive_failures = 0;
        inner.opened_at = None;
    }

    /// Records a failure; returns true when this failure opened the breaker.
    pub fn record_failure(&self) -> bool {
        let mut inner = match self.inner.lock() {
            Ok(inner) => inner,
            Err(poisoned) => poisoned.into_inner(),
        };
        inner.consecutive_failures += 1;
        let should_open = inner.consecutive_failures >= self.threshold;
        if should_open {
            let just_opened = inner.opened_at.is_none();
            // A failure during half-open re-arms the full cooldown.
            inner.opened_at = Some(Instant::now());
            if just_opened {
                tracing::warn!(
                    consecutive_failures = inner.consecutive_failures,
                    threshold = self.threshold,
                    cooldown_secs = self.cooldown.as_secs(),
                    "Circuit breaker opened"
                );
            }
            return just_opened;
        }
        false
    }

    pub fn consecutive_failures(&self) -> u32 {
        match self.inner.lock() {
            Ok(inner) => inner.consecutive_failures,
            Err(poisoned) => poisoned.into_inner().consecutive_failures,
        }
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opens_after_threshold_consecutive_failures() {
        let breaker = CircuitBreaker::new(3, Duration::from_secs(60));
        assert_eq!(breaker.state(), BreakerState::Closed);

        assert!(!breaker.record_failure());
        assert!(!breaker.record_failure());
        assert_eq!(breaker.state(), BreakerState::Closed);

        assert!(breaker.record_failure());
        assert_eq!(breaker.state(), BreakerState::Open);
        assert_eq!(breaker.consecutive_failures(), 3);
    }

    #[test]
    fn success_resets_failure_streak() {
        let breaker = CircuitBreaker::new(3, Duration::from_secs(60));
        breaker.record_failure();
        breaker.record_failure();
        breaker.record_success();
        assert_eq!(breaker.consecutive_failures(), 0);

        breaker.record_failure();
        breaker.record_failure();
        assert_eq!(breaker.state(), BreakerState::Closed);
    }

    #[test]
    fn half_opens_after_cooldown_and_closes_on_success() {
        let breaker = CircuitBreaker::new(1, Duration::from_millis(20));
        breaker.record_failure();
        assert_eq!(breaker.state(), BreakerState::Open);

        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(breaker.state(), BreakerState::HalfOpen);

        breaker.record_success();
        assert_eq!(breaker.state(), BreakerState::Closed);
    }

    #[test]
    fn failure_during_half_open_rearms_cooldown() {
        let breaker = CircuitBreaker::new(1, Duration::from_millis(20));
        breaker.record_failure();
        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(breaker.state(), BreakerState::HalfOpen);

        breaker.record_failure();
        assert_eq!(breaker.state(), BreakerState::Open);
    }
}
