//! Consecutive-failure circuit breaker
//!
//! The breaker counts failures with no intervening success. Once the count reaches
//! the threshold it is open; after the cooldown it half-opens so one more attempt can
//! go through. A success closes it again and resets the count.

use std::time::Duration;
use tokio::time::Instant;

/// Observable breaker position
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    /// Failures are below the threshold
    Closed,

    /// Threshold reached and still inside the cooldown window
    Open,

    /// Threshold reached but the cooldown elapsed; one attempt is allowed
    HalfOpen,
}

/// Tracks consecutive failures against a threshold
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    consecutive_failures: u32,
    threshold: u32,
    cooldown: Duration,
    tripped_at: Option<Instant>,
}

impl CircuitBreaker {
    pub fn new(threshold: u32, cooldown: Duration) -> Self {
        Self {
            consecutive_failures: 0,
            threshold: threshold.max(1),
            cooldown,
            tripped_at: None,
        }
    }

    /// Resets the failure count and closes the breaker
    pub fn record_success(&mut self) {
        self.consecutive_failures = 0;
        self.tripped_at = None;
    }

    /// Counts a failure; returns true if the breaker is open afterwards
    pub fn record_failure(&mut self, now: Instant) -> bool {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        if self.consecutive_failures >= self.threshold {
            // every failure at or past the threshold restarts the cooldown
            self.tripped_at = Some(now);
        }
        self.state(now) == BreakerState::Open
    }

    pub fn state(&self, now: Instant) -> BreakerState {
        match self.tripped_at {
            None => BreakerState::Closed,
            Some(at) if now.saturating_duration_since(at) >= self.cooldown => {
                BreakerState::HalfOpen
            }
            Some(_) => BreakerState::Open,
        }
    }

    pub fn is_open(&self, now: Instant) -> bool {
        self.state(now) == BreakerState::Open
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trips_at_threshold() {
        let mut breaker = CircuitBreaker::new(3, Duration::from_secs(60));
        let now = Instant::now();

        assert!(!breaker.record_failure(now));
        assert!(!breaker.record_failure(now));
        assert!(breaker.record_failure(now));
        assert_eq!(breaker.state(now), BreakerState::Open);
    }

    #[test]
    fn test_success_resets_count() {
        let mut breaker = CircuitBreaker::new(3, Duration::from_secs(60));
        let now = Instant::now();

        breaker.record_failure(now);
        breaker.record_failure(now);
        breaker.record_success();

        assert_eq!(breaker.consecutive_failures(), 0);
        assert!(!breaker.record_failure(now));
        assert_eq!(breaker.state(now), BreakerState::Closed);
    }

    #[test]
    fn test_half_opens_after_cooldown() {
        let mut breaker = CircuitBreaker::new(1, Duration::from_secs(10));
        let now = Instant::now();

        breaker.record_failure(now);
        assert!(breaker.is_open(now + Duration::from_secs(5)));
        assert_eq!(
            breaker.state(now + Duration::from_secs(10)),
            BreakerState::HalfOpen
        );
    }

    #[test]
    fn test_failed_half_open_attempt_reopens() {
        let mut breaker = CircuitBreaker::new(2, Duration::from_secs(10));
        let start = Instant::now();

        breaker.record_failure(start);
        breaker.record_failure(start);
        let later = start + Duration::from_secs(11);
        assert_eq!(breaker.state(later), BreakerState::HalfOpen);

        assert!(breaker.record_failure(later));
        assert!(breaker.is_open(later + Duration::from_secs(1)));
    }

    #[test]
    fn test_zero_threshold_is_clamped() {
        let breaker = CircuitBreaker::new(0, Duration::from_secs(1));
        assert_eq!(breaker.threshold(), 1);
    }
}
