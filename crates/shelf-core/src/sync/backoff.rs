//! Retry backoff
//!
//! Exponential delay with equal jitter, capped. Jitter keeps a fleet of
//! replicas that failed at the same moment from retrying in lockstep.

use std::time::Duration;

use rand::Rng;

/// Jittered exponential backoff
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    cap: Duration,
    attempt: u32,
}

impl Backoff {
    pub fn new(base: Duration, cap: Duration) -> Self {
        Self {
            base,
            cap,
            attempt: 0,
        }
    }

    /// Consecutive failures recorded so far
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Record a failure and return how long to wait before retrying
    ///
    /// The delay is half the capped exponential plus a random share of the
    /// other half, so it always lands in `[exp/2, exp]`.
    pub fn next_delay(&mut self) -> Duration {
        // Shift saturates well past any realistic cap
        let exp_ms = self
            .base
            .as_millis()
            .saturating_mul(1u128 << self.attempt.min(16))
            .min(self.cap.as_millis()) as u64;
        self.attempt = self.attempt.saturating_add(1);

        let half = exp_ms / 2;
        let jitter = rand::thread_rng().gen_range(0..=half.max(1));
        Duration::from_millis(half + jitter)
    }

    /// Clear the failure count after a successful cycle
    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delays_grow_and_stay_capped() {
        let base = Duration::from_millis(100);
        let cap = Duration::from_millis(800);
        let mut backoff = Backoff::new(base, cap);

        for _ in 0..10 {
            let delay = backoff.next_delay();
            assert!(delay >= base / 2);
            assert!(delay <= cap + Duration::from_millis(1));
        }
        assert_eq!(backoff.attempt(), 10);
    }

    #[test]
    fn test_first_delay_within_base() {
        let base = Duration::from_millis(1000);
        let mut backoff = Backoff::new(base, Duration::from_secs(60));

        let delay = backoff.next_delay();
        assert!(delay >= Duration::from_millis(500));
        assert!(delay <= base + Duration::from_millis(1));
    }

    #[test]
    fn test_reset() {
        let mut backoff = Backoff::new(Duration::from_millis(100), Duration::from_secs(1));
        backoff.next_delay();
        backoff.next_delay();
        assert_eq!(backoff.attempt(), 2);

        backoff.reset();
        assert_eq!(backoff.attempt(), 0);
    }

    #[test]
    fn test_huge_attempt_does_not_overflow() {
        let mut backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(60));
        for _ in 0..100 {
            let delay = backoff.next_delay();
            assert!(delay <= Duration::from_secs(61));
        }
    }
}
