//! Reconnection backoff.

use rand::Rng;
use std::time::Duration;

/// Bounded exponential backoff with jitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Delay before the first retry.
    pub base: Duration,
    /// Ceiling for the exponential part.
    pub max: Duration,
    /// Attempts allowed before giving up.
    pub max_attempts: u32,
}

impl ReconnectPolicy {
    /// Exponential part of the delay: `min(max, base * 2^attempt)`.
    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
        self.base.saturating_mul(factor).min(self.max)
    }

    /// Uniform jitter in `[0, base)`.
    #[must_use]
    pub fn jitter(&self) -> Duration {
        let base_ms = self.base.as_millis() as u64;
        if base_ms == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::thread_rng().gen_range(0..base_ms))
    }

    /// Full delay before the retry following `attempt`.
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        self.backoff(attempt) + self.jitter()
    }

    /// Whether another attempt is allowed.
    #[must_use]
    pub fn allows(&self, attempts: u32) -> bool {
        attempts < self.max_attempts
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            max: Duration::from_secs(30),
            max_attempts: 5,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_until_capped() {
        let policy = ReconnectPolicy::default();
        let delays: Vec<_> = (0..8).map(|a| policy.backoff(a).as_secs()).collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 16, 30, 30, 30]);
    }

    #[test]
    fn test_backoff_is_non_decreasing() {
        let policy = ReconnectPolicy {
            base: Duration::from_millis(150),
            max: Duration::from_secs(10),
            max_attempts: 64,
        };
        let mut previous = Duration::ZERO;
        for attempt in 0..64 {
            let delay = policy.backoff(attempt);
            assert!(delay >= previous);
            assert!(delay <= policy.max);
            previous = delay;
        }
    }

    #[test]
    fn test_jitter_bounded_by_base() {
        let policy = ReconnectPolicy::default();
        for _ in 0..200 {
            assert!(policy.jitter() < policy.base);
            let delay = policy.delay(2);
            assert!(delay >= policy.backoff(2));
            assert!(delay < policy.backoff(2) + policy.base);
        }
    }

    #[test]
    fn test_attempt_cap() {
        let policy = ReconnectPolicy::default();
        assert!(policy.allows(4));
        assert!(!policy.allows(5));
    }
}
