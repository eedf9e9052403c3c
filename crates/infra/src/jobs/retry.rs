//! Backoff for writers that lost an optimistic-concurrency race.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Bounded, capped exponential backoff.
///
/// Millisecond fields so the policy reads directly from the JSON config.
/// `max_attempts` counts retries after the first try.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Fraction of each delay that is spread around its nominal value.
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 8,
            base_delay_ms: 2,
            max_delay_ms: 100,
            jitter: 0.2,
        }
    }
}

impl RetryPolicy {
    /// Constant delay, no jitter.
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        let ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        Self {
            max_attempts,
            base_delay_ms: ms,
            max_delay_ms: ms,
            jitter: 0.0,
        }
    }

    /// Delay before retry `attempt` (1-based): `base * 2^(attempt-1)`, capped.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let Some(exp) = attempt.checked_sub(1) else {
            return Duration::ZERO;
        };
        let nominal = self
            .base_delay_ms
            .saturating_mul(1u64 << exp.min(30))
            .min(self.max_delay_ms);

        // Spread by attempt number so racing writers drift apart.
        let spread = nominal as f64 * self.jitter.clamp(0.0, 1.0);
        let offset = spread * (f64::from(attempt.wrapping_mul(37) % 11) / 5.0 - 1.0);
        Duration::from_millis((nominal as f64 + offset).max(0.0) as u64)
    }

    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doubles_until_the_cap() {
        let policy = RetryPolicy {
            max_attempts: 5,
            base_delay_ms: 100,
            max_delay_ms: 350,
            jitter: 0.0,
        };
        assert_eq!(policy.delay_for_attempt(0), Duration::ZERO);
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(350));
        assert_eq!(policy.delay_for_attempt(40), Duration::from_millis(350));
    }

    #[test]
    fn jitter_stays_within_its_fraction() {
        let policy = RetryPolicy {
            max_attempts: 5,
            base_delay_ms: 100,
            max_delay_ms: 100,
            jitter: 0.2,
        };
        for attempt in 1..20 {
            let ms = policy.delay_for_attempt(attempt).as_millis();
            assert!((80..=120).contains(&ms), "attempt {attempt} gave {ms}ms");
        }
    }

    #[test]
    fn fixed_delay_is_constant() {
        let policy = RetryPolicy::fixed(3, Duration::from_millis(500));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(500));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(500));
        assert!(policy.should_retry(2));
        assert!(!policy.should_retry(3));
    }

    #[test]
    fn reads_from_partial_json() {
        let policy: RetryPolicy = serde_json::from_str(r#"{"max_attempts": 3}"#).unwrap();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.max_delay_ms, 100);
    }
}
