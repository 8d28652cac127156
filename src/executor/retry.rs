//! Retry policy with exponential backoff and jitter

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for retry behavior
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Retries after the initial attempt
    pub max_retries: u32,

    /// Delay before the first retry in milliseconds
    pub initial_delay_ms: u64,

    /// Maximum delay in milliseconds (caps exponential growth)
    pub max_delay_ms: u64,

    /// Multiplier for exponential backoff
    pub backoff_multiplier: f64,

    /// Upper bound of the random delay added to each backoff
    pub jitter_ms: u64,

    /// Track and honor the circuit breaker for this operation's key
    pub circuit_breaker_enabled: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay_ms: 1000,
            max_delay_ms: 30_000,
            backoff_multiplier: 2.0,
            jitter_ms: 250,
            circuit_breaker_enabled: true,
        }
    }
}

impl RetryPolicy {
    /// Calls to the AI text-analysis collaborator
    pub fn ai_service() -> Self {
        Self {
            max_retries: 5,
            initial_delay_ms: 2000,
            max_delay_ms: 60_000,
            backoff_multiplier: 2.0,
            jitter_ms: 500,
            circuit_breaker_enabled: true,
        }
    }

    /// Calls to the content store
    pub fn store() -> Self {
        Self {
            max_retries: 3,
            initial_delay_ms: 1000,
            max_delay_ms: 15_000,
            backoff_multiplier: 2.0,
            jitter_ms: 100,
            circuit_breaker_enabled: true,
        }
    }

    /// Orchestrator cycle bodies; inner operations already retry
    pub fn cycle() -> Self {
        Self {
            max_retries: 1,
            initial_delay_ms: 1000,
            max_delay_ms: 5000,
            backoff_multiplier: 2.0,
            jitter_ms: 100,
            circuit_breaker_enabled: false,
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_delays(mut self, initial_delay_ms: u64, max_delay_ms: u64) -> Self {
        self.initial_delay_ms = initial_delay_ms;
        self.max_delay_ms = max_delay_ms;
        self
    }

    pub fn with_jitter(mut self, jitter_ms: u64) -> Self {
        self.jitter_ms = jitter_ms;
        self
    }

    pub fn with_circuit_breaker(mut self, enabled: bool) -> Self {
        self.circuit_breaker_enabled = enabled;
        self
    }

    /// Initial attempt plus retries
    pub fn total_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Backoff before the retry that follows failed attempt `attempt` (1-based),
    /// without jitter: `min(max, initial * multiplier^(attempt - 1))`
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let exponent = i32::try_from(attempt - 1).unwrap_or(i32::MAX);
        let exponential = self.initial_delay_ms as f64 * self.backoff_multiplier.powi(exponent);
        let capped = if exponential.is_finite() {
            exponential.min(self.max_delay_ms as f64)
        } else {
            self.max_delay_ms as f64
        };

        Duration::from_millis(capped.max(0.0) as u64)
    }

    /// Backoff plus a random jitter in `[0, jitter_ms]`
    pub fn delay_with_jitter(&self, attempt: u32) -> Duration {
        let jitter = if self.jitter_ms > 0 {
            rand::thread_rng().gen_range(0..=self.jitter_ms)
        } else {
            0
        };
        self.calculate_delay(attempt) + Duration::from_millis(jitter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exponential_delays() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.calculate_delay(0), Duration::ZERO);
        assert_eq!(policy.calculate_delay(1), Duration::from_millis(1000));
        assert_eq!(policy.calculate_delay(2), Duration::from_millis(2000));
        assert_eq!(policy.calculate_delay(3), Duration::from_millis(4000));
        assert_eq!(policy.calculate_delay(10), Duration::from_millis(30_000));
    }

    #[test]
    fn test_huge_attempt_stays_capped() {
        let policy = RetryPolicy::ai_service();
        assert_eq!(policy.calculate_delay(u32::MAX), Duration::from_millis(60_000));
    }

    #[test]
    fn test_jitter_bounds() {
        let policy = RetryPolicy::default().with_jitter(50);
        for _ in 0..100 {
            let delay = policy.delay_with_jitter(1);
            assert!(delay >= Duration::from_millis(1000));
            assert!(delay <= Duration::from_millis(1050));
        }
        let no_jitter = RetryPolicy::default().with_jitter(0);
        assert_eq!(no_jitter.delay_with_jitter(2), Duration::from_millis(2000));
    }

    #[test]
    fn test_presets() {
        assert_eq!(RetryPolicy::ai_service().total_attempts(), 6);
        assert_eq!(RetryPolicy::store().max_delay_ms, 15_000);
        assert!(!RetryPolicy::cycle().circuit_breaker_enabled);
    }

    proptest::proptest! {
        #[test]
        fn prop_delay_monotonic_and_capped(
            initial in 1u64..10_000,
            max in 1u64..120_000,
            multiplier in 1.0f64..4.0,
            attempt in 1u32..64,
        ) {
            let policy = RetryPolicy::default().with_delays(initial, max);
            let policy = RetryPolicy { backoff_multiplier: multiplier, ..policy };
            let current = policy.calculate_delay(attempt);
            let next = policy.calculate_delay(attempt + 1);
            proptest::prop_assert!(next >= current);
            proptest::prop_assert!(current <= Duration::from_millis(max));
        }
    }
}
