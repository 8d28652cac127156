//! Per-key circuit breaker state

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;

/// Circuit breaker thresholds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerConfig {
    /// Failures that open the breaker
    pub failure_threshold: u32,

    /// Time after the last failure before a half-open trial call is allowed
    pub reset_timeout_ms: u64,

    /// Consecutive successes that fully close the breaker
    pub success_threshold: u32,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout_ms: 60_000,
            success_threshold: 3,
        }
    }
}

/// Breaker state for one `service:endpoint` key
#[derive(Debug, Clone, Serialize)]
pub struct CircuitBreakerState {
    pub is_open: bool,
    pub half_open: bool,
    pub failure_count: u32,
    pub success_count: u32,
    pub last_failure_time: Option<DateTime<Utc>>,
    pub reset_timeout_ms: u64,
    pub total_requests: u64,
    #[serde(skip)]
    last_failure_at: Option<Instant>,
}

impl CircuitBreakerState {
    pub fn new(reset_timeout_ms: u64) -> Self {
        Self {
            is_open: false,
            half_open: false,
            failure_count: 0,
            success_count: 0,
            last_failure_time: None,
            reset_timeout_ms,
            total_requests: 0,
            last_failure_at: None,
        }
    }

    fn reset_timeout(&self) -> Duration {
        Duration::from_millis(self.reset_timeout_ms)
    }

    /// Time left before the breaker lets a trial call through, if it is rejecting
    pub fn remaining_open(&self, now: Instant) -> Option<Duration> {
        if !self.is_open {
            return None;
        }
        let elapsed = self
            .last_failure_at
            .map_or(self.reset_timeout(), |at| now.saturating_duration_since(at));
        self.reset_timeout().checked_sub(elapsed).filter(|d| !d.is_zero())
    }

    /// Gate a call. `Err(remaining)` while open; an open breaker past its
    /// reset timeout moves to half-open and returns `Ok(true)`.
    pub fn check(&mut self, now: Instant) -> Result<bool, Duration> {
        if !self.is_open {
            return Ok(false);
        }
        if let Some(remaining) = self.remaining_open(now) {
            return Err(remaining);
        }
        self.is_open = false;
        self.half_open = true;
        self.success_count = 0;
        Ok(true)
    }

    /// Returns `true` when this success fully closed a half-open breaker
    pub fn record_success(&mut self, success_threshold: u32) -> bool {
        self.total_requests += 1;
        self.success_count = self.success_count.saturating_add(1);

        if self.success_count >= success_threshold && (self.half_open || self.failure_count > 0) {
            let was_half_open = self.half_open;
            self.failure_count = 0;
            self.half_open = false;
            return was_half_open;
        }
        false
    }

    /// Returns `true` when this failure opened the breaker
    pub fn record_failure(&mut self, now: Instant, failure_threshold: u32) -> bool {
        self.total_requests += 1;
        self.failure_count = self.failure_count.saturating_add(1);
        self.success_count = 0;
        self.last_failure_at = Some(now);
        self.last_failure_time = Some(Utc::now());

        if !self.is_open && self.failure_count >= failure_threshold {
            self.is_open = true;
            self.half_open = false;
            return true;
        }
        false
    }

    /// Open and still inside the reset timeout
    pub fn is_rejecting(&self, now: Instant) -> bool {
        self.remaining_open(now).is_some()
    }
}
