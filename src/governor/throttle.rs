//! Throttle level computation
//!
//! Each metric is normalized to a factor in `[0, 1)` against its
//! `{light, moderate, heavy}` thresholds, then the weighted sum is scaled to
//! a 0-100 level. The function is pure so it can be property-tested.

use serde::{Deserialize, Serialize};

use super::SystemMetrics;

const QUEUE_WEIGHT: f64 = 0.35;
const API_FAILURE_WEIGHT: f64 = 0.25;
const CPU_WEIGHT: f64 = 0.20;
const MEMORY_WEIGHT: f64 = 0.20;

/// Load thresholds for one metric
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricThresholds {
    pub light: f64,
    pub moderate: f64,
    pub heavy: f64,
}

impl MetricThresholds {
    pub const fn new(light: f64, moderate: f64, heavy: f64) -> Self {
        Self {
            light,
            moderate,
            heavy,
        }
    }

    /// 0 up to light, linear to 0.5 at moderate, linear to 0.8 at heavy,
    /// then approaching 1.0 asymptotically
    pub fn factor(&self, value: f64) -> f64 {
        if value.is_nan() || value <= self.light {
            return 0.0;
        }
        if value == f64::INFINITY {
            return 1.0;
        }

        if value <= self.moderate {
            let span = self.moderate - self.light;
            return if span > 0.0 {
                0.5 * (value - self.light) / span
            } else {
                0.5
            };
        }

        if value <= self.heavy {
            let span = self.heavy - self.moderate;
            return if span > 0.0 {
                0.5 + 0.3 * (value - self.moderate) / span
            } else {
                0.8
            };
        }

        // one half-life every half of the moderate→heavy span
        let half_life = match (self.heavy - self.moderate) / 2.0 {
            h if h > 0.0 => h,
            _ => 1.0,
        };
        1.0 - 0.2 * 0.5_f64.powf((value - self.heavy) / half_life)
    }

    fn is_ordered(&self) -> bool {
        self.light <= self.moderate && self.moderate <= self.heavy
    }
}

/// Thresholds for every sampled metric
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThrottleThresholds {
    /// CPU usage percent
    pub cpu: MetricThresholds,
    /// Memory usage percent
    pub memory: MetricThresholds,
    /// Pending items across batch queues
    pub queue: MetricThresholds,
    /// Retryable executor failures inside the sampling window
    pub api_failures: MetricThresholds,
}

impl Default for ThrottleThresholds {
    fn default() -> Self {
        Self {
            cpu: MetricThresholds::new(60.0, 80.0, 90.0),
            memory: MetricThresholds::new(70.0, 85.0, 95.0),
            queue: MetricThresholds::new(50.0, 100.0, 200.0),
            api_failures: MetricThresholds::new(5.0, 10.0, 20.0),
        }
    }
}

impl ThrottleThresholds {
    pub fn validate(&self) -> Result<(), String> {
        for (name, t) in [
            ("cpu", &self.cpu),
            ("memory", &self.memory),
            ("queue", &self.queue),
            ("api_failures", &self.api_failures),
        ] {
            if !t.is_ordered() {
                return Err(format!(
                    "{name} thresholds must satisfy light <= moderate <= heavy"
                ));
            }
        }
        Ok(())
    }
}

/// Weighted throttle level in 0..=100
pub fn compute_throttle_level(metrics: &SystemMetrics, thresholds: &ThrottleThresholds) -> u8 {
    let weighted = QUEUE_WEIGHT * thresholds.queue.factor(metrics.queue_size as f64)
        + API_FAILURE_WEIGHT * thresholds.api_failures.factor(metrics.api_failures as f64)
        + CPU_WEIGHT * thresholds.cpu.factor(metrics.cpu_percent)
        + MEMORY_WEIGHT * thresholds.memory.factor(metrics.memory_percent);

    (weighted * 100.0).round().clamp(0.0, 100.0) as u8
}
