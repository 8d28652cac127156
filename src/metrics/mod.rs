//! Prometheus metrics for the governance core
//!
//! This module provides metrics tracking for:
//! - Executor: retries, circuit breaker openings, final failures
//! - Governor: throttle level and the current resource limits
//! - Orchestrator: cycle runs, failures, skipped overlaps and durations
//! - Batch queue: batch transitions and per-item outcomes
//! - Alerts raised by severity
//!
//! # Usage
//!
//! Call `init_metrics()` at application startup to register all metrics.
//! If initialization fails, metrics operations become no-ops.

use prometheus::{
    register_counter_vec, register_gauge, register_histogram_vec, CounterVec, Encoder, Gauge,
    HistogramVec, TextEncoder,
};
use std::sync::OnceLock;

// ============================================================================
// Metrics Storage
// ============================================================================

/// Container for executor and governor metrics
struct ResilienceMetrics {
    retries: CounterVec,
    breaker_opened: CounterVec,
    final_failures: CounterVec,
    throttle_level: Gauge,
    max_concurrent_jobs: Gauge,
    max_queue_size: Gauge,
    api_rate_limit: Gauge,
    alerts: CounterVec,
}

/// Container for orchestrator and batch metrics
struct PipelineMetrics {
    cycle_runs: CounterVec,
    cycle_failures: CounterVec,
    cycle_overlaps: CounterVec,
    cycle_duration: HistogramVec,
    batches: CounterVec,
    items: CounterVec,
}

static RESILIENCE_METRICS: OnceLock<ResilienceMetrics> = OnceLock::new();

static PIPELINE_METRICS: OnceLock<PipelineMetrics> = OnceLock::new();

/// Flag to track if initialization was attempted
static METRICS_INIT_ATTEMPTED: OnceLock<bool> = OnceLock::new();

// ============================================================================
// Initialization
// ============================================================================

/// Initialize all Prometheus metrics
///
/// Safe to call more than once; only the first call registers anything.
///
/// ```ignore
/// if let Err(e) = polycast::metrics::init_metrics() {
///     eprintln!("Warning: Metrics initialization failed: {}", e);
/// }
/// ```
pub fn init_metrics() -> Result<(), Box<dyn std::error::Error>> {
    if METRICS_INIT_ATTEMPTED.get().is_some() {
        return Ok(());
    }
    METRICS_INIT_ATTEMPTED.set(true).ok();

    let resilience = ResilienceMetrics {
        retries: register_counter_vec!(
            "polycast_executor_retries_total",
            "Total retry attempts by service",
            &["service"]
        )?,
        breaker_opened: register_counter_vec!(
            "polycast_executor_breaker_opened_total",
            "Total circuit breaker openings by key",
            &["key"]
        )?,
        final_failures: register_counter_vec!(
            "polycast_executor_final_failures_total",
            "Operations that failed after exhausting retries",
            &["service"]
        )?,
        throttle_level: register_gauge!(
            "polycast_governor_throttle_level",
            "Current throttle level (0-100)"
        )?,
        max_concurrent_jobs: register_gauge!(
            "polycast_governor_max_concurrent_jobs",
            "Current concurrent job limit"
        )?,
        max_queue_size: register_gauge!(
            "polycast_governor_max_queue_size",
            "Current queue size limit"
        )?,
        api_rate_limit: register_gauge!(
            "polycast_governor_api_rate_limit",
            "Current API calls per minute limit"
        )?,
        alerts: register_counter_vec!(
            "polycast_alerts_total",
            "Alerts raised by severity",
            &["severity"]
        )?,
    };

    let pipeline = PipelineMetrics {
        cycle_runs: register_counter_vec!(
            "polycast_cycle_runs_total",
            "Completed orchestrator cycle runs",
            &["cycle"]
        )?,
        cycle_failures: register_counter_vec!(
            "polycast_cycle_failures_total",
            "Failed orchestrator cycle runs",
            &["cycle"]
        )?,
        cycle_overlaps: register_counter_vec!(
            "polycast_cycle_overlaps_total",
            "Cycle ticks skipped because the previous run was still active",
            &["cycle"]
        )?,
        cycle_duration: register_histogram_vec!(
            "polycast_cycle_duration_seconds",
            "Orchestrator cycle duration in seconds",
            &["cycle"],
            vec![0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 15.0, 60.0, 300.0]
        )?,
        batches: register_counter_vec!(
            "polycast_batches_total",
            "Batch state transitions by language and state",
            &["language", "state"]
        )?,
        items: register_counter_vec!(
            "polycast_batch_items_total",
            "Batch items by language and outcome",
            &["language", "outcome"]
        )?,
    };

    RESILIENCE_METRICS
        .set(resilience)
        .map_err(|_| "Resilience metrics already initialized")?;
    PIPELINE_METRICS
        .set(pipeline)
        .map_err(|_| "Pipeline metrics already initialized")?;

    tracing::info!("Prometheus metrics initialized successfully");
    Ok(())
}

/// Check if metrics have been initialized
pub fn metrics_initialized() -> bool {
    RESILIENCE_METRICS.get().is_some() && PIPELINE_METRICS.get().is_some()
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Encode all metrics to Prometheus text format
pub fn encode_metrics() -> Result<String, Box<dyn std::error::Error>> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}

pub fn record_retry(service: &str) {
    if let Some(m) = RESILIENCE_METRICS.get() {
        m.retries.with_label_values(&[service]).inc();
    }
}

pub fn record_breaker_opened(key: &str) {
    if let Some(m) = RESILIENCE_METRICS.get() {
        m.breaker_opened.with_label_values(&[key]).inc();
    }
}

pub fn record_final_failure(service: &str) {
    if let Some(m) = RESILIENCE_METRICS.get() {
        m.final_failures.with_label_values(&[service]).inc();
    }
}

pub fn record_alert(severity: &str) {
    if let Some(m) = RESILIENCE_METRICS.get() {
        m.alerts.with_label_values(&[severity]).inc();
    }
}

/// Publish the governor's current level and limits
pub fn update_resource_limits(
    throttle_level: u8,
    max_concurrent_jobs: usize,
    max_queue_size: usize,
    api_rate_limit: u32,
) {
    let Some(m) = RESILIENCE_METRICS.get() else {
        return;
    };

    m.throttle_level.set(f64::from(throttle_level));
    m.max_concurrent_jobs.set(max_concurrent_jobs as f64);
    m.max_queue_size.set(max_queue_size as f64);
    m.api_rate_limit.set(f64::from(api_rate_limit));
}

/// Record the outcome of one cycle run
pub fn record_cycle(cycle: &str, success: bool) {
    let Some(m) = PIPELINE_METRICS.get() else {
        return;
    };

    if success {
        m.cycle_runs.with_label_values(&[cycle]).inc();
    } else {
        m.cycle_failures.with_label_values(&[cycle]).inc();
    }
}

pub fn record_cycle_overlap(cycle: &str) {
    if let Some(m) = PIPELINE_METRICS.get() {
        m.cycle_overlaps.with_label_values(&[cycle]).inc();
    }
}

pub fn record_batch_transition(language: &str, state: &str) {
    if let Some(m) = PIPELINE_METRICS.get() {
        m.batches.with_label_values(&[language, state]).inc();
    }
}

/// Record per-item results for a finished batch
pub fn record_batch_items(language: &str, processed: u64, failed: u64, skipped: u64) {
    let Some(m) = PIPELINE_METRICS.get() else {
        return;
    };

    for (outcome, count) in [("processed", processed), ("failed", failed), ("skipped", skipped)] {
        if count > 0 {
            m.items
                .with_label_values(&[language, outcome])
                .inc_by(count as f64);
        }
    }
}

/// Histogram timer guard that records duration on drop
pub struct MetricsTimer {
    timer: Option<prometheus::HistogramTimer>,
}

impl MetricsTimer {
    fn new(timer: prometheus::HistogramTimer) -> Self {
        Self { timer: Some(timer) }
    }

    /// Create a no-op timer when metrics are not initialized
    fn noop() -> Self {
        Self { timer: None }
    }
}

impl Drop for MetricsTimer {
    fn drop(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.stop_and_record();
        }
    }
}

/// Start a cycle duration timer
pub fn start_cycle_timer(cycle: &str) -> MetricsTimer {
    match PIPELINE_METRICS.get() {
        Some(m) => MetricsTimer::new(m.cycle_duration.with_label_values(&[cycle]).start_timer()),
        None => MetricsTimer::noop(),
    }
}

// ============================================================================
// Tests
// ============================================================================
