//! Dynamic resource governor
//!
//! Samples system metrics on a fixed interval, turns them into a 0-100
//! throttle level and derives the concurrency / queue / API limits every
//! other component must read before dispatching work.
//!
//! The governor is the single writer of [`ResourceLimits`]. Readers get them
//! through a `tokio::sync::watch` channel ([`ResourceGovernor::subscribe`] or
//! [`ResourceGovernor::snapshot`]) and must read immediately before dispatch.
//!
//! ```text
//!  MetricsSource ──sample──▶ throttle level ──▶ limits ──watch──▶ batch queue
//!                                  │                               orchestrator
//!                                  └──▶ throttle actions (pause / delay / skip / emergency)
//! ```

mod source;
mod throttle;

pub use source::{MetricsSource, QueueDepth, StaticMetricsSource, SystemMetricsSource};
pub use throttle::{compute_throttle_level, MetricThresholds, ThrottleThresholds};

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Mutex};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::executor::Executor;
use crate::models::{WorkFilter, WorkItemKind, WorkItemPatch, WorkItemStatus};
use crate::notifications::{AlertSeverity, AlertSink, AlertType, PerformanceAlert};
use crate::store::ContentStore;

// ============================================================================
// Types
// ============================================================================

/// One reading of system load
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemMetrics {
    pub cpu_percent: f64,
    pub memory_percent: f64,
    pub queue_size: u64,
    pub api_failures: u64,
    pub active_jobs: u64,
    pub timestamp: DateTime<Utc>,
}

impl SystemMetrics {
    pub fn idle() -> Self {
        Self {
            cpu_percent: 0.0,
            memory_percent: 0.0,
            queue_size: 0,
            api_failures: 0,
            active_jobs: 0,
            timestamp: Utc::now(),
        }
    }
}

/// Capacity figures, either a baseline or hard minimums
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapacityLimits {
    pub max_concurrent_jobs: usize,
    pub max_queue_size: usize,
    pub api_rate_limit: u32,
}

/// Current limits every dispatcher must honor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceLimits {
    pub max_concurrent_jobs: usize,
    pub max_queue_size: usize,
    /// API calls per minute
    pub api_rate_limit: u32,
    pub throttle_level: u8,
}

/// What the governor publishes on its watch channel
#[derive(Debug, Clone, PartialEq)]
pub struct GovernorSnapshot {
    pub limits: ResourceLimits,
    pub emergency: bool,
    pub skip_non_critical: bool,
    pub delay_until: Option<Instant>,
}

impl GovernorSnapshot {
    pub fn processing_delayed(&self) -> bool {
        self.delay_until.is_some_and(|until| Instant::now() < until)
    }

    /// Whether new work may be dispatched right now
    pub fn dispatch_allowed(&self) -> bool {
        !self.emergency && !self.processing_delayed()
    }
}

/// Importance of a task for throttling decisions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskType {
    Critical,
    NonCritical,
}

/// Actions issued when the throttle level changes
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ThrottleAction {
    EmergencyMode,
    PauseJobs { count: usize },
    ReduceConcurrency,
    SkipNonCritical,
    DelayProcessing { seconds: u64 },
    ResumeJobs { count: usize },
}

/// One recorded limit change
#[derive(Debug, Clone, Serialize)]
pub struct LimitChange {
    pub at: DateTime<Utc>,
    pub from_level: u8,
    pub to_level: u8,
    pub limits: ResourceLimits,
    pub reason: String,
}

/// Read-only view of the governor for operators
#[derive(Debug, Clone, Serialize)]
pub struct ThrottleStatus {
    pub limits: ResourceLimits,
    pub baseline: CapacityLimits,
    pub emergency: bool,
    pub emergency_until: Option<DateTime<Utc>>,
    pub manual_override: Option<u8>,
    pub skip_non_critical: bool,
    pub processing_delayed: bool,
    pub pending_actions: Vec<ThrottleAction>,
    pub paused_jobs: usize,
    pub last_metrics: Option<SystemMetrics>,
    pub history: Vec<LimitChange>,
}

/// Governor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GovernorConfig {
    pub sample_interval_secs: u64,
    pub thresholds: ThrottleThresholds,
    pub baseline: CapacityLimits,
    pub minimums: CapacityLimits,
    /// Lowest concurrency multiplier outside emergency mode
    pub floor_multiplier: f64,
    pub emergency_duration_secs: u64,
    /// Level restored once emergency mode expires
    pub emergency_restore_level: u8,
    pub delay_secs: u64,
    /// Paused jobs resumed per low-load sample
    pub resume_batch_size: usize,
    pub history_capacity: usize,
    /// Window for counting API failures (seconds)
    pub api_failure_window_secs: i64,
}

impl Default for GovernorConfig {
    fn default() -> Self {
        Self {
            sample_interval_secs: 30,
            thresholds: ThrottleThresholds::default(),
            baseline: CapacityLimits {
                max_concurrent_jobs: 10,
                max_queue_size: 500,
                api_rate_limit: 60,
            },
            minimums: CapacityLimits {
                max_concurrent_jobs: 1,
                max_queue_size: 10,
                api_rate_limit: 5,
            },
            floor_multiplier: 0.3,
            emergency_duration_secs: 300,
            emergency_restore_level: 50,
            delay_secs: 60,
            resume_batch_size: 5,
            history_capacity: 100,
            api_failure_window_secs: 300,
        }
    }
}

impl GovernorConfig {
    /// `max(floor, 1 - level/100 * 0.7)`
    pub fn concurrency_multiplier(&self, level: u8) -> f64 {
        (1.0 - f64::from(level.min(100)) / 100.0 * 0.7).max(self.floor_multiplier)
    }

    /// Limits for a throttle level, each bounded below by its hard minimum
    pub fn limits_for_level(&self, level: u8) -> ResourceLimits {
        let multiplier = self.concurrency_multiplier(level);
        let scale = |value: f64| (value * multiplier).round();

        ResourceLimits {
            max_concurrent_jobs: (scale(self.baseline.max_concurrent_jobs as f64) as usize)
                .max(self.minimums.max_concurrent_jobs),
            max_queue_size: (scale(self.baseline.max_queue_size as f64) as usize)
                .max(self.minimums.max_queue_size),
            api_rate_limit: (scale(f64::from(self.baseline.api_rate_limit)) as u32)
                .max(self.minimums.api_rate_limit),
            throttle_level: level,
        }
    }

    fn emergency_limits(&self, level: u8) -> ResourceLimits {
        ResourceLimits {
            max_concurrent_jobs: self.minimums.max_concurrent_jobs,
            max_queue_size: self.minimums.max_queue_size,
            api_rate_limit: self.minimums.api_rate_limit,
            throttle_level: level,
        }
    }
}

// ============================================================================
// Governor
// ============================================================================

#[derive(Debug, Default)]
struct GovernorState {
    level: u8,
    limits: Option<ResourceLimits>,
    manual_override: Option<u8>,
    emergency_until: Option<Instant>,
    emergency_until_utc: Option<DateTime<Utc>>,
    delay_until: Option<Instant>,
    skip_non_critical: bool,
    pending_actions: Vec<ThrottleAction>,
    paused_jobs: Vec<String>,
    last_metrics: Option<SystemMetrics>,
    history: VecDeque<LimitChange>,
}

/// Job side effects computed under the state lock, executed after it
enum JobEffect {
    PauseAll,
    Resume(Vec<String>),
}

/// Computes throttle levels and owns the process-wide resource limits
pub struct ResourceGovernor {
    config: GovernorConfig,
    state: Mutex<GovernorState>,
    tx: watch::Sender<GovernorSnapshot>,
    store: Arc<dyn ContentStore>,
    executor: Arc<Executor>,
    alerts: Arc<dyn AlertSink>,
}

impl ResourceGovernor {
    pub fn new(
        config: GovernorConfig,
        store: Arc<dyn ContentStore>,
        executor: Arc<Executor>,
        alerts: Arc<dyn AlertSink>,
    ) -> Self {
        let limits = config.limits_for_level(0);
        let (tx, _) = watch::channel(GovernorSnapshot {
            limits,
            emergency: false,
            skip_non_critical: false,
            delay_until: None,
        });
        let state = GovernorState {
            limits: Some(limits),
            ..Default::default()
        };

        Self {
            config,
            state: Mutex::new(state),
            tx,
            store,
            executor,
            alerts,
        }
    }

    pub fn config(&self) -> &GovernorConfig {
        &self.config
    }

    /// Subscribe to limit changes
    pub fn subscribe(&self) -> watch::Receiver<GovernorSnapshot> {
        self.tx.subscribe()
    }

    /// Latest published snapshot
    pub fn snapshot(&self) -> GovernorSnapshot {
        self.tx.borrow().clone()
    }

    /// Latest published limits
    pub fn limits(&self) -> ResourceLimits {
        self.tx.borrow().limits
    }

    /// Whether a task of the given type should be skipped right now
    pub fn should_skip(&self, task: TaskType) -> bool {
        let snapshot = self.snapshot();
        task == TaskType::NonCritical && (snapshot.skip_non_critical || snapshot.emergency)
    }

    /// Feed one metrics reading; returns the resulting throttle level
    pub async fn sample(&self, metrics: SystemMetrics) -> u8 {
        let (level, effect) = {
            let mut state = self.state.lock().await;
            state.last_metrics = Some(metrics.clone());

            if let Some(effect) = self.expire_emergency(&mut state) {
                (state.level, Some(effect))
            } else if self.emergency_active(&state) {
                debug!(level = state.level, "Emergency mode active, sample ignored");
                (state.level, None)
            } else if let Some(level) = state.manual_override {
                (level, None)
            } else {
                let computed = compute_throttle_level(&metrics, &self.config.thresholds);
                debug!(
                    cpu = metrics.cpu_percent,
                    memory = metrics.memory_percent,
                    queue = metrics.queue_size,
                    api_failures = metrics.api_failures,
                    computed,
                    "Sampled system metrics"
                );
                let effect = if computed != state.level {
                    self.apply_level(&mut state, computed, "sampled")
                } else {
                    None
                };
                (computed, effect)
            }
        };

        self.raise_level_alerts(level).await;
        if let Some(effect) = effect {
            self.run_effect(effect).await;
        }
        level
    }

    /// Pin the throttle level until [`Self::reset_to_baseline`]
    pub async fn force_throttle_level(&self, level: u8) -> ResourceLimits {
        let level = level.min(100);
        let (limits, effect) = {
            let mut state = self.state.lock().await;
            state.manual_override = Some(level);
            state.emergency_until = None;
            state.emergency_until_utc = None;
            let effect = self.apply_level(&mut state, level, "manual override");
            (state.limits.unwrap_or_else(|| self.config.limits_for_level(level)), effect)
        };

        info!(level, "Throttle level forced");
        self.raise_level_alerts(level).await;
        if let Some(effect) = effect {
            self.run_effect(effect).await;
        }
        limits
    }

    /// Restore baseline limits, clear overrides, actions and emergency mode
    pub async fn reset_to_baseline(&self) -> ResourceLimits {
        let (limits, paused) = {
            let mut state = self.state.lock().await;
            let from = state.level;
            state.level = 0;
            state.manual_override = None;
            state.emergency_until = None;
            state.emergency_until_utc = None;
            state.delay_until = None;
            state.skip_non_critical = false;
            state.pending_actions.clear();
            let limits = self.config.limits_for_level(0);
            self.record_change(&mut state, from, limits, "reset to baseline");
            self.publish(&state);
            (limits, std::mem::take(&mut state.paused_jobs))
        };

        info!("Resource limits reset to baseline");
        if !paused.is_empty() {
            self.run_effect(JobEffect::Resume(paused)).await;
        }
        limits
    }

    /// Enter emergency mode: minimal limits, non-critical work skipped,
    /// pending jobs paused. Re-triggering extends the window.
    pub async fn emergency_stop(&self) -> ResourceLimits {
        let limits = {
            let mut state = self.state.lock().await;
            self.enter_emergency(&mut state, 100, "emergency stop");
            state
                .limits
                .unwrap_or_else(|| self.config.emergency_limits(100))
        };

        self.raise_emergency_alert("Emergency stop requested").await;
        self.run_effect(JobEffect::PauseAll).await;
        limits
    }

    /// Halve the API budget until the next level change (recovery action)
    pub async fn reduce_api_rate(&self) -> u32 {
        let mut state = self.state.lock().await;
        let mut limits = state
            .limits
            .unwrap_or_else(|| self.config.limits_for_level(state.level));
        let from = state.level;
        limits.api_rate_limit = (limits.api_rate_limit / 2).max(self.config.minimums.api_rate_limit);
        self.record_change(&mut state, from, limits, "reduce api rate");
        self.publish(&state);
        info!(api_rate_limit = limits.api_rate_limit, "API rate limit reduced");
        limits.api_rate_limit
    }

    /// Hold off new dispatches for `duration`
    pub async fn delay_processing(&self, duration: Duration) {
        let mut state = self.state.lock().await;
        let until = Instant::now() + duration;
        if state.delay_until.map_or(true, |current| current < until) {
            state.delay_until = Some(until);
        }
        self.publish(&state);
        info!(seconds = duration.as_secs(), "Processing delayed");
    }

    /// Current throttle status; expires emergency mode if due
    pub async fn throttle_status(&self) -> ThrottleStatus {
        let effect = {
            let mut state = self.state.lock().await;
            self.expire_emergency(&mut state)
        };
        if let Some(effect) = effect {
            self.run_effect(effect).await;
        }

        let state = self.state.lock().await;
        ThrottleStatus {
            limits: state
                .limits
                .unwrap_or_else(|| self.config.limits_for_level(state.level)),
            baseline: self.config.baseline,
            emergency: self.emergency_active(&state),
            emergency_until: state.emergency_until_utc,
            manual_override: state.manual_override,
            skip_non_critical: state.skip_non_critical,
            processing_delayed: state.delay_until.is_some_and(|u| Instant::now() < u),
            pending_actions: state.pending_actions.clone(),
            paused_jobs: state.paused_jobs.len(),
            last_metrics: state.last_metrics.clone(),
            history: state.history.iter().cloned().collect(),
        }
    }

    /// Sample on a fixed interval until `shutdown` flips to true
    pub async fn run_sampler(
        self: Arc<Self>,
        source: Arc<dyn MetricsSource>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let period = Duration::from_secs(self.config.sample_interval_secs.max(1));
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match source.sample_system_metrics().await {
                        Ok(metrics) => {
                            self.sample(metrics).await;
                        }
                        Err(e) => warn!(error = %e, "Failed to sample system metrics"),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        debug!("Governor sampler stopped");
                        break;
                    }
                }
            }
        }
    }

    // ========================================================================
    // Internals (called with the state lock held)
    // ========================================================================

    fn emergency_active(&self, state: &GovernorState) -> bool {
        state.emergency_until.is_some_and(|until| Instant::now() < until)
    }

    fn expire_emergency(&self, state: &mut GovernorState) -> Option<JobEffect> {
        let until = state.emergency_until?;
        if Instant::now() < until {
            return None;
        }

        state.emergency_until = None;
        state.emergency_until_utc = None;
        state.manual_override = None;
        info!(
            level = self.config.emergency_restore_level,
            "Emergency mode expired, restoring mid-level throttle"
        );
        self.apply_level(state, self.config.emergency_restore_level, "emergency expired")
    }

    fn enter_emergency(&self, state: &mut GovernorState, level: u8, reason: &str) {
        let duration = Duration::from_secs(self.config.emergency_duration_secs);
        state.emergency_until = Some(Instant::now() + duration);
        state.emergency_until_utc = Some(
            Utc::now() + chrono::Duration::seconds(self.config.emergency_duration_secs as i64),
        );
        state.skip_non_critical = true;
        state.pending_actions = vec![
            ThrottleAction::EmergencyMode,
            ThrottleAction::PauseJobs { count: 0 },
        ];

        let from = state.level;
        state.level = level;
        let limits = self.config.emergency_limits(level);
        self.record_change(state, from, limits, reason);
        self.publish(state);
        warn!(level, reason, "Emergency mode engaged");
    }

    /// Move to `level`, recompute limits and schedule throttle actions
    fn apply_level(&self, state: &mut GovernorState, level: u8, reason: &str) -> Option<JobEffect> {
        let from = state.level;
        state.level = level;

        if level > from && level >= 80 {
            self.enter_emergency(state, level, reason);
            return Some(JobEffect::PauseAll);
        }

        let limits = self.config.limits_for_level(level);
        self.record_change(state, from, limits, reason);

        let mut effect = None;
        if level > from {
            if level >= 60 {
                state.skip_non_critical = true;
                state.pending_actions = vec![
                    ThrottleAction::ReduceConcurrency,
                    ThrottleAction::SkipNonCritical,
                ];
            } else if level >= 40 {
                let seconds = self.config.delay_secs;
                state.delay_until = Some(Instant::now() + Duration::from_secs(seconds));
                state.pending_actions = vec![ThrottleAction::DelayProcessing { seconds }];
            }
        } else {
            if level < 60 {
                state.skip_non_critical = false;
            }
            if level < 30 {
                state.pending_actions.clear();
                state.delay_until = None;
                let take = self.config.resume_batch_size.min(state.paused_jobs.len());
                if take > 0 {
                    let resumed: Vec<String> = state.paused_jobs.drain(..take).collect();
                    state
                        .pending_actions
                        .push(ThrottleAction::ResumeJobs { count: resumed.len() });
                    effect = Some(JobEffect::Resume(resumed));
                }
            }
        }

        self.publish(state);
        effect
    }

    fn record_change(
        &self,
        state: &mut GovernorState,
        from_level: u8,
        limits: ResourceLimits,
        reason: &str,
    ) {
        state.limits = Some(limits);
        if state.history.len() >= self.config.history_capacity.max(1) {
            state.history.pop_front();
        }
        state.history.push_back(LimitChange {
            at: Utc::now(),
            from_level,
            to_level: limits.throttle_level,
            limits,
            reason: reason.to_string(),
        });

        info!(
            from_level,
            to_level = limits.throttle_level,
            max_concurrent_jobs = limits.max_concurrent_jobs,
            max_queue_size = limits.max_queue_size,
            api_rate_limit = limits.api_rate_limit,
            reason,
            "Resource limits changed"
        );
        crate::metrics::update_resource_limits(
            limits.throttle_level,
            limits.max_concurrent_jobs,
            limits.max_queue_size,
            limits.api_rate_limit,
        );
    }

    fn publish(&self, state: &GovernorState) {
        let limits = state
            .limits
            .unwrap_or_else(|| self.config.limits_for_level(state.level));
        let snapshot = GovernorSnapshot {
            limits,
            emergency: self.emergency_active(state),
            skip_non_critical: state.skip_non_critical,
            delay_until: state.delay_until,
        };
        self.tx.send_replace(snapshot);
    }

    // ========================================================================
    // Side effects (called without the state lock)
    // ========================================================================

    async fn raise_level_alerts(&self, level: u8) {
        if level >= 80 {
            self.raise_emergency_alert("Throttle level reached emergency band")
                .await;
        } else if level >= 60 {
            self.alerts
                .raise_alert(
                    PerformanceAlert::new(
                        AlertType::ThrottleLevel,
                        AlertSeverity::High,
                        "High throttle level",
                        format!("Throttle level {level}; non-critical work skipped"),
                    )
                    .with_threshold(60.0, f64::from(level)),
                )
                .await;
        }
    }

    async fn raise_emergency_alert(&self, title: &str) {
        let level = self.state.lock().await.level;
        self.alerts
            .raise_alert(
                PerformanceAlert::new(
                    AlertType::EmergencyMode,
                    AlertSeverity::Critical,
                    title,
                    format!(
                        "Limits forced to minimums for {}s",
                        self.config.emergency_duration_secs
                    ),
                )
                .with_threshold(80.0, f64::from(level)),
            )
            .await;
    }

    async fn run_effect(&self, effect: JobEffect) {
        match effect {
            JobEffect::PauseAll => self.pause_pending_jobs().await,
            JobEffect::Resume(ids) => self.resume_jobs(ids).await,
        }
    }

    async fn pause_pending_jobs(&self) {
        let ctx = self.executor.store_context("list_work_items");
        let store = self.store.clone();
        let pending = match self
            .executor
            .execute_with_retry(&ctx, || {
                let store = store.clone();
                async move {
                    let filter = WorkFilter::kind(WorkItemKind::Production)
                        .with_statuses(&[WorkItemStatus::Pending]);
                    Ok(store.list_work_items(&filter).await?)
                }
            })
            .await
        {
            Ok(items) => items,
            Err(e) => {
                warn!(error = %e, "Failed to list pending jobs for pausing");
                return;
            }
        };

        let mut paused = Vec::new();
        for item in pending {
            let ctx = self.executor.store_context("update_work_item");
            let id = item.id.clone();
            let result = self
                .executor
                .execute_with_retry(&ctx, || {
                    let store = store.clone();
                    let id = id.clone();
                    async move {
                        Ok(store
                            .update_work_item(&id, WorkItemPatch::status(WorkItemStatus::Paused))
                            .await?)
                    }
                })
                .await;
            match result {
                Ok(_) => paused.push(item.id),
                Err(e) => warn!(job_id = %item.id, error = %e, "Failed to pause job"),
            }
        }

        let count = paused.len();
        let mut state = self.state.lock().await;
        for action in state.pending_actions.iter_mut() {
            if let ThrottleAction::PauseJobs { count: c } = action {
                *c = count;
            }
        }
        state.paused_jobs.extend(paused);
        info!(count, "Pending jobs paused");
    }

    async fn resume_jobs(&self, ids: Vec<String>) {
        let store = self.store.clone();
        let mut resumed = 0usize;
        for id in ids {
            let ctx = self.executor.store_context("update_work_item");
            let result = self
                .executor
                .execute_with_retry(&ctx, || {
                    let store = store.clone();
                    let id = id.clone();
                    async move {
                        Ok(store
                            .update_work_item(&id, WorkItemPatch::status(WorkItemStatus::Pending))
                            .await?)
                    }
                })
                .await;
            match result {
                Ok(_) => resumed += 1,
                Err(e) => warn!(job_id = %id, error = %e, "Failed to resume job"),
            }
        }
        info!(count = resumed, "Paused jobs resumed");
    }
}
