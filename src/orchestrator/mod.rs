//! Autonomous orchestrator
//!
//! Drives five independently timed cycles plus the governor sampler and the
//! batch dispatcher:
//!
//! | cycle            | default period | work                                        |
//! |------------------|----------------|---------------------------------------------|
//! | `trend_refresh`  | 60 min         | refresh trending topics from recent content |
//! | `scheduling`     | 30 min         | plan, auto-approve and enqueue              |
//! | `batch_creation` | 60 min         | enqueue externally approved review items    |
//! | `health_check`   | 5 min          | capacity, stuck jobs, dependencies, recovery|
//! | `maintenance`    | hourly check   | retention cleanup once a day                |
//!
//! Every timer is a task selecting on its interval and a shared shutdown
//! watch channel. A cycle never overlaps itself: a tick arriving while the
//! previous run is still going is counted and skipped.

pub mod health;

pub use health::{ComponentHealth, HealthReport, HealthStatus, StuckJob};

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Timelike, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::analytics::TrendAnalyzer;
use crate::batch::{BatchQueue, QueueStatus};
use crate::error::{Error, Result};
use crate::executor::{Executor, OperationContext, RecoveryAction, RetryPolicy};
use crate::governor::{MetricsSource, ResourceGovernor, ResourceLimits, TaskType};
use crate::llm::AiAvailability;
use crate::models::{
    ContentFilter, ContentItem, Language, WorkFilter, WorkItem, WorkItemKind, WorkItemPatch,
    WorkItemStatus,
};
use crate::notifications::{AlertManager, AlertSeverity, AlertSink, AlertType, PerformanceAlert};
use crate::scheduler::{PlanOutcome, SchedulePlanner};
use crate::store::ContentStore;

use health::{capacity_check, find_stuck_jobs};

// ============================================================================
// Configuration
// ============================================================================

/// Orchestrator configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub scheduling_interval_minutes: u64,
    pub trend_refresh_interval_minutes: u64,
    pub health_check_interval_minutes: u64,
    pub batch_creation_interval_minutes: u64,
    /// How often to check whether maintenance is due
    pub maintenance_check_interval_minutes: u64,

    /// UTC hour at which daily maintenance runs
    pub maintenance_hour: u32,

    /// Content items considered per planning pass
    pub max_items_per_cycle: usize,

    /// Ceiling for running production jobs
    pub max_active_jobs: usize,

    /// Running jobs older than this are reported as stuck
    pub stuck_job_hours: i64,

    pub work_item_retention_days: i64,

    /// Retention for the executor failure log and resolved alerts
    pub log_retention_hours: i64,

    /// How long AI-backed factors stay on heuristics after repeated outages
    pub fallback_minutes: u64,

    /// Commit plans; when false the scheduling cycle only previews
    pub auto_execute: bool,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            scheduling_interval_minutes: 30,
            trend_refresh_interval_minutes: 60,
            health_check_interval_minutes: 5,
            batch_creation_interval_minutes: 60,
            maintenance_check_interval_minutes: 60,
            maintenance_hour: 3,
            max_items_per_cycle: 50,
            max_active_jobs: 20,
            stuck_job_hours: 2,
            work_item_retention_days: 30,
            log_retention_hours: 24,
            fallback_minutes: 15,
            auto_execute: true,
        }
    }
}

impl OrchestratorConfig {
    pub fn validate(&self) -> Result<()> {
        let intervals = [
            self.scheduling_interval_minutes,
            self.trend_refresh_interval_minutes,
            self.health_check_interval_minutes,
            self.batch_creation_interval_minutes,
            self.maintenance_check_interval_minutes,
        ];
        if intervals.contains(&0) {
            return Err(Error::config("cycle intervals must be greater than 0"));
        }
        if self.maintenance_hour > 23 {
            return Err(Error::config(format!(
                "maintenance_hour must be 0-23, got {}",
                self.maintenance_hour
            )));
        }
        if self.max_active_jobs == 0 || self.stuck_job_hours <= 0 {
            return Err(Error::config(
                "max_active_jobs and stuck_job_hours must be greater than 0",
            ));
        }
        Ok(())
    }

    fn period(&self, kind: CycleKind) -> Duration {
        let minutes = match kind {
            CycleKind::Scheduling => self.scheduling_interval_minutes,
            CycleKind::TrendRefresh => self.trend_refresh_interval_minutes,
            CycleKind::HealthCheck => self.health_check_interval_minutes,
            CycleKind::BatchCreation => self.batch_creation_interval_minutes,
            CycleKind::Maintenance => self.maintenance_check_interval_minutes,
        };
        Duration::from_secs(minutes.max(1) * 60)
    }
}

// ============================================================================
// Types
// ============================================================================

/// Orchestrator lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrchestratorStatus {
    Stopped,
    Running,
    Paused,
    Error,
    Maintenance,
}

impl OrchestratorStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stopped => "stopped",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Error => "error",
            Self::Maintenance => "maintenance",
        }
    }
}

/// The periodic cycles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleKind {
    TrendRefresh,
    Scheduling,
    BatchCreation,
    HealthCheck,
    Maintenance,
}

impl CycleKind {
    /// Order of the immediate pass on start
    pub const ALL: [CycleKind; 5] = [
        Self::TrendRefresh,
        Self::Scheduling,
        Self::BatchCreation,
        Self::HealthCheck,
        Self::Maintenance,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TrendRefresh => "trend_refresh",
            Self::Scheduling => "scheduling",
            Self::BatchCreation => "batch_creation",
            Self::HealthCheck => "health_check",
            Self::Maintenance => "maintenance",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "trend_refresh" | "trends" => Some(Self::TrendRefresh),
            "scheduling" | "schedule" => Some(Self::Scheduling),
            "batch_creation" | "batches" => Some(Self::BatchCreation),
            "health_check" | "health" => Some(Self::HealthCheck),
            "maintenance" => Some(Self::Maintenance),
            _ => None,
        }
    }

    fn index(&self) -> usize {
        match self {
            Self::TrendRefresh => 0,
            Self::Scheduling => 1,
            Self::BatchCreation => 2,
            Self::HealthCheck => 3,
            Self::Maintenance => 4,
        }
    }

    /// Skipped while the governor sheds non-critical work
    fn task_type(&self) -> TaskType {
        match self {
            Self::TrendRefresh => TaskType::NonCritical,
            _ => TaskType::Critical,
        }
    }
}

/// How one cycle run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleOutcome {
    Completed,
    Failed,
    Skipped,
}

/// Result of one cycle run
#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub cycle: CycleKind,
    pub outcome: CycleOutcome,
    pub detail: serde_json::Value,
    pub duration_ms: u64,
}

/// Per-cycle counters
#[derive(Debug, Clone, Default, Serialize)]
pub struct CycleStats {
    pub runs: u64,
    pub failures: u64,
    pub consecutive_failures: u64,
    pub skipped: u64,
    pub overlaps: u64,
    pub last_started_at: Option<DateTime<Utc>>,
    pub last_finished_at: Option<DateTime<Utc>>,
    pub last_duration_ms: Option<u64>,
    pub last_error: Option<String>,
}

/// Aggregated view served by `metrics()`
#[derive(Debug, Clone, Serialize)]
pub struct OrchestratorMetrics {
    pub status: OrchestratorStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub uptime_secs: i64,
    pub registered_timers: usize,
    pub cycles: BTreeMap<String, CycleStats>,
    pub last_plan: Option<PlanOutcome>,
    pub queue: QueueStatus,
    pub limits: ResourceLimits,
    pub emergency: bool,
    pub active_alerts: usize,
    pub open_breakers: Vec<String>,
}

/// Collaborators, injected at construction
pub struct OrchestratorDeps {
    pub store: Arc<dyn ContentStore>,
    pub executor: Arc<Executor>,
    pub governor: Arc<ResourceGovernor>,
    pub trends: Arc<TrendAnalyzer>,
    pub planner: Arc<SchedulePlanner>,
    pub batches: Arc<BatchQueue>,
    pub alerts: Arc<AlertManager>,
    pub availability: Arc<AiAvailability>,
    pub metrics_source: Arc<dyn MetricsSource>,
}

/// What a cycle body produced
enum Step {
    Done(serde_json::Value),
    Skipped(&'static str),
}

/// Periodic tasks owned by a running orchestrator
#[derive(Debug, Clone, Copy)]
enum Task {
    Cycle(CycleKind),
    BatchTick,
}

struct Timers {
    shutdown: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

/// Clears a cycle's in-flight flag when the run ends
struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

// ============================================================================
// Orchestrator
// ============================================================================

/// Top-level periodic driver
pub struct Orchestrator {
    config: RwLock<OrchestratorConfig>,
    status: RwLock<OrchestratorStatus>,
    started_at: RwLock<Option<DateTime<Utc>>>,
    timers: Mutex<Option<Timers>>,
    in_flight: [AtomicBool; 5],
    stats: Mutex<HashMap<CycleKind, CycleStats>>,
    last_plan: RwLock<Option<PlanOutcome>>,
    last_maintenance: Mutex<Option<NaiveDate>>,
    deps: OrchestratorDeps,
}

impl Orchestrator {
    pub fn new(config: OrchestratorConfig, deps: OrchestratorDeps) -> Self {
        Self {
            config: RwLock::new(config),
            status: RwLock::new(OrchestratorStatus::Stopped),
            started_at: RwLock::new(None),
            timers: Mutex::new(None),
            in_flight: Default::default(),
            stats: Mutex::new(HashMap::new()),
            last_plan: RwLock::new(None),
            last_maintenance: Mutex::new(None),
            deps,
        }
    }

    pub fn governor(&self) -> &Arc<ResourceGovernor> {
        &self.deps.governor
    }

    pub fn batches(&self) -> &Arc<BatchQueue> {
        &self.deps.batches
    }

    pub fn alerts(&self) -> &Arc<AlertManager> {
        &self.deps.alerts
    }

    pub fn executor(&self) -> &Arc<Executor> {
        &self.deps.executor
    }

    pub fn planner(&self) -> &Arc<SchedulePlanner> {
        &self.deps.planner
    }

    pub async fn status(&self) -> OrchestratorStatus {
        *self.status.read().await
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Register the cycle timers, then run one pass of every cycle
    ///
    /// Calling `start` while already started does nothing.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        let config = self.config.read().await.clone();
        config.validate()?;

        if let Err(e) = self.check_store().await {
            *self.status.write().await = OrchestratorStatus::Error;
            error!(error = %e, "Content store unavailable, orchestrator not started");
            return Err(e);
        }

        {
            let mut timers = self.timers.lock().await;
            if timers.is_some() {
                debug!("Orchestrator already started");
                return Ok(());
            }

            let (tx, rx) = watch::channel(false);
            let mut handles = Vec::with_capacity(CycleKind::ALL.len() + 2);
            for kind in CycleKind::ALL {
                let period = config.period(kind);
                handles.push(tokio::spawn(Arc::clone(self).run_timer(
                    Task::Cycle(kind),
                    period,
                    rx.clone(),
                )));
            }

            let tick = Duration::from_secs(self.deps.batches.config().tick_interval_secs.max(1));
            handles.push(tokio::spawn(Arc::clone(self).run_timer(
                Task::BatchTick,
                tick,
                rx.clone(),
            )));
            handles.push(tokio::spawn(
                self.deps
                    .governor
                    .clone()
                    .run_sampler(self.deps.metrics_source.clone(), rx),
            ));

            *timers = Some(Timers {
                shutdown: tx,
                handles,
            });
        }

        *self.status.write().await = OrchestratorStatus::Running;
        *self.started_at.write().await = Some(Utc::now());
        info!(
            scheduling_minutes = config.scheduling_interval_minutes,
            trend_minutes = config.trend_refresh_interval_minutes,
            health_minutes = config.health_check_interval_minutes,
            maintenance_hour = config.maintenance_hour,
            "Orchestrator started"
        );

        for kind in CycleKind::ALL {
            self.run_cycle(kind, false).await;
        }
        Ok(())
    }

    /// Stop every timer and wait for the timer tasks to exit
    ///
    /// Returns false when the orchestrator was not started.
    pub async fn stop(&self) -> bool {
        let Some(timers) = self.timers.lock().await.take() else {
            return false;
        };

        let _ = timers.shutdown.send(true);
        for outcome in join_all(timers.handles).await {
            if let Err(e) = outcome {
                warn!(error = %e, "Timer task ended abnormally");
            }
        }

        *self.status.write().await = OrchestratorStatus::Stopped;
        *self.started_at.write().await = None;
        info!("Orchestrator stopped");
        true
    }

    /// Timers keep running but cycles and dispatch are skipped
    pub async fn pause(&self) -> bool {
        let mut status = self.status.write().await;
        if *status != OrchestratorStatus::Running {
            return false;
        }
        *status = OrchestratorStatus::Paused;
        info!("Orchestrator paused");
        true
    }

    pub async fn resume(&self) -> bool {
        let mut status = self.status.write().await;
        if *status != OrchestratorStatus::Paused {
            return false;
        }
        *status = OrchestratorStatus::Running;
        info!("Orchestrator resumed");
        true
    }

    /// Live timer tasks
    pub async fn registered_timers(&self) -> usize {
        self.timers
            .lock()
            .await
            .as_ref()
            .map_or(0, |t| t.handles.iter().filter(|h| !h.is_finished()).count())
    }

    pub async fn configuration(&self) -> OrchestratorConfig {
        self.config.read().await.clone()
    }

    /// Replace the configuration; a started orchestrator is restarted so the
    /// new intervals take effect
    pub async fn update_configuration(self: &Arc<Self>, config: OrchestratorConfig) -> Result<()> {
        config.validate()?;

        let was_started = self.stop().await;
        *self.config.write().await = config;
        info!(restart = was_started, "Orchestrator configuration updated");
        if was_started {
            self.start().await?;
        }
        Ok(())
    }

    /// Run a cycle now, regardless of pause state or maintenance hour
    pub async fn execute_now(&self, kind: CycleKind) -> CycleReport {
        info!(cycle = kind.as_str(), "Cycle triggered manually");
        self.run_cycle(kind, true).await
    }

    // ========================================================================
    // Timers and cycle execution
    // ========================================================================

    async fn run_timer(self: Arc<Self>, task: Task, period: Duration, mut shutdown: watch::Receiver<bool>) {
        // the immediate pass happens in start()
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if self.status().await == OrchestratorStatus::Paused {
                        debug!(task = ?task, "Orchestrator paused, tick skipped");
                        continue;
                    }
                    match task {
                        Task::Cycle(kind) => {
                            self.run_cycle(kind, false).await;
                        }
                        Task::BatchTick => {
                            self.deps.batches.tick().await;
                        }
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        debug!(task = ?task, "Timer stopped");
                        break;
                    }
                }
            }
        }
    }

    async fn run_cycle(&self, kind: CycleKind, forced: bool) -> CycleReport {
        let flag = &self.in_flight[kind.index()];
        if flag.swap(true, Ordering::AcqRel) {
            warn!(cycle = kind.as_str(), "Previous run still in progress, cycle skipped");
            crate::metrics::record_cycle_overlap(kind.as_str());
            self.stats.lock().await.entry(kind).or_default().overlaps += 1;
            return CycleReport {
                cycle: kind,
                outcome: CycleOutcome::Skipped,
                detail: serde_json::json!({ "reason": "previous run still in progress" }),
                duration_ms: 0,
            };
        }
        let _in_flight = InFlight(flag);

        let started = Utc::now();
        let clock = std::time::Instant::now();
        let _timer = crate::metrics::start_cycle_timer(kind.as_str());
        self.stats.lock().await.entry(kind).or_default().last_started_at = Some(started);

        let ctx = OperationContext::new("orchestrator", kind.as_str()).with_policy(RetryPolicy::cycle());
        let result = self
            .deps
            .executor
            .execute_with_retry(&ctx, || self.cycle_body(kind, forced))
            .await;
        let duration_ms = clock.elapsed().as_millis() as u64;

        let mut stats = self.stats.lock().await;
        let entry = stats.entry(kind).or_default();
        entry.last_finished_at = Some(Utc::now());
        entry.last_duration_ms = Some(duration_ms);

        let (outcome, detail) = match result {
            Ok(Step::Done(detail)) => {
                entry.runs += 1;
                entry.consecutive_failures = 0;
                crate::metrics::record_cycle(kind.as_str(), true);
                debug!(cycle = kind.as_str(), duration_ms, "Cycle completed");
                (CycleOutcome::Completed, detail)
            }
            Ok(Step::Skipped(reason)) => {
                entry.skipped += 1;
                debug!(cycle = kind.as_str(), reason, "Cycle skipped");
                (CycleOutcome::Skipped, serde_json::json!({ "reason": reason }))
            }
            Err(e) => {
                entry.failures += 1;
                entry.consecutive_failures += 1;
                entry.last_error = Some(e.to_string());
                crate::metrics::record_cycle(kind.as_str(), false);
                error!(cycle = kind.as_str(), error = %e, "Cycle failed");
                let failures = entry.consecutive_failures;
                drop(stats);

                if kind == CycleKind::Scheduling {
                    let alert = PerformanceAlert::new(
                        AlertType::CycleFailure,
                        AlertSeverity::High,
                        "Scheduling cycle failed",
                        e.to_string(),
                    )
                    .with_key(kind.as_str())
                    .with_metadata("consecutive_failures", failures);
                    self.deps.alerts.raise_alert(alert).await;
                }
                return CycleReport {
                    cycle: kind,
                    outcome: CycleOutcome::Failed,
                    detail: serde_json::json!({ "error": e.to_string() }),
                    duration_ms,
                };
            }
        };

        drop(stats);

        if outcome == CycleOutcome::Completed {
            self.deps
                .alerts
                .resolve_key(&PerformanceAlert::scoped_key(AlertType::CycleFailure, kind.as_str()))
                .await;
        }

        CycleReport {
            cycle: kind,
            outcome,
            detail,
            duration_ms,
        }
    }

    async fn cycle_body(&self, kind: CycleKind, forced: bool) -> Result<Step> {
        if !forced && self.deps.governor.should_skip(kind.task_type()) {
            return Ok(Step::Skipped("non-critical work throttled"));
        }

        match kind {
            CycleKind::TrendRefresh => self.trend_refresh_cycle().await,
            CycleKind::Scheduling => self.scheduling_cycle().await,
            CycleKind::BatchCreation => self.batch_creation_cycle().await,
            CycleKind::HealthCheck => self.health_cycle().await,
            CycleKind::Maintenance => self.maintenance_cycle(forced).await,
        }
    }

    // ========================================================================
    // Cycle bodies
    // ========================================================================

    async fn trend_refresh_cycle(&self) -> Result<Step> {
        let recent = self
            .list_content(ContentFilter {
                statuses: Vec::new(),
                limit: Some(self.deps.trends.config().recent_content_limit),
            })
            .await?;
        let topics = self.deps.trends.refresh_trends(&recent).await;
        Ok(Step::Done(serde_json::json!({
            "content_sampled": recent.len(),
            "topics": topics.len(),
        })))
    }

    async fn scheduling_cycle(&self) -> Result<Step> {
        let config = self.configuration().await;
        let outcome = if config.auto_execute {
            self.deps.planner.plan(config.max_items_per_cycle).await?
        } else {
            self.deps.planner.preview(config.max_items_per_cycle).await?
        };

        let detail = serde_json::json!({
            "committed": config.auto_execute,
            "items_considered": outcome.items_considered,
            "admitted": outcome.entries.len(),
            "auto_approved": outcome.auto_approved,
            "sent_to_review": outcome.sent_to_review,
            "batches_created": outcome.batches_created,
        });
        *self.last_plan.write().await = Some(outcome);
        Ok(Step::Done(detail))
    }

    /// Enqueue review items approved outside the core, grouped by language
    async fn batch_creation_cycle(&self) -> Result<Step> {
        let approved = self
            .list_work_items(
                WorkFilter::kind(WorkItemKind::Review).with_statuses(&[WorkItemStatus::Approved]),
            )
            .await?;
        if approved.is_empty() {
            return Ok(Step::Done(serde_json::json!({ "approved": 0 })));
        }

        let mut by_language: BTreeMap<String, Vec<WorkItem>> = BTreeMap::new();
        for item in approved {
            by_language
                .entry(item.language.to_string())
                .or_default()
                .push(item);
        }

        let (mut queued, mut deferred, mut batches_created) = (0usize, 0usize, 0usize);
        for (language, items) in by_language {
            let ids: Vec<String> = items.iter().map(|w| w.content_id.clone()).collect();
            let priority = items
                .iter()
                .filter_map(|w| w.payload.get("priority").and_then(|p| p.as_f64()))
                .fold(0.0, f64::max);

            match self
                .deps
                .batches
                .enqueue(Language::new(&language), ids, priority)
                .await
            {
                Ok(created) => {
                    batches_created += created.len();
                    for item in &items {
                        self.update_work_item(&item.id, WorkItemPatch::status(WorkItemStatus::Queued))
                            .await?;
                    }
                    queued += items.len();
                }
                Err(e) => {
                    warn!(language = %language, items = items.len(), error = %e, "Approved items not enqueued");
                    deferred += items.len();
                }
            }
        }

        info!(queued, deferred, batches_created, "Batch creation complete");
        Ok(Step::Done(serde_json::json!({
            "queued": queued,
            "deferred": deferred,
            "batches_created": batches_created,
        })))
    }

    async fn health_cycle(&self) -> Result<Step> {
        let report = self.health_report().await;
        self.raise_health_alerts(&report).await;

        let actions = self.deps.executor.analyze_failures().await;
        for action in &actions {
            self.apply_recovery(action).await;
        }

        Ok(Step::Done(serde_json::json!({
            "status": report.status,
            "active_jobs": report.active_jobs,
            "stuck_jobs": report.stuck_jobs.len(),
            "open_breakers": report.open_breakers.len(),
            "recovery_actions": actions.iter().map(RecoveryAction::name).collect::<Vec<_>>(),
        })))
    }

    async fn maintenance_cycle(&self, forced: bool) -> Result<Step> {
        let now = Utc::now();
        let today = now.date_naive();
        let config = self.configuration().await;

        if !forced {
            let done_today = *self.last_maintenance.lock().await == Some(today);
            if now.hour() != config.maintenance_hour || done_today {
                return Ok(Step::Skipped("maintenance not due"));
            }
        }

        let previous = {
            let mut status = self.status.write().await;
            std::mem::replace(&mut *status, OrchestratorStatus::Maintenance)
        };
        info!("Daily maintenance started");

        let result = self.maintenance_pass(now, &config).await;

        {
            let mut status = self.status.write().await;
            if *status == OrchestratorStatus::Maintenance {
                *status = previous;
            }
        }

        let detail = result?;
        *self.last_maintenance.lock().await = Some(today);
        info!(detail = %detail, "Daily maintenance complete");
        Ok(Step::Done(detail))
    }

    async fn maintenance_pass(&self, now: DateTime<Utc>, config: &OrchestratorConfig) -> Result<serde_json::Value> {
        let log_cutoff = now - chrono::Duration::hours(config.log_retention_hours);

        let work_items = self
            .purge_work_items(now - chrono::Duration::days(config.work_item_retention_days))
            .await?;
        let error_log = self.deps.executor.prune_error_log(log_cutoff).await;
        let alerts = self.deps.alerts.cleanup(log_cutoff).await;
        let trends = self.deps.trends.cleanup_expired(now).await;
        let batches = self
            .deps
            .batches
            .cleanup(now - chrono::Duration::hours(self.deps.batches.config().retention_hours))
            .await;
        let rules = self.deps.planner.rules().clear_expired(now).await;
        self.deps.batches.reset_daily_counters().await;

        Ok(serde_json::json!({
            "work_items_purged": work_items,
            "error_log_pruned": error_log,
            "alerts_removed": alerts,
            "trends_retired": trends,
            "batches_removed": batches,
            "rules_removed": rules,
        }))
    }

    // ========================================================================
    // Health and recovery
    // ========================================================================

    /// Current health; never fails, unreachable dependencies show as checks
    pub async fn health_report(&self) -> HealthReport {
        let now = Utc::now();
        let config = self.configuration().await;
        let mut checks = Vec::new();

        let running = self
            .list_work_items(
                WorkFilter::kind(WorkItemKind::Production).with_statuses(&[WorkItemStatus::Running]),
            )
            .await;
        let (active_jobs, stuck_jobs) = match running {
            Ok(items) => {
                checks.push(ComponentHealth::healthy("store", "reachable"));
                let stuck = find_stuck_jobs(&items, now, chrono::Duration::hours(config.stuck_job_hours));
                (items.len(), stuck)
            }
            Err(e) => {
                checks.push(ComponentHealth::unhealthy("store", e.to_string()));
                (0, Vec::new())
            }
        };

        checks.push(capacity_check(active_jobs, config.max_active_jobs));
        if !stuck_jobs.is_empty() {
            checks.push(ComponentHealth::degraded(
                "jobs",
                format!("{} running longer than {}h", stuck_jobs.len(), config.stuck_job_hours),
            ));
        }

        let open_breakers = self.deps.executor.open_breakers().await;
        checks.push(if open_breakers.is_empty() {
            ComponentHealth::healthy("dependencies", "all circuits closed")
        } else {
            ComponentHealth::degraded("dependencies", format!("open: {}", open_breakers.join(", ")))
        });

        if self.deps.availability.is_fallback_forced().await {
            checks.push(ComponentHealth::degraded("ai", "heuristic fallback forced"));
        }

        let snapshot = self.deps.governor.snapshot();
        checks.push(if snapshot.emergency {
            ComponentHealth::degraded("governor", "emergency mode")
        } else {
            ComponentHealth::healthy(
                "governor",
                format!("throttle level {}", snapshot.limits.throttle_level),
            )
        });

        let mut report = HealthReport::from_checks(checks, self.status().await, now);
        report.active_jobs = active_jobs;
        report.max_active_jobs = config.max_active_jobs;
        report.stuck_jobs = stuck_jobs;
        report.open_breakers = open_breakers;
        report.throttle_level = snapshot.limits.throttle_level;
        report.emergency = snapshot.emergency;
        report
    }

    /// Raise alerts for failing checks and resolve those whose condition
    /// has cleared
    async fn raise_health_alerts(&self, report: &HealthReport) {
        let alerts = &self.deps.alerts;
        let store_reachable = !report
            .checks
            .iter()
            .any(|c| c.name == "store" && c.status == HealthStatus::Unhealthy);

        if report.active_jobs > report.max_active_jobs {
            alerts
                .raise_alert(
                    PerformanceAlert::new(
                        AlertType::CapacityExceeded,
                        AlertSeverity::Medium,
                        "Active jobs above ceiling",
                        format!("{} running jobs, ceiling {}", report.active_jobs, report.max_active_jobs),
                    )
                    .with_threshold(report.max_active_jobs as f64, report.active_jobs as f64),
                )
                .await;
        }

        for job in &report.stuck_jobs {
            alerts
                .raise_alert(
                    PerformanceAlert::new(
                        AlertType::StuckJob,
                        AlertSeverity::High,
                        "Job running too long",
                        format!(
                            "work item {} ({}, {}) running for {} minutes",
                            job.work_item_id, job.content_id, job.language, job.running_minutes
                        ),
                    )
                    .with_key(&job.work_item_id)
                    .with_metadata("content_id", &job.content_id),
                )
                .await;
        }

        for key in &report.open_breakers {
            alerts
                .raise_alert(
                    PerformanceAlert::new(
                        AlertType::DependencyDegraded,
                        AlertSeverity::Medium,
                        "Dependency degraded",
                        format!("circuit breaker {key} is open"),
                    )
                    .with_key(key),
                )
                .await;
        }

        if let Some(store) = report
            .checks
            .iter()
            .find(|c| c.name == "store" && c.status == HealthStatus::Unhealthy)
        {
            alerts
                .raise_alert(
                    PerformanceAlert::new(
                        AlertType::DependencyDegraded,
                        AlertSeverity::High,
                        "Content store unreachable",
                        store.message.clone().unwrap_or_default(),
                    )
                    .with_key("store"),
                )
                .await;
        }

        // an unreachable store says nothing about running jobs
        if store_reachable {
            if report.active_jobs <= report.max_active_jobs {
                alerts
                    .resolve_type_except(AlertType::CapacityExceeded, &HashSet::new())
                    .await;
            }
            let stuck: HashSet<String> = report
                .stuck_jobs
                .iter()
                .map(|job| PerformanceAlert::scoped_key(AlertType::StuckJob, &job.work_item_id))
                .collect();
            alerts.resolve_type_except(AlertType::StuckJob, &stuck).await;
        }

        let mut degraded: HashSet<String> = report
            .open_breakers
            .iter()
            .map(|key| PerformanceAlert::scoped_key(AlertType::DependencyDegraded, key))
            .collect();
        if !store_reachable {
            degraded.insert(PerformanceAlert::scoped_key(AlertType::DependencyDegraded, "store"));
        }
        alerts
            .resolve_type_except(AlertType::DependencyDegraded, &degraded)
            .await;
    }

    async fn apply_recovery(&self, action: &RecoveryAction) {
        let detail = match action {
            RecoveryAction::ReduceRate { .. } => {
                let rate = self.deps.governor.reduce_api_rate().await;
                format!("API rate limit reduced to {rate}/min")
            }
            RecoveryAction::EnableFallback { .. } => {
                let minutes = self.configuration().await.fallback_minutes;
                self.deps
                    .availability
                    .force_fallback(Duration::from_secs(minutes * 60))
                    .await;
                format!("heuristic fallback forced for {minutes} minutes")
            }
            RecoveryAction::DelayAndRequeue { .. } => {
                let seconds = self.deps.governor.config().delay_secs;
                self.deps
                    .governor
                    .delay_processing(Duration::from_secs(seconds))
                    .await;
                let requeued = self.deps.batches.retry_failed().await;
                format!("dispatch delayed {seconds}s, {requeued} failed batches requeued")
            }
        };

        info!(action = action.name(), "Recovery action applied: {detail}");
        self.deps
            .alerts
            .raise_alert(
                PerformanceAlert::new(
                    AlertType::RecoveryAction,
                    AlertSeverity::Low,
                    format!("Recovery action: {}", action.name()),
                    detail,
                )
                .with_key(action.name()),
            )
            .await;
    }

    // ========================================================================
    // Metrics
    // ========================================================================

    pub async fn metrics(&self) -> OrchestratorMetrics {
        let started_at = *self.started_at.read().await;
        let snapshot = self.deps.governor.snapshot();
        let cycles = self
            .stats
            .lock()
            .await
            .iter()
            .map(|(kind, stats)| (kind.as_str().to_string(), stats.clone()))
            .collect();

        OrchestratorMetrics {
            status: self.status().await,
            started_at,
            uptime_secs: started_at.map_or(0, |at| (Utc::now() - at).num_seconds()),
            registered_timers: self.registered_timers().await,
            cycles,
            last_plan: self.last_plan.read().await.clone(),
            queue: self.deps.batches.queue_status().await,
            limits: snapshot.limits,
            emergency: snapshot.emergency,
            active_alerts: self.deps.alerts.list_active_alerts().await.len(),
            open_breakers: self.deps.executor.open_breakers().await,
        }
    }

    pub async fn cycle_stats(&self, kind: CycleKind) -> CycleStats {
        self.stats
            .lock()
            .await
            .get(&kind)
            .cloned()
            .unwrap_or_default()
    }

    // ========================================================================
    // Store access through the executor
    // ========================================================================

    async fn check_store(&self) -> Result<()> {
        let ctx = self.deps.executor.store_context("health_check");
        let store = self.deps.store.clone();
        Ok(self
            .deps
            .executor
            .execute_with_retry(&ctx, || {
                let store = store.clone();
                async move { Ok(store.health_check().await?) }
            })
            .await?)
    }

    async fn list_content(&self, filter: ContentFilter) -> Result<Vec<ContentItem>> {
        let ctx = self.deps.executor.store_context("list_content");
        let store = self.deps.store.clone();
        Ok(self
            .deps
            .executor
            .execute_with_retry(&ctx, || {
                let store = store.clone();
                let filter = filter.clone();
                async move { Ok(store.list_content(&filter).await?) }
            })
            .await?)
    }

    async fn list_work_items(&self, filter: WorkFilter) -> Result<Vec<WorkItem>> {
        let ctx = self.deps.executor.store_context("list_work_items");
        let store = self.deps.store.clone();
        Ok(self
            .deps
            .executor
            .execute_with_retry(&ctx, || {
                let store = store.clone();
                let filter = filter.clone();
                async move { Ok(store.list_work_items(&filter).await?) }
            })
            .await?)
    }

    async fn update_work_item(&self, id: &str, patch: WorkItemPatch) -> Result<WorkItem> {
        let ctx = self.deps.executor.store_context("update_work_item");
        let store = self.deps.store.clone();
        Ok(self
            .deps
            .executor
            .execute_with_retry(&ctx, || {
                let store = store.clone();
                let patch = patch.clone();
                async move { Ok(store.update_work_item(id, patch).await?) }
            })
            .await?)
    }

    async fn purge_work_items(&self, before: DateTime<Utc>) -> Result<usize> {
        let ctx = self.deps.executor.store_context("purge_work_items");
        let store = self.deps.store.clone();
        Ok(self
            .deps
            .executor
            .execute_with_retry(&ctx, || {
                let store = store.clone();
                async move { Ok(store.purge_work_items(before).await?) }
            })
            .await?)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::App;
    use crate::config::{Config, LanguageProfile};
    use crate::governor::{StaticMetricsSource, SystemMetrics};
    use crate::models::NewWorkItem;
    use crate::store::MemoryStore;

    async fn app() -> (App, Arc<MemoryStore>) {
        let mut config = Config::default();
        config.llm.enabled = false;
        config.languages = vec![LanguageProfile::new("en", 0, &[9, 18]).with_limits(2, 10)];
        let store = Arc::new(MemoryStore::new());
        let app = App::builder(config, store.clone())
            .metrics_source(Arc::new(StaticMetricsSource::new(SystemMetrics::idle())))
            .build()
            .unwrap();
        (app, store)
    }

    #[test]
    fn test_cycle_names_parse() {
        for kind in CycleKind::ALL {
            assert_eq!(CycleKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(CycleKind::parse("health"), Some(CycleKind::HealthCheck));
        assert_eq!(CycleKind::parse("bogus"), None);
    }

    #[test]
    fn test_config_validation() {
        assert!(OrchestratorConfig::default().validate().is_ok());
        let config = OrchestratorConfig {
            health_check_interval_minutes: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
        let config = OrchestratorConfig {
            maintenance_hour: 24,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_stop_start_keeps_one_set_of_timers() {
        let (app, _) = app().await;
        let orchestrator = app.orchestrator.clone();

        orchestrator.start().await.unwrap();
        assert_eq!(orchestrator.registered_timers().await, 7);
        orchestrator.start().await.unwrap();
        assert_eq!(orchestrator.registered_timers().await, 7);

        assert!(orchestrator.stop().await);
        assert_eq!(orchestrator.registered_timers().await, 0);
        assert_eq!(orchestrator.status().await, OrchestratorStatus::Stopped);
        assert!(!orchestrator.stop().await);

        orchestrator.start().await.unwrap();
        assert_eq!(orchestrator.registered_timers().await, 7);
        orchestrator.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_and_resume() {
        let (app, _) = app().await;
        let orchestrator = app.orchestrator.clone();
        assert!(!orchestrator.pause().await);

        orchestrator.start().await.unwrap();
        assert!(orchestrator.pause().await);
        assert_eq!(orchestrator.status().await, OrchestratorStatus::Paused);
        assert!(orchestrator.resume().await);
        assert_eq!(orchestrator.status().await, OrchestratorStatus::Running);
        orchestrator.stop().await;
    }

    #[tokio::test]
    async fn test_overlapping_run_is_skipped() {
        let (app, _) = app().await;
        let orchestrator = &app.orchestrator;

        orchestrator.in_flight[CycleKind::Scheduling.index()].store(true, Ordering::Release);
        let report = orchestrator.execute_now(CycleKind::Scheduling).await;
        assert_eq!(report.outcome, CycleOutcome::Skipped);
        assert_eq!(orchestrator.cycle_stats(CycleKind::Scheduling).await.overlaps, 1);

        orchestrator.in_flight[CycleKind::Scheduling.index()].store(false, Ordering::Release);
        let report = orchestrator.execute_now(CycleKind::Scheduling).await;
        assert_eq!(report.outcome, CycleOutcome::Completed);
        assert_eq!(orchestrator.cycle_stats(CycleKind::Scheduling).await.runs, 1);
    }

    #[tokio::test]
    async fn test_batch_creation_enqueues_approved_reviews() {
        let (app, store) = app().await;
        for id in ["a", "b"] {
            store
                .create_work_item(
                    WorkItemKind::Review,
                    NewWorkItem::new(id, Language::new("en"), WorkItemStatus::Approved)
                        .with_payload(serde_json::json!({ "priority": 88.0 })),
                )
                .await
                .unwrap();
        }

        let report = app.orchestrator.execute_now(CycleKind::BatchCreation).await;
        assert_eq!(report.outcome, CycleOutcome::Completed);
        assert_eq!(report.detail["queued"], 2);

        let batches = app.batches.batches().await;
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].priority, 88.0);

        let queued = store
            .list_work_items(&WorkFilter::kind(WorkItemKind::Review).with_statuses(&[WorkItemStatus::Queued]))
            .await
            .unwrap();
        assert_eq!(queued.len(), 2);
    }

    #[tokio::test]
    async fn test_forced_maintenance_restores_status() {
        let (app, _) = app().await;
        let report = app.orchestrator.execute_now(CycleKind::Maintenance).await;
        assert_eq!(report.outcome, CycleOutcome::Completed);
        assert_eq!(app.orchestrator.status().await, OrchestratorStatus::Stopped);
        assert_eq!(report.detail["work_items_purged"], 0);
    }

    #[tokio::test]
    async fn test_health_report_flags_stuck_jobs() {
        let (app, store) = app().await;
        let item = store
            .create_work_item(
                WorkItemKind::Production,
                NewWorkItem::new("a", Language::new("en"), WorkItemStatus::Running),
            )
            .await
            .unwrap();
        store
            .update_work_item(
                &item.id,
                WorkItemPatch::default().with_started_at(Utc::now() - chrono::Duration::hours(3)),
            )
            .await
            .unwrap();

        let report = app.orchestrator.health_report().await;
        assert_eq!(report.active_jobs, 1);
        assert_eq!(report.stuck_jobs.len(), 1);
        assert_eq!(report.status, HealthStatus::Degraded);

        app.orchestrator.execute_now(CycleKind::HealthCheck).await;
        let alerts = app.alerts.list_active_alerts().await;
        assert!(alerts.iter().any(|a| a.alert_type == AlertType::StuckJob));

        // finishing the job clears its alert on the next check
        store
            .update_work_item(&item.id, WorkItemPatch::status(WorkItemStatus::Completed))
            .await
            .unwrap();
        app.orchestrator.execute_now(CycleKind::HealthCheck).await;
        let alerts = app.alerts.list_active_alerts().await;
        assert!(!alerts.iter().any(|a| a.alert_type == AlertType::StuckJob));
    }

    #[tokio::test(start_paused = true)]
    async fn test_update_configuration_restarts() {
        let (app, _) = app().await;
        let orchestrator = app.orchestrator.clone();
        orchestrator.start().await.unwrap();

        let config = OrchestratorConfig {
            scheduling_interval_minutes: 10,
            ..Default::default()
        };
        orchestrator.update_configuration(config.clone()).await.unwrap();
        assert_eq!(orchestrator.configuration().await, config);
        assert_eq!(orchestrator.status().await, OrchestratorStatus::Running);
        assert_eq!(orchestrator.registered_timers().await, 7);

        let bad = OrchestratorConfig {
            maintenance_hour: 30,
            ..Default::default()
        };
        assert!(orchestrator.update_configuration(bad).await.is_err());
        orchestrator.stop().await;
    }
}
