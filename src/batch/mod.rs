//! Language batch queue
//!
//! Approved content is grouped into [`LanguageBatch`]es per target language.
//! A periodic [`BatchQueue::tick`] moves admissible batches through
//!
//! ```text
//! pending ──tick──▶ processing ──▶ completed
//!    ▲                   │
//!    │                   └──(batch error / stuck sweep)──▶ failed
//!    └──────────────── retry_failed ─────────────────────────┘
//! ```
//!
//! Batches live in one map keyed by id with the state as a field, so a batch
//! is always in exactly one state. Items run in chunks sized from the
//! governor's limits, read again before every chunk.

pub mod producer;

pub use producer::{ContentProducer, WorkItemProducer};

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::LanguageProfile;
use crate::error::{Error, Result};
use crate::executor::{Executor, OperationContext};
use crate::governor::{QueueDepth, ResourceGovernor, ResourceLimits};
use crate::models::Language;
use crate::scheduler::SchedulerError;

/// Batch queue configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Content ids per batch; larger enqueues are split
    pub max_batch_size: usize,

    /// Items executed in parallel within one batch
    pub chunk_size: usize,

    /// Pending batches considered per tick
    pub max_batches_per_tick: usize,

    pub tick_interval_secs: u64,

    /// Stuck deadline: items × per_item_timeout + base_timeout
    pub per_item_timeout_secs: i64,
    pub base_timeout_secs: i64,

    /// Overlap ratio above which a new batch is a duplicate
    pub dedup_overlap: f64,

    /// Finished batches are kept this long (hours)
    pub retention_hours: i64,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_batch_size: 20,
            chunk_size: 3,
            max_batches_per_tick: 5,
            tick_interval_secs: 30,
            per_item_timeout_secs: 300,
            base_timeout_secs: 600,
            dedup_overlap: 0.5,
            retention_hours: 72,
        }
    }
}

/// Lifecycle state of a batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchState {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl BatchState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, Self::Pending | Self::Processing)
    }
}

/// Per-item outcome counts of one batch run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchResult {
    pub processed: usize,
    pub failed: usize,
    pub skipped_existing: usize,
    pub skipped_quota: usize,
    pub errors: Vec<String>,
}

/// Bounded unit of work for one language
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LanguageBatch {
    pub id: String,
    pub language: Language,
    pub content_ids: Vec<String>,
    pub priority: f64,
    /// Items of this batch run concurrently at most
    pub max_concurrent_jobs: usize,
    pub state: BatchState,
    pub attempts: u32,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub result: Option<BatchResult>,
    pub error: Option<String>,
}

/// Counts for one language
#[derive(Debug, Clone, Default, Serialize)]
pub struct LanguageQueueStatus {
    pub pending: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
    pub daily_used: usize,
    pub daily_limit: usize,
}

/// Snapshot of the whole queue
#[derive(Debug, Clone, Default, Serialize)]
pub struct QueueStatus {
    pub pending: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
    /// Content ids waiting in pending batches
    pub pending_items: usize,
    pub by_language: HashMap<String, LanguageQueueStatus>,
}

/// What one tick did
#[derive(Debug, Clone, Default, Serialize)]
pub struct TickReport {
    pub swept: usize,
    pub dispatched: Vec<String>,
    /// Selected but not admissible under current limits
    pub deferred: usize,
    /// Emergency mode or a processing delay blocked dispatch
    pub halted: bool,
}

/// Overlap of two id sets relative to the smaller one
pub fn overlap_ratio(a: &HashSet<&str>, b: &HashSet<&str>) -> f64 {
    let smaller = a.len().min(b.len());
    if smaller == 0 {
        return 0.0;
    }
    a.intersection(b).count() as f64 / smaller as f64
}

/// Per-language batch queue with governor-aware dispatch
pub struct BatchQueue {
    config: BatchConfig,
    languages: HashMap<Language, LanguageProfile>,
    batches: RwLock<HashMap<String, LanguageBatch>>,
    daily_used: RwLock<HashMap<Language, usize>>,
    running: Mutex<Vec<JoinHandle<()>>>,
    governor: Arc<ResourceGovernor>,
    executor: Arc<Executor>,
    producer: Arc<dyn ContentProducer>,
}

impl BatchQueue {
    pub fn new(
        config: BatchConfig,
        languages: &[LanguageProfile],
        governor: Arc<ResourceGovernor>,
        executor: Arc<Executor>,
        producer: Arc<dyn ContentProducer>,
    ) -> Self {
        Self {
            config,
            languages: languages
                .iter()
                .map(|p| (p.code.clone(), p.clone()))
                .collect(),
            batches: RwLock::new(HashMap::new()),
            daily_used: RwLock::new(HashMap::new()),
            running: Mutex::new(Vec::new()),
            governor,
            executor,
            producer,
        }
    }

    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    fn profile(&self, language: &Language) -> Result<&LanguageProfile> {
        self.languages.get(language).ok_or_else(|| {
            let mut valid_options: Vec<String> =
                self.languages.keys().map(|l| l.to_string()).collect();
            valid_options.sort();
            Error::Scheduler(SchedulerError::UnknownLanguage {
                code: language.to_string(),
                valid_options,
            })
        })
    }

    // ========================================================================
    // Enqueue
    // ========================================================================

    /// Create pending batches for `content_ids`; returns the new batch ids
    ///
    /// Ids are split into `max_batch_size` batches. A batch overlapping an
    /// active batch of the same language by more than `dedup_overlap` is
    /// skipped. Fails with [`Error::QueueOverload`] when the pending items
    /// would exceed the governor's queue limit.
    pub async fn enqueue(
        &self,
        language: Language,
        content_ids: Vec<String>,
        priority: f64,
    ) -> Result<Vec<String>> {
        self.profile(&language)?;

        let mut seen = HashSet::new();
        let ids: Vec<String> = content_ids
            .into_iter()
            .filter(|id| !id.is_empty() && seen.insert(id.clone()))
            .collect();
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let limit = self.governor.limits().max_queue_size;
        let mut batches = self.batches.write().await;

        let pending = pending_items(&batches);
        if pending + ids.len() > limit {
            warn!(
                language = %language,
                pending,
                incoming = ids.len(),
                limit,
                "Batch queue overloaded, enqueue rejected"
            );
            return Err(Error::QueueOverload {
                pending: pending + ids.len(),
                limit,
            });
        }

        let mut created = Vec::new();
        for chunk in ids.chunks(self.config.max_batch_size.max(1)) {
            if self.is_duplicate(&batches, &language, chunk) {
                debug!(language = %language, items = chunk.len(), "Duplicate batch skipped");
                continue;
            }

            let batch = LanguageBatch {
                id: uuid::Uuid::new_v4().to_string(),
                language: language.clone(),
                content_ids: chunk.to_vec(),
                priority,
                max_concurrent_jobs: self.config.chunk_size,
                state: BatchState::Pending,
                attempts: 0,
                created_at: Utc::now(),
                started_at: None,
                finished_at: None,
                result: None,
                error: None,
            };
            info!(
                batch_id = %batch.id,
                language = %language,
                items = batch.content_ids.len(),
                priority,
                "Batch enqueued"
            );
            crate::metrics::record_batch_transition(language.as_str(), BatchState::Pending.as_str());
            created.push(batch.id.clone());
            batches.insert(batch.id.clone(), batch);
        }

        Ok(created)
    }

    fn is_duplicate(
        &self,
        batches: &HashMap<String, LanguageBatch>,
        language: &Language,
        ids: &[String],
    ) -> bool {
        let candidate: HashSet<&str> = ids.iter().map(String::as_str).collect();
        batches
            .values()
            .filter(|b| b.language == *language && b.state.is_active())
            .any(|b| {
                let existing: HashSet<&str> = b.content_ids.iter().map(String::as_str).collect();
                overlap_ratio(&candidate, &existing) > self.config.dedup_overlap
            })
    }

    // ========================================================================
    // Dispatch
    // ========================================================================

    /// One scheduling step: sweep stuck batches, then dispatch admissible
    /// pending batches in priority order
    pub async fn tick(self: &Arc<Self>) -> TickReport {
        let mut report = TickReport {
            swept: self.sweep_stuck().await,
            ..Default::default()
        };

        let snapshot = self.governor.snapshot();
        if !snapshot.dispatch_allowed() {
            debug!(
                emergency = snapshot.emergency,
                delayed = snapshot.processing_delayed(),
                "Batch dispatch halted by governor"
            );
            report.halted = true;
            return report;
        }

        let limits = snapshot.limits;
        let started = {
            let mut batches = self.batches.write().await;
            let mut candidates: Vec<&LanguageBatch> = batches
                .values()
                .filter(|b| b.state == BatchState::Pending)
                .collect();
            candidates.sort_by(|a, b| {
                b.priority
                    .total_cmp(&a.priority)
                    .then_with(|| a.created_at.cmp(&b.created_at))
            });
            let selected: Vec<String> = candidates
                .into_iter()
                .take(self.config.max_batches_per_tick)
                .map(|b| b.id.clone())
                .collect();

            let mut started = Vec::new();
            for id in selected {
                let Some(language) = batches.get(&id).map(|b| b.language.clone()) else {
                    continue;
                };
                if !self.admissible(&batches, &language, &limits) {
                    report.deferred += 1;
                    continue;
                }
                if let Some(batch) = batches.get_mut(&id) {
                    batch.state = BatchState::Processing;
                    batch.started_at = Some(Utc::now());
                    batch.finished_at = None;
                    batch.attempts += 1;
                    crate::metrics::record_batch_transition(
                        language.as_str(),
                        BatchState::Processing.as_str(),
                    );
                    started.push((id, batch.attempts));
                }
            }
            started
        };

        let mut running = self.running.lock().await;
        running.retain(|h| !h.is_finished());
        for (id, attempt) in started {
            info!(batch_id = %id, attempt, "Batch dispatched");
            report.dispatched.push(id.clone());
            let queue = Arc::clone(self);
            running.push(tokio::spawn(async move {
                queue.run_batch(id, attempt).await;
            }));
        }

        report
    }

    /// In flight for the language below `min(language max, governor max)`
    /// and globally below the governor max
    fn admissible(
        &self,
        batches: &HashMap<String, LanguageBatch>,
        language: &Language,
        limits: &ResourceLimits,
    ) -> bool {
        let language_max = self
            .languages
            .get(language)
            .map_or(0, |p| p.max_concurrent_batches)
            .min(limits.max_concurrent_jobs);
        let processing = batches
            .values()
            .filter(|b| b.state == BatchState::Processing);
        let (global, for_language) = processing.fold((0, 0), |(g, l), b| {
            (g + 1, l + usize::from(b.language == *language))
        });

        for_language < language_max && global < limits.max_concurrent_jobs
    }

    /// Whether a batch of `language` could start right now
    pub async fn can_process(&self, language: &Language) -> bool {
        let limits = self.governor.limits();
        let batches = self.batches.read().await;
        self.admissible(&batches, language, &limits)
    }

    async fn run_batch(&self, id: String, attempt: u32) {
        let Some(batch) = self.batches.read().await.get(&id).cloned() else {
            return;
        };
        let result = self.execute_batch(&batch).await;
        self.finish(&id, attempt, result).await;
    }

    async fn execute_batch(&self, batch: &LanguageBatch) -> Result<BatchResult> {
        let mut result = BatchResult::default();
        let mut position = 0;

        while position < batch.content_ids.len() {
            let limits = self.governor.limits();
            let chunk_size = self
                .config
                .chunk_size
                .min(batch.max_concurrent_jobs)
                .min(limits.max_concurrent_jobs)
                .max(1);
            let end = (position + chunk_size).min(batch.content_ids.len());
            let chunk = &batch.content_ids[position..end];
            position = end;

            // every lookup finishes before any quota is taken
            let mut fresh = Vec::with_capacity(chunk.len());
            for content_id in chunk {
                if self.has_output(batch, content_id).await? {
                    result.skipped_existing += 1;
                } else {
                    fresh.push(content_id);
                }
            }

            let mut admitted = Vec::with_capacity(fresh.len());
            for content_id in fresh {
                if !self.reserve_quota(&batch.language).await {
                    result.skipped_quota += 1;
                    continue;
                }
                admitted.push(content_id.clone());
            }

            let outcomes = join_all(admitted.iter().map(|id| self.produce(batch, id))).await;
            for (content_id, outcome) in admitted.iter().zip(outcomes) {
                match outcome {
                    Ok(()) => result.processed += 1,
                    Err(e) => {
                        result.failed += 1;
                        result.errors.push(format!("{content_id}: {e}"));
                        self.release_quota(&batch.language).await;
                    }
                }
            }
        }

        Ok(result)
    }

    async fn has_output(&self, batch: &LanguageBatch, content_id: &str) -> Result<bool> {
        let ctx = self
            .executor
            .store_context("has_output")
            .with_job_id(&batch.id);
        let producer = self.producer.clone();
        Ok(self
            .executor
            .execute_with_retry(&ctx, || {
                let producer = producer.clone();
                async move { producer.has_output(content_id, &batch.language).await }
            })
            .await?)
    }

    async fn produce(&self, batch: &LanguageBatch, content_id: &str) -> Result<()> {
        let ctx = OperationContext::new("production", "produce")
            .with_policy(self.executor.config().default_policy.clone())
            .with_job_id(content_id);
        let producer = self.producer.clone();
        Ok(self
            .executor
            .execute_with_retry(&ctx, || {
                let producer = producer.clone();
                async move {
                    producer
                        .produce(content_id, &batch.language, &batch.id)
                        .await
                }
            })
            .await?)
    }

    async fn finish(&self, id: &str, attempt: u32, result: Result<BatchResult>) {
        let mut batches = self.batches.write().await;
        let Some(batch) = batches.get_mut(id) else {
            return;
        };
        // swept or retried while running
        if batch.state != BatchState::Processing || batch.attempts != attempt {
            debug!(batch_id = %id, state = batch.state.as_str(), "Late batch result ignored");
            return;
        }

        batch.finished_at = Some(Utc::now());
        match result {
            Ok(outcome) => {
                batch.state = BatchState::Completed;
                info!(
                    batch_id = %id,
                    language = %batch.language,
                    processed = outcome.processed,
                    failed = outcome.failed,
                    skipped_existing = outcome.skipped_existing,
                    skipped_quota = outcome.skipped_quota,
                    "Batch completed"
                );
                crate::metrics::record_batch_items(
                    batch.language.as_str(),
                    outcome.processed as u64,
                    outcome.failed as u64,
                    (outcome.skipped_existing + outcome.skipped_quota) as u64,
                );
                batch.result = Some(outcome);
            }
            Err(e) => {
                batch.state = BatchState::Failed;
                batch.error = Some(e.to_string());
                warn!(batch_id = %id, language = %batch.language, error = %e, "Batch failed");
            }
        }
        crate::metrics::record_batch_transition(batch.language.as_str(), batch.state.as_str());
    }

    // ========================================================================
    // Quotas
    // ========================================================================

    async fn reserve_quota(&self, language: &Language) -> bool {
        let limit = self.languages.get(language).map_or(0, |p| p.daily_limit);
        let mut used = self.daily_used.write().await;
        let count = used.entry(language.clone()).or_insert(0);
        if *count < limit {
            *count += 1;
            true
        } else {
            false
        }
    }

    async fn release_quota(&self, language: &Language) {
        if let Some(count) = self.daily_used.write().await.get_mut(language) {
            *count = count.saturating_sub(1);
        }
    }

    /// Items left today for a language
    pub async fn remaining_quota(&self, language: &Language) -> usize {
        let limit = self.languages.get(language).map_or(0, |p| p.daily_limit);
        let used = self
            .daily_used
            .read()
            .await
            .get(language)
            .copied()
            .unwrap_or(0);
        limit.saturating_sub(used)
    }

    pub async fn reset_daily_counters(&self) {
        self.daily_used.write().await.clear();
        info!("Daily batch quotas reset");
    }

    // ========================================================================
    // Maintenance
    // ========================================================================

    /// Fail processing batches past their deadline
    pub async fn sweep_stuck(&self) -> usize {
        self.sweep_stuck_at(Utc::now()).await
    }

    pub async fn sweep_stuck_at(&self, now: DateTime<Utc>) -> usize {
        let mut batches = self.batches.write().await;
        let mut swept = 0;
        for batch in batches
            .values_mut()
            .filter(|b| b.state == BatchState::Processing)
        {
            let Some(started_at) = batch.started_at else {
                continue;
            };
            let timeout = chrono::Duration::seconds(
                batch.content_ids.len() as i64 * self.config.per_item_timeout_secs
                    + self.config.base_timeout_secs,
            );
            if now - started_at > timeout {
                batch.state = BatchState::Failed;
                batch.finished_at = Some(now);
                batch.error = Some(format!(
                    "processing exceeded {}s timeout",
                    timeout.num_seconds()
                ));
                warn!(batch_id = %batch.id, language = %batch.language, "Stuck batch failed");
                crate::metrics::record_batch_transition(
                    batch.language.as_str(),
                    BatchState::Failed.as_str(),
                );
                swept += 1;
            }
        }
        swept
    }

    /// Move every failed batch back to pending; returns how many moved
    pub async fn retry_failed(&self) -> usize {
        let mut batches = self.batches.write().await;
        let mut retried = 0;
        for batch in batches
            .values_mut()
            .filter(|b| b.state == BatchState::Failed)
        {
            batch.state = BatchState::Pending;
            batch.started_at = None;
            batch.finished_at = None;
            batch.error = None;
            crate::metrics::record_batch_transition(
                batch.language.as_str(),
                BatchState::Pending.as_str(),
            );
            retried += 1;
        }
        if retried > 0 {
            info!(retried, "Failed batches requeued");
        }
        retried
    }

    /// Drop finished batches older than `older_than`
    pub async fn cleanup(&self, older_than: DateTime<Utc>) -> usize {
        let mut batches = self.batches.write().await;
        let before = batches.len();
        batches.retain(|_, b| {
            b.state.is_active() || b.finished_at.map_or(true, |at| at >= older_than)
        });
        before - batches.len()
    }

    /// Wait for every dispatched batch task to finish
    pub async fn wait_for_in_flight(&self) {
        let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *self.running.lock().await);
        for outcome in join_all(handles).await {
            if let Err(e) = outcome {
                warn!(error = %e, "Batch task panicked or was cancelled");
            }
        }
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub async fn batch(&self, id: &str) -> Option<LanguageBatch> {
        self.batches.read().await.get(id).cloned()
    }

    /// All batches, oldest first
    pub async fn batches(&self) -> Vec<LanguageBatch> {
        let mut all: Vec<_> = self.batches.read().await.values().cloned().collect();
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        all
    }

    pub async fn queue_status(&self) -> QueueStatus {
        let batches = self.batches.read().await;
        let used = self.daily_used.read().await;
        let mut status = QueueStatus {
            pending_items: pending_items(&batches),
            ..Default::default()
        };

        for profile in self.languages.values() {
            status.by_language.insert(
                profile.code.to_string(),
                LanguageQueueStatus {
                    daily_used: used.get(&profile.code).copied().unwrap_or(0),
                    daily_limit: profile.daily_limit,
                    ..Default::default()
                },
            );
        }

        for batch in batches.values() {
            let language = status
                .by_language
                .entry(batch.language.to_string())
                .or_default();
            let (total, per_language) = match batch.state {
                BatchState::Pending => (&mut status.pending, &mut language.pending),
                BatchState::Processing => (&mut status.processing, &mut language.processing),
                BatchState::Completed => (&mut status.completed, &mut language.completed),
                BatchState::Failed => (&mut status.failed, &mut language.failed),
            };
            *total += 1;
            *per_language += 1;
        }

        status
    }
}

fn pending_items(batches: &HashMap<String, LanguageBatch>) -> usize {
    batches
        .values()
        .filter(|b| b.state == BatchState::Pending)
        .map(|b| b.content_ids.len())
        .sum()
}

#[async_trait]
impl QueueDepth for BatchQueue {
    async fn pending_items(&self) -> usize {
        pending_items(&*self.batches.read().await)
    }
}
