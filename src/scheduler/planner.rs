//! Schedule planner
//!
//! One planning pass:
//! 1. refresh trending topics
//! 2. score every unprocessed (content, language) pair without existing work
//! 3. drop scores below the viral threshold
//! 4. pick the next peak hour in the language's local time (rules applied)
//! 5. sort by priority and admit per language and day up to the daily cap
//! 6. auto-approve confident entries into batches, route the rest to review

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::error::{SchedulerError, SchedulerResult};
use super::rules::RuleManager;
use crate::analytics::TrendAnalyzer;
use crate::batch::BatchQueue;
use crate::config::LanguageProfile;
use crate::executor::Executor;
use crate::models::{
    ContentFilter, ContentItem, ContentStatus, Language, NewWorkItem, WorkFilter, WorkItem,
    WorkItemKind, WorkItemPatch, WorkItemStatus,
};
use crate::scoring::{ContentScorer, ViralScore};
use crate::store::ContentStore;

/// Planner thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlannerConfig {
    /// Scores below this are discarded
    pub viral_threshold: f64,

    /// Minimum score for auto-approval
    pub auto_approve_score: f64,

    /// Minimum confidence for auto-approval
    pub auto_approve_confidence: f64,

    /// Content items considered per pass
    pub max_items: usize,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            viral_threshold: 75.0,
            auto_approve_score: 85.0,
            auto_approve_confidence: 80.0,
            max_items: 50,
        }
    }
}

/// Approval route of a schedule entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Approval {
    AutoApproved,
    ManualReview,
}

/// A planned publication of one item in one language
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleEntry {
    pub content_id: String,
    pub language: Language,
    pub publish_at: DateTime<Utc>,
    /// Publish date in the audience's local time
    pub publish_day: NaiveDate,
    /// Overall viral score
    pub priority: f64,
    pub estimated_reach: u64,
    pub viral_score: ViralScore,
    pub reasoning: String,
    pub approval: Approval,
}

impl ScheduleEntry {
    pub fn confidence(&self) -> f64 {
        self.viral_score.confidence
    }

    fn payload(&self) -> serde_json::Value {
        serde_json::json!({
            "publish_at": self.publish_at.to_rfc3339(),
            "publish_day": self.publish_day.to_string(),
            "priority": self.priority,
            "confidence": self.confidence(),
            "estimated_reach": self.estimated_reach,
            "reasoning": self.reasoning,
            "approval": self.approval,
        })
    }
}

/// Result of the daily cap pass
#[derive(Debug, Default)]
pub struct CapOutcome {
    pub admitted: Vec<ScheduleEntry>,
    pub rejected: Vec<ScheduleEntry>,
}

/// Summary of one planning pass
#[derive(Debug, Clone, Default, Serialize)]
pub struct PlanOutcome {
    pub entries: Vec<ScheduleEntry>,
    pub items_considered: usize,
    pub pairs_scored: usize,
    pub below_threshold: usize,
    pub over_cap: usize,
    pub auto_approved: usize,
    pub sent_to_review: usize,
    pub batches_created: usize,
}

/// Sort by priority (ties: confidence, then content id) and admit entries
/// per language and local day while the count is below the language's cap.
///
/// `already_scheduled` holds entries committed earlier for the same day.
/// Languages missing from `caps` admit nothing.
pub fn admit_by_daily_cap(
    mut entries: Vec<ScheduleEntry>,
    caps: &HashMap<Language, usize>,
    already_scheduled: &HashMap<(Language, NaiveDate), usize>,
) -> CapOutcome {
    entries.sort_by(|a, b| {
        b.priority
            .total_cmp(&a.priority)
            .then_with(|| b.confidence().total_cmp(&a.confidence()))
            .then_with(|| a.content_id.cmp(&b.content_id))
    });

    let mut counts = already_scheduled.clone();
    let mut outcome = CapOutcome::default();
    for entry in entries {
        let cap = caps.get(&entry.language).copied().unwrap_or(0);
        let count = counts
            .entry((entry.language.clone(), entry.publish_day))
            .or_insert(0);
        if *count < cap {
            *count += 1;
            outcome.admitted.push(entry);
        } else {
            outcome.rejected.push(entry);
        }
    }
    outcome
}

/// `base · (1 + s/100·2) · (0.7 + c/100·0.6)`
pub fn estimate_reach(base_audience: u64, score: f64, confidence: f64) -> u64 {
    let reach = base_audience as f64 * (1.0 + score / 100.0 * 2.0) * (0.7 + confidence / 100.0 * 0.6);
    reach.round().max(0.0) as u64
}

/// Next peak hour strictly after `now`, in UTC
pub fn next_peak_time(
    profile: &LanguageProfile,
    peak_hours: &[u32],
    now: DateTime<Utc>,
) -> SchedulerResult<DateTime<Utc>> {
    let offset = profile.offset();
    let local = profile.local_time(now);

    let mut hours: Vec<u32> = peak_hours.to_vec();
    hours.sort_unstable();
    hours.dedup();
    if let Some(hour) = hours.iter().find(|h| **h > 23) {
        return Err(SchedulerError::invalid_hour(*hour));
    }

    for day in 0..=1 {
        let date = local.date_naive() + Duration::days(day);
        for &hour in &hours {
            let Some(candidate) = date
                .and_hms_opt(hour, 0, 0)
                .and_then(|naive| naive.and_local_timezone(offset).single())
            else {
                continue;
            };
            if candidate > local {
                return Ok(candidate.with_timezone(&Utc));
            }
        }
    }

    Err(SchedulerError::PlanningFailed {
        reason: format!("no peak hours configured for {}", profile.code),
    })
}

fn reasoning(score: &ViralScore, profile: &LanguageProfile, publish_at: DateTime<Utc>) -> String {
    let factors: Vec<String> = score
        .top_factors(2)
        .into_iter()
        .map(|(name, value)| format!("{name} {value:.0}"))
        .collect();
    format!(
        "score {:.0} (confidence {:.0}); strongest: {}; publish {} local",
        score.overall,
        score.confidence,
        factors.join(", "),
        profile.local_time(publish_at).format("%a %H:%M")
    )
}

/// Plans publication of unprocessed content across languages
pub struct SchedulePlanner {
    config: PlannerConfig,
    store: Arc<dyn ContentStore>,
    executor: Arc<Executor>,
    trends: Arc<TrendAnalyzer>,
    scorer: Arc<ContentScorer>,
    rules: Arc<RuleManager>,
    batches: Option<Arc<BatchQueue>>,
}

impl SchedulePlanner {
    pub fn new(
        config: PlannerConfig,
        store: Arc<dyn ContentStore>,
        executor: Arc<Executor>,
        trends: Arc<TrendAnalyzer>,
        scorer: Arc<ContentScorer>,
        rules: Arc<RuleManager>,
    ) -> Self {
        Self {
            config,
            store,
            executor,
            trends,
            scorer,
            rules,
            batches: None,
        }
    }

    /// Convert auto-approved entries into batches on this queue
    pub fn with_batch_queue(mut self, batches: Arc<BatchQueue>) -> Self {
        self.batches = Some(batches);
        self
    }

    pub fn config(&self) -> &PlannerConfig {
        &self.config
    }

    pub fn rules(&self) -> &Arc<RuleManager> {
        &self.rules
    }

    /// Plan and commit: review items are recorded, auto-approved entries
    /// are enqueued, content statuses are advanced
    pub async fn plan(&self, max_items: usize) -> SchedulerResult<PlanOutcome> {
        let now = Utc::now();
        let mut outcome = self.compute_plan(max_items, now).await?;
        self.commit(&mut outcome).await?;

        info!(
            considered = outcome.items_considered,
            scored = outcome.pairs_scored,
            below_threshold = outcome.below_threshold,
            over_cap = outcome.over_cap,
            admitted = outcome.entries.len(),
            auto_approved = outcome.auto_approved,
            review = outcome.sent_to_review,
            batches = outcome.batches_created,
            "Planning pass complete"
        );
        Ok(outcome)
    }

    /// Plan without side effects on the store or the batch queue
    pub async fn preview(&self, max_items: usize) -> SchedulerResult<PlanOutcome> {
        self.compute_plan(max_items, Utc::now()).await
    }

    async fn compute_plan(&self, max_items: usize, now: DateTime<Utc>) -> SchedulerResult<PlanOutcome> {
        let recent = self.list_content(ContentFilter {
            statuses: Vec::new(),
            limit: Some(self.trends.config().recent_content_limit),
        })
        .await?;
        self.trends.refresh_trends_at(&recent, now).await;

        let items = self.list_content(ContentFilter::unprocessed(max_items)).await?;
        let existing = self.list_plan_work_items().await?;
        let planned_pairs: HashSet<(String, Language)> = existing
            .iter()
            .map(|w| (w.content_id.clone(), w.language.clone()))
            .collect();

        let mut outcome = PlanOutcome {
            items_considered: items.len(),
            ..Default::default()
        };
        let mut candidates = Vec::new();

        for item in &items {
            for profile in self.scorer.languages() {
                if planned_pairs.contains(&(item.id.clone(), profile.code.clone())) {
                    continue;
                }
                outcome.pairs_scored += 1;
                match self.build_entry(item, profile, now).await? {
                    Some(entry) => candidates.push(entry),
                    None => outcome.below_threshold += 1,
                }
            }
        }

        let caps: HashMap<Language, usize> = self
            .scorer
            .languages()
            .iter()
            .map(|p| (p.code.clone(), p.daily_limit))
            .collect();
        let already = scheduled_per_day(&existing, self.scorer.languages());

        let capped = admit_by_daily_cap(candidates, &caps, &already);
        outcome.over_cap = capped.rejected.len();
        outcome.entries = capped.admitted;
        Ok(outcome)
    }

    async fn build_entry(
        &self,
        item: &ContentItem,
        profile: &LanguageProfile,
        now: DateTime<Utc>,
    ) -> SchedulerResult<Option<ScheduleEntry>> {
        let score = self.scorer.score_at(item, &profile.code, now).await;
        if score.overall < self.config.viral_threshold {
            debug!(
                content_id = %item.id,
                language = %profile.code,
                score = score.overall,
                "Below viral threshold"
            );
            return Ok(None);
        }

        let rule = self.rules.rule_for(&profile.code, now).await;
        let peak_hours = rule
            .as_ref()
            .and_then(|r| r.request.peak_hours.clone())
            .unwrap_or_else(|| profile.peak_hours.clone());
        let mut publish_at = next_peak_time(profile, &peak_hours, now)?;
        if let Some(rule) = &rule {
            publish_at += rule.shift();
        }

        let approval = if score.overall >= self.config.auto_approve_score
            && score.confidence >= self.config.auto_approve_confidence
        {
            Approval::AutoApproved
        } else {
            Approval::ManualReview
        };

        Ok(Some(ScheduleEntry {
            content_id: item.id.clone(),
            language: profile.code.clone(),
            publish_at,
            publish_day: profile.local_time(publish_at).date_naive(),
            priority: score.overall,
            estimated_reach: estimate_reach(profile.base_audience, score.overall, score.confidence),
            reasoning: reasoning(&score, profile, publish_at),
            viral_score: score,
            approval,
        }))
    }

    /// Auto-approved entries are recorded as Approved and only flipped to
    /// Queued once their batch exists, so an interrupted commit leaves them
    /// for hourly batch creation
    async fn commit(&self, outcome: &mut PlanOutcome) -> SchedulerResult<()> {
        let mut auto_by_language: HashMap<Language, Vec<(String, f64, String)>> = HashMap::new();

        for entry in &outcome.entries {
            let status = match entry.approval {
                Approval::AutoApproved => WorkItemStatus::Approved,
                Approval::ManualReview => WorkItemStatus::AwaitingReview,
            };
            let new = NewWorkItem::new(&entry.content_id, entry.language.clone(), status)
                .with_payload(entry.payload());
            let work_item = self.create_work_item(new).await?;

            match entry.approval {
                Approval::AutoApproved => {
                    outcome.auto_approved += 1;
                    auto_by_language
                        .entry(entry.language.clone())
                        .or_default()
                        .push((entry.content_id.clone(), entry.priority, work_item.id));
                }
                Approval::ManualReview => outcome.sent_to_review += 1,
            }
        }

        for (language, items) in auto_by_language {
            outcome.batches_created += self.enqueue_approved(language, items).await?;
        }

        self.advance_content_status(outcome).await
    }

    /// Enqueue one language's auto-approved items and mark them Queued; on
    /// refusal they stay Approved for hourly batch creation
    async fn enqueue_approved(
        &self,
        language: Language,
        items: Vec<(String, f64, String)>,
    ) -> SchedulerResult<usize> {
        let Some(batches) = &self.batches else {
            return Ok(0);
        };

        let ids: Vec<String> = items.iter().map(|(id, _, _)| id.clone()).collect();
        let priority = items.iter().map(|(_, p, _)| *p).fold(0.0, f64::max);
        match batches.enqueue(language.clone(), ids, priority).await {
            Ok(created) => {
                for (_, _, work_item_id) in &items {
                    self.update_work_item(work_item_id, WorkItemPatch::status(WorkItemStatus::Queued))
                        .await?;
                }
                Ok(created.len())
            }
            Err(e) => {
                warn!(language = %language, error = %e, "Auto-approved items not enqueued, left for batch creation");
                Ok(0)
            }
        }
    }

    /// Approved when any language auto-approved, Processed otherwise
    async fn advance_content_status(&self, outcome: &PlanOutcome) -> SchedulerResult<()> {
        let approved: HashSet<&str> = outcome
            .entries
            .iter()
            .filter(|e| e.approval == Approval::AutoApproved)
            .map(|e| e.content_id.as_str())
            .collect();
        let planned: HashSet<&str> = outcome.entries.iter().map(|e| e.content_id.as_str()).collect();

        for content_id in planned {
            let status = if approved.contains(content_id) {
                ContentStatus::Approved
            } else {
                ContentStatus::Processed
            };
            self.set_status(content_id, status).await?;
        }
        Ok(())
    }

    // ========================================================================
    // Store access through the executor
    // ========================================================================

    async fn list_content(&self, filter: ContentFilter) -> SchedulerResult<Vec<ContentItem>> {
        let ctx = self.executor.store_context("list_content");
        let store = self.store.clone();
        self.executor
            .execute_with_retry(&ctx, || {
                let store = store.clone();
                let filter = filter.clone();
                async move { Ok(store.list_content(&filter).await?) }
            })
            .await
            .map_err(|e| SchedulerError::store("list_content", e))
    }

    /// Review and production items that count toward caps and dedup
    async fn list_plan_work_items(&self) -> SchedulerResult<Vec<WorkItem>> {
        let ctx = self.executor.store_context("list_work_items");
        let store = self.store.clone();
        let items = self
            .executor
            .execute_with_retry(&ctx, || {
                let store = store.clone();
                async move { Ok(store.list_work_items(&WorkFilter::default()).await?) }
            })
            .await
            .map_err(|e| SchedulerError::store("list_work_items", e))?;
        Ok(items
            .into_iter()
            .filter(|w| w.status != WorkItemStatus::Rejected)
            .collect())
    }

    async fn create_work_item(&self, new: NewWorkItem) -> SchedulerResult<WorkItem> {
        let ctx = self.executor.store_context("create_work_item");
        let store = self.store.clone();
        self.executor
            .execute_with_retry(&ctx, || {
                let store = store.clone();
                let new = new.clone();
                async move { Ok(store.create_work_item(WorkItemKind::Review, new).await?) }
            })
            .await
            .map_err(|e| SchedulerError::store("create_work_item", e))
    }

    async fn update_work_item(&self, id: &str, patch: WorkItemPatch) -> SchedulerResult<WorkItem> {
        let ctx = self.executor.store_context("update_work_item");
        let store = self.store.clone();
        self.executor
            .execute_with_retry(&ctx, || {
                let store = store.clone();
                let patch = patch.clone();
                async move { Ok(store.update_work_item(id, patch).await?) }
            })
            .await
            .map_err(|e| SchedulerError::store("update_work_item", e))
    }

    async fn set_status(&self, id: &str, status: ContentStatus) -> SchedulerResult<()> {
        let ctx = self.executor.store_context("set_status");
        let store = self.store.clone();
        self.executor
            .execute_with_retry(&ctx, || {
                let store = store.clone();
                async move { Ok(store.set_status(id, status).await?) }
            })
            .await
            .map_err(|e| SchedulerError::store("set_status", e))
    }
}

/// Count review items per (language, local publish day) from their payloads
fn scheduled_per_day(
    items: &[WorkItem],
    languages: &[LanguageProfile],
) -> HashMap<(Language, NaiveDate), usize> {
    let mut counts = HashMap::new();
    for item in items.iter().filter(|w| w.kind == WorkItemKind::Review) {
        let Some(publish_at) = item
            .payload
            .get("publish_at")
            .and_then(|v| v.as_str())
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        else {
            continue;
        };
        let Some(profile) = languages.iter().find(|p| p.code == item.language) else {
            continue;
        };
        let day = profile
            .local_time(publish_at.with_timezone(&Utc))
            .date_naive();
        *counts.entry((item.language.clone(), day)).or_insert(0) += 1;
    }
    counts
}
