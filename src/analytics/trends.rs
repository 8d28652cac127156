//! Trending topic detection
//!
//! Topics come from two paths:
//! - AI: a bounded sample of recent content summaries is sent to the text
//!   collaborator (through the executor), which answers with a JSON list
//! - Frequency: words of at least `min_word_len` characters are counted
//!   across titles and the top-K become topics
//!
//! Topics are upserted by case-insensitive keyword and soft-retired once
//! their decay window passes. Retired topics stay queryable.

use std::collections::HashMap;
use std::sync::{Arc, LazyLock};

use chrono::{DateTime, Duration, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::executor::Executor;
use crate::llm::{extract_json, AiAvailability, TextGenerator};
use crate::models::{ContentItem, Language};

/// Furthest peak the collaborator is asked to predict
const MAX_PEAK_HOURS: i64 = 48;

static WORD_REGEX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[\p{L}\p{N}]+").unwrap());

/// Trend analyzer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrendConfig {
    /// Content summaries sent to the collaborator per refresh
    pub sample_size: usize,

    /// Topics kept by the frequency fallback
    pub top_k: usize,

    /// Shortest word counted by the frequency fallback (characters)
    pub min_word_len: usize,

    /// Lifetime of a topic since its last refresh (hours)
    pub decay_hours: i64,

    /// Body characters included per summary
    pub summary_chars: usize,

    /// Recent content items fetched for a refresh cycle
    pub recent_content_limit: usize,
}

impl Default for TrendConfig {
    fn default() -> Self {
        Self {
            sample_size: 20,
            top_k: 10,
            min_word_len: 5,
            decay_hours: 24,
            summary_chars: 280,
            recent_content_limit: 100,
        }
    }
}

/// Where a topic came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendSource {
    Ai,
    Frequency,
}

/// A keyword with a decaying relevance score
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrendingTopic {
    pub id: String,
    pub keyword: String,
    pub category: Option<String>,
    /// 0-100
    pub trend_score: f64,
    /// 0-100
    pub viral_potential: f64,
    pub language: Option<Language>,
    pub region: Option<String>,
    /// Estimated peak of interest
    pub peak_time: Option<DateTime<Utc>>,
    pub source: TrendSource,
    pub first_seen: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub retired: bool,
}

impl TrendingTopic {
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        !self.retired && self.expires_at > now
    }
}

/// Topic as proposed by either detection path, before upsert
#[derive(Debug, Clone, Deserialize)]
struct TopicCandidate {
    keyword: String,
    #[serde(default)]
    category: Option<String>,
    #[serde(default)]
    trend_score: f64,
    #[serde(default)]
    viral_potential: f64,
    #[serde(default)]
    language: Option<String>,
    #[serde(default)]
    region: Option<String>,
    /// Hours from now until interest peaks
    #[serde(default)]
    peak_in_hours: Option<i64>,
}

/// Detects and tracks trending topics
pub struct TrendAnalyzer {
    config: TrendConfig,
    executor: Arc<Executor>,
    generator: Option<Arc<dyn TextGenerator>>,
    availability: Arc<AiAvailability>,
    /// Keyed by lowercase keyword
    topics: RwLock<HashMap<String, TrendingTopic>>,
}

impl TrendAnalyzer {
    pub fn new(
        config: TrendConfig,
        executor: Arc<Executor>,
        generator: Option<Arc<dyn TextGenerator>>,
        availability: Arc<AiAvailability>,
    ) -> Self {
        Self {
            config,
            executor,
            generator,
            availability,
            topics: RwLock::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &TrendConfig {
        &self.config
    }

    /// Detect topics in `recent` and upsert them; returns the refreshed topics
    pub async fn refresh_trends(&self, recent: &[ContentItem]) -> Vec<TrendingTopic> {
        self.refresh_trends_at(recent, Utc::now()).await
    }

    pub async fn refresh_trends_at(
        &self,
        recent: &[ContentItem],
        now: DateTime<Utc>,
    ) -> Vec<TrendingTopic> {
        if recent.is_empty() {
            debug!("No recent content, trend refresh skipped");
            return Vec::new();
        }

        let (candidates, source) = match self.detect_with_ai(recent).await {
            Some(candidates) => (candidates, TrendSource::Ai),
            None => (self.detect_by_frequency(recent), TrendSource::Frequency),
        };

        let refreshed = self.upsert(candidates, source, now).await;
        info!(
            topics = refreshed.len(),
            source = ?source,
            sampled = recent.len().min(self.config.sample_size),
            "Trending topics refreshed"
        );
        refreshed
    }

    /// Active topics, highest trend score first
    pub async fn active_topics(&self) -> Vec<TrendingTopic> {
        self.active_topics_at(Utc::now()).await
    }

    pub async fn active_topics_at(&self, now: DateTime<Utc>) -> Vec<TrendingTopic> {
        let topics = self.topics.read().await;
        let mut active: Vec<_> = topics
            .values()
            .filter(|t| t.is_active(now))
            .cloned()
            .collect();
        sort_by_score(&mut active);
        active
    }

    /// Every topic ever seen, retired ones included
    pub async fn all_topics(&self) -> Vec<TrendingTopic> {
        let topics = self.topics.read().await;
        let mut all: Vec<_> = topics.values().cloned().collect();
        sort_by_score(&mut all);
        all
    }

    /// Soft-retire expired topics; returns how many were retired
    pub async fn cleanup_expired(&self, now: DateTime<Utc>) -> usize {
        let mut topics = self.topics.write().await;
        let mut retired = 0;
        for topic in topics.values_mut() {
            if !topic.retired && topic.expires_at <= now {
                topic.retired = true;
                topic.trend_score = 0.0;
                topic.viral_potential = 0.0;
                retired += 1;
            }
        }
        if retired > 0 {
            info!(retired, "Expired trending topics retired");
        }
        retired
    }

    async fn detect_with_ai(&self, recent: &[ContentItem]) -> Option<Vec<TopicCandidate>> {
        let generator = self.generator.clone()?;
        if self.availability.is_fallback_forced().await {
            debug!("AI fallback forced, using frequency trends");
            return None;
        }

        let ctx = self.executor.ai_context("trends");
        if self.executor.is_circuit_open(&ctx.breaker_key()).await {
            debug!("AI breaker open, using frequency trends");
            return None;
        }

        let prompt = self.build_prompt(recent);
        let response = match self
            .executor
            .execute_with_retry(&ctx, || {
                let generator = generator.clone();
                let prompt = prompt.clone();
                async move { Ok(generator.complete(&prompt).await?) }
            })
            .await
        {
            Ok(text) => text,
            Err(e) => {
                warn!(error = %e, "Trend detection call failed, falling back to word frequency");
                return None;
            }
        };

        match parse_candidates(&response) {
            Some(candidates) if !candidates.is_empty() => Some(candidates),
            _ => {
                warn!("Unparsable trend response, falling back to word frequency");
                None
            }
        }
    }

    fn build_prompt(&self, recent: &[ContentItem]) -> String {
        let summaries: Vec<String> = recent
            .iter()
            .take(self.config.sample_size)
            .enumerate()
            .map(|(i, item)| format!("{}. {}", i + 1, item.summary(self.config.summary_chars)))
            .collect();

        format!(
            r#"Identify the trending topics in the following recent content.

{}

Respond with a JSON array only. Each element:
{{"keyword": "...", "category": "...", "trend_score": 0-100, "viral_potential": 0-100, "region": "...", "peak_in_hours": 0-{}}}"#,
            summaries.join("\n"),
            MAX_PEAK_HOURS
        )
    }

    fn detect_by_frequency(&self, recent: &[ContentItem]) -> Vec<TopicCandidate> {
        let mut counts: HashMap<String, usize> = HashMap::new();
        for item in recent {
            for word in WORD_REGEX.find_iter(&item.title) {
                let word = word.as_str().to_lowercase();
                if word.chars().count() >= self.config.min_word_len {
                    *counts.entry(word).or_insert(0) += 1;
                }
            }
        }

        let mut ranked: Vec<(String, usize)> = counts.into_iter().collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        ranked.truncate(self.config.top_k);

        let max = ranked.first().map_or(1, |(_, count)| *count).max(1) as f64;
        ranked
            .into_iter()
            .map(|(keyword, count)| {
                let score = (count as f64 / max * 100.0).round();
                TopicCandidate {
                    keyword,
                    category: None,
                    trend_score: score,
                    viral_potential: score,
                    language: None,
                    region: None,
                    peak_in_hours: None,
                }
            })
            .collect()
    }

    async fn upsert(
        &self,
        candidates: Vec<TopicCandidate>,
        source: TrendSource,
        now: DateTime<Utc>,
    ) -> Vec<TrendingTopic> {
        let expires_at = now + Duration::hours(self.config.decay_hours);
        let mut topics = self.topics.write().await;
        let mut refreshed = Vec::with_capacity(candidates.len());

        for candidate in candidates {
            let keyword = candidate.keyword.trim();
            if keyword.is_empty() {
                continue;
            }
            let key = keyword.to_lowercase();
            let trend_score = candidate.trend_score.clamp(0.0, 100.0);
            let viral_potential = candidate.viral_potential.clamp(0.0, 100.0);
            let peak_time = candidate.peak_in_hours.and_then(|h| peak_after(now, h));

            let topic = topics
                .entry(key)
                .and_modify(|existing| {
                    existing.trend_score = trend_score;
                    existing.viral_potential = viral_potential;
                    if candidate.category.is_some() {
                        existing.category = candidate.category.clone();
                    }
                    if peak_time.is_some() {
                        existing.peak_time = peak_time;
                    }
                    existing.source = source;
                    existing.updated_at = now;
                    existing.expires_at = expires_at;
                    existing.retired = false;
                })
                .or_insert_with(|| TrendingTopic {
                    id: uuid::Uuid::new_v4().to_string(),
                    keyword: keyword.to_string(),
                    category: candidate.category.clone(),
                    trend_score,
                    viral_potential,
                    language: candidate.language.as_deref().map(Language::new),
                    region: candidate.region.clone(),
                    peak_time,
                    source,
                    first_seen: now,
                    updated_at: now,
                    expires_at,
                    retired: false,
                });
            refreshed.push(topic.clone());
        }

        refreshed
    }
}

fn parse_candidates(response: &str) -> Option<Vec<TopicCandidate>> {
    let json = extract_json(response)?;
    serde_json::from_str::<Vec<TopicCandidate>>(json).ok()
}

fn sort_by_score(topics: &mut [TrendingTopic]) {
    topics.sort_by(|a, b| {
        b.trend_score
            .total_cmp(&a.trend_score)
            .then_with(|| a.keyword.cmp(&b.keyword))
    });
}

/// Peak time from a collaborator's hour offset, clamped to the prompt's window
fn peak_after(now: DateTime<Utc>, hours: i64) -> Option<DateTime<Utc>> {
    let offset = Duration::try_hours(hours.clamp(0, MAX_PEAK_HOURS))?;
    now.checked_add_signed(offset)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::ExecutorConfig;
    use crate::llm::LlmError;
    use crate::notifications::AlertManager;
    use async_trait::async_trait;

    struct FixedGenerator(Result<String, ()>);

    #[async_trait]
    impl TextGenerator for FixedGenerator {
        fn name(&self) -> &str {
            "fixed"
        }

        async fn complete(&self, _prompt: &str) -> Result<String, LlmError> {
            self.0
                .clone()
                .map_err(|_| LlmError::Unauthorized("no key".into()))
        }
    }

    fn analyzer(generator: Option<Arc<dyn TextGenerator>>) -> TrendAnalyzer {
        let alerts = Arc::new(AlertManager::new());
        let executor = Arc::new(Executor::new(ExecutorConfig::default(), alerts));
        TrendAnalyzer::new(
            TrendConfig::default(),
            executor,
            generator,
            Arc::new(AiAvailability::new()),
        )
    }

    fn content() -> Vec<ContentItem> {
        vec![
            ContentItem::new("1", "Quantum computing breakthrough announced", ""),
            ContentItem::new("2", "Quantum chips enter production", ""),
            ContentItem::new("3", "New quantum startup raises funds", ""),
            ContentItem::new("4", "Electric cars hit record sales", ""),
        ]
    }

    #[tokio::test]
    async fn test_frequency_fallback_ranks_by_count() {
        let analyzer = analyzer(None);
        let topics = analyzer.refresh_trends(&content()).await;

        assert!(!topics.is_empty());
        assert!(topics.len() <= 10);
        let top = analyzer.active_topics().await;
        assert_eq!(top[0].keyword, "quantum");
        assert_eq!(top[0].trend_score, 100.0);
        assert_eq!(top[0].source, TrendSource::Frequency);
        // short words never become topics
        assert!(top.iter().all(|t| t.keyword.chars().count() >= 5));
    }

    #[tokio::test]
    async fn test_ai_topics_are_parsed() {
        let response = r#"```json
[{"keyword": "Quantum", "category": "technology", "trend_score": 92, "viral_potential": 88}]
```"#;
        let analyzer = analyzer(Some(Arc::new(FixedGenerator(Ok(response.into())))));
        let topics = analyzer.refresh_trends(&content()).await;

        assert_eq!(topics.len(), 1);
        assert_eq!(topics[0].source, TrendSource::Ai);
        assert_eq!(topics[0].category.as_deref(), Some("technology"));
        assert_eq!(topics[0].viral_potential, 88.0);
    }

    #[tokio::test]
    async fn test_out_of_range_peak_is_clamped() {
        let response = r#"[
            {"keyword": "quantum", "trend_score": 90, "viral_potential": 80, "peak_in_hours": 9223372036854775807},
            {"keyword": "battery", "trend_score": 70, "viral_potential": 60, "peak_in_hours": -9223372036854775808}
        ]"#;
        let analyzer = analyzer(Some(Arc::new(FixedGenerator(Ok(response.into())))));
        let now = Utc::now();
        let topics = analyzer.refresh_trends_at(&content(), now).await;

        assert_eq!(topics.len(), 2);
        let quantum = topics.iter().find(|t| t.keyword == "quantum").unwrap();
        assert_eq!(quantum.peak_time, Some(now + Duration::hours(MAX_PEAK_HOURS)));
        let battery = topics.iter().find(|t| t.keyword == "battery").unwrap();
        assert_eq!(battery.peak_time, Some(now));
    }

    #[test]
    fn test_peak_after_near_max_date() {
        let now = DateTime::<Utc>::MAX_UTC - Duration::hours(1);
        assert!(peak_after(now, 48).is_none());
        assert_eq!(peak_after(now, 0), Some(now));
    }

    #[tokio::test]
    async fn test_unparsable_response_falls_back() {
        let analyzer = analyzer(Some(Arc::new(FixedGenerator(Ok("no idea".into())))));
        let topics = analyzer.refresh_trends(&content()).await;
        assert!(topics.iter().all(|t| t.source == TrendSource::Frequency));
    }

    #[tokio::test]
    async fn test_collaborator_failure_falls_back() {
        let analyzer = analyzer(Some(Arc::new(FixedGenerator(Err(())))));
        let topics = analyzer.refresh_trends(&content()).await;
        assert!(!topics.is_empty());
        assert!(topics.iter().all(|t| t.source == TrendSource::Frequency));
    }

    #[tokio::test]
    async fn test_upsert_is_case_insensitive() {
        let analyzer = analyzer(None);
        let now = Utc::now();
        analyzer.refresh_trends_at(&content(), now).await;
        let upper = vec![ContentItem::new("5", "QUANTUM QUANTUM", "")];
        analyzer.refresh_trends_at(&upper, now).await;

        let all = analyzer.all_topics().await;
        let quantum: Vec<_> = all
            .iter()
            .filter(|t| t.keyword.eq_ignore_ascii_case("quantum"))
            .collect();
        assert_eq!(quantum.len(), 1);
    }

    #[tokio::test]
    async fn test_cleanup_soft_retires() {
        let analyzer = analyzer(None);
        let now = Utc::now();
        let refreshed = analyzer.refresh_trends_at(&content(), now).await.len();

        assert_eq!(analyzer.cleanup_expired(now + Duration::hours(1)).await, 0);
        let retired = analyzer.cleanup_expired(now + Duration::hours(25)).await;
        assert_eq!(retired, refreshed);

        assert!(analyzer.active_topics().await.is_empty());
        let all = analyzer.all_topics().await;
        assert_eq!(all.len(), refreshed);
        assert!(all.iter().all(|t| t.retired && t.trend_score == 0.0));
    }
}
