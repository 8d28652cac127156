//! Viral potential scoring
//!
//! [`ContentScorer::score`] combines four independent factors:
//!
//! | factor          | weight | source                                   |
//! |-----------------|--------|------------------------------------------|
//! | content quality | 0.4    | AI collaborator, heuristic fallback      |
//! | trend alignment | 0.3    | active trending keywords                 |
//! | timing fitness  | 0.2    | language peak-hour table                 |
//! | audience fit    | 0.1    | language preferred-category table        |
//!
//! A failing factor degrades to its heuristic; scoring itself never fails.

pub mod heuristics;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::analytics::TrendAnalyzer;
use crate::config::LanguageProfile;
use crate::executor::Executor;
use crate::llm::{extract_json, AiAvailability, TextGenerator};
use crate::models::{ContentItem, Language};

/// Scorer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    pub content_weight: f64,
    pub trend_weight: f64,
    pub timing_weight: f64,
    pub audience_weight: f64,

    /// Body characters sent to the collaborator for quality assessment
    pub ai_body_chars: usize,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            content_weight: 0.4,
            trend_weight: 0.3,
            timing_weight: 0.2,
            audience_weight: 0.1,
            ai_body_chars: 1500,
        }
    }
}

/// How the content-quality factor is computed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoringStrategy {
    AiBased,
    Heuristic,
}

/// One factor's value and how much it can be trusted, both 0-100
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FactorScore {
    pub score: f64,
    pub confidence: f64,
}

impl FactorScore {
    pub fn new(score: f64, confidence: f64) -> Self {
        Self {
            score: score.clamp(0.0, 100.0),
            confidence: confidence.clamp(0.0, 100.0),
        }
    }
}

/// Multi-factor estimate for publishing one item in one language
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ViralScore {
    pub content_id: String,
    pub language: Language,
    pub content_quality: FactorScore,
    pub trend_alignment: FactorScore,
    pub timing_fitness: FactorScore,
    pub audience_fitness: FactorScore,
    /// Weighted and rounded, 0-100
    pub overall: f64,
    /// Mean of the factor confidences
    pub confidence: f64,
    /// Strategy actually used for content quality
    pub strategy: ScoringStrategy,
    pub scored_at: DateTime<Utc>,
}

impl ViralScore {
    pub fn factors(&self) -> [(&'static str, f64); 4] {
        [
            ("content quality", self.content_quality.score),
            ("trend alignment", self.trend_alignment.score),
            ("timing", self.timing_fitness.score),
            ("audience fit", self.audience_fitness.score),
        ]
    }

    /// Highest factors first
    pub fn top_factors(&self, n: usize) -> Vec<(&'static str, f64)> {
        let mut factors = self.factors().to_vec();
        factors.sort_by(|a, b| b.1.total_cmp(&a.1));
        factors.truncate(n);
        factors
    }
}

#[derive(Debug, Deserialize)]
struct QualityAssessment {
    score: f64,
    #[serde(default = "default_ai_confidence")]
    confidence: f64,
}

fn default_ai_confidence() -> f64 {
    75.0
}

/// Scores content items for target languages
pub struct ContentScorer {
    config: ScoringConfig,
    languages: Vec<LanguageProfile>,
    trends: Arc<TrendAnalyzer>,
    executor: Arc<Executor>,
    generator: Option<Arc<dyn TextGenerator>>,
    availability: Arc<AiAvailability>,
    forced: Option<ScoringStrategy>,
}

impl ContentScorer {
    pub fn new(
        config: ScoringConfig,
        languages: Vec<LanguageProfile>,
        trends: Arc<TrendAnalyzer>,
        executor: Arc<Executor>,
        generator: Option<Arc<dyn TextGenerator>>,
        availability: Arc<AiAvailability>,
    ) -> Self {
        Self {
            config,
            languages,
            trends,
            executor,
            generator,
            availability,
            forced: None,
        }
    }

    /// Always use the given strategy, regardless of availability
    pub fn with_strategy(mut self, strategy: ScoringStrategy) -> Self {
        self.forced = Some(strategy);
        self
    }

    pub fn languages(&self) -> &[LanguageProfile] {
        &self.languages
    }

    pub fn profile(&self, language: &Language) -> Option<&LanguageProfile> {
        self.languages.iter().find(|l| l.code == *language)
    }

    /// Strategy the next score would use
    pub async fn current_strategy(&self) -> ScoringStrategy {
        if let Some(forced) = self.forced {
            return forced;
        }
        if self.generator.is_none() || self.availability.is_fallback_forced().await {
            return ScoringStrategy::Heuristic;
        }
        let key = self.executor.ai_context("score").breaker_key();
        if self.executor.is_circuit_open(&key).await {
            ScoringStrategy::Heuristic
        } else {
            ScoringStrategy::AiBased
        }
    }

    pub async fn score(&self, item: &ContentItem, language: &Language) -> ViralScore {
        self.score_at(item, language, Utc::now()).await
    }

    /// Score as if it were `now`; timing depends on the clock
    pub async fn score_at(
        &self,
        item: &ContentItem,
        language: &Language,
        now: DateTime<Utc>,
    ) -> ViralScore {
        let profile = self.profile(language);
        let mut strategy = self.current_strategy().await;

        let content_quality = match strategy {
            ScoringStrategy::AiBased => match self.assess_quality(item).await {
                Some(factor) => factor,
                None => {
                    strategy = ScoringStrategy::Heuristic;
                    heuristics::content_quality(item)
                }
            },
            ScoringStrategy::Heuristic => heuristics::content_quality(item),
        };
        let topics = self.trends.active_topics_at(now).await;
        let trend_alignment = heuristics::trend_alignment(item, &topics);
        let timing_fitness = heuristics::timing_fitness(profile, now);
        let audience_fitness = heuristics::audience_fitness(item, profile);

        let c = &self.config;
        let overall = (c.content_weight * content_quality.score
            + c.trend_weight * trend_alignment.score
            + c.timing_weight * timing_fitness.score
            + c.audience_weight * audience_fitness.score)
            .round()
            .clamp(0.0, 100.0);
        let confidence = ((content_quality.confidence
            + trend_alignment.confidence
            + timing_fitness.confidence
            + audience_fitness.confidence)
            / 4.0)
            .round();

        debug!(
            content_id = %item.id,
            language = %language,
            overall,
            confidence,
            strategy = ?strategy,
            "Content scored"
        );

        ViralScore {
            content_id: item.id.clone(),
            language: language.clone(),
            content_quality,
            trend_alignment,
            timing_fitness,
            audience_fitness,
            overall,
            confidence,
            strategy,
            scored_at: now,
        }
    }

    /// AI quality assessment; `None` means use the heuristic
    async fn assess_quality(&self, item: &ContentItem) -> Option<FactorScore> {
        let generator = self.generator.clone()?;
        let prompt = format!(
            r#"Rate the quality and shareability of this content from 0 to 100.

Title: {}
Category: {}
Body: {}

Respond with JSON only: {{"score": 0-100, "confidence": 0-100}}"#,
            item.title,
            item.category.as_deref().unwrap_or("unknown"),
            item.body
                .chars()
                .take(self.config.ai_body_chars)
                .collect::<String>()
        );

        let ctx = self.executor.ai_context("score").with_job_id(&item.id);
        let response = self
            .executor
            .execute_with_retry(&ctx, || {
                let generator = generator.clone();
                let prompt = prompt.clone();
                async move { Ok(generator.complete(&prompt).await?) }
            })
            .await;

        let text = match response {
            Ok(text) => text,
            Err(e) => {
                warn!(content_id = %item.id, error = %e, "Quality assessment failed, using heuristic");
                return None;
            }
        };

        let assessment = extract_json(&text)
            .and_then(|json| serde_json::from_str::<QualityAssessment>(json).ok());
        match assessment {
            Some(a) if a.score.is_finite() => Some(FactorScore::new(a.score, a.confidence)),
            _ => {
                warn!(content_id = %item.id, "Unparsable quality assessment, using heuristic");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analytics::TrendConfig;
    use crate::executor::ExecutorConfig;
    use crate::llm::LlmError;
    use crate::notifications::AlertManager;
    use async_trait::async_trait;
    use chrono::TimeZone;

    struct FixedGenerator(&'static str);

    #[async_trait]
    impl TextGenerator for FixedGenerator {
        fn name(&self) -> &str {
            "fixed"
        }

        async fn complete(&self, _prompt: &str) -> Result<String, LlmError> {
            Ok(self.0.to_string())
        }
    }

    fn scorer(generator: Option<Arc<dyn TextGenerator>>) -> ContentScorer {
        let alerts = Arc::new(AlertManager::new());
        let executor = Arc::new(Executor::new(ExecutorConfig::default(), alerts));
        let availability = Arc::new(AiAvailability::new());
        let trends = Arc::new(TrendAnalyzer::new(
            TrendConfig::default(),
            executor.clone(),
            None,
            availability.clone(),
        ));
        let languages = vec![LanguageProfile::new("en", 0, &[12]).with_categories(&["technology"])];
        ContentScorer::new(
            ScoringConfig::default(),
            languages,
            trends,
            executor,
            generator,
            availability,
        )
    }

    fn item() -> ContentItem {
        ContentItem::new("c1", "hi", "").with_category("technology")
    }

    #[tokio::test]
    async fn test_heuristic_weighted_overall() {
        let scorer = scorer(None);
        let noon = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let score = scorer.score_at(&item(), &Language::new("en"), noon).await;

        // quality 40-15-10+10 = 25, trend 50 (no topics), timing 100, audience 100
        assert_eq!(score.content_quality.score, 25.0);
        assert_eq!(score.overall, (0.4f64 * 25.0 + 0.3 * 50.0 + 0.2 * 100.0 + 0.1 * 100.0).round());
        assert_eq!(score.confidence, ((50.0f64 + 30.0 + 90.0 + 75.0) / 4.0).round());
        assert_eq!(score.strategy, ScoringStrategy::Heuristic);
    }

    #[tokio::test]
    async fn test_ai_quality_used_when_available() {
        let scorer = scorer(Some(Arc::new(FixedGenerator(r#"{"score": 90, "confidence": 85}"#))));
        assert_eq!(scorer.current_strategy().await, ScoringStrategy::AiBased);

        let score = scorer.score(&item(), &Language::new("en")).await;
        assert_eq!(score.content_quality.score, 90.0);
        assert_eq!(score.strategy, ScoringStrategy::AiBased);
    }

    #[tokio::test]
    async fn test_unparsable_ai_output_degrades() {
        let scorer = scorer(Some(Arc::new(FixedGenerator("great content!"))));
        let score = scorer.score(&item(), &Language::new("en")).await;
        assert_eq!(score.content_quality.score, 25.0);
        assert_eq!(score.strategy, ScoringStrategy::Heuristic);
    }

    #[tokio::test]
    async fn test_forced_strategy_and_fallback_switch() {
        let scorer = scorer(Some(Arc::new(FixedGenerator(r#"{"score": 90}"#))))
            .with_strategy(ScoringStrategy::Heuristic);
        let score = scorer.score(&item(), &Language::new("en")).await;
        assert_eq!(score.strategy, ScoringStrategy::Heuristic);

        let scorer = scorer_with_forced_fallback().await;
        assert_eq!(scorer.current_strategy().await, ScoringStrategy::Heuristic);
    }

    async fn scorer_with_forced_fallback() -> ContentScorer {
        let scorer = scorer(Some(Arc::new(FixedGenerator(r#"{"score": 90}"#))));
        scorer
            .availability
            .force_fallback(std::time::Duration::from_secs(60))
            .await;
        scorer
    }

    #[tokio::test]
    async fn test_unknown_language_is_neutral() {
        let scorer = scorer(None);
        let score = scorer.score(&item(), &Language::new("xx")).await;
        assert_eq!(score.timing_fitness.score, 50.0);
        assert_eq!(score.audience_fitness.score, 50.0);
    }

    #[test]
    fn test_top_factors_order() {
        let now = Utc::now();
        let score = ViralScore {
            content_id: "c".into(),
            language: Language::new("en"),
            content_quality: FactorScore::new(60.0, 50.0),
            trend_alignment: FactorScore::new(90.0, 80.0),
            timing_fitness: FactorScore::new(100.0, 90.0),
            audience_fitness: FactorScore::new(10.0, 75.0),
            overall: 70.0,
            confidence: 74.0,
            strategy: ScoringStrategy::Heuristic,
            scored_at: now,
        };
        let top = score.top_factors(2);
        assert_eq!(top[0].0, "timing");
        assert_eq!(top[1].0, "trend alignment");
    }
}
