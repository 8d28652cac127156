//! Configuration management for polycast
//!
//! A single typed [`Config`] carries every threshold the governance core
//! uses. Each component receives its own section by constructor injection.
//! All sections default, so a partial TOML file is enough:
//!
//! ```toml
//! [planner]
//! viral_threshold = 80.0
//!
//! [[languages]]
//! code = "en"
//! utc_offset_minutes = -300
//! peak_hours = [8, 12, 19]
//! ```

use anyhow::{Context, Result};
use chrono::{DateTime, FixedOffset, Offset, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::analytics::TrendConfig;
use crate::batch::BatchConfig;
use crate::executor::{ExecutorConfig, RetryPolicy};
use crate::governor::GovernorConfig;
use crate::llm::LlmConfig;
use crate::models::Language;
use crate::notifications::channels::webhook::WebhookConfig;
use crate::notifications::AlertConfig;
use crate::orchestrator::OrchestratorConfig;
use crate::scheduler::PlannerConfig;
use crate::scoring::ScoringConfig;

/// Hard floors the governor may never go below
const MIN_CONCURRENT_JOBS: usize = 1;
const MIN_QUEUE_SIZE: usize = 10;
const MIN_API_RATE: u32 = 5;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Retry policies and circuit breaker thresholds
    pub executor: ExecutorConfig,

    /// Resource governor thresholds and limits
    pub governor: GovernorConfig,

    /// Trend analyzer
    pub trends: TrendConfig,

    /// Content scorer weights
    pub scoring: ScoringConfig,

    /// Schedule planner thresholds
    pub planner: PlannerConfig,

    /// Batch queue processor
    pub batch: BatchConfig,

    /// Cycle intervals and retention
    pub orchestrator: OrchestratorConfig,

    /// Alert cooldown and channels
    pub alerts: AlertConfig,

    /// AI text-analysis collaborator
    pub llm: LlmConfig,

    pub database: DatabaseConfig,

    /// Operational HTTP surface
    pub server: ServerConfig,

    pub logging: LoggingConfig,

    /// Supported target languages
    pub languages: Vec<LanguageProfile>,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// SQLite database path
    pub sqlite_path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            sqlite_path: PathBuf::from("data/polycast.db"),
        }
    }
}

/// Operational HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,

    /// Permissive CORS for browser dashboards
    pub enable_cors: bool,

    /// Per-request tracing spans
    pub enable_request_logging: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: String::from("127.0.0.1"),
            port: 8080,
            enable_cors: true,
            enable_request_logging: true,
        }
    }
}

impl ServerConfig {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (text, json)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: String::from("info"),
            format: String::from("text"),
        }
    }
}

/// Static per-language publishing profile
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LanguageProfile {
    pub code: Language,

    /// Fixed offset of the audience's main timezone from UTC
    #[serde(default)]
    pub utc_offset_minutes: i32,

    /// Local hours (0-23) with the highest engagement
    #[serde(default)]
    pub peak_hours: Vec<u32>,

    /// Categories this audience engages with most, best first
    #[serde(default)]
    pub preferred_categories: Vec<String>,

    /// Typical reach of one published item
    #[serde(default)]
    pub base_audience: u64,

    /// Batches of this language allowed in flight at once
    #[serde(default = "default_max_concurrent_batches")]
    pub max_concurrent_batches: usize,

    /// Items published per local day
    #[serde(default = "default_daily_limit")]
    pub daily_limit: usize,
}

fn default_max_concurrent_batches() -> usize {
    2
}

fn default_daily_limit() -> usize {
    6
}

impl LanguageProfile {
    pub fn new(code: &str, utc_offset_minutes: i32, peak_hours: &[u32]) -> Self {
        Self {
            code: Language::new(code),
            utc_offset_minutes,
            peak_hours: peak_hours.to_vec(),
            preferred_categories: Vec::new(),
            base_audience: 100_000,
            max_concurrent_batches: default_max_concurrent_batches(),
            daily_limit: default_daily_limit(),
        }
    }

    pub fn with_categories(mut self, categories: &[&str]) -> Self {
        self.preferred_categories = categories.iter().map(|c| c.to_string()).collect();
        self
    }

    pub fn with_audience(mut self, base_audience: u64) -> Self {
        self.base_audience = base_audience;
        self
    }

    pub fn with_limits(mut self, max_concurrent_batches: usize, daily_limit: usize) -> Self {
        self.max_concurrent_batches = max_concurrent_batches;
        self.daily_limit = daily_limit;
        self
    }

    /// Timezone offset; falls back to UTC for out-of-range values
    pub fn offset(&self) -> FixedOffset {
        FixedOffset::east_opt(self.utc_offset_minutes * 60).unwrap_or_else(|| Utc.fix())
    }

    /// `now` in the audience's local time
    pub fn local_time(&self, now: DateTime<Utc>) -> DateTime<FixedOffset> {
        now.with_timezone(&self.offset())
    }
}

/// Built-in language table
pub fn default_languages() -> Vec<LanguageProfile> {
    vec![
        LanguageProfile::new("en", -300, &[8, 12, 19])
            .with_categories(&["technology", "entertainment", "business", "science"])
            .with_audience(1_000_000)
            .with_limits(3, 10),
        LanguageProfile::new("es", 60, &[9, 14, 21])
            .with_categories(&["entertainment", "sports", "lifestyle"])
            .with_audience(600_000)
            .with_limits(2, 8),
        LanguageProfile::new("fr", 60, &[8, 13, 20])
            .with_categories(&["culture", "politics", "lifestyle"])
            .with_audience(400_000)
            .with_limits(2, 6),
        LanguageProfile::new("de", 60, &[7, 12, 19])
            .with_categories(&["technology", "business", "science"])
            .with_audience(450_000)
            .with_limits(2, 6),
        LanguageProfile::new("pt", -180, &[9, 13, 21])
            .with_categories(&["sports", "entertainment", "lifestyle"])
            .with_audience(500_000)
            .with_limits(2, 7),
        LanguageProfile::new("ja", 540, &[7, 12, 21])
            .with_categories(&["technology", "gaming", "entertainment"])
            .with_audience(500_000)
            .with_limits(2, 7),
        LanguageProfile::new("ko", 540, &[8, 12, 22])
            .with_categories(&["entertainment", "technology", "gaming"])
            .with_audience(350_000)
            .with_limits(2, 6),
        LanguageProfile::new("hi", 330, &[9, 13, 20])
            .with_categories(&["entertainment", "education", "sports"])
            .with_audience(700_000)
            .with_limits(2, 8),
        LanguageProfile::new("ar", 180, &[10, 15, 21])
            .with_categories(&["culture", "business", "education"])
            .with_audience(400_000)
            .with_limits(2, 6),
        LanguageProfile::new("zh", 480, &[8, 12, 20])
            .with_categories(&["technology", "business", "finance"])
            .with_audience(800_000)
            .with_limits(2, 8),
    ]
}

impl Default for Config {
    fn default() -> Self {
        Self {
            executor: ExecutorConfig::default(),
            governor: GovernorConfig::default(),
            trends: TrendConfig::default(),
            scoring: ScoringConfig::default(),
            planner: PlannerConfig::default(),
            batch: BatchConfig::default(),
            orchestrator: OrchestratorConfig::default(),
            alerts: AlertConfig::default(),
            llm: LlmConfig::default(),
            database: DatabaseConfig::default(),
            server: ServerConfig::default(),
            logging: LoggingConfig::default(),
            languages: default_languages(),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse::<T>().ok())
}

impl Config {
    /// Defaults with POLYCAST_* environment overrides
    pub fn from_env() -> Result<Self> {
        let mut config = Self {
            llm: LlmConfig::from_env(),
            ..Self::default()
        };

        if let Ok(path) = std::env::var("POLYCAST_SQLITE_PATH") {
            config.database.sqlite_path = path.into();
        }
        if let Ok(level) = std::env::var("POLYCAST_LOG_LEVEL") {
            config.logging.level = level;
        }
        if let Ok(format) = std::env::var("POLYCAST_LOG_FORMAT") {
            config.logging.format = format;
        }
        if let Ok(host) = std::env::var("POLYCAST_HOST") {
            config.server.host = host;
        }
        if let Some(port) = env_parse("POLYCAST_PORT") {
            config.server.port = port;
        }
        if let Some(threshold) = env_parse("POLYCAST_VIRAL_THRESHOLD") {
            config.planner.viral_threshold = threshold;
        }
        if let Some(jobs) = env_parse("POLYCAST_MAX_CONCURRENT_JOBS") {
            config.governor.baseline.max_concurrent_jobs = jobs;
        }
        if let Some(minutes) = env_parse("POLYCAST_SCHEDULING_INTERVAL_MINUTES") {
            config.orchestrator.scheduling_interval_minutes = minutes;
        }
        if let Some(hour) = env_parse("POLYCAST_MAINTENANCE_HOUR") {
            config.orchestrator.maintenance_hour = hour;
        }
        if let Ok(url) = std::env::var("POLYCAST_WEBHOOK_URL") {
            let mut webhook = WebhookConfig::new(url);
            if let Ok(token) = std::env::var("POLYCAST_WEBHOOK_TOKEN") {
                webhook = webhook.with_auth_token(token);
            }
            config.alerts.webhooks.push(webhook);
        }

        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse TOML config file: {}", path.display()))?;

        Ok(config)
    }

    /// File when given, environment otherwise; validated either way
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::from_env()?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Render as TOML
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize configuration")
    }

    /// Profile for a language code
    pub fn language(&self, code: &Language) -> Option<&LanguageProfile> {
        self.languages.iter().find(|l| l.code == *code)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        for (name, policy) in [
            ("default_policy", &self.executor.default_policy),
            ("ai_policy", &self.executor.ai_policy),
            ("store_policy", &self.executor.store_policy),
        ] {
            validate_policy(name, policy)?;
        }

        let breaker = &self.executor.breaker;
        if breaker.failure_threshold == 0 || breaker.success_threshold == 0 {
            anyhow::bail!("breaker thresholds must be greater than 0");
        }
        if breaker.reset_timeout_ms == 0 {
            anyhow::bail!("breaker reset_timeout_ms must be greater than 0");
        }

        self.governor
            .thresholds
            .validate()
            .map_err(anyhow::Error::msg)?;
        let (baseline, minimums) = (&self.governor.baseline, &self.governor.minimums);
        if minimums.max_concurrent_jobs < MIN_CONCURRENT_JOBS
            || minimums.max_queue_size < MIN_QUEUE_SIZE
            || minimums.api_rate_limit < MIN_API_RATE
        {
            anyhow::bail!(
                "governor minimums must be at least {MIN_CONCURRENT_JOBS} jobs, \
                 {MIN_QUEUE_SIZE} queued items and {MIN_API_RATE} calls per minute"
            );
        }
        if baseline.max_concurrent_jobs < minimums.max_concurrent_jobs
            || baseline.max_queue_size < minimums.max_queue_size
            || baseline.api_rate_limit < minimums.api_rate_limit
        {
            anyhow::bail!("governor baseline must not be below its minimums");
        }
        if !(0.0..=1.0).contains(&self.governor.floor_multiplier) {
            anyhow::bail!("governor floor_multiplier must be within 0.0..=1.0");
        }
        if self.governor.emergency_restore_level > 100 {
            anyhow::bail!("emergency_restore_level must be within 0..=100");
        }

        let planner = &self.planner;
        for (name, value) in [
            ("viral_threshold", planner.viral_threshold),
            ("auto_approve_score", planner.auto_approve_score),
            ("auto_approve_confidence", planner.auto_approve_confidence),
        ] {
            if !(0.0..=100.0).contains(&value) {
                anyhow::bail!("planner {name} must be within 0..=100");
            }
        }

        let weights = &self.scoring;
        let total = weights.content_weight
            + weights.trend_weight
            + weights.timing_weight
            + weights.audience_weight;
        if (total - 1.0).abs() > 1e-6 {
            anyhow::bail!("scoring weights must sum to 1.0 (got {total})");
        }

        if self.batch.max_batch_size == 0 || self.batch.chunk_size == 0 {
            anyhow::bail!("batch max_batch_size and chunk_size must be greater than 0");
        }
        if !(0.0..=1.0).contains(&self.batch.dedup_overlap) {
            anyhow::bail!("batch dedup_overlap must be within 0.0..=1.0");
        }

        let orchestrator = &self.orchestrator;
        if orchestrator.scheduling_interval_minutes == 0
            || orchestrator.trend_refresh_interval_minutes == 0
            || orchestrator.health_check_interval_minutes == 0
        {
            anyhow::bail!("orchestrator intervals must be greater than 0");
        }
        if orchestrator.maintenance_hour > 23 {
            anyhow::bail!("maintenance_hour must be within 0..=23");
        }

        if self.trends.top_k == 0 || self.trends.sample_size == 0 {
            anyhow::bail!("trend sample_size and top_k must be greater than 0");
        }

        if !matches!(self.logging.format.as_str(), "text" | "json") {
            anyhow::bail!("logging format must be 'text' or 'json'");
        }

        for webhook in &self.alerts.webhooks {
            if let Err(e) = webhook.validate() {
                anyhow::bail!("invalid webhook {}: {e}", webhook.url);
            }
        }

        self.validate_languages()
    }

    fn validate_languages(&self) -> Result<()> {
        if self.languages.is_empty() {
            anyhow::bail!("at least one language must be configured");
        }

        let mut seen = HashSet::new();
        for profile in &self.languages {
            let code = profile.code.as_str();
            if code.is_empty() {
                anyhow::bail!("language code must not be empty");
            }
            if !seen.insert(code) {
                anyhow::bail!("language {code} is configured twice");
            }
            if profile.peak_hours.is_empty() {
                anyhow::bail!("language {code} needs at least one peak hour");
            }
            if let Some(hour) = profile.peak_hours.iter().find(|h| **h > 23) {
                anyhow::bail!("language {code} has invalid peak hour {hour}");
            }
            if profile.utc_offset_minutes.abs() > 14 * 60 {
                anyhow::bail!("language {code} has an out-of-range utc offset");
            }
            if profile.max_concurrent_batches == 0 || profile.daily_limit == 0 {
                anyhow::bail!("language {code} limits must be greater than 0");
            }
        }
        Ok(())
    }
}

fn validate_policy(name: &str, policy: &RetryPolicy) -> Result<()> {
    if policy.initial_delay_ms > policy.max_delay_ms {
        anyhow::bail!("{name}: initial_delay_ms must not exceed max_delay_ms");
    }
    if policy.backoff_multiplier < 1.0 {
        anyhow::bail!("{name}: backoff_multiplier must be at least 1.0");
    }
    Ok(())
}
