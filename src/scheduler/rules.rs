//! Scheduling rule overrides
//!
//! Operators can replace a language's peak hours and/or shift the computed
//! publish time for a period. The newest active rule for a language wins;
//! rules without a language apply to every language.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use super::error::{SchedulerError, SchedulerResult};
use crate::models::Language;

/// Request to override publish timing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleRequest {
    /// Target language; `None` applies to all
    pub language: Option<Language>,

    /// Replacement peak hours (local time)
    #[serde(default)]
    pub peak_hours: Option<Vec<u32>>,

    /// Minutes added to the computed publish time
    #[serde(default)]
    pub shift_minutes: i64,

    /// Reason for the override
    pub reason: String,

    /// When the rule stops applying
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

/// An applied scheduling rule
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulingRule {
    pub id: String,
    pub request: RuleRequest,
    pub created_at: DateTime<Utc>,
    pub active: bool,
}

impl SchedulingRule {
    pub fn applies_to(&self, language: &Language, now: DateTime<Utc>) -> bool {
        self.active
            && self.request.expires_at.map_or(true, |e| e > now)
            && self
                .request
                .language
                .as_ref()
                .map_or(true, |l| l == language)
    }

    pub fn shift(&self) -> Duration {
        Duration::minutes(self.request.shift_minutes)
    }
}

/// Scheduling rule manager
#[derive(Default)]
pub struct RuleManager {
    rules: RwLock<Vec<SchedulingRule>>,
}

impl RuleManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a rule
    pub async fn apply(&self, request: RuleRequest) -> SchedulerResult<SchedulingRule> {
        if let Some(hours) = &request.peak_hours {
            if hours.is_empty() {
                return Err(SchedulerError::InvalidRule {
                    field: "peak_hours".to_string(),
                    reason: "must not be empty".to_string(),
                });
            }
            if let Some(hour) = hours.iter().find(|h| **h > 23) {
                return Err(SchedulerError::invalid_hour(*hour));
            }
        }
        if request.shift_minutes.abs() > 24 * 60 {
            return Err(SchedulerError::InvalidRule {
                field: "shift_minutes".to_string(),
                reason: "must be within one day".to_string(),
            });
        }

        let rule = SchedulingRule {
            id: uuid::Uuid::new_v4().to_string(),
            request,
            created_at: Utc::now(),
            active: true,
        };
        self.rules.write().await.push(rule.clone());

        tracing::info!(
            rule_id = %rule.id,
            language = ?rule.request.language,
            shift_minutes = rule.request.shift_minutes,
            "Scheduling rule applied: {}",
            rule.request.reason
        );
        Ok(rule)
    }

    /// Cancel a rule
    pub async fn cancel(&self, id: &str) -> SchedulerResult<()> {
        let mut rules = self.rules.write().await;
        match rules.iter_mut().find(|r| r.id == id) {
            Some(rule) => {
                rule.active = false;
                Ok(())
            }
            None => Err(SchedulerError::RuleNotFound { id: id.to_string() }),
        }
    }

    /// Rules currently in force
    pub async fn active_rules(&self, now: DateTime<Utc>) -> Vec<SchedulingRule> {
        self.rules
            .read()
            .await
            .iter()
            .filter(|r| r.active && r.request.expires_at.map_or(true, |e| e > now))
            .cloned()
            .collect()
    }

    /// Newest rule in force for a language
    pub async fn rule_for(&self, language: &Language, now: DateTime<Utc>) -> Option<SchedulingRule> {
        self.rules
            .read()
            .await
            .iter()
            .filter(|r| r.applies_to(language, now))
            .max_by_key(|r| r.created_at)
            .cloned()
    }

    /// Drop expired and cancelled rules; returns how many were removed
    pub async fn clear_expired(&self, now: DateTime<Utc>) -> usize {
        let mut rules = self.rules.write().await;
        let before = rules.len();
        rules.retain(|r| r.active && r.request.expires_at.map_or(true, |e| e > now));
        before - rules.len()
    }
}
