//! Failure log and auto-recovery pattern analysis
//!
//! Every failed attempt is appended to the [`ErrorLog`] before the executor
//! decides whether to retry. The [`RecoveryAnalyzer`] scans the log for
//! repeated transient error codes and proposes one recovery action per code
//! per analysis pass.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tokio::sync::{Mutex, RwLock};

use crate::error::ErrorCategory;

/// One failed attempt
#[derive(Debug, Clone, Serialize)]
pub struct ErrorRecord {
    pub operation_id: String,
    pub service: String,
    pub endpoint: String,
    pub job_id: Option<String>,
    pub attempt: u32,
    pub code: &'static str,
    pub category: ErrorCategory,
    pub message: String,
    pub at: DateTime<Utc>,
}

/// Bounded in-memory failure history
pub struct ErrorLog {
    records: RwLock<VecDeque<ErrorRecord>>,
    capacity: usize,
}

impl ErrorLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            records: RwLock::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity: capacity.max(1),
        }
    }

    pub async fn record(&self, record: ErrorRecord) {
        let mut records = self.records.write().await;
        if records.len() >= self.capacity {
            records.pop_front();
        }
        records.push_back(record);
    }

    /// Failures at or after `since`
    pub async fn since(&self, since: DateTime<Utc>) -> Vec<ErrorRecord> {
        self.records
            .read()
            .await
            .iter()
            .filter(|r| r.at >= since)
            .cloned()
            .collect()
    }

    /// Count of retryable failures at or after `since`
    pub async fn count_retryable_since(&self, since: DateTime<Utc>) -> usize {
        self.records
            .read()
            .await
            .iter()
            .filter(|r| r.at >= since && r.category.is_retryable())
            .count()
    }

    /// Drop records older than `before`
    pub async fn prune(&self, before: DateTime<Utc>) -> usize {
        let mut records = self.records.write().await;
        let initial = records.len();
        records.retain(|r| r.at >= before);
        initial - records.len()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

/// Automatic response to a repeated transient failure
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum RecoveryAction {
    /// Timeouts: pause dispatch briefly and requeue failed batches
    DelayAndRequeue { occurrences: usize },
    /// Rate limits: lower the API call budget
    ReduceRate { occurrences: usize },
    /// Unavailability: switch AI-backed factors to heuristics for a while
    EnableFallback { occurrences: usize },
}

impl RecoveryAction {
    fn for_code(code: &str, occurrences: usize) -> Option<Self> {
        match code {
            "timeout" => Some(Self::DelayAndRequeue { occurrences }),
            "rate_limited" => Some(Self::ReduceRate { occurrences }),
            "unavailable" => Some(Self::EnableFallback { occurrences }),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::DelayAndRequeue { .. } => "delay_and_requeue",
            Self::ReduceRate { .. } => "reduce_rate",
            Self::EnableFallback { .. } => "enable_fallback",
        }
    }
}

/// Detects repeated error codes inside a rolling window
pub struct RecoveryAnalyzer {
    window: Duration,
    min_occurrences: usize,
    /// Last trigger time per code; earlier occurrences are not counted again
    watermarks: Mutex<HashMap<&'static str, DateTime<Utc>>>,
}

impl RecoveryAnalyzer {
    pub fn new(window: Duration, min_occurrences: usize) -> Self {
        Self {
            window,
            min_occurrences: min_occurrences.max(1),
            watermarks: Mutex::new(HashMap::new()),
        }
    }

    /// One analysis pass over the log
    pub async fn analyze(&self, log: &ErrorLog, now: DateTime<Utc>) -> Vec<RecoveryAction> {
        let window_start = now - self.window;
        let records = log.since(window_start).await;
        let mut watermarks = self.watermarks.lock().await;

        let mut counts: HashMap<&'static str, usize> = HashMap::new();
        for record in &records {
            let after_watermark = watermarks
                .get(record.code)
                .map_or(true, |mark| record.at > *mark);
            if after_watermark {
                *counts.entry(record.code).or_insert(0) += 1;
            }
        }

        let mut codes: Vec<_> = counts
            .into_iter()
            .filter(|(_, n)| *n >= self.min_occurrences)
            .collect();
        codes.sort_by_key(|(code, _)| *code);

        let mut actions = Vec::new();
        for (code, occurrences) in codes {
            if let Some(action) = RecoveryAction::for_code(code, occurrences) {
                tracing::info!(code, occurrences, action = action.name(), "Failure pattern detected");
                watermarks.insert(code, now);
                actions.push(action);
            }
        }
        actions
    }
}
