//! Health assessment for the orchestrator
//!
//! [`HealthReport`] is a read-only snapshot; the health cycle builds one and
//! raises alerts from it, the ops surface serves it as-is.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use super::OrchestratorStatus;
use crate::models::WorkItem;

// ============================================================================
// Health Status Types
// ============================================================================

/// Overall health status
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Degraded => "degraded",
            HealthStatus::Unhealthy => "unhealthy",
        }
    }
}

/// One checked component
#[derive(Debug, Clone, Serialize)]
pub struct ComponentHealth {
    pub name: String,
    pub status: HealthStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ComponentHealth {
    pub fn healthy(name: &str, message: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            status: HealthStatus::Healthy,
            message: Some(message.into()),
        }
    }

    pub fn degraded(name: &str, message: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            status: HealthStatus::Degraded,
            message: Some(message.into()),
        }
    }

    pub fn unhealthy(name: &str, message: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            status: HealthStatus::Unhealthy,
            message: Some(message.into()),
        }
    }
}

/// A production job running past the stuck threshold
#[derive(Debug, Clone, Serialize)]
pub struct StuckJob {
    pub work_item_id: String,
    pub content_id: String,
    pub language: String,
    pub running_minutes: i64,
}

/// Health snapshot
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub orchestrator: OrchestratorStatus,
    pub version: String,
    pub active_jobs: usize,
    pub max_active_jobs: usize,
    pub stuck_jobs: Vec<StuckJob>,
    pub open_breakers: Vec<String>,
    pub throttle_level: u8,
    pub emergency: bool,
    pub checks: Vec<ComponentHealth>,
    pub checked_at: DateTime<Utc>,
}

impl HealthReport {
    /// Worst status among the checks
    pub fn from_checks(
        checks: Vec<ComponentHealth>,
        orchestrator: OrchestratorStatus,
        checked_at: DateTime<Utc>,
    ) -> Self {
        let status = checks
            .iter()
            .map(|c| c.status)
            .max()
            .unwrap_or(HealthStatus::Healthy);
        Self {
            status,
            orchestrator,
            version: env!("CARGO_PKG_VERSION").to_string(),
            active_jobs: 0,
            max_active_jobs: 0,
            stuck_jobs: Vec::new(),
            open_breakers: Vec::new(),
            throttle_level: 0,
            emergency: false,
            checks,
            checked_at,
        }
    }
}

/// Running jobs started more than `threshold` before `now`
pub fn find_stuck_jobs(running: &[WorkItem], now: DateTime<Utc>, threshold: Duration) -> Vec<StuckJob> {
    running
        .iter()
        .filter_map(|item| {
            let started = item.started_at?;
            let elapsed = now - started;
            (elapsed > threshold).then(|| StuckJob {
                work_item_id: item.id.clone(),
                content_id: item.content_id.clone(),
                language: item.language.to_string(),
                running_minutes: elapsed.num_minutes(),
            })
        })
        .collect()
}

/// Active jobs against the ceiling
pub fn capacity_check(active_jobs: usize, max_active_jobs: usize) -> ComponentHealth {
    let message = format!("{active_jobs}/{max_active_jobs} active jobs");
    if active_jobs > max_active_jobs {
        ComponentHealth::degraded("capacity", message)
    } else {
        ComponentHealth::healthy("capacity", message)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Language, WorkItemKind, WorkItemStatus};

    fn running(id: &str, started_minutes_ago: Option<i64>, now: DateTime<Utc>) -> WorkItem {
        WorkItem {
            id: id.to_string(),
            kind: WorkItemKind::Production,
            content_id: format!("content-{id}"),
            language: Language::new("en"),
            status: WorkItemStatus::Running,
            payload: serde_json::Value::Null,
            error: None,
            created_at: now,
            updated_at: now,
            started_at: started_minutes_ago.map(|m| now - Duration::minutes(m)),
        }
    }

    #[test]
    fn test_stuck_jobs_over_threshold() {
        let now = Utc::now();
        let items = vec![
            running("a", Some(30), now),
            running("b", Some(150), now),
            running("c", None, now),
        ];
        let stuck = find_stuck_jobs(&items, now, Duration::hours(2));
        assert_eq!(stuck.len(), 1);
        assert_eq!(stuck[0].work_item_id, "b");
        assert_eq!(stuck[0].running_minutes, 150);
    }

    #[test]
    fn test_worst_check_wins() {
        let report = HealthReport::from_checks(
            vec![
                ComponentHealth::healthy("store", "ok"),
                capacity_check(25, 20),
            ],
            OrchestratorStatus::Running,
            Utc::now(),
        );
        assert_eq!(report.status, HealthStatus::Degraded);

        let report = HealthReport::from_checks(
            vec![ComponentHealth::unhealthy("store", "down"), capacity_check(1, 20)],
            OrchestratorStatus::Running,
            Utc::now(),
        );
        assert_eq!(report.status, HealthStatus::Unhealthy);
        assert_eq!(report.status.as_str(), "unhealthy");
    }
}
