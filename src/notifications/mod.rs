//! Performance alerts raised by the governance core
//!
//! The executor, governor and orchestrator raise [`PerformanceAlert`]s when a
//! threshold is crossed. Alerts are written once; repeated alerts for the same
//! key are suppressed for a cooldown window.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────┐
//! │      AlertManager (AlertSink)              │
//! │  - Cooldown deduplication per key          │
//! │  - Alert lifecycle management              │
//! │  - Bounded delivery queue                  │
//! └────────────────────────────────────────────┘
//!                     │ mpsc
//!                     ▼
//!          ┌──────────────────────┐
//!          │  delivery worker     │──▶ Executor ("alerts:<channel>")
//!          └──────────────────────┘
//!                     │
//!                     ▼
//!               ┌─────────┐
//!               │ Webhook │
//!               │ Channel │
//!               └─────────┘
//! ```
//!
//! Lifecycle: Active → Acknowledged → Resolved.

pub mod channels;
mod delivery;
mod manager;

pub use delivery::DELIVERY_SERVICE;

pub use manager::{AlertConfig, AlertManager};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Alert severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl AlertSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

impl fmt::Display for AlertSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Alert lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertStatus {
    Active,
    Acknowledged,
    Resolved,
}

impl AlertStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Acknowledged => "acknowledged",
            Self::Resolved => "resolved",
        }
    }
}

/// What crossed a threshold
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    CircuitBreakerOpen,
    FinalFailure,
    ManualIntervention,
    ThrottleLevel,
    EmergencyMode,
    CycleFailure,
    StuckJob,
    CapacityExceeded,
    DependencyDegraded,
    RecoveryAction,
}

impl AlertType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CircuitBreakerOpen => "circuit_breaker_open",
            Self::FinalFailure => "final_failure",
            Self::ManualIntervention => "manual_intervention",
            Self::ThrottleLevel => "throttle_level",
            Self::EmergencyMode => "emergency_mode",
            Self::CycleFailure => "cycle_failure",
            Self::StuckJob => "stuck_job",
            Self::CapacityExceeded => "capacity_exceeded",
            Self::DependencyDegraded => "dependency_degraded",
            Self::RecoveryAction => "recovery_action",
        }
    }
}

/// A threshold crossing worth telling an operator about
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceAlert {
    pub id: String,
    pub alert_type: AlertType,
    pub severity: AlertSeverity,
    pub status: AlertStatus,
    pub title: String,
    pub description: String,
    pub threshold: Option<f64>,
    pub current_value: Option<f64>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    /// Deduplication key; defaults to the alert type
    pub key: String,
    pub timestamp: DateTime<Utc>,
    pub acknowledged_at: Option<DateTime<Utc>>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl PerformanceAlert {
    pub fn new(
        alert_type: AlertType,
        severity: AlertSeverity,
        title: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            alert_type,
            severity,
            status: AlertStatus::Active,
            title: title.into(),
            description: description.into(),
            threshold: None,
            current_value: None,
            metadata: HashMap::new(),
            key: alert_type.as_str().to_string(),
            timestamp: Utc::now(),
            acknowledged_at: None,
            resolved_at: None,
        }
    }

    /// Scope deduplication to a more specific key (e.g. a breaker key)
    pub fn with_key(mut self, key: impl AsRef<str>) -> Self {
        self.key = Self::scoped_key(self.alert_type, key);
        self
    }

    /// Full deduplication key of an alert type scoped by `key`
    pub fn scoped_key(alert_type: AlertType, key: impl AsRef<str>) -> String {
        format!("{}:{}", alert_type.as_str(), key.as_ref())
    }

    pub fn with_threshold(mut self, threshold: f64, current_value: f64) -> Self {
        self.threshold = Some(threshold);
        self.current_value = Some(current_value);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.metadata.insert(key.into(), value.to_string());
        self
    }

    pub fn is_active(&self) -> bool {
        self.status != AlertStatus::Resolved
    }

    pub fn acknowledge(&mut self) {
        if self.status == AlertStatus::Active {
            self.status = AlertStatus::Acknowledged;
            self.acknowledged_at = Some(Utc::now());
        }
    }

    pub fn resolve(&mut self) {
        self.status = AlertStatus::Resolved;
        self.resolved_at = Some(Utc::now());
    }
}

impl fmt::Display for PerformanceAlert {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.severity, self.title, self.description)
    }
}

/// Destination for alerts raised by the core
#[async_trait]
pub trait AlertSink: Send + Sync {
    /// Record an alert; returns `false` when suppressed by the cooldown
    async fn raise_alert(&self, alert: PerformanceAlert) -> bool;

    /// Resolve open alerts scoped to `scope` (e.g. a breaker key) once the
    /// condition behind them has cleared; returns how many changed
    async fn resolve_scope(&self, _scope: &str) -> usize {
        0
    }

    /// Alerts that are not resolved yet, newest first
    async fn list_active_alerts(&self) -> Vec<PerformanceAlert>;
}
