//! Alert manager: cooldown deduplication, lifecycle and queued delivery

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;

use super::channels::webhook::{WebhookChannel, WebhookConfig};
use super::channels::{Channel, ChannelResult};
use super::delivery::{self, DELIVERY_QUEUE_SIZE};
use super::{AlertSeverity, AlertSink, AlertType, PerformanceAlert};
use crate::executor::Executor;

/// Alerting configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertConfig {
    /// Minimum time between two alerts with the same key (minutes)
    pub cooldown_minutes: i64,

    /// Alerts older than this are dropped by maintenance (hours)
    pub retention_hours: i64,

    /// Webhook endpoints that receive every alert
    pub webhooks: Vec<WebhookConfig>,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            cooldown_minutes: 30,
            retention_hours: 72,
            webhooks: Vec::new(),
        }
    }
}

#[derive(Default)]
struct AlertState {
    alerts: HashMap<String, PerformanceAlert>,
    last_raised: HashMap<String, DateTime<Utc>>,
}

/// Alert manager that deduplicates alerts and queues them for its channels
pub struct AlertManager {
    channels: Vec<Arc<dyn Channel>>,
    outbox: OnceLock<mpsc::Sender<PerformanceAlert>>,
    state: RwLock<AlertState>,
    cooldown: Duration,
}

impl Default for AlertManager {
    fn default() -> Self {
        Self::new()
    }
}

impl AlertManager {
    /// Create a manager with the default 30 minute cooldown and no channels
    pub fn new() -> Self {
        Self {
            channels: Vec::new(),
            outbox: OnceLock::new(),
            state: RwLock::new(AlertState::default()),
            cooldown: Duration::minutes(30),
        }
    }

    /// Build a manager and its webhook channels from configuration
    pub fn from_config(config: &AlertConfig) -> ChannelResult<Self> {
        let mut manager = Self::new().with_cooldown(Duration::minutes(config.cooldown_minutes));
        for webhook in &config.webhooks {
            manager.add_channel(Arc::new(WebhookChannel::new(webhook.clone())?));
        }
        Ok(manager)
    }

    /// Set the deduplication cooldown
    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }

    /// Add a notification channel; takes effect for deliveries started later
    pub fn add_channel(&mut self, channel: Arc<dyn Channel>) {
        self.channels.push(channel);
    }

    /// Spawn the delivery worker
    ///
    /// Returns `None` when there is no channel to deliver to or a worker is
    /// already running. Until a worker runs, alerts are only recorded.
    pub fn start_delivery(&self, executor: Arc<Executor>) -> Option<JoinHandle<()>> {
        if self.channels.is_empty() {
            return None;
        }
        let (tx, rx) = mpsc::channel(DELIVERY_QUEUE_SIZE);
        self.outbox.set(tx).ok()?;
        tracing::info!(channels = self.channels.len(), "Alert delivery started");
        Some(tokio::spawn(delivery::run(self.channels.clone(), executor, rx)))
    }

    fn enqueue_delivery(&self, alert: &PerformanceAlert) {
        let Some(outbox) = self.outbox.get() else {
            return;
        };
        if let Err(e) = outbox.try_send(alert.clone()) {
            tracing::warn!(alert_id = %alert.id, error = %e, "Alert delivery queue unavailable, alert not delivered");
        }
    }

    fn in_cooldown(&self, state: &AlertState, key: &str, now: DateTime<Utc>) -> bool {
        state
            .last_raised
            .get(key)
            .is_some_and(|&last| now - last < self.cooldown)
    }

    /// Acknowledge an alert by id
    pub async fn acknowledge(&self, alert_id: &str) -> bool {
        let mut state = self.state.write().await;
        match state.alerts.get_mut(alert_id) {
            Some(alert) => {
                alert.acknowledge();
                true
            }
            None => false,
        }
    }

    /// Resolve an alert by id
    pub async fn resolve(&self, alert_id: &str) -> bool {
        let mut state = self.state.write().await;
        match state.alerts.get_mut(alert_id) {
            Some(alert) => {
                alert.resolve();
                true
            }
            None => false,
        }
    }

    /// Resolve every open alert matching `matches`; returns how many changed
    async fn resolve_matching(&self, matches: impl Fn(&PerformanceAlert) -> bool) -> usize {
        // read first; most calls find nothing to resolve
        if !self
            .state
            .read()
            .await
            .alerts
            .values()
            .any(|a| a.is_active() && matches(a))
        {
            return 0;
        }

        let mut state = self.state.write().await;
        let mut resolved = 0;
        for alert in state.alerts.values_mut() {
            if alert.is_active() && matches(alert) {
                alert.resolve();
                resolved += 1;
            }
        }
        if resolved > 0 {
            tracing::info!(resolved, "Alerts resolved, condition cleared");
        }
        resolved
    }

    /// Resolve every open alert with the given full key
    pub async fn resolve_key(&self, key: &str) -> usize {
        self.resolve_matching(|a| a.key == key).await
    }

    /// Resolve open alerts of `alert_type` whose key is not in `still_true`
    pub async fn resolve_type_except(&self, alert_type: AlertType, still_true: &HashSet<String>) -> usize {
        self.resolve_matching(|a| a.alert_type == alert_type && !still_true.contains(&a.key))
            .await
    }

    /// Drop alerts raised before `older_than` and stale cooldown entries
    ///
    /// Unresolved alerts go too; a condition that still holds is raised again
    /// by the next check.
    pub async fn cleanup(&self, older_than: DateTime<Utc>) -> usize {
        let mut state = self.state.write().await;
        let initial = state.alerts.len();
        state.alerts.retain(|_, a| a.timestamp >= older_than);
        state.last_raised.retain(|_, at| *at >= older_than);
        initial - state.alerts.len()
    }

    /// All known alerts, newest first
    pub async fn all_alerts(&self) -> Vec<PerformanceAlert> {
        let state = self.state.read().await;
        let mut alerts: Vec<_> = state.alerts.values().cloned().collect();
        alerts.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        alerts
    }

    /// Count of unresolved alerts per severity
    pub async fn active_counts(&self) -> HashMap<AlertSeverity, usize> {
        let state = self.state.read().await;
        let mut counts = HashMap::new();
        for alert in state.alerts.values().filter(|a| a.is_active()) {
            *counts.entry(alert.severity).or_insert(0) += 1;
        }
        counts
    }
}

#[async_trait]
impl AlertSink for AlertManager {
    async fn raise_alert(&self, alert: PerformanceAlert) -> bool {
        let now = Utc::now();
        {
            let mut state = self.state.write().await;
            if self.in_cooldown(&state, &alert.key, now) {
                tracing::debug!(key = %alert.key, "Alert suppressed by cooldown");
                return false;
            }
            state.last_raised.insert(alert.key.clone(), now);
            state.alerts.insert(alert.id.clone(), alert.clone());
        }

        match alert.severity {
            AlertSeverity::Critical | AlertSeverity::High => tracing::error!(
                alert_type = alert.alert_type.as_str(),
                severity = alert.severity.as_str(),
                key = %alert.key,
                "{}: {}",
                alert.title,
                alert.description
            ),
            _ => tracing::warn!(
                alert_type = alert.alert_type.as_str(),
                severity = alert.severity.as_str(),
                key = %alert.key,
                "{}: {}",
                alert.title,
                alert.description
            ),
        }
        crate::metrics::record_alert(alert.severity.as_str());

        self.enqueue_delivery(&alert);
        true
    }

    async fn resolve_scope(&self, scope: &str) -> usize {
        let suffix = format!(":{scope}");
        self.resolve_matching(|a| a.key.ends_with(&suffix)).await
    }

    async fn list_active_alerts(&self) -> Vec<PerformanceAlert> {
        let state = self.state.read().await;
        let mut alerts: Vec<_> = state
            .alerts
            .values()
            .filter(|a| a.is_active())
            .cloned()
            .collect();
        alerts.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        alerts
    }
}
