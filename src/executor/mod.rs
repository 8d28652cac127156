//! Retry/circuit-breaker executor
//!
//! Every network-bound or resource-bound operation in the crate runs through
//! [`Executor::execute_with_retry`]. The executor owns the circuit breaker
//! state for each `service:endpoint` key, the failure log, and the recovery
//! analyzer that looks for repeated failure patterns.
//!
//! ```rust,ignore
//! let ctx = OperationContext::new("ai", "complete").with_policy(RetryPolicy::ai_service());
//! let text = executor
//!     .execute_with_retry(&ctx, || async { generator.complete(&prompt).await.map_err(Into::into) })
//!     .await?;
//! ```

mod breaker;
mod error;
mod recovery;
mod retry;

pub use breaker::{BreakerConfig, CircuitBreakerState};
pub use error::ExecutorError;
pub use recovery::{ErrorLog, ErrorRecord, RecoveryAction, RecoveryAnalyzer};
pub use retry::RetryPolicy;

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::error::{Error, ErrorCategory, PolycastErrorTrait};
use crate::notifications::{AlertSeverity, AlertSink, AlertType, PerformanceAlert};

/// Executor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    pub breaker: BreakerConfig,

    /// Policy for operations that do not pick a preset
    pub default_policy: RetryPolicy,

    /// Policy for AI collaborator calls
    pub ai_policy: RetryPolicy,

    /// Policy for content store calls
    pub store_policy: RetryPolicy,

    /// Maximum failure records kept in memory
    pub error_log_capacity: usize,

    /// Rolling window for failure pattern analysis (seconds)
    pub recovery_window_secs: i64,

    /// Occurrences of one code inside the window that trigger recovery
    pub recovery_min_occurrences: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            breaker: BreakerConfig::default(),
            default_policy: RetryPolicy::default(),
            ai_policy: RetryPolicy::ai_service(),
            store_policy: RetryPolicy::store(),
            error_log_capacity: 1000,
            recovery_window_secs: 900,
            recovery_min_occurrences: 3,
        }
    }
}

/// Identity and retry settings of one logical operation
#[derive(Debug, Clone)]
pub struct OperationContext {
    pub operation_id: String,
    pub service: String,
    pub endpoint: String,
    pub job_id: Option<String>,
    pub policy: RetryPolicy,
}

impl OperationContext {
    pub fn new(service: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            operation_id: uuid::Uuid::new_v4().to_string(),
            service: service.into(),
            endpoint: endpoint.into(),
            job_id: None,
            policy: RetryPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_job_id(mut self, job_id: impl Into<String>) -> Self {
        self.job_id = Some(job_id.into());
        self
    }

    pub fn with_operation_id(mut self, operation_id: impl Into<String>) -> Self {
        self.operation_id = operation_id.into();
        self
    }

    /// Key of the circuit breaker guarding this operation
    pub fn breaker_key(&self) -> String {
        breaker_key(&self.service, &self.endpoint)
    }
}

pub fn breaker_key(service: &str, endpoint: &str) -> String {
    format!("{service}:{endpoint}")
}

/// Runs fallible operations with backoff, circuit breaking and failure logging
pub struct Executor {
    breakers: RwLock<HashMap<String, CircuitBreakerState>>,
    config: ExecutorConfig,
    error_log: ErrorLog,
    recovery: RecoveryAnalyzer,
    alerts: Arc<dyn AlertSink>,
}

impl Executor {
    pub fn new(config: ExecutorConfig, alerts: Arc<dyn AlertSink>) -> Self {
        let recovery = RecoveryAnalyzer::new(
            chrono::Duration::seconds(config.recovery_window_secs),
            config.recovery_min_occurrences,
        );
        Self {
            breakers: RwLock::new(HashMap::new()),
            error_log: ErrorLog::new(config.error_log_capacity),
            recovery,
            config,
            alerts,
        }
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Context preconfigured with the AI collaborator policy
    pub fn ai_context(&self, endpoint: &str) -> OperationContext {
        OperationContext::new("ai", endpoint).with_policy(self.config.ai_policy.clone())
    }

    /// Context preconfigured with the content store policy
    pub fn store_context(&self, endpoint: &str) -> OperationContext {
        OperationContext::new("store", endpoint).with_policy(self.config.store_policy.clone())
    }

    /// Execute an operation with retry, backoff and circuit breaking
    ///
    /// Attempts the operation once plus up to `policy.max_retries` times.
    /// Permanent failures are never retried and raise a critical alert;
    /// other non-retryable categories are returned to the caller as-is.
    pub async fn execute_with_retry<T, F, Fut>(
        &self,
        ctx: &OperationContext,
        mut operation: F,
    ) -> Result<T, ExecutorError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, Error>>,
    {
        let policy = &ctx.policy;
        let key = ctx.breaker_key();
        let max_attempts = policy.total_attempts();
        let mut last_error: Option<Error> = None;

        for attempt in 1..=max_attempts {
            // also catches a breaker that opened while we were backing off
            if policy.circuit_breaker_enabled {
                self.check_breaker(&key).await?;
            }

            match operation().await {
                Ok(value) => {
                    if policy.circuit_breaker_enabled {
                        self.record_success(&key).await;
                    }
                    // breaker, failure and degradation alerts for the key
                    self.alerts.resolve_scope(&key).await;
                    if attempt > 1 {
                        info!(
                            operation_id = %ctx.operation_id,
                            service = %ctx.service,
                            attempt = attempt,
                            job_id = ?ctx.job_id,
                            "Operation recovered after retry"
                        );
                    }
                    return Ok(value);
                }
                Err(err) => {
                    self.log_failure(ctx, attempt, max_attempts, &err).await;
                    if policy.circuit_breaker_enabled {
                        self.record_failure(ctx, &key).await;
                    }

                    let category = err.category();
                    if category == ErrorCategory::Permanent {
                        self.raise_manual_intervention(ctx, &err).await;
                        return Err(ExecutorError::Permanent {
                            operation_id: ctx.operation_id.clone(),
                            source: Box::new(err),
                        });
                    }
                    if !category.is_retryable() {
                        return Err(ExecutorError::NotRetried {
                            operation_id: ctx.operation_id.clone(),
                            category,
                            source: Box::new(err),
                        });
                    }

                    last_error = Some(err);

                    if attempt < max_attempts {
                        let delay = policy.delay_with_jitter(attempt);
                        debug!(
                            operation_id = %ctx.operation_id,
                            attempt = attempt,
                            delay_ms = delay.as_millis() as u64,
                            "Retrying operation after delay"
                        );
                        crate::metrics::record_retry(&ctx.service);
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }

        let source =
            last_error.unwrap_or_else(|| Error::other("operation failed with no error details"));
        error!(
            operation_id = %ctx.operation_id,
            service = %ctx.service,
            endpoint = %ctx.endpoint,
            attempts = max_attempts,
            job_id = ?ctx.job_id,
            error = %source,
            "Operation failed after exhausting retries"
        );
        crate::metrics::record_final_failure(&ctx.service);

        self.alerts
            .raise_alert(
                PerformanceAlert::new(
                    AlertType::FinalFailure,
                    AlertSeverity::Critical,
                    format!("Operation failed: {}", ctx.breaker_key()),
                    format!("Gave up after {max_attempts} attempts: {source}"),
                )
                .with_key(&key)
                .with_threshold(f64::from(max_attempts), f64::from(max_attempts))
                .with_metadata("operation_id", &ctx.operation_id)
                .with_metadata("error_code", source.code()),
            )
            .await;

        Err(ExecutorError::FinalFailure {
            operation_id: ctx.operation_id.clone(),
            attempts: max_attempts,
            source: Box::new(source),
        })
    }

    async fn check_breaker(&self, key: &str) -> Result<(), ExecutorError> {
        let mut breakers = self.breakers.write().await;
        let Some(state) = breakers.get_mut(key) else {
            return Ok(());
        };

        match state.check(Instant::now()) {
            Ok(half_opened) => {
                if half_opened {
                    info!(key, "Circuit breaker half-open, allowing a trial call");
                }
                Ok(())
            }
            Err(remaining) => Err(ExecutorError::CircuitOpen {
                key: key.to_string(),
                retry_after_ms: remaining.as_millis() as u64,
            }),
        }
    }

    async fn record_success(&self, key: &str) {
        let mut breakers = self.breakers.write().await;
        let state = breakers
            .entry(key.to_string())
            .or_insert_with(|| CircuitBreakerState::new(self.config.breaker.reset_timeout_ms));
        if state.record_success(self.config.breaker.success_threshold) {
            info!(key, "Circuit breaker closed");
        }
    }

    async fn record_failure(&self, ctx: &OperationContext, key: &str) {
        let (opened, failure_count) = {
            let mut breakers = self.breakers.write().await;
            let state = breakers
                .entry(key.to_string())
                .or_insert_with(|| CircuitBreakerState::new(self.config.breaker.reset_timeout_ms));
            let opened = state.record_failure(Instant::now(), self.config.breaker.failure_threshold);
            (opened, state.failure_count)
        };

        if !opened {
            return;
        }

        warn!(key, failure_count, "Circuit breaker opened");
        crate::metrics::record_breaker_opened(key);
        self.alerts
            .raise_alert(
                PerformanceAlert::new(
                    AlertType::CircuitBreakerOpen,
                    AlertSeverity::High,
                    format!("Circuit breaker opened: {key}"),
                    format!(
                        "{failure_count} failures; calls rejected for {}ms",
                        self.config.breaker.reset_timeout_ms
                    ),
                )
                .with_key(key)
                .with_threshold(
                    f64::from(self.config.breaker.failure_threshold),
                    f64::from(failure_count),
                )
                .with_metadata("service", &ctx.service)
                .with_metadata("endpoint", &ctx.endpoint),
            )
            .await;
    }

    async fn log_failure(&self, ctx: &OperationContext, attempt: u32, max_attempts: u32, err: &Error) {
        warn!(
            operation_id = %ctx.operation_id,
            service = %ctx.service,
            endpoint = %ctx.endpoint,
            attempt = attempt,
            max_attempts = max_attempts,
            job_id = ?ctx.job_id,
            code = err.code(),
            error = %err,
            "Operation attempt failed"
        );

        // nested executors would count the same failure twice
        if err.executor_failure().is_some() {
            return;
        }

        self.error_log
            .record(ErrorRecord {
                operation_id: ctx.operation_id.clone(),
                service: ctx.service.clone(),
                endpoint: ctx.endpoint.clone(),
                job_id: ctx.job_id.clone(),
                attempt,
                code: err.code(),
                category: err.category(),
                message: err.to_string(),
                at: Utc::now(),
            })
            .await;
    }

    async fn raise_manual_intervention(&self, ctx: &OperationContext, err: &Error) {
        error!(
            operation_id = %ctx.operation_id,
            service = %ctx.service,
            job_id = ?ctx.job_id,
            error = %err,
            "Permanent failure, manual intervention required"
        );
        self.alerts
            .raise_alert(
                PerformanceAlert::new(
                    AlertType::ManualIntervention,
                    AlertSeverity::Critical,
                    format!("Manual intervention required: {}", ctx.breaker_key()),
                    err.to_string(),
                )
                .with_key(ctx.breaker_key())
                .with_metadata("operation_id", &ctx.operation_id)
                .with_metadata("error_code", err.code()),
            )
            .await;
    }

    // ========================================================================
    // Introspection
    // ========================================================================

    pub async fn breaker_state(&self, key: &str) -> Option<CircuitBreakerState> {
        self.breakers.read().await.get(key).cloned()
    }

    /// All breakers, sorted by key
    pub async fn breaker_states(&self) -> Vec<(String, CircuitBreakerState)> {
        let breakers = self.breakers.read().await;
        let mut states: Vec<_> = breakers
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        states.sort_by(|a, b| a.0.cmp(&b.0));
        states
    }

    /// Whether calls for the key are currently rejected
    pub async fn is_circuit_open(&self, key: &str) -> bool {
        self.breakers
            .read()
            .await
            .get(key)
            .is_some_and(|s| s.is_rejecting(Instant::now()))
    }

    /// Keys whose breakers are currently rejecting calls
    pub async fn open_breakers(&self) -> Vec<String> {
        let now = Instant::now();
        let breakers = self.breakers.read().await;
        let mut keys: Vec<_> = breakers
            .iter()
            .filter(|(_, s)| s.is_rejecting(now))
            .map(|(k, _)| k.clone())
            .collect();
        keys.sort();
        keys
    }

    pub async fn reset_breaker(&self, key: &str) -> bool {
        let removed = self.breakers.write().await.remove(key).is_some();
        if removed {
            info!(key, "Circuit breaker reset manually");
        }
        removed
    }

    /// Retryable failures recorded within `window`
    pub async fn recent_failures(&self, window: chrono::Duration) -> usize {
        self.error_log
            .count_retryable_since(Utc::now() - window)
            .await
    }

    pub fn error_log(&self) -> &ErrorLog {
        &self.error_log
    }

    pub async fn prune_error_log(&self, before: chrono::DateTime<Utc>) -> usize {
        self.error_log.prune(before).await
    }

    /// One pass of failure pattern analysis
    pub async fn analyze_failures(&self) -> Vec<RecoveryAction> {
        self.recovery.analyze(&self.error_log, Utc::now()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::LlmError;
    use crate::notifications::AlertManager;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn executor(breaker: BreakerConfig) -> (Executor, Arc<AlertManager>) {
        let alerts = Arc::new(AlertManager::new());
        let config = ExecutorConfig {
            breaker,
            ..Default::default()
        };
        (Executor::new(config, alerts.clone()), alerts)
    }

    fn fast_policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy::default()
            .with_max_retries(max_retries)
            .with_delays(10, 100)
            .with_jitter(0)
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_after_transient_failures() {
        let (executor, _) = executor(BreakerConfig::default());
        let attempts = Arc::new(AtomicU32::new(0));
        let ctx = OperationContext::new("ai", "complete").with_policy(fast_policy(3));

        let counter = attempts.clone();
        let result = executor
            .execute_with_retry(&ctx, || {
                let counter = counter.clone();
                async move {
                    let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                    if n < 3 {
                        Err(LlmError::Timeout("slow".into()).into())
                    } else {
                        Ok(n)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 3);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        // failure history survives the eventual success
        assert_eq!(executor.error_log().len().await, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_final_failure_after_exhaustion() {
        let (executor, alerts) = executor(BreakerConfig::default());
        let attempts = Arc::new(AtomicU32::new(0));
        let ctx = OperationContext::new("ai", "complete").with_policy(fast_policy(2));

        let counter = attempts.clone();
        let result: Result<(), _> = executor
            .execute_with_retry(&ctx, || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(LlmError::Unavailable("down".into()).into())
                }
            })
            .await;

        match result {
            Err(ExecutorError::FinalFailure { attempts: n, .. }) => assert_eq!(n, 3),
            other => panic!("unexpected result: {other:?}"),
        }
        assert_eq!(attempts.load(Ordering::SeqCst), 3);

        let active = alerts.list_active_alerts().await;
        assert!(active
            .iter()
            .any(|a| a.alert_type == AlertType::FinalFailure && a.severity == AlertSeverity::Critical));
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_error_not_retried() {
        let (executor, alerts) = executor(BreakerConfig::default());
        let attempts = Arc::new(AtomicU32::new(0));
        let ctx = OperationContext::new("ai", "complete").with_policy(fast_policy(5));

        let counter = attempts.clone();
        let result: Result<(), _> = executor
            .execute_with_retry(&ctx, || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(LlmError::Unauthorized("bad token".into()).into())
                }
            })
            .await;

        assert!(matches!(result, Err(ExecutorError::Permanent { .. })));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        let active = alerts.list_active_alerts().await;
        assert_eq!(active[0].alert_type, AlertType::ManualIntervention);
    }

    #[tokio::test(start_paused = true)]
    async fn test_assessment_error_returned_without_retry() {
        let (executor, _) = executor(BreakerConfig::default());
        let ctx = OperationContext::new("ai", "score").with_policy(fast_policy(5));
        let result: Result<(), _> = executor
            .execute_with_retry(&ctx, || async {
                Err(LlmError::InvalidResponse("not json".into()).into())
            })
            .await;

        match result {
            Err(ExecutorError::NotRetried { category, .. }) => {
                assert_eq!(category, ErrorCategory::Assessment)
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_breaker_opens_during_retries() {
        let (executor, alerts) = executor(BreakerConfig {
            failure_threshold: 2,
            reset_timeout_ms: 60_000,
            success_threshold: 1,
        });
        let attempts = Arc::new(AtomicU32::new(0));
        let ctx = OperationContext::new("store", "list").with_policy(fast_policy(5));

        let counter = attempts.clone();
        let result: Result<(), _> = executor
            .execute_with_retry(&ctx, || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(LlmError::Timeout("t".into()).into())
                }
            })
            .await;

        assert!(matches!(result, Err(ExecutorError::CircuitOpen { .. })));
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
        assert!(executor.is_circuit_open("store:list").await);
        assert_eq!(executor.open_breakers().await, vec!["store:list".to_string()]);
        assert!(alerts
            .list_active_alerts()
            .await
            .iter()
            .any(|a| a.alert_type == AlertType::CircuitBreakerOpen));

        assert!(executor.reset_breaker("store:list").await);
        assert!(!executor.is_circuit_open("store:list").await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_breaker_disabled_by_policy() {
        let (executor, _) = executor(BreakerConfig {
            failure_threshold: 1,
            ..Default::default()
        });
        let ctx = OperationContext::new("cycle", "scheduling")
            .with_policy(fast_policy(0).with_circuit_breaker(false));

        for _ in 0..3 {
            let result: Result<(), _> = executor
                .execute_with_retry(&ctx, || async { Err(Error::other("boom")) })
                .await;
            assert!(matches!(result, Err(ExecutorError::FinalFailure { .. })));
        }
        assert!(executor.breaker_state("cycle:scheduling").await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_wrapped_store_failure_logged_once() {
        use crate::scheduler::SchedulerError;
        use crate::store::StoreError;

        let (executor, _) = executor(BreakerConfig::default());
        let inner = OperationContext::new("store", "create_work_item").with_policy(fast_policy(0));
        let outer = OperationContext::new("cycle", "scheduling")
            .with_policy(fast_policy(3).with_circuit_breaker(false));
        let attempts = Arc::new(AtomicU32::new(0));

        let counter = attempts.clone();
        let result: Result<(), _> = executor
            .execute_with_retry(&outer, || {
                let counter = counter.clone();
                let executor = &executor;
                let inner = &inner;
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    let stored: Result<(), ExecutorError> = executor
                        .execute_with_retry(inner, || async {
                            Err(StoreError::WorkItemNotFound("w1".into()).into())
                        })
                        .await;
                    stored.map_err(|e| Error::Scheduler(SchedulerError::store("create_work_item", e)))
                }
            })
            .await;

        // permanent inside stays permanent outside
        assert!(matches!(result, Err(ExecutorError::Permanent { .. })));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        assert_eq!(executor.error_log().len().await, 1);
    }
}
