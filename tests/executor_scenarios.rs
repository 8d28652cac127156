//! Retry and circuit breaker scenarios through the public executor API

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use polycast::executor::{BreakerConfig, Executor, ExecutorConfig, ExecutorError, OperationContext, RetryPolicy};
use polycast::llm::LlmError;
use polycast::notifications::{AlertManager, AlertSink, AlertType};

fn executor(breaker: BreakerConfig) -> (Executor, Arc<AlertManager>) {
    let alerts = Arc::new(AlertManager::new());
    let config = ExecutorConfig {
        breaker,
        ..ExecutorConfig::default()
    };
    (Executor::new(config, alerts.clone()), alerts)
}

fn no_retry() -> RetryPolicy {
    RetryPolicy::default().with_max_retries(0).with_jitter(0)
}

async fn fail(executor: &Executor, ctx: &OperationContext) -> Result<(), ExecutorError> {
    executor
        .execute_with_retry(ctx, || async { Err(LlmError::Unavailable("down".into()).into()) })
        .await
}

#[tokio::test(start_paused = true)]
async fn test_breaker_rejects_then_retries_after_reset_timeout() {
    let (executor, alerts) = executor(BreakerConfig {
        failure_threshold: 3,
        reset_timeout_ms: 1000,
        success_threshold: 1,
    });
    let ctx = OperationContext::new("ai", "trends").with_policy(no_retry());

    for _ in 0..3 {
        assert!(matches!(fail(&executor, &ctx).await, Err(ExecutorError::FinalFailure { .. })));
    }
    assert!(executor.is_circuit_open("ai:trends").await);
    assert!(alerts
        .list_active_alerts()
        .await
        .iter()
        .any(|a| a.alert_type == AlertType::CircuitBreakerOpen));

    // t+500ms: rejected without calling the operation
    tokio::time::advance(Duration::from_millis(500)).await;
    let calls = Arc::new(AtomicU32::new(0));
    let counter = calls.clone();
    let rejected = executor
        .execute_with_retry(&ctx, || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        })
        .await;
    match rejected {
        Err(ExecutorError::CircuitOpen { retry_after_ms, .. }) => assert!(retry_after_ms <= 500),
        other => panic!("expected open circuit, got {other:?}"),
    }
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    // t+1001ms: one trial call goes through and closes the breaker
    tokio::time::advance(Duration::from_millis(501)).await;
    let counter = calls.clone();
    let recovered = executor
        .execute_with_retry(&ctx, || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok("recovered")
            }
        })
        .await;
    assert_eq!(recovered.unwrap(), "recovered");
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(executor.open_breakers().await.is_empty());

    // recovery clears the breaker and final-failure alerts for the key
    assert!(alerts.list_active_alerts().await.is_empty());
    assert!(alerts
        .all_alerts()
        .await
        .iter()
        .any(|a| a.alert_type == AlertType::CircuitBreakerOpen && a.resolved_at.is_some()));
}

#[tokio::test(start_paused = true)]
async fn test_failed_trial_call_reopens_breaker() {
    let (executor, _) = executor(BreakerConfig {
        failure_threshold: 2,
        reset_timeout_ms: 1000,
        success_threshold: 1,
    });
    let ctx = OperationContext::new("store", "list_content").with_policy(no_retry());

    fail(&executor, &ctx).await.ok();
    fail(&executor, &ctx).await.ok();
    assert!(executor.is_circuit_open("store:list_content").await);

    tokio::time::advance(Duration::from_millis(1001)).await;
    assert!(matches!(fail(&executor, &ctx).await, Err(ExecutorError::FinalFailure { .. })));
    assert!(matches!(fail(&executor, &ctx).await, Err(ExecutorError::CircuitOpen { .. })));
}

#[tokio::test(start_paused = true)]
async fn test_breakers_are_isolated_per_key() {
    let (executor, _) = executor(BreakerConfig {
        failure_threshold: 1,
        reset_timeout_ms: 60_000,
        success_threshold: 1,
    });
    let trends = OperationContext::new("ai", "trends").with_policy(no_retry());
    let score = OperationContext::new("ai", "score").with_policy(no_retry());

    fail(&executor, &trends).await.ok();
    assert!(executor.is_circuit_open("ai:trends").await);

    let result = executor.execute_with_retry(&score, || async { Ok(7) }).await;
    assert_eq!(result.unwrap(), 7);
    assert_eq!(executor.open_breakers().await, vec!["ai:trends".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn test_retries_are_one_plus_max_retries() {
    let (executor, _) = executor(BreakerConfig::default());
    let ctx = OperationContext::new("ai", "score")
        .with_policy(RetryPolicy::default().with_max_retries(2).with_delays(10, 100).with_jitter(0));

    let calls = Arc::new(AtomicU32::new(0));
    let counter = calls.clone();
    let result: Result<(), _> = executor
        .execute_with_retry(&ctx, || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(LlmError::Timeout("slow".into()).into())
            }
        })
        .await;

    assert!(matches!(result, Err(ExecutorError::FinalFailure { attempts: 3, .. })));
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(executor.error_log().len().await, 3);
}
