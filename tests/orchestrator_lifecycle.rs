//! Orchestrator lifecycle and end-to-end cycles

mod common;

use std::sync::Arc;
use std::time::Duration;

use polycast::models::{WorkFilter, WorkItemKind, WorkItemPatch, WorkItemStatus};
use polycast::notifications::AlertSink;
use polycast::orchestrator::{CycleKind, CycleOutcome, OrchestratorStatus};
use polycast::store::ContentStore;

use common::{seed_content, test_app, test_app_with_generator, test_config, TitleScoreGenerator};

#[tokio::test(start_paused = true)]
async fn test_restart_never_duplicates_timers() {
    let (app, _) = test_app(test_config());
    let orchestrator = app.orchestrator.clone();

    for _ in 0..3 {
        orchestrator.start().await.unwrap();
        orchestrator.start().await.unwrap();
        assert_eq!(orchestrator.registered_timers().await, 7);
        assert_eq!(orchestrator.status().await, OrchestratorStatus::Running);
        assert!(orchestrator.stop().await);
        assert_eq!(orchestrator.registered_timers().await, 0);
    }
}

#[tokio::test(start_paused = true)]
async fn test_timers_drive_health_checks() {
    let (app, _) = test_app(test_config());
    let orchestrator = app.orchestrator.clone();

    orchestrator.start().await.unwrap();
    let initial = orchestrator.cycle_stats(CycleKind::HealthCheck).await.runs;
    assert_eq!(initial, 1);

    // default health interval is 5 minutes
    tokio::time::sleep(Duration::from_secs(5 * 60 + 1)).await;
    assert_eq!(orchestrator.cycle_stats(CycleKind::HealthCheck).await.runs, 2);

    // paused: timers keep firing but cycles do not run
    assert!(orchestrator.pause().await);
    tokio::time::sleep(Duration::from_secs(5 * 60)).await;
    assert_eq!(orchestrator.cycle_stats(CycleKind::HealthCheck).await.runs, 2);

    orchestrator.stop().await;
}

#[tokio::test]
async fn test_content_flows_from_plan_to_production() {
    let mut config = test_config();
    config.scoring.content_weight = 1.0;
    config.scoring.trend_weight = 0.0;
    config.scoring.timing_weight = 0.0;
    config.scoring.audience_weight = 0.0;
    config.planner.auto_approve_confidence = 0.0;
    let (app, store) = test_app_with_generator(config, Arc::new(TitleScoreGenerator));

    // 95 clears the auto-approve score, 80 only the viral threshold
    seed_content(&store, "auto", "q95").await;
    seed_content(&store, "review", "q80").await;

    let report = app.orchestrator.execute_now(CycleKind::Scheduling).await;
    assert_eq!(report.outcome, CycleOutcome::Completed);

    let reviews = store
        .list_work_items(
            &WorkFilter::kind(WorkItemKind::Review).with_statuses(&[WorkItemStatus::AwaitingReview]),
        )
        .await
        .unwrap();
    assert_eq!(reviews.len(), 1);
    assert_eq!(reviews[0].content_id, "review");

    // operator approves the review item
    store
        .update_work_item(&reviews[0].id, WorkItemPatch::status(WorkItemStatus::Approved))
        .await
        .unwrap();
    let report = app.orchestrator.execute_now(CycleKind::BatchCreation).await;
    assert_eq!(report.outcome, CycleOutcome::Completed);

    for _ in 0..3 {
        app.batches.tick().await;
        app.batches.wait_for_in_flight().await;
    }

    let mut produced: Vec<String> = store
        .list_work_items(&WorkFilter::kind(WorkItemKind::Production))
        .await
        .unwrap()
        .into_iter()
        .map(|w| w.content_id)
        .collect();
    produced.sort();
    assert_eq!(produced, vec!["auto".to_string(), "review".to_string()]);
}

#[tokio::test]
async fn test_forced_maintenance_and_health_report() {
    let (app, _) = test_app(test_config());

    let report = app.orchestrator.execute_now(CycleKind::Maintenance).await;
    assert_eq!(report.outcome, CycleOutcome::Completed);
    assert_eq!(app.orchestrator.status().await, OrchestratorStatus::Stopped);

    app.governor.emergency_stop().await;
    let health = app.orchestrator.health_report().await;
    assert!(health.emergency);
    assert_eq!(health.throttle_level, 100);

    let report = app.orchestrator.execute_now(CycleKind::HealthCheck).await;
    assert_eq!(report.outcome, CycleOutcome::Completed);
    assert!(!app.alerts.list_active_alerts().await.is_empty());
}
