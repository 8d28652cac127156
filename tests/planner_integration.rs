//! Schedule planner against an in-memory store

mod common;

use std::sync::Arc;

use chrono::Timelike;

use polycast::config::LanguageProfile;
use polycast::models::{ContentStatus, WorkFilter, WorkItemKind, WorkItemStatus};
use polycast::orchestrator::{CycleKind, CycleOutcome};
use polycast::scheduler::RuleRequest;
use polycast::store::ContentStore;

use common::{
    seed_content, test_app_over, test_app_with_generator, test_config, FailingCreateStore,
    TitleScoreGenerator,
};

/// Overall score equals the AI quality score
fn quality_only_config(daily_limit: usize) -> polycast::config::Config {
    let mut config = test_config();
    config.scoring.content_weight = 1.0;
    config.scoring.trend_weight = 0.0;
    config.scoring.timing_weight = 0.0;
    config.scoring.audience_weight = 0.0;
    config.languages = vec![LanguageProfile::new("en", 0, &[9, 18]).with_limits(2, daily_limit)];
    config
}

#[tokio::test]
async fn test_daily_cap_keeps_top_three() {
    let (app, store) = test_app_with_generator(quality_only_config(3), Arc::new(TitleScoreGenerator));
    for (i, score) in [95, 90, 85, 80, 75, 60, 50].iter().enumerate() {
        seed_content(&store, &format!("c{i}"), &format!("q{score}")).await;
    }

    let outcome = app.planner.preview(50).await.unwrap();

    let mut priorities: Vec<f64> = outcome.entries.iter().map(|e| e.priority).collect();
    priorities.sort_by(|a, b| b.total_cmp(a));
    assert_eq!(priorities, vec![95.0, 90.0, 85.0]);
    assert_eq!(outcome.items_considered, 7);
    // default threshold 75 drops 60 and 50
    assert_eq!(outcome.below_threshold, 2);
    assert_eq!(outcome.over_cap, 2);
}

#[tokio::test]
async fn test_preview_persists_nothing() {
    let (app, store) = test_app_with_generator(quality_only_config(5), Arc::new(TitleScoreGenerator));
    seed_content(&store, "c1", "q92").await;

    let outcome = app.planner.preview(10).await.unwrap();
    assert_eq!(outcome.entries.len(), 1);

    let reviews = store
        .list_work_items(&WorkFilter::kind(WorkItemKind::Review))
        .await
        .unwrap();
    assert!(reviews.is_empty());
    assert!(app.batches.batches().await.is_empty());
    assert_eq!(
        store.get_content("c1").await.unwrap().status,
        ContentStatus::Discovered
    );
}

#[tokio::test]
async fn test_plan_routes_every_entry() {
    let (app, store) = test_app_with_generator(quality_only_config(5), Arc::new(TitleScoreGenerator));
    seed_content(&store, "strong", "q95").await;
    seed_content(&store, "fair", "q78").await;
    seed_content(&store, "weak", "q40").await;

    let outcome = app.planner.plan(10).await.unwrap();
    assert_eq!(outcome.entries.len(), 2);
    assert_eq!(outcome.auto_approved + outcome.sent_to_review, 2);

    let reviews = store
        .list_work_items(
            &WorkFilter::kind(WorkItemKind::Review)
                .with_statuses(&[WorkItemStatus::AwaitingReview]),
        )
        .await
        .unwrap();
    assert_eq!(reviews.len(), outcome.sent_to_review);
    for review in &reviews {
        assert!(review.payload.get("publish_at").is_some());
        assert!(review.payload.get("priority").is_some());
    }
}

#[tokio::test]
async fn test_rule_moves_peak_hours() {
    let (app, store) = test_app_with_generator(quality_only_config(5), Arc::new(TitleScoreGenerator));
    seed_content(&store, "c1", "q90").await;

    app.planner
        .rules()
        .apply(RuleRequest {
            language: None,
            peak_hours: Some(vec![3]),
            shift_minutes: 0,
            reason: "overnight launch".to_string(),
            expires_at: None,
        })
        .await
        .unwrap();

    let outcome = app.planner.preview(10).await.unwrap();
    assert_eq!(outcome.entries[0].publish_at.hour(), 3);
}

#[tokio::test]
async fn test_interrupted_commit_leaves_auto_approved_for_batch_creation() {
    let mut config = quality_only_config(5);
    config.planner.auto_approve_confidence = 0.0;
    let store = Arc::new(FailingCreateStore::new(2));
    let app = test_app_over(config, store.clone(), Arc::new(TitleScoreGenerator));
    seed_content(&store.inner, "a", "q99").await;
    seed_content(&store.inner, "b", "q95").await;

    assert!(app.planner.plan(10).await.is_err());
    let stranded = store.list_work_items(&WorkFilter::default()).await.unwrap();
    assert_eq!(stranded.len(), 1);
    // not enqueued yet, so not Queued
    assert_eq!(stranded[0].status, WorkItemStatus::Approved);

    let outcome = app.planner.plan(10).await.unwrap();
    assert_eq!(outcome.auto_approved, 1);

    let report = app.orchestrator.execute_now(CycleKind::BatchCreation).await;
    assert_eq!(report.outcome, CycleOutcome::Completed);
    assert_eq!(report.detail["queued"], 1);

    let items = store.list_work_items(&WorkFilter::default()).await.unwrap();
    assert_eq!(items.len(), 2);
    assert!(items.iter().all(|w| w.status == WorkItemStatus::Queued));

    let mut batched: Vec<String> = app
        .batches
        .batches()
        .await
        .into_iter()
        .flat_map(|b| b.content_ids)
        .collect();
    batched.sort();
    assert_eq!(batched, vec!["a", "b"]);
}

proptest::proptest! {
    #![proptest_config(proptest::prelude::ProptestConfig::with_cases(24))]

    #[test]
    fn prop_admitted_are_top_k_above_threshold(
        scores in proptest::collection::vec(0u32..=100, 1..12),
        daily_limit in 1usize..6,
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let admitted = runtime.block_on(async {
            let (app, store) =
                test_app_with_generator(quality_only_config(daily_limit), Arc::new(TitleScoreGenerator));
            for (i, score) in scores.iter().enumerate() {
                seed_content(&store, &format!("c{i}"), &format!("q{score}")).await;
            }
            app.planner.preview(50).await.unwrap().entries
        });

        let threshold = polycast::scheduler::PlannerConfig::default().viral_threshold;
        let mut expected: Vec<f64> = scores
            .iter()
            .map(|s| f64::from(*s))
            .filter(|s| *s >= threshold)
            .collect();
        expected.sort_by(|a, b| b.total_cmp(a));
        expected.truncate(daily_limit);

        let mut priorities: Vec<f64> = admitted.iter().map(|e| e.priority).collect();
        priorities.sort_by(|a, b| b.total_cmp(a));
        proptest::prop_assert_eq!(priorities, expected);
    }
}
