//! Batch queue processor wired through the application builder

mod common;

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use polycast::app::App;
use polycast::batch::{BatchState, ContentProducer};
use polycast::config::{Config, LanguageProfile};
use polycast::error::Result;
use polycast::governor::{StaticMetricsSource, SystemMetrics};
use polycast::models::Language;
use polycast::store::{MemoryStore, StoreError};

use common::test_config;

/// Records produced pairs; fails ids listed in `broken`, lookups of ids in
/// `lookup_broken`, and every output lookup while `lookup_down` is set
#[derive(Default)]
struct RecordingProducer {
    produced: Mutex<Vec<(String, String)>>,
    broken: HashSet<String>,
    lookup_broken: HashSet<String>,
    lookup_down: AtomicBool,
}

#[async_trait]
impl ContentProducer for RecordingProducer {
    async fn has_output(&self, content_id: &str, _language: &Language) -> Result<bool> {
        if self.lookup_down.load(Ordering::SeqCst) || self.lookup_broken.contains(content_id) {
            return Err(StoreError::ContentNotFound(content_id.to_string()).into());
        }
        Ok(false)
    }

    async fn produce(&self, content_id: &str, language: &Language, _batch_id: &str) -> Result<()> {
        if self.broken.contains(content_id) {
            return Err(StoreError::ContentNotFound(content_id.to_string()).into());
        }
        self.produced
            .lock()
            .await
            .push((content_id.to_string(), language.to_string()));
        Ok(())
    }
}

fn app(config: Config, producer: Arc<RecordingProducer>) -> App {
    App::builder(config, Arc::new(MemoryStore::new()))
        .producer(producer)
        .metrics_source(Arc::new(StaticMetricsSource::new(SystemMetrics::idle())))
        .build()
        .unwrap()
}

fn ids(prefix: &str, n: usize) -> Vec<String> {
    (0..n).map(|i| format!("{prefix}{i}")).collect()
}

fn two_languages() -> Config {
    let mut config = test_config();
    config.languages = vec![
        LanguageProfile::new("en", 0, &[9]).with_limits(1, 20),
        LanguageProfile::new("ja", 540, &[21]).with_limits(1, 20),
    ];
    config
}

#[tokio::test]
async fn test_languages_dispatch_independently() {
    let producer = Arc::new(RecordingProducer::default());
    let app = app(two_languages(), producer.clone());

    app.batches.enqueue(Language::new("en"), ids("en-", 3), 70.0).await.unwrap();
    app.batches.enqueue(Language::new("en"), ids("en-late-", 3), 60.0).await.unwrap();
    app.batches.enqueue(Language::new("ja"), ids("ja-", 2), 90.0).await.unwrap();

    // one batch per language may run at a time
    let report = app.batches.tick().await;
    assert_eq!(report.dispatched.len(), 2);
    assert_eq!(report.deferred, 1);
    app.batches.wait_for_in_flight().await;

    let report = app.batches.tick().await;
    assert_eq!(report.dispatched.len(), 1);
    app.batches.wait_for_in_flight().await;

    let produced = producer.produced.lock().await;
    assert_eq!(produced.len(), 8);
    assert_eq!(produced.iter().filter(|(_, l)| l == "ja").count(), 2);

    let status = app.batches.queue_status().await;
    assert_eq!(status.completed, 3);
    assert_eq!(status.by_language["en"].daily_used, 6);
}

#[tokio::test]
async fn test_failed_items_release_quota() {
    let producer = Arc::new(RecordingProducer {
        broken: HashSet::from(["c1".to_string()]),
        ..Default::default()
    });
    let app = app(test_config(), producer.clone());
    let en = Language::new("en");

    let created = app.batches.enqueue(en.clone(), ids("c", 3), 80.0).await.unwrap();
    app.batches.tick().await;
    app.batches.wait_for_in_flight().await;

    let batch = app.batches.batch(&created[0]).await.unwrap();
    assert_eq!(batch.state, BatchState::Completed);
    let result = batch.result.unwrap();
    assert_eq!(result.processed, 2);
    assert_eq!(result.failed, 1);
    assert!(result.errors[0].starts_with("c1:"));
    // 10 per day, only successes count
    assert_eq!(app.batches.remaining_quota(&en).await, 8);
}

#[tokio::test]
async fn test_failed_lookup_takes_no_quota() {
    let producer = Arc::new(RecordingProducer {
        lookup_broken: HashSet::from(["c1".to_string()]),
        ..Default::default()
    });
    let mut config = test_config();
    config.languages = vec![LanguageProfile::new("en", 0, &[9]).with_limits(3, 5)];
    let app = app(config, producer.clone());
    let en = Language::new("en");

    let created = app.batches.enqueue(en.clone(), ids("c", 3), 80.0).await.unwrap();
    app.batches.tick().await;
    app.batches.wait_for_in_flight().await;

    let batch = app.batches.batch(&created[0]).await.unwrap();
    assert_eq!(batch.state, BatchState::Failed);
    assert!(producer.produced.lock().await.is_empty());
    assert_eq!(app.batches.remaining_quota(&en).await, 5);
}

#[tokio::test]
async fn test_failed_batch_retried_after_recovery() {
    let producer = Arc::new(RecordingProducer::default());
    producer.lookup_down.store(true, Ordering::SeqCst);
    let app = app(test_config(), producer.clone());

    let created = app.batches.enqueue(Language::new("en"), ids("c", 2), 80.0).await.unwrap();
    app.batches.tick().await;
    app.batches.wait_for_in_flight().await;
    let batch = app.batches.batch(&created[0]).await.unwrap();
    assert_eq!(batch.state, BatchState::Failed);
    assert!(batch.error.is_some());

    producer.lookup_down.store(false, Ordering::SeqCst);
    assert_eq!(app.batches.retry_failed().await, 1);
    app.batches.tick().await;
    app.batches.wait_for_in_flight().await;

    let batch = app.batches.batch(&created[0]).await.unwrap();
    assert_eq!(batch.state, BatchState::Completed);
    assert_eq!(batch.attempts, 2);
    assert_eq!(producer.produced.lock().await.len(), 2);
}

#[tokio::test]
async fn test_queue_overload_refused() {
    let app = app(test_config(), Arc::new(RecordingProducer::default()));
    app.governor.emergency_stop().await;

    let err = app
        .batches
        .enqueue(Language::new("en"), ids("c", 11), 80.0)
        .await
        .unwrap_err();
    assert!(matches!(err, polycast::error::Error::QueueOverload { limit: 10, .. }));
}
