//! Common test utilities

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use polycast::app::App;
use polycast::config::{Config, LanguageProfile};
use polycast::governor::{StaticMetricsSource, SystemMetrics};
use polycast::llm::{LlmError, TextGenerator};
use polycast::models::{
    ContentFilter, ContentItem, ContentStatus, NewWorkItem, WorkFilter, WorkItem, WorkItemKind,
    WorkItemPatch,
};
use polycast::store::{ContentStore, MemoryStore, StoreError, StoreResult};

/// Config with a single English profile and the AI collaborator disabled
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.llm.enabled = false;
    config.languages = vec![LanguageProfile::new("en", 0, &[9, 18]).with_limits(2, 10)];
    config
}

/// App over an in-memory store with idle system metrics
#[allow(dead_code)]
pub fn test_app(config: Config) -> (App, Arc<MemoryStore>) {
    build_app(config, None)
}

#[allow(dead_code)]
pub fn test_app_with_generator(config: Config, generator: Arc<dyn TextGenerator>) -> (App, Arc<MemoryStore>) {
    build_app(config, Some(generator))
}

fn build_app(config: Config, generator: Option<Arc<dyn TextGenerator>>) -> (App, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let mut builder = App::builder(config, store.clone())
        .metrics_source(Arc::new(StaticMetricsSource::new(SystemMetrics::idle())));
    if let Some(generator) = generator {
        builder = builder.generator(generator);
    }
    (builder.build().expect("app builds"), store)
}

/// App over an arbitrary store with the given generator
#[allow(dead_code)]
pub fn test_app_over(config: Config, store: Arc<dyn ContentStore>, generator: Arc<dyn TextGenerator>) -> App {
    App::builder(config, store)
        .metrics_source(Arc::new(StaticMetricsSource::new(SystemMetrics::idle())))
        .generator(generator)
        .build()
        .expect("app builds")
}

/// Memory store whose n-th `create_work_item` call fails permanently
#[allow(dead_code)]
pub struct FailingCreateStore {
    pub inner: MemoryStore,
    fail_on: usize,
    creates: AtomicUsize,
}

#[allow(dead_code)]
impl FailingCreateStore {
    pub fn new(fail_on: usize) -> Self {
        Self {
            inner: MemoryStore::new(),
            fail_on,
            creates: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl ContentStore for FailingCreateStore {
    async fn list_content(&self, filter: &ContentFilter) -> StoreResult<Vec<ContentItem>> {
        self.inner.list_content(filter).await
    }

    async fn get_content(&self, id: &str) -> StoreResult<ContentItem> {
        self.inner.get_content(id).await
    }

    async fn insert_content(&self, item: &ContentItem) -> StoreResult<()> {
        self.inner.insert_content(item).await
    }

    async fn set_status(&self, id: &str, status: ContentStatus) -> StoreResult<()> {
        self.inner.set_status(id, status).await
    }

    async fn create_work_item(&self, kind: WorkItemKind, new: NewWorkItem) -> StoreResult<WorkItem> {
        let call = self.creates.fetch_add(1, Ordering::SeqCst) + 1;
        if call == self.fail_on {
            return Err(StoreError::WorkItemNotFound(new.content_id.clone()));
        }
        self.inner.create_work_item(kind, new).await
    }

    async fn list_work_items(&self, filter: &WorkFilter) -> StoreResult<Vec<WorkItem>> {
        self.inner.list_work_items(filter).await
    }

    async fn update_work_item(&self, id: &str, patch: WorkItemPatch) -> StoreResult<WorkItem> {
        self.inner.update_work_item(id, patch).await
    }

    async fn purge_work_items(&self, before: DateTime<Utc>) -> StoreResult<usize> {
        self.inner.purge_work_items(before).await
    }
}

/// Insert a content item with a body long enough for the quality heuristic
#[allow(dead_code)]
pub async fn seed_content(store: &MemoryStore, id: &str, title: &str) -> ContentItem {
    let mut item = ContentItem::new(
        id,
        title,
        "A detailed look at how small teams ship reliable software. ".repeat(20),
    );
    item.category = Some("technology".to_string());
    store.insert_content(&item).await.expect("insert content");
    item
}

/// Generator that rates each item by the number after `Title: q`
///
/// Trend prompts get an empty topic list.
#[allow(dead_code)]
pub struct TitleScoreGenerator;

#[async_trait]
impl TextGenerator for TitleScoreGenerator {
    fn name(&self) -> &str {
        "title-score"
    }

    async fn complete(&self, prompt: &str) -> Result<String, LlmError> {
        let score = prompt.find("Title: q").and_then(|start| {
            let digits: String = prompt[start + 8..]
                .chars()
                .take_while(|c| c.is_ascii_digit())
                .collect();
            digits.parse::<u32>().ok()
        });
        Ok(match score {
            Some(score) => format!(r#"{{"score": {score}, "confidence": 90}}"#),
            None => "[]".to_string(),
        })
    }
}
