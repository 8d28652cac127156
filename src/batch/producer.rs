//! Per-item production step of a batch

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{Language, NewWorkItem, WorkFilter, WorkItemKind, WorkItemStatus};
use crate::store::ContentStore;

/// Produces the localized output for one content item
///
/// Called once per admitted item, always through the executor.
#[async_trait]
pub trait ContentProducer: Send + Sync {
    /// Whether output for the pair already exists
    async fn has_output(&self, content_id: &str, language: &Language) -> Result<bool>;

    /// Produce output for the pair
    async fn produce(&self, content_id: &str, language: &Language, batch_id: &str) -> Result<()>;
}

/// Default producer: records a Production work item for downstream
/// executors (script, voice, video) to pick up
pub struct WorkItemProducer {
    store: Arc<dyn ContentStore>,
}

impl WorkItemProducer {
    pub fn new(store: Arc<dyn ContentStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl ContentProducer for WorkItemProducer {
    async fn has_output(&self, content_id: &str, language: &Language) -> Result<bool> {
        let filter = WorkFilter::kind(WorkItemKind::Production)
            .with_content_id(content_id)
            .with_language(language.clone());
        let existing = self.store.list_work_items(&filter).await?;
        // failed output may be produced again
        Ok(existing
            .iter()
            .any(|w| !matches!(w.status, WorkItemStatus::Failed | WorkItemStatus::Rejected)))
    }

    async fn produce(&self, content_id: &str, language: &Language, batch_id: &str) -> Result<()> {
        let new = NewWorkItem::new(content_id, language.clone(), WorkItemStatus::Pending)
            .with_payload(serde_json::json!({ "batch_id": batch_id }));
        self.store
            .create_work_item(WorkItemKind::Production, new)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::WorkItemPatch;
    use crate::store::MemoryStore;

    #[tokio::test]
    async fn test_produce_then_has_output() {
        let store = Arc::new(MemoryStore::new());
        let producer = WorkItemProducer::new(store.clone());
        let en = Language::new("en");

        assert!(!producer.has_output("c1", &en).await.unwrap());
        producer.produce("c1", &en, "b1").await.unwrap();
        assert!(producer.has_output("c1", &en).await.unwrap());
        assert!(!producer.has_output("c1", &Language::new("ja")).await.unwrap());
    }

    #[tokio::test]
    async fn test_failed_output_can_be_redone() {
        let store = Arc::new(MemoryStore::new());
        let producer = WorkItemProducer::new(store.clone());
        let en = Language::new("en");
        producer.produce("c1", &en, "b1").await.unwrap();

        let items = store
            .list_work_items(&WorkFilter::kind(WorkItemKind::Production))
            .await
            .unwrap();
        store
            .update_work_item(&items[0].id, WorkItemPatch::status(WorkItemStatus::Failed))
            .await
            .unwrap();
        assert!(!producer.has_output("c1", &en).await.unwrap());
    }
}
