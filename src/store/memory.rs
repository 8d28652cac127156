//! In-memory content store for tests and dry runs

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use super::{new_work_item, ContentStore, StoreError, StoreResult};
use crate::models::{
    ContentFilter, ContentItem, ContentStatus, NewWorkItem, WorkFilter, WorkItem, WorkItemKind,
    WorkItemPatch,
};

/// Content store backed by in-process hash maps
#[derive(Default)]
pub struct MemoryStore {
    content: RwLock<HashMap<String, ContentItem>>,
    work_items: RwLock<HashMap<String, WorkItem>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the store with content items
    pub async fn with_content(items: impl IntoIterator<Item = ContentItem>) -> Self {
        let store = Self::new();
        {
            let mut content = store.content.write().await;
            for item in items {
                content.insert(item.id.clone(), item);
            }
        }
        store
    }

    pub async fn work_item_count(&self) -> usize {
        self.work_items.read().await.len()
    }
}

#[async_trait]
impl ContentStore for MemoryStore {
    async fn list_content(&self, filter: &ContentFilter) -> StoreResult<Vec<ContentItem>> {
        let content = self.content.read().await;
        let mut items: Vec<ContentItem> = content
            .values()
            .filter(|item| filter.matches(item))
            .cloned()
            .collect();
        items.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        if let Some(limit) = filter.limit {
            items.truncate(limit);
        }
        Ok(items)
    }

    async fn get_content(&self, id: &str) -> StoreResult<ContentItem> {
        self.content
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::ContentNotFound(id.to_string()))
    }

    async fn insert_content(&self, item: &ContentItem) -> StoreResult<()> {
        self.content
            .write()
            .await
            .insert(item.id.clone(), item.clone());
        Ok(())
    }

    async fn set_status(&self, id: &str, status: ContentStatus) -> StoreResult<()> {
        let mut content = self.content.write().await;
        let item = content
            .get_mut(id)
            .ok_or_else(|| StoreError::ContentNotFound(id.to_string()))?;
        item.status = status;
        Ok(())
    }

    async fn create_work_item(
        &self,
        kind: WorkItemKind,
        new: NewWorkItem,
    ) -> StoreResult<WorkItem> {
        let item = new_work_item(kind, new);
        self.work_items
            .write()
            .await
            .insert(item.id.clone(), item.clone());
        Ok(item)
    }

    async fn list_work_items(&self, filter: &WorkFilter) -> StoreResult<Vec<WorkItem>> {
        let work_items = self.work_items.read().await;
        let mut items: Vec<WorkItem> = work_items
            .values()
            .filter(|item| filter.matches(item))
            .cloned()
            .collect();
        items.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        if let Some(limit) = filter.limit {
            items.truncate(limit);
        }
        Ok(items)
    }

    async fn update_work_item(&self, id: &str, patch: WorkItemPatch) -> StoreResult<WorkItem> {
        let mut work_items = self.work_items.write().await;
        let item = work_items
            .get_mut(id)
            .ok_or_else(|| StoreError::WorkItemNotFound(id.to_string()))?;
        patch.apply(item);
        Ok(item.clone())
    }

    async fn purge_work_items(&self, before: DateTime<Utc>) -> StoreResult<usize> {
        let mut work_items = self.work_items.write().await;
        let initial = work_items.len();
        work_items.retain(|_, item| !(item.status.is_terminal() && item.updated_at < before));
        Ok(initial - work_items.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Language, WorkItemStatus};

    #[tokio::test]
    async fn test_set_status_unknown_content() {
        let store = MemoryStore::new();
        let err = store
            .set_status("missing", ContentStatus::Approved)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::ContentNotFound(_)));
    }

    #[tokio::test]
    async fn test_list_content_filters_and_limits() {
        let store = MemoryStore::with_content(vec![
            ContentItem::new("a", "A", ""),
            ContentItem::new("b", "B", "").with_status(ContentStatus::Approved),
            ContentItem::new("c", "C", "").with_status(ContentStatus::Processed),
        ])
        .await;

        let items = store
            .list_content(&ContentFilter::unprocessed(10))
            .await
            .unwrap();
        let ids: Vec<_> = items.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids.len(), 2);
        assert!(!ids.contains(&"b"));

        let limited = store
            .list_content(&ContentFilter::unprocessed(1))
            .await
            .unwrap();
        assert_eq!(limited.len(), 1);
    }

    #[tokio::test]
    async fn test_purge_keeps_active_items() {
        let store = MemoryStore::new();
        let done = store
            .create_work_item(
                WorkItemKind::Production,
                NewWorkItem::new("c1", Language::new("en"), WorkItemStatus::Pending),
            )
            .await
            .unwrap();
        store
            .update_work_item(&done.id, WorkItemPatch::status(WorkItemStatus::Completed))
            .await
            .unwrap();
        store
            .create_work_item(
                WorkItemKind::Production,
                NewWorkItem::new("c2", Language::new("en"), WorkItemStatus::Running),
            )
            .await
            .unwrap();

        let purged = store
            .purge_work_items(Utc::now() + chrono::Duration::seconds(1))
            .await
            .unwrap();
        assert_eq!(purged, 1);
        assert_eq!(store.work_item_count().await, 1);
    }
}
