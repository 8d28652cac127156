//! Content store abstraction
//!
//! The governance core never owns content; it reads items, requests status
//! transitions and records downstream work through [`ContentStore`].
//!
//! ```text
//!   planner / batch / orchestrator
//!                 │
//!                 ▼
//!         ContentStore (trait)
//!          ┌──────┴──────┐
//!          ▼             ▼
//!     SqliteStore    MemoryStore
//! ```

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::{ErrorCategory, PolycastErrorTrait};
use crate::models::{
    ContentFilter, ContentItem, ContentStatus, NewWorkItem, WorkFilter, WorkItem, WorkItemKind,
    WorkItemPatch,
};

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors raised by content store implementations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("content not found: {0}")]
    ContentNotFound(String),

    #[error("work item not found: {0}")]
    WorkItemNotFound(String),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("store connection lock poisoned")]
    LockPoisoned,

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid stored value for {field}: {value}")]
    InvalidValue { field: &'static str, value: String },
}

impl PolycastErrorTrait for StoreError {
    fn category(&self) -> ErrorCategory {
        match self {
            // busy/locked databases clear up on their own
            Self::Database(_) => ErrorCategory::Transient,
            Self::ContentNotFound(_) | Self::WorkItemNotFound(_) | Self::LockPoisoned => {
                ErrorCategory::Permanent
            }
            Self::Serialization(_) | Self::InvalidValue { .. } => ErrorCategory::Assessment,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            Self::ContentNotFound(_) | Self::WorkItemNotFound(_) => "not_found",
            Self::Database(_) | Self::LockPoisoned => "database",
            Self::Serialization(_) | Self::InvalidValue { .. } => "invalid_response",
        }
    }
}

/// Contract the core needs from the external content store
#[async_trait]
pub trait ContentStore: Send + Sync {
    /// List content items matching the filter, oldest first
    async fn list_content(&self, filter: &ContentFilter) -> StoreResult<Vec<ContentItem>>;

    /// Fetch a single content item
    async fn get_content(&self, id: &str) -> StoreResult<ContentItem>;

    /// Insert or replace a content item
    async fn insert_content(&self, item: &ContentItem) -> StoreResult<()>;

    /// Request a lifecycle transition for a content item
    async fn set_status(&self, id: &str, status: ContentStatus) -> StoreResult<()>;

    /// Record a new work item
    async fn create_work_item(&self, kind: WorkItemKind, new: NewWorkItem)
        -> StoreResult<WorkItem>;

    /// List work items matching the filter, oldest first
    async fn list_work_items(&self, filter: &WorkFilter) -> StoreResult<Vec<WorkItem>>;

    /// Apply a partial update and return the updated item
    async fn update_work_item(&self, id: &str, patch: WorkItemPatch) -> StoreResult<WorkItem>;

    /// Delete terminal work items last updated before `before`
    async fn purge_work_items(&self, before: DateTime<Utc>) -> StoreResult<usize>;

    /// Cheap liveness check used by the health check
    async fn health_check(&self) -> StoreResult<()> {
        Ok(())
    }
}

pub(crate) fn new_work_item(kind: WorkItemKind, new: NewWorkItem) -> WorkItem {
    let now = Utc::now();
    WorkItem {
        id: uuid::Uuid::new_v4().to_string(),
        kind,
        content_id: new.content_id,
        language: new.language,
        status: new.status,
        payload: new.payload,
        error: None,
        created_at: now,
        updated_at: now,
        started_at: None,
    }
}
