// Core data structures shared by the governance components

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Target language code (e.g. "en", "ja"), always lowercase
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Language(String);

impl Language {
    pub fn new(code: impl AsRef<str>) -> Self {
        Self(code.as_ref().trim().to_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Language {
    fn from(code: &str) -> Self {
        Self::new(code)
    }
}

/// Lifecycle status of a content item in the external store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ContentStatus {
    #[default]
    Discovered,
    Processed,
    Approved,
    Rejected,
}

impl ContentStatus {
    /// Get string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Discovered => "discovered",
            Self::Processed => "processed",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }

    /// Parse from the stored string form
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "discovered" => Some(Self::Discovered),
            "processed" => Some(Self::Processed),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            _ => None,
        }
    }

    /// Content that has not been approved or rejected yet
    pub fn is_unprocessed(&self) -> bool {
        matches!(self, Self::Discovered | Self::Processed)
    }
}

/// A piece of source content owned by the content store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentItem {
    pub id: String,
    pub title: String,
    pub body: String,
    /// Language-agnostic source metadata (origin, author, url, ...)
    #[serde(default)]
    pub source: HashMap<String, String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub status: ContentStatus,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl ContentItem {
    pub fn new(id: impl Into<String>, title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            body: body.into(),
            source: HashMap::new(),
            category: None,
            status: ContentStatus::Discovered,
            created_at: Utc::now(),
        }
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn with_source(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.source.insert(key.into(), value.into());
        self
    }

    pub fn with_status(mut self, status: ContentStatus) -> Self {
        self.status = status;
        self
    }

    /// Title plus the leading part of the body, cut on a char boundary
    pub fn summary(&self, max_body_chars: usize) -> String {
        let body: String = self.body.chars().take(max_body_chars).collect();
        if body.is_empty() {
            self.title.clone()
        } else {
            format!("{}: {}", self.title, body)
        }
    }
}

/// Kind of downstream work tracked in the store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkItemKind {
    /// Produce localized output for a content item
    Production,
    /// A schedule proposal waiting for manual approval
    Review,
}

impl WorkItemKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Production => "production",
            Self::Review => "review",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "production" => Some(Self::Production),
            "review" => Some(Self::Review),
            _ => None,
        }
    }
}

/// Status of a work item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkItemStatus {
    Pending,
    AwaitingReview,
    Approved,
    Queued,
    Running,
    Paused,
    Completed,
    Failed,
    Rejected,
}

impl WorkItemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::AwaitingReview => "awaiting_review",
            Self::Approved => "approved",
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Rejected => "rejected",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "awaiting_review" => Some(Self::AwaitingReview),
            "approved" => Some(Self::Approved),
            "queued" => Some(Self::Queued),
            "running" => Some(Self::Running),
            "paused" => Some(Self::Paused),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "rejected" => Some(Self::Rejected),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Rejected)
    }
}

impl fmt::Display for WorkItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A unit of downstream work recorded in the content store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkItem {
    pub id: String,
    pub kind: WorkItemKind,
    pub content_id: String,
    pub language: Language,
    pub status: WorkItemStatus,
    pub payload: serde_json::Value,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
}

/// Fields for creating a work item
#[derive(Debug, Clone)]
pub struct NewWorkItem {
    pub content_id: String,
    pub language: Language,
    pub status: WorkItemStatus,
    pub payload: serde_json::Value,
}

impl NewWorkItem {
    pub fn new(content_id: impl Into<String>, language: Language, status: WorkItemStatus) -> Self {
        Self {
            content_id: content_id.into(),
            language,
            status,
            payload: serde_json::Value::Null,
        }
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }
}

/// Partial update for a work item; `None` fields are left untouched
#[derive(Debug, Clone, Default)]
pub struct WorkItemPatch {
    pub status: Option<WorkItemStatus>,
    pub payload: Option<serde_json::Value>,
    pub error: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
}

impl WorkItemPatch {
    pub fn status(status: WorkItemStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn with_started_at(mut self, at: DateTime<Utc>) -> Self {
        self.started_at = Some(at);
        self
    }

    /// Apply this patch in place
    pub fn apply(&self, item: &mut WorkItem) {
        if let Some(status) = self.status {
            item.status = status;
        }
        if let Some(payload) = &self.payload {
            item.payload = payload.clone();
        }
        if let Some(error) = &self.error {
            item.error = Some(error.clone());
        }
        if let Some(at) = self.started_at {
            item.started_at = Some(at);
        }
        item.updated_at = Utc::now();
    }
}

/// Filter for listing work items. Empty fields match everything.
#[derive(Debug, Clone, Default)]
pub struct WorkFilter {
    pub kind: Option<WorkItemKind>,
    pub statuses: Vec<WorkItemStatus>,
    pub language: Option<Language>,
    pub content_id: Option<String>,
    pub limit: Option<usize>,
}

impl WorkFilter {
    pub fn kind(kind: WorkItemKind) -> Self {
        Self {
            kind: Some(kind),
            ..Default::default()
        }
    }

    pub fn with_statuses(mut self, statuses: &[WorkItemStatus]) -> Self {
        self.statuses = statuses.to_vec();
        self
    }

    pub fn with_language(mut self, language: Language) -> Self {
        self.language = Some(language);
        self
    }

    pub fn with_content_id(mut self, content_id: impl Into<String>) -> Self {
        self.content_id = Some(content_id.into());
        self
    }

    pub fn matches(&self, item: &WorkItem) -> bool {
        self.kind.map_or(true, |k| k == item.kind)
            && (self.statuses.is_empty() || self.statuses.contains(&item.status))
            && self.language.as_ref().map_or(true, |l| *l == item.language)
            && self
                .content_id
                .as_ref()
                .map_or(true, |c| *c == item.content_id)
    }
}

/// Filter for listing content items
#[derive(Debug, Clone, Default)]
pub struct ContentFilter {
    pub statuses: Vec<ContentStatus>,
    pub limit: Option<usize>,
}

impl ContentFilter {
    /// Content not yet approved or rejected
    pub fn unprocessed(limit: usize) -> Self {
        Self {
            statuses: vec![ContentStatus::Discovered, ContentStatus::Processed],
            limit: Some(limit),
        }
    }

    pub fn matches(&self, item: &ContentItem) -> bool {
        self.statuses.is_empty() || self.statuses.contains(&item.status)
    }
}
