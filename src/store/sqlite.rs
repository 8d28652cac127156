//! SQLite-backed content store
//!
//! Uses a `Mutex<Connection>`; statements are short and never held across an
//! await point.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};

use super::{new_work_item, ContentStore, StoreError, StoreResult};
use crate::models::{
    ContentFilter, ContentItem, ContentStatus, Language, NewWorkItem, WorkFilter, WorkItem,
    WorkItemKind, WorkItemPatch, WorkItemStatus,
};

const CONTENT_COLUMNS: &str = "id, title, body, source, category, status, created_at";
const WORK_ITEM_COLUMNS: &str =
    "id, kind, content_id, language, status, payload, error, created_at, updated_at, started_at";

/// Content store persisted in a SQLite database
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) a database file
    pub fn new(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| StoreError::InvalidValue {
                    field: "sqlite_path",
                    value: format!("{}: {e}", parent.display()),
                })?;
            }
        }

        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;

        let store = Self {
            conn: Mutex::new(conn),
        };
        store.create_schema()?;
        Ok(store)
    }

    /// Create an in-memory database (for testing)
    pub fn in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.create_schema()?;
        Ok(store)
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StoreError::LockPoisoned)
    }

    fn create_schema(&self) -> StoreResult<()> {
        let conn = self.lock()?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS content (
                id TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                body TEXT NOT NULL,
                source TEXT NOT NULL DEFAULT '{}',
                category TEXT,
                status TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_content_status ON content(status);

            CREATE TABLE IF NOT EXISTS work_items (
                id TEXT PRIMARY KEY,
                kind TEXT NOT NULL,
                content_id TEXT NOT NULL,
                language TEXT NOT NULL,
                status TEXT NOT NULL,
                payload TEXT NOT NULL,
                error TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                started_at TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_work_items_status ON work_items(kind, status);
            CREATE INDEX IF NOT EXISTS idx_work_items_content ON work_items(content_id, language);
            "#,
        )?;
        Ok(())
    }

    fn load_work_item(conn: &Connection, id: &str) -> StoreResult<Option<WorkItem>> {
        let item = conn
            .query_row(
                &format!("SELECT {WORK_ITEM_COLUMNS} FROM work_items WHERE id = ?1"),
                params![id],
                work_item_from_row,
            )
            .optional()?;
        Ok(item)
    }
}

fn conversion_error<E>(idx: usize, err: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err))
}

fn parse_timestamp(idx: usize, value: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion_error(idx, e))
}

fn invalid(idx: usize, field: &'static str, value: String) -> rusqlite::Error {
    conversion_error(idx, StoreError::InvalidValue { field, value })
}

fn content_from_row(row: &Row<'_>) -> rusqlite::Result<ContentItem> {
    let source: String = row.get(3)?;
    let status: String = row.get(5)?;
    let created_at: String = row.get(6)?;

    Ok(ContentItem {
        id: row.get(0)?,
        title: row.get(1)?,
        body: row.get(2)?,
        source: serde_json::from_str::<HashMap<String, String>>(&source)
            .map_err(|e| conversion_error(3, e))?,
        category: row.get(4)?,
        status: ContentStatus::parse(&status).ok_or_else(|| invalid(5, "status", status))?,
        created_at: parse_timestamp(6, &created_at)?,
    })
}

fn work_item_from_row(row: &Row<'_>) -> rusqlite::Result<WorkItem> {
    let kind: String = row.get(1)?;
    let language: String = row.get(3)?;
    let status: String = row.get(4)?;
    let payload: String = row.get(5)?;
    let created_at: String = row.get(7)?;
    let updated_at: String = row.get(8)?;
    let started_at: Option<String> = row.get(9)?;

    Ok(WorkItem {
        id: row.get(0)?,
        kind: WorkItemKind::parse(&kind).ok_or_else(|| invalid(1, "kind", kind))?,
        content_id: row.get(2)?,
        language: Language::new(language),
        status: WorkItemStatus::parse(&status).ok_or_else(|| invalid(4, "status", status))?,
        payload: serde_json::from_str(&payload).map_err(|e| conversion_error(5, e))?,
        error: row.get(6)?,
        created_at: parse_timestamp(7, &created_at)?,
        updated_at: parse_timestamp(8, &updated_at)?,
        started_at: started_at
            .map(|s| parse_timestamp(9, &s))
            .transpose()?,
    })
}

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

#[async_trait]
impl ContentStore for SqliteStore {
    async fn list_content(&self, filter: &ContentFilter) -> StoreResult<Vec<ContentItem>> {
        let statuses: Vec<&str> = filter.statuses.iter().map(|s| s.as_str()).collect();

        let mut sql = format!("SELECT {CONTENT_COLUMNS} FROM content");
        if !statuses.is_empty() {
            sql.push_str(&format!(" WHERE status IN ({})", placeholders(statuses.len())));
        }
        sql.push_str(" ORDER BY created_at, id");
        if let Some(limit) = filter.limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }

        let conn = self.lock()?;
        let mut stmt = conn.prepare(&sql)?;
        let items = stmt
            .query_map(params_from_iter(statuses.iter()), content_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(items)
    }

    async fn get_content(&self, id: &str) -> StoreResult<ContentItem> {
        let conn = self.lock()?;
        conn.query_row(
            &format!("SELECT {CONTENT_COLUMNS} FROM content WHERE id = ?1"),
            params![id],
            content_from_row,
        )
        .optional()?
        .ok_or_else(|| StoreError::ContentNotFound(id.to_string()))
    }

    async fn insert_content(&self, item: &ContentItem) -> StoreResult<()> {
        let source = serde_json::to_string(&item.source)?;
        let conn = self.lock()?;
        conn.execute(
            r#"
            INSERT OR REPLACE INTO content (id, title, body, source, category, status, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
            params![
                item.id,
                item.title,
                item.body,
                source,
                item.category,
                item.status.as_str(),
                item.created_at.to_rfc3339()
            ],
        )?;
        Ok(())
    }

    async fn set_status(&self, id: &str, status: ContentStatus) -> StoreResult<()> {
        let conn = self.lock()?;
        let updated = conn.execute(
            "UPDATE content SET status = ?1 WHERE id = ?2",
            params![status.as_str(), id],
        )?;
        if updated == 0 {
            return Err(StoreError::ContentNotFound(id.to_string()));
        }
        Ok(())
    }

    async fn create_work_item(
        &self,
        kind: WorkItemKind,
        new: NewWorkItem,
    ) -> StoreResult<WorkItem> {
        let item = new_work_item(kind, new);
        let payload = serde_json::to_string(&item.payload)?;

        let conn = self.lock()?;
        conn.execute(
            &format!(
                "INSERT INTO work_items ({WORK_ITEM_COLUMNS}) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"
            ),
            params![
                item.id,
                item.kind.as_str(),
                item.content_id,
                item.language.as_str(),
                item.status.as_str(),
                payload,
                item.error,
                item.created_at.to_rfc3339(),
                item.updated_at.to_rfc3339(),
                item.started_at.map(|t| t.to_rfc3339()),
            ],
        )?;
        Ok(item)
    }

    async fn list_work_items(&self, filter: &WorkFilter) -> StoreResult<Vec<WorkItem>> {
        let mut clauses = Vec::new();
        let mut values: Vec<String> = Vec::new();

        if let Some(kind) = filter.kind {
            clauses.push("kind = ?".to_string());
            values.push(kind.as_str().to_string());
        }
        if !filter.statuses.is_empty() {
            clauses.push(format!("status IN ({})", placeholders(filter.statuses.len())));
            values.extend(filter.statuses.iter().map(|s| s.as_str().to_string()));
        }
        if let Some(language) = &filter.language {
            clauses.push("language = ?".to_string());
            values.push(language.as_str().to_string());
        }
        if let Some(content_id) = &filter.content_id {
            clauses.push("content_id = ?".to_string());
            values.push(content_id.clone());
        }

        let mut sql = format!("SELECT {WORK_ITEM_COLUMNS} FROM work_items");
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        sql.push_str(" ORDER BY created_at, id");
        if let Some(limit) = filter.limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }

        let conn = self.lock()?;
        let mut stmt = conn.prepare(&sql)?;
        let items = stmt
            .query_map(params_from_iter(values.iter()), work_item_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(items)
    }

    async fn update_work_item(&self, id: &str, patch: WorkItemPatch) -> StoreResult<WorkItem> {
        let conn = self.lock()?;
        let mut item = Self::load_work_item(&conn, id)?
            .ok_or_else(|| StoreError::WorkItemNotFound(id.to_string()))?;
        patch.apply(&mut item);

        let payload = serde_json::to_string(&item.payload)?;
        conn.execute(
            r#"
            UPDATE work_items
            SET status = ?1, payload = ?2, error = ?3, updated_at = ?4, started_at = ?5
            WHERE id = ?6
            "#,
            params![
                item.status.as_str(),
                payload,
                item.error,
                item.updated_at.to_rfc3339(),
                item.started_at.map(|t| t.to_rfc3339()),
                id
            ],
        )?;
        Ok(item)
    }

    async fn purge_work_items(&self, before: DateTime<Utc>) -> StoreResult<usize> {
        let conn = self.lock()?;
        let deleted = conn.execute(
            "DELETE FROM work_items WHERE status IN ('completed', 'failed', 'rejected') \
             AND updated_at < ?1",
            params![before.to_rfc3339()],
        )?;
        Ok(deleted)
    }

    async fn health_check(&self) -> StoreResult<()> {
        let conn = self.lock()?;
        conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_content_round_trip_with_metadata() {
        let store = SqliteStore::in_memory().unwrap();
        let item = ContentItem::new("c1", "Quantum chips", "A new processor")
            .with_category("technology")
            .with_source("origin", "wire");
        store.insert_content(&item).await.unwrap();

        let loaded = store.get_content("c1").await.unwrap();
        assert_eq!(loaded.title, "Quantum chips");
        assert_eq!(loaded.category.as_deref(), Some("technology"));
        assert_eq!(loaded.source.get("origin").map(String::as_str), Some("wire"));
        assert_eq!(loaded.status, ContentStatus::Discovered);
    }

    #[tokio::test]
    async fn test_set_status_missing_row() {
        let store = SqliteStore::in_memory().unwrap();
        let err = store
            .set_status("nope", ContentStatus::Rejected)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::ContentNotFound(_)));
    }

    #[tokio::test]
    async fn test_work_item_filter_and_update() {
        let store = SqliteStore::in_memory().unwrap();
        let review = store
            .create_work_item(
                WorkItemKind::Review,
                NewWorkItem::new("c1", Language::new("fr"), WorkItemStatus::AwaitingReview)
                    .with_payload(serde_json::json!({"score": 80})),
            )
            .await
            .unwrap();
        store
            .create_work_item(
                WorkItemKind::Production,
                NewWorkItem::new("c2", Language::new("fr"), WorkItemStatus::Pending),
            )
            .await
            .unwrap();

        let reviews = store
            .list_work_items(
                &WorkFilter::kind(WorkItemKind::Review)
                    .with_statuses(&[WorkItemStatus::AwaitingReview]),
            )
            .await
            .unwrap();
        assert_eq!(reviews.len(), 1);
        assert_eq!(reviews[0].payload["score"], 80);

        let updated = store
            .update_work_item(&review.id, WorkItemPatch::status(WorkItemStatus::Approved))
            .await
            .unwrap();
        assert_eq!(updated.status, WorkItemStatus::Approved);

        let approved = store
            .list_work_items(&WorkFilter::default().with_statuses(&[WorkItemStatus::Approved]))
            .await
            .unwrap();
        assert_eq!(approved.len(), 1);
    }

    #[tokio::test]
    async fn test_file_backed_store_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("polycast.db");

        {
            let store = SqliteStore::new(&path).unwrap();
            store
                .insert_content(&ContentItem::new("c1", "Persisted", "body"))
                .await
                .unwrap();
        }

        let reopened = SqliteStore::new(&path).unwrap();
        assert!(reopened.get_content("c1").await.is_ok());
        assert!(reopened.health_check().await.is_ok());
    }
}
