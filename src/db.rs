//! SQLite task store

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use crate::error::StoreError;
use crate::models::{DATE_FORMAT, NewTask, Task, TaskPatch, ViewFilter, ViewSort};
use crate::store::{ChangeBus, ChangeFeed, ChangeKind, TaskStore};

const TASK_COLUMNS: &str = "id, owner, title, description, priority, status, is_completed, \
                            due_date, created_at, updated_at";

/// Thread-safe database wrapper
pub struct Database {
    conn: Mutex<Connection>,
    changes: ChangeBus,
}

impl Database {
    /// Open or create the database
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| {
                StoreError::Unavailable(format!("failed to create database directory: {}", e))
            })?;
        }

        Self::with_connection(Connection::open(path)?)
    }

    /// Private in-memory database
    pub fn open_memory() -> Result<Self, StoreError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, StoreError> {
        let db = Self {
            conn: Mutex::new(conn),
            changes: ChangeBus::default(),
        };
        db.init()?;
        Ok(db)
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Unavailable("database lock poisoned".to_string()))
    }

    /// Initialize the database schema
    fn init(&self) -> Result<(), StoreError> {
        let conn = self.conn()?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS tasks (
                id TEXT PRIMARY KEY,
                owner TEXT NOT NULL,
                title TEXT NOT NULL CHECK (length(title) BETWEEN 1 AND 255),
                description TEXT CHECK (description IS NULL OR length(description) <= 1000),
                priority TEXT NOT NULL DEFAULT 'medium'
                    CHECK (priority IN ('low', 'medium', 'high')),
                status TEXT NOT NULL DEFAULT 'todo'
                    CHECK (status IN ('todo', 'in_progress', 'completed')),
                is_completed INTEGER NOT NULL DEFAULT 0,
                due_date TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                CHECK ((status = 'completed') = (is_completed = 1))
            );

            CREATE INDEX IF NOT EXISTS idx_tasks_owner_created ON tasks(owner, created_at);
            "#,
        )?;

        Ok(())
    }

    /// Insert a validated task and return the stored row
    pub fn insert_task(&self, owner: &str, new_task: &NewTask) -> Result<Task, StoreError> {
        let new_task = new_task.clone().validated()?;
        let id = uuid::Uuid::new_v4().to_string();
        let now = timestamp(Utc::now());

        let task = {
            let conn = self.conn()?;
            conn.execute(
                r#"INSERT INTO tasks (id, owner, title, description, priority, status,
                   is_completed, due_date, created_at, updated_at)
                   VALUES (?1, ?2, ?3, ?4, ?5, 'todo', 0, ?6, ?7, ?7)"#,
                params![
                    &id,
                    owner,
                    &new_task.title,
                    &new_task.description,
                    new_task.priority.unwrap_or_default().as_str(),
                    new_task.due_date.map(|d| d.format(DATE_FORMAT).to_string()),
                    &now,
                ],
            )?;
            get_task(&conn, owner, &id)?
        };

        tracing::debug!(owner, task_id = %task.id, "Task inserted");
        self.changes.publish(owner, &task.id, ChangeKind::Insert);
        Ok(task)
    }

    /// Merge a partial update into an existing row
    pub fn update_task(&self, owner: &str, id: &str, patch: &TaskPatch) -> Result<Task, StoreError> {
        let task = {
            let conn = self.conn()?;
            let mut task = get_task(&conn, owner, id)?;
            task.apply_patch(patch, Utc::now())?;

            conn.execute(
                r#"UPDATE tasks SET title = ?3, description = ?4, priority = ?5, status = ?6,
                   is_completed = ?7, due_date = ?8, updated_at = ?9
                   WHERE id = ?1 AND owner = ?2"#,
                params![
                    id,
                    owner,
                    &task.title,
                    &task.description,
                    task.priority.as_str(),
                    task.status.as_str(),
                    task.is_completed as i32,
                    task.due_date.map(|d| d.format(DATE_FORMAT).to_string()),
                    timestamp(task.updated_at),
                ],
            )?;
            get_task(&conn, owner, id)?
        };

        tracing::debug!(owner, task_id = id, "Task updated");
        self.changes.publish(owner, id, ChangeKind::Update);
        Ok(task)
    }

    pub fn delete_task(&self, owner: &str, id: &str) -> Result<(), StoreError> {
        let deleted = {
            let conn = self.conn()?;
            conn.execute(
                "DELETE FROM tasks WHERE id = ?1 AND owner = ?2",
                params![id, owner],
            )?
        };

        if deleted == 0 {
            return Err(StoreError::NotFound(id.to_string()));
        }

        tracing::debug!(owner, task_id = id, "Task deleted");
        self.changes.publish(owner, id, ChangeKind::Delete);
        Ok(())
    }

    pub fn query_tasks(
        &self,
        owner: &str,
        filter: ViewFilter,
        sort: ViewSort,
    ) -> Result<Vec<Task>, StoreError> {
        let conn = self.conn()?;

        let completed = match filter {
            ViewFilter::All => None,
            ViewFilter::Active => Some(0),
            ViewFilter::Completed => Some(1),
        };

        let mut tasks = if let Some(completed) = completed {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM tasks WHERE owner = ?1 AND is_completed = ?2 \
                 ORDER BY created_at DESC",
                TASK_COLUMNS
            ))?;
            collect_tasks(&mut stmt, params![owner, completed])?
        } else {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM tasks WHERE owner = ?1 ORDER BY created_at DESC",
                TASK_COLUMNS
            ))?;
            collect_tasks(&mut stmt, params![owner])?
        };

        sort.sort(&mut tasks);
        Ok(tasks)
    }

    pub fn get(&self, owner: &str, id: &str) -> Result<Task, StoreError> {
        let conn = self.conn()?;
        get_task(&conn, owner, id)
    }

    /// Number of live change subscriptions
    pub fn subscriber_count(&self) -> usize {
        self.changes.subscriber_count()
    }
}

#[async_trait]
impl TaskStore for Database {
    async fn insert(&self, owner: &str, task: &NewTask) -> Result<Task, StoreError> {
        self.insert_task(owner, task)
    }

    async fn update(&self, owner: &str, id: &str, patch: &TaskPatch) -> Result<Task, StoreError> {
        self.update_task(owner, id, patch)
    }

    async fn delete(&self, owner: &str, id: &str) -> Result<(), StoreError> {
        self.delete_task(owner, id)
    }

    async fn query(
        &self,
        owner: &str,
        filter: ViewFilter,
        sort: ViewSort,
    ) -> Result<Vec<Task>, StoreError> {
        self.query_tasks(owner, filter, sort)
    }

    fn subscribe(&self, owner: &str) -> ChangeFeed {
        self.changes.subscribe(owner)
    }
}

// Fixed-width UTC timestamps so TEXT ordering matches time ordering
fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn get_task(conn: &Connection, owner: &str, id: &str) -> Result<Task, StoreError> {
    conn.query_row(
        &format!(
            "SELECT {} FROM tasks WHERE id = ?1 AND owner = ?2",
            TASK_COLUMNS
        ),
        params![id, owner],
        row_to_task,
    )
    .optional()?
    .ok_or_else(|| StoreError::NotFound(id.to_string()))
}

fn collect_tasks<P: rusqlite::Params>(
    stmt: &mut rusqlite::Statement,
    params: P,
) -> Result<Vec<Task>, StoreError> {
    let rows = stmt.query_map(params, row_to_task)?;
    rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
}

fn row_to_task(row: &rusqlite::Row) -> rusqlite::Result<Task> {
    let priority: String = row.get(4)?;
    let status: String = row.get(5)?;
    let due_date: Option<String> = row.get(7)?;

    Ok(Task {
        id: row.get(0)?,
        owner: row.get(1)?,
        title: row.get(2)?,
        description: row.get(3)?,
        priority: priority.parse().unwrap_or_default(),
        status: status.parse().unwrap_or_default(),
        is_completed: row.get::<_, i32>(6)? != 0,
        due_date: due_date.and_then(|d| NaiveDate::parse_from_str(&d, DATE_FORMAT).ok()),
        created_at: parse_timestamp(row.get(8)?, 8)?,
        updated_at: parse_timestamp(row.get(9)?, 9)?,
    })
}

fn parse_timestamp(raw: String, column: usize) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                column,
                rusqlite::types::Type::Text,
                Box::new(e),
            )
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Priority, Status};

    #[test]
    fn insert_and_read_back() {
        let db = Database::open_memory().unwrap();
        let due = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();
        let task = db
            .insert_task(
                "alice",
                &NewTask::new("Buy milk")
                    .with_priority(Priority::High)
                    .with_due_date(due),
            )
            .unwrap();

        assert!(!task.is_pending());
        assert_eq!(task.owner, "alice");
        assert_eq!(task.status, Status::Todo);
        assert!(!task.is_completed);
        assert_eq!(task.due_date, Some(due));
        assert_eq!(db.get("alice", &task.id).unwrap(), task);
    }

    #[test]
    fn rows_are_owner_scoped() {
        let db = Database::open_memory().unwrap();
        let task = db.insert_task("alice", &NewTask::new("Mine")).unwrap();

        assert!(matches!(
            db.get("bob", &task.id),
            Err(StoreError::NotFound(_))
        ));
        assert!(matches!(
            db.update_task("bob", &task.id, &TaskPatch::completed(true)),
            Err(StoreError::NotFound(_))
        ));
        assert!(matches!(
            db.delete_task("bob", &task.id),
            Err(StoreError::NotFound(_))
        ));
        assert!(
            db.query_tasks("bob", ViewFilter::All, ViewSort::Newest)
                .unwrap()
                .is_empty()
        );
    }

    #[test]
    fn update_keeps_status_and_flag_in_step() {
        let db = Database::open_memory().unwrap();
        let task = db.insert_task("alice", &NewTask::new("Report")).unwrap();

        let done = db
            .update_task("alice", &task.id, &TaskPatch::completed(true))
            .unwrap();
        assert_eq!(done.status, Status::Completed);
        assert!(done.is_completed);
        assert!(done.updated_at >= task.updated_at);

        let moved = db
            .update_task("alice", &task.id, &TaskPatch::status(Status::InProgress))
            .unwrap();
        assert_eq!(moved.status, Status::InProgress);
        assert!(!moved.is_completed);
    }

    #[test]
    fn filters_and_sorts() {
        let db = Database::open_memory().unwrap();
        let a = db.insert_task("alice", &NewTask::new("A")).unwrap();
        let b = db
            .insert_task("alice", &NewTask::new("B").with_priority(Priority::High))
            .unwrap();
        db.update_task("alice", &a.id, &TaskPatch::completed(true))
            .unwrap();

        let active = db
            .query_tasks("alice", ViewFilter::Active, ViewSort::Newest)
            .unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, b.id);

        let completed = db
            .query_tasks("alice", ViewFilter::Completed, ViewSort::Newest)
            .unwrap();
        assert_eq!(completed.len(), 1);
        assert_eq!(completed[0].id, a.id);

        let by_priority = db
            .query_tasks("alice", ViewFilter::All, ViewSort::Priority)
            .unwrap();
        assert_eq!(by_priority[0].id, b.id);
    }

    #[test]
    fn invalid_rows_are_rejected() {
        let db = Database::open_memory().unwrap();
        assert!(matches!(
            db.insert_task("alice", &NewTask::new("")),
            Err(StoreError::Validation(_))
        ));
        let task = db.insert_task("alice", &NewTask::new("ok")).unwrap();
        let patch = TaskPatch {
            title: Some("t".repeat(300)),
            ..Default::default()
        };
        assert!(matches!(
            db.update_task("alice", &task.id, &patch),
            Err(StoreError::Validation(_))
        ));
        assert!(matches!(
            db.delete_task("alice", "missing"),
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn writes_publish_owner_changes() {
        let db = Database::open_memory().unwrap();
        let mut feed = db.subscribe("alice");

        db.insert_task("bob", &NewTask::new("Not mine")).unwrap();
        let task = db.insert_task("alice", &NewTask::new("Mine")).unwrap();
        db.delete_task("alice", &task.id).unwrap();

        let first = feed.recv().await.unwrap();
        assert_eq!(first.kind, ChangeKind::Insert);
        assert_eq!(first.task_id.as_deref(), Some(task.id.as_str()));
        let second = feed.recv().await.unwrap();
        assert_eq!(second.kind, ChangeKind::Delete);
    }

    #[test]
    fn open_creates_parent_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("tasks.sqlite");
        let db = Database::open(&path).unwrap();
        db.insert_task("alice", &NewTask::new("Persisted")).unwrap();
        drop(db);

        let reopened = Database::open(&path).unwrap();
        let tasks = reopened
            .query_tasks("alice", ViewFilter::All, ViewSort::Newest)
            .unwrap();
        assert_eq!(tasks.len(), 1);
    }
}
