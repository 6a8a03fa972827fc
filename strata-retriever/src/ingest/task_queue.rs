//! Durable prioritized task queue on SQLite.
//!
//! Tasks survive restarts: enqueue writes a row, the drain loop claims rows
//! in priority order, and terminal rows are kept (with their error text)
//! until retention-based pruning. Enqueueing a duplicate of a pending task
//! does not add a row; it raises the existing row's priority instead.

use anyhow::{Result, anyhow};
use sqlx::Row;
use sqlx::sqlite::{SqlitePool, SqliteRow};
use std::fmt;

/// What a task asks the processor to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    /// Read the source, re-split and re-vectorize if the content changed
    FileImport,
    /// Re-vectorize from stored content without touching the source
    VectorIndex,
}

impl TaskKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::FileImport => "file_import",
            TaskKind::VectorIndex => "vector_index",
        }
    }

    pub fn parse(text: &str) -> Option<Self> {
        match text {
            "file_import" => Some(TaskKind::FileImport),
            "vector_index" => Some(TaskKind::VectorIndex),
            _ => None,
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Processing => "processing",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }

    pub fn parse(text: &str) -> Option<Self> {
        match text {
            "pending" => Some(TaskStatus::Pending),
            "processing" => Some(TaskStatus::Processing),
            "completed" => Some(TaskStatus::Completed),
            "failed" => Some(TaskStatus::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }
}

/// One queue row.
#[derive(Debug, Clone)]
pub struct TaskRecord {
    pub id: i64,
    pub path: String,
    pub kind: TaskKind,
    pub priority: i64,
    pub status: TaskStatus,
    pub retry_count: u32,
    pub error: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Queue counts by status, for the stats surface.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub pending: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
}

impl QueueStats {
    pub fn total(&self) -> usize {
        self.pending + self.processing + self.completed + self.failed
    }
}

/// Persistent queue handle; cheap to clone, shares the pool.
#[derive(Clone)]
pub struct TaskQueue {
    pool: SqlitePool,
}

impl TaskQueue {
    pub async fn new(pool: SqlitePool) -> Result<Self> {
        let queue = Self { pool };
        queue.create_tables().await?;
        Ok(queue)
    }

    async fn create_tables(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS tasks (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                path TEXT NOT NULL,
                kind TEXT NOT NULL,
                priority INTEGER NOT NULL DEFAULT 0,
                status TEXT NOT NULL DEFAULT 'pending',
                retry_count INTEGER NOT NULL DEFAULT 0,
                error TEXT,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_tasks_status_priority ON tasks(status, priority DESC, created_at ASC)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Enqueue a task, deduplicating against non-terminal rows.
    ///
    /// When a pending or processing task for the same `(path, kind)` already
    /// exists, no new row is created; the existing row keeps the higher of
    /// the two priorities. Returns the task ID either way.
    pub async fn enqueue(&self, path: &str, kind: TaskKind, priority: i64) -> Result<i64> {
        let now = chrono::Utc::now().timestamp();
        let mut tx = self.pool.begin().await?;

        let existing = sqlx::query(
            "SELECT id, priority FROM tasks
             WHERE path = ? AND kind = ? AND status IN ('pending', 'processing')",
        )
        .bind(path)
        .bind(kind.as_str())
        .fetch_optional(&mut *tx)
        .await?;

        let id = match existing {
            Some(row) => {
                let id: i64 = row.get("id");
                let current: i64 = row.get("priority");
                if priority > current {
                    sqlx::query("UPDATE tasks SET priority = ?, updated_at = ? WHERE id = ?")
                        .bind(priority)
                        .bind(now)
                        .bind(id)
                        .execute(&mut *tx)
                        .await?;
                }
                id
            }
            None => {
                let row = sqlx::query(
                    "INSERT INTO tasks (path, kind, priority, status, created_at, updated_at)
                     VALUES (?, ?, ?, 'pending', ?, ?) RETURNING id",
                )
                .bind(path)
                .bind(kind.as_str())
                .bind(priority)
                .bind(now)
                .bind(now)
                .fetch_one(&mut *tx)
                .await?;
                row.get("id")
            }
        };

        tx.commit().await?;
        Ok(id)
    }

    /// Claim up to `limit` pending tasks, marking them processing.
    ///
    /// Order is priority descending, then age, then ID, so equal-priority
    /// tasks run first-come-first-served and the order is deterministic.
    pub async fn next_batch(&self, limit: usize) -> Result<Vec<TaskRecord>> {
        let now = chrono::Utc::now().timestamp();
        let mut tx = self.pool.begin().await?;

        let rows = sqlx::query(
            "SELECT * FROM tasks WHERE status = 'pending'
             ORDER BY priority DESC, created_at ASC, id ASC LIMIT ?",
        )
        .bind(limit as i64)
        .fetch_all(&mut *tx)
        .await?;

        let mut tasks = Vec::with_capacity(rows.len());
        for row in rows {
            let mut task = row_to_task(row)?;
            sqlx::query("UPDATE tasks SET status = 'processing', updated_at = ? WHERE id = ?")
                .bind(now)
                .bind(task.id)
                .execute(&mut *tx)
                .await?;
            task.status = TaskStatus::Processing;
            tasks.push(task);
        }

        tx.commit().await?;
        Ok(tasks)
    }

    pub async fn mark_completed(&self, id: i64) -> Result<()> {
        sqlx::query("UPDATE tasks SET status = 'completed', error = NULL, updated_at = ? WHERE id = ?")
            .bind(chrono::Utc::now().timestamp())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Record a failed attempt. Returns the task back to pending until the
    /// retry budget is spent, then marks it failed for good. The error text
    /// is kept on the row in both cases.
    pub async fn mark_failed(&self, id: i64, error: &str, max_retries: u32) -> Result<TaskStatus> {
        let now = chrono::Utc::now().timestamp();
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query("SELECT retry_count FROM tasks WHERE id = ?")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| anyhow!("task {id} not found"))?;
        let retry_count: i64 = row.get("retry_count");
        let retry_count = retry_count as u32 + 1;

        let status = if retry_count >= max_retries {
            TaskStatus::Failed
        } else {
            TaskStatus::Pending
        };

        sqlx::query(
            "UPDATE tasks SET status = ?, retry_count = ?, error = ?, updated_at = ? WHERE id = ?",
        )
        .bind(status.as_str())
        .bind(retry_count as i64)
        .bind(error)
        .bind(now)
        .bind(id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(status)
    }

    pub async fn get_task(&self, id: i64) -> Result<Option<TaskRecord>> {
        let row = sqlx::query("SELECT * FROM tasks WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(row_to_task).transpose()
    }

    pub async fn stats(&self) -> Result<QueueStats> {
        let rows = sqlx::query("SELECT status, COUNT(*) AS n FROM tasks GROUP BY status")
            .fetch_all(&self.pool)
            .await?;

        let mut stats = QueueStats::default();
        for row in rows {
            let status: String = row.get("status");
            let n = row.get::<i64, _>("n") as usize;
            match TaskStatus::parse(&status) {
                Some(TaskStatus::Pending) => stats.pending = n,
                Some(TaskStatus::Processing) => stats.processing = n,
                Some(TaskStatus::Completed) => stats.completed = n,
                Some(TaskStatus::Failed) => stats.failed = n,
                None => {}
            }
        }
        Ok(stats)
    }

    /// Reset tasks stranded in processing by a crashed owner.
    pub async fn reset_stranded(&self) -> Result<usize> {
        let result = sqlx::query(
            "UPDATE tasks SET status = 'pending', updated_at = ? WHERE status = 'processing'",
        )
        .bind(chrono::Utc::now().timestamp())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() as usize)
    }

    /// Delete terminal tasks older than `retention_days`.
    pub async fn prune_finished(&self, retention_days: i64) -> Result<usize> {
        let cutoff = chrono::Utc::now().timestamp() - retention_days * 24 * 3600;
        let result = sqlx::query(
            "DELETE FROM tasks WHERE status IN ('completed', 'failed') AND updated_at <= ?",
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() as usize)
    }
}

fn row_to_task(row: SqliteRow) -> Result<TaskRecord> {
    let kind_text: String = row.get("kind");
    let kind = TaskKind::parse(&kind_text)
        .ok_or_else(|| anyhow!("unknown task kind {kind_text:?} in tasks table"))?;
    let status_text: String = row.get("status");
    let status = TaskStatus::parse(&status_text)
        .ok_or_else(|| anyhow!("unknown task status {status_text:?} in tasks table"))?;
    Ok(TaskRecord {
        id: row.get("id"),
        path: row.get("path"),
        kind,
        priority: row.get("priority"),
        status,
        retry_count: row.get::<i64, _>("retry_count") as u32,
        error: row.get("error"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}
