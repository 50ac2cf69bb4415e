// Copyright (c) 2026 Conduit Systems
// SPDX-License-Identifier: AGPL-3.0

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPool;
use sqlx::Row;

use crate::domain::ids::{ActorId, ClientId, TaskId, WorkspaceId};
use crate::domain::repository::{RepositoryError, TaskRepository};
use crate::domain::task::{NewTask, Task, TaskOutcome, TaskStatus};

pub struct PostgresTaskRepository {
    pool: PgPool,
}

impl PostgresTaskRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn status_str(status: TaskStatus) -> &'static str {
    match status {
        TaskStatus::Queued => "queued",
        TaskStatus::Running => "running",
        TaskStatus::Completed => "completed",
        TaskStatus::Failed => "failed",
        TaskStatus::TimedOut => "timed_out",
        TaskStatus::Denied => "denied",
    }
}

fn parse_status(raw: &str) -> TaskStatus {
    match raw {
        "running" => TaskStatus::Running,
        "completed" => TaskStatus::Completed,
        "failed" => TaskStatus::Failed,
        "timed_out" => TaskStatus::TimedOut,
        "denied" => TaskStatus::Denied,
        _ => TaskStatus::Queued,
    }
}

fn row_to_task(row: &sqlx::postgres::PgRow) -> Result<Task, RepositoryError> {
    let metadata_val: serde_json::Value = row.get("metadata");
    Ok(Task {
        id: TaskId::from_uuid(row.get("id")),
        workspace_id: WorkspaceId::from_uuid(row.get("workspace_id")),
        actor_id: ActorId(row.get("actor_id")),
        client_id: ClientId(row.get("client_id")),
        runtime_id: row.get("runtime_id"),
        code: row.get("code"),
        timeout_ms: row.get::<i64, _>("timeout_ms") as u64,
        metadata: serde_json::from_value(metadata_val)?,
        status: parse_status(row.get::<String, _>("status").as_str()),
        created_at: row.get("created_at"),
        started_at: row.get::<Option<DateTime<Utc>>, _>("started_at"),
        completed_at: row.get::<Option<DateTime<Utc>>, _>("completed_at"),
        updated_at: row.get("updated_at"),
        error: row.get("error"),
        stdout: row.get("stdout"),
        stderr: row.get("stderr"),
        exit_code: row.get::<Option<i32>, _>("exit_code"),
    })
}

#[async_trait]
impl TaskRepository for PostgresTaskRepository {
    async fn create_task(&self, new_task: NewTask) -> Result<Task, RepositoryError> {
        let id = TaskId::new();
        let now = Utc::now();
        let metadata_json = serde_json::to_value(&new_task.metadata)?;

        sqlx::query(
            r#"
            INSERT INTO tasks (
                id, workspace_id, actor_id, client_id, runtime_id, code, timeout_ms,
                metadata, status, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, 'queued', $9, $9)
            "#,
        )
        .bind(id.0)
        .bind(new_task.workspace_id.0)
        .bind(&new_task.actor_id.0)
        .bind(&new_task.client_id.0)
        .bind(&new_task.runtime_id)
        .bind(&new_task.code)
        .bind(new_task.timeout_ms as i64)
        .bind(metadata_json)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(Task::from_new(id, new_task, now))
    }

    async fn get_task(&self, id: TaskId) -> Result<Option<Task>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM tasks WHERE id = $1")
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_task).transpose()
    }

    async fn mark_task_running(&self, id: TaskId) -> Result<Option<Task>, RepositoryError> {
        let row = sqlx::query(
            r#"
            UPDATE tasks
            SET status = 'running', started_at = now(), updated_at = now()
            WHERE id = $1 AND status = 'queued'
            RETURNING *
            "#,
        )
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(row_to_task).transpose()
    }

    async fn mark_task_finished(&self, id: TaskId, outcome: TaskOutcome) -> Result<Option<Task>, RepositoryError> {
        let row = sqlx::query(
            r#"
            UPDATE tasks
            SET status = $2, stdout = $3, stderr = $4, exit_code = $5, error = $6,
                completed_at = now(), updated_at = now()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id.0)
        .bind(status_str(outcome.status))
        .bind(outcome.stdout)
        .bind(outcome.stderr)
        .bind(outcome.exit_code)
        .bind(outcome.error)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(row_to_task).transpose()
    }
}
