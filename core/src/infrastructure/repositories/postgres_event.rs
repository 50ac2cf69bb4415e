// Copyright (c) 2026 Conduit Systems
// SPDX-License-Identifier: AGPL-3.0

use async_trait::async_trait;
use sqlx::postgres::PgPool;
use sqlx::Row;

use crate::domain::event::{EventPayload, TaskEvent};
use crate::domain::ids::TaskId;
use crate::domain::repository::{EventRepository, RepositoryError};

pub struct PostgresEventRepository {
    pool: PgPool,
}

impl PostgresEventRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EventRepository for PostgresEventRepository {
    async fn append_task_event(&self, task_id: TaskId, payload: EventPayload) -> Result<TaskEvent, RepositoryError> {
        let payload_json = serde_json::to_value(&payload)?;
        let type_name = payload.type_name();

        let mut tx = self.pool.begin().await?;

        // Serialize concurrent appends for this task: an advisory lock scoped
        // to the transaction, released automatically on commit/rollback, so
        // the MAX(sequence)+1 read below is linearizable per taskId.
        sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1::text, 0))")
            .bind(task_id.0)
            .execute(&mut *tx)
            .await?;

        let next_sequence: i64 = sqlx::query_scalar("SELECT COALESCE(MAX(sequence), 0) + 1 FROM task_events WHERE task_id = $1")
            .bind(task_id.0)
            .fetch_one(&mut *tx)
            .await?;

        let row = sqlx::query(
            r#"
            INSERT INTO task_events (task_id, sequence, type, payload, created_at)
            VALUES ($1, $2, $3, $4, now())
            RETURNING created_at
            "#,
        )
        .bind(task_id.0)
        .bind(next_sequence)
        .bind(type_name)
        .bind(&payload_json)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(TaskEvent {
            sequence: next_sequence,
            task_id,
            payload,
            created_at: row.get("created_at"),
        })
    }

    async fn list_task_events(&self, task_id: TaskId) -> Result<Vec<TaskEvent>, RepositoryError> {
        let rows = sqlx::query("SELECT sequence, payload, created_at FROM task_events WHERE task_id = $1 ORDER BY sequence ASC")
            .bind(task_id.0)
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter()
            .map(|row| {
                let payload_val: serde_json::Value = row.get("payload");
                Ok(TaskEvent {
                    sequence: row.get("sequence"),
                    task_id,
                    payload: serde_json::from_value(payload_val)?,
                    created_at: row.get("created_at"),
                })
            })
            .collect()
    }
}
