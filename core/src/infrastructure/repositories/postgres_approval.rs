// Copyright (c) 2026 Conduit Systems
// SPDX-License-Identifier: AGPL-3.0

use async_trait::async_trait;
use sqlx::postgres::PgPool;
use sqlx::Row;

use crate::domain::approval::{Approval, ApprovalStatus};
use crate::domain::ids::{ApprovalId, TaskId, WorkspaceId};
use crate::domain::repository::{ApprovalRepository, RepositoryError};

pub struct PostgresApprovalRepository {
    pool: PgPool,
}

impl PostgresApprovalRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn status_str(status: ApprovalStatus) -> &'static str {
    match status {
        ApprovalStatus::Pending => "pending",
        ApprovalStatus::Approved => "approved",
        ApprovalStatus::Denied => "denied",
    }
}

fn parse_status(raw: &str) -> ApprovalStatus {
    match raw {
        "approved" => ApprovalStatus::Approved,
        "denied" => ApprovalStatus::Denied,
        _ => ApprovalStatus::Pending,
    }
}

fn row_to_approval(row: &sqlx::postgres::PgRow) -> Result<Approval, RepositoryError> {
    Ok(Approval {
        id: ApprovalId::from_uuid(row.get("id")),
        task_id: TaskId::from_uuid(row.get("task_id")),
        workspace_id: WorkspaceId::from_uuid(row.get("workspace_id")),
        call_id: row.get("call_id"),
        tool_path: row.get("tool_path"),
        input: row.get("input"),
        status: parse_status(row.get::<String, _>("status").as_str()),
        reviewer_id: row.get("reviewer_id"),
        reason: row.get("reason"),
        created_at: row.get("created_at"),
        resolved_at: row.get("resolved_at"),
    })
}

#[async_trait]
impl ApprovalRepository for PostgresApprovalRepository {
    async fn create_approval(
        &self,
        task_id: TaskId,
        workspace_id: WorkspaceId,
        call_id: String,
        tool_path: String,
        input: serde_json::Value,
    ) -> Result<Approval, RepositoryError> {
        let id = ApprovalId::new();
        let row = sqlx::query(
            r#"
            INSERT INTO approvals (id, task_id, workspace_id, call_id, tool_path, input, status, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, 'pending', now())
            RETURNING *
            "#,
        )
        .bind(id.0)
        .bind(task_id.0)
        .bind(workspace_id.0)
        .bind(&call_id)
        .bind(&tool_path)
        .bind(&input)
        .fetch_one(&self.pool)
        .await?;
        row_to_approval(&row)
    }

    async fn get_approval(&self, id: ApprovalId) -> Result<Option<Approval>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM approvals WHERE id = $1")
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_approval).transpose()
    }

    async fn resolve_approval(
        &self,
        id: ApprovalId,
        decision: ApprovalStatus,
        reviewer_id: Option<String>,
        reason: Option<String>,
    ) -> Result<Approval, RepositoryError> {
        // Conditional on status = pending; a no-op UPDATE leaves the row
        // untouched so a concurrent second resolve always loses (spec P4).
        let row = sqlx::query(
            r#"
            UPDATE approvals
            SET status = $2, reviewer_id = $3, reason = $4, resolved_at = now()
            WHERE id = $1 AND status = 'pending'
            RETURNING *
            "#,
        )
        .bind(id.0)
        .bind(status_str(decision))
        .bind(reviewer_id)
        .bind(reason)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => row_to_approval(&row),
            None => self
                .get_approval(id)
                .await?
                .ok_or_else(|| RepositoryError::NotFound(format!("approval {id}"))),
        }
    }
}
