// Copyright (c) 2026 Conduit Systems
// SPDX-License-Identifier: AGPL-3.0

use async_trait::async_trait;
use sqlx::postgres::PgPool;
use sqlx::Row;

use crate::domain::ids::{BuildId, WorkspaceId};
use crate::domain::registry_build::RegistryState;
use crate::domain::repository::{RegistryRepository, RepositoryError};
use crate::domain::tool_definition::ToolDefinition;

pub struct PostgresRegistryRepository {
    pool: PgPool,
}

impl PostgresRegistryRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn row_to_state(row: &sqlx::postgres::PgRow, workspace_id: WorkspaceId) -> RegistryState {
    RegistryState {
        workspace_id,
        signature: row.get("signature"),
        ready_build_id: row.get::<Option<uuid::Uuid>, _>("ready_build_id").map(BuildId),
        building_build_id: row.get::<Option<uuid::Uuid>, _>("building_build_id").map(BuildId),
    }
}

#[async_trait]
impl RegistryRepository for PostgresRegistryRepository {
    async fn get_registry_state(&self, workspace_id: WorkspaceId) -> Result<RegistryState, RepositoryError> {
        let row = sqlx::query("SELECT * FROM registry_states WHERE workspace_id = $1")
            .bind(workspace_id.0)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(|r| row_to_state(r, workspace_id)).unwrap_or_else(|| RegistryState::empty(workspace_id)))
    }

    async fn begin_build(&self, workspace_id: WorkspaceId, signature: String, build_id: BuildId) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO registry_states (workspace_id, building_build_id)
            VALUES ($1, $2)
            ON CONFLICT (workspace_id) DO UPDATE SET building_build_id = $2
            "#,
        )
        .bind(workspace_id.0)
        .bind(build_id.0)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO registry_builds (id, workspace_id, signature, created_at)
            VALUES ($1, $2, $3, now())
            "#,
        )
        .bind(build_id.0)
        .bind(workspace_id.0)
        .bind(&signature)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn put_tools_batch(&self, build_id: BuildId, tools: Vec<ToolDefinition>) -> Result<(), RepositoryError> {
        for tool in &tools {
            let tool_json = serde_json::to_value(tool)?;
            sqlx::query("INSERT INTO registry_build_tools (build_id, tool) VALUES ($1, $2)")
                .bind(build_id.0)
                .bind(&tool_json)
                .execute(&self.pool)
                .await?;
        }
        Ok(())
    }

    async fn put_namespaces_batch(&self, build_id: BuildId, namespaces: Vec<String>) -> Result<(), RepositoryError> {
        for namespace in &namespaces {
            sqlx::query("INSERT INTO registry_build_namespaces (build_id, namespace) VALUES ($1, $2)")
                .bind(build_id.0)
                .bind(namespace)
                .execute(&self.pool)
                .await?;
        }
        Ok(())
    }

    async fn finish_build(&self, build_id: BuildId, warnings: Vec<String>) -> Result<(), RepositoryError> {
        let warnings_json = serde_json::to_value(&warnings)?;
        let mut tx = self.pool.begin().await?;

        let build_row = sqlx::query("UPDATE registry_builds SET warnings = $2, finished_at = now() WHERE id = $1 RETURNING workspace_id, signature")
            .bind(build_id.0)
            .bind(&warnings_json)
            .fetch_one(&mut *tx)
            .await?;
        let workspace_id: uuid::Uuid = build_row.get("workspace_id");
        let signature: String = build_row.get("signature");

        sqlx::query(
            r#"
            INSERT INTO registry_states (workspace_id, signature, ready_build_id, building_build_id)
            VALUES ($1, $2, $3, NULL)
            ON CONFLICT (workspace_id) DO UPDATE
            SET signature = $2, ready_build_id = $3, building_build_id = NULL
            "#,
        )
        .bind(workspace_id)
        .bind(&signature)
        .bind(build_id.0)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn fail_build(&self, build_id: BuildId, reason: String) -> Result<(), RepositoryError> {
        let row = sqlx::query("SELECT workspace_id FROM registry_builds WHERE id = $1")
            .bind(build_id.0)
            .fetch_optional(&self.pool)
            .await?;
        if let Some(row) = row {
            let workspace_id: uuid::Uuid = row.get("workspace_id");
            sqlx::query("UPDATE registry_states SET building_build_id = NULL WHERE workspace_id = $1 AND building_build_id = $2")
                .bind(workspace_id)
                .bind(build_id.0)
                .execute(&self.pool)
                .await?;
        }
        tracing::warn!(build_id = %build_id, reason, "registry build failed");
        Ok(())
    }

    async fn get_ready_tools(&self, workspace_id: WorkspaceId) -> Result<Vec<ToolDefinition>, RepositoryError> {
        let rows = sqlx::query(
            r#"
            SELECT rbt.tool AS tool
            FROM registry_build_tools rbt
            JOIN registry_states rs ON rs.ready_build_id = rbt.build_id
            WHERE rs.workspace_id = $1
            "#,
        )
        .bind(workspace_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                let tool_val: serde_json::Value = row.get("tool");
                Ok(serde_json::from_value(tool_val)?)
            })
            .collect()
    }
}
