// Copyright (c) 2026 Conduit Systems
// SPDX-License-Identifier: AGPL-3.0

use async_trait::async_trait;
use sqlx::postgres::PgPool;
use sqlx::Row;

use crate::domain::ids::{ToolSourceId, WorkspaceId};
use crate::domain::repository::{RepositoryError, ToolSourceRepository};
use crate::domain::tool_source::{ToolSource, ToolSourceConfig};

pub struct PostgresToolSourceRepository {
    pool: PgPool,
}

impl PostgresToolSourceRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn row_to_tool_source(row: &sqlx::postgres::PgRow) -> Result<ToolSource, RepositoryError> {
    let config_val: serde_json::Value = row.get("config");
    Ok(ToolSource {
        id: ToolSourceId::from_uuid(row.get("id")),
        workspace_id: WorkspaceId::from_uuid(row.get("workspace_id")),
        name: row.get("name"),
        config: serde_json::from_value::<ToolSourceConfig>(config_val)?,
        enabled: row.get("enabled"),
        spec_hash: row.get("spec_hash"),
        auth_fingerprint: row.get("auth_fingerprint"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

#[async_trait]
impl ToolSourceRepository for PostgresToolSourceRepository {
    async fn list_tool_sources(&self, workspace_id: WorkspaceId) -> Result<Vec<ToolSource>, RepositoryError> {
        let rows = sqlx::query("SELECT * FROM tool_sources WHERE workspace_id = $1")
            .bind(workspace_id.0)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_tool_source).collect()
    }

    async fn get_tool_source(&self, id: ToolSourceId) -> Result<Option<ToolSource>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM tool_sources WHERE id = $1")
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_tool_source).transpose()
    }
}
