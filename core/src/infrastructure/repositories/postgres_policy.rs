// Copyright (c) 2026 Conduit Systems
// SPDX-License-Identifier: AGPL-3.0

use async_trait::async_trait;
use sqlx::postgres::PgPool;
use sqlx::Row;

use crate::domain::ids::{ActorId, ClientId, PolicyId, WorkspaceId};
use crate::domain::policy::{AccessPolicy, Decision};
use crate::domain::repository::{PolicyRepository, RepositoryError};

pub struct PostgresPolicyRepository {
    pool: PgPool,
}

impl PostgresPolicyRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn parse_decision(raw: &str) -> Decision {
    match raw {
        "deny" => Decision::Deny,
        "require_approval" => Decision::RequireApproval,
        _ => Decision::Allow,
    }
}

fn row_to_policy(row: &sqlx::postgres::PgRow) -> AccessPolicy {
    AccessPolicy {
        id: PolicyId::from_uuid(row.get("id")),
        workspace_id: WorkspaceId::from_uuid(row.get("workspace_id")),
        actor_id: row.get::<Option<String>, _>("actor_id").map(ActorId),
        client_id: row.get::<Option<String>, _>("client_id").map(ClientId),
        tool_path_pattern: row.get("tool_path_pattern"),
        decision: parse_decision(row.get::<String, _>("decision").as_str()),
        priority: row.get("priority"),
    }
}

#[async_trait]
impl PolicyRepository for PostgresPolicyRepository {
    async fn list_access_policies(&self, workspace_id: WorkspaceId) -> Result<Vec<AccessPolicy>, RepositoryError> {
        let rows = sqlx::query("SELECT * FROM access_policies WHERE workspace_id = $1")
            .bind(workspace_id.0)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(row_to_policy).collect())
    }

    async fn get_policy(&self, id: PolicyId) -> Result<Option<AccessPolicy>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM access_policies WHERE id = $1")
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(row_to_policy))
    }
}
