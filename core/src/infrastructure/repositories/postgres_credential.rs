// Copyright (c) 2026 Conduit Systems
// SPDX-License-Identifier: AGPL-3.0

use async_trait::async_trait;
use sqlx::postgres::PgPool;
use sqlx::Row;

use crate::domain::credential::{Credential, CredentialScope};
use crate::domain::ids::{ActorId, CredentialId, WorkspaceId};
use crate::domain::repository::{CredentialRepository, RepositoryError};

pub struct PostgresCredentialRepository {
    pool: PgPool,
}

impl PostgresCredentialRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn scope_str(scope: CredentialScope) -> &'static str {
    match scope {
        CredentialScope::Workspace => "workspace",
        CredentialScope::Actor => "actor",
    }
}

fn parse_scope(raw: &str) -> CredentialScope {
    match raw {
        "actor" => CredentialScope::Actor,
        _ => CredentialScope::Workspace,
    }
}

fn row_to_credential(row: &sqlx::postgres::PgRow) -> Credential {
    Credential {
        id: CredentialId::from_uuid(row.get("id")),
        workspace_id: WorkspaceId::from_uuid(row.get("workspace_id")),
        source_key: row.get("source_key"),
        scope: parse_scope(row.get::<String, _>("scope").as_str()),
        actor_id: row.get::<Option<String>, _>("actor_id").map(ActorId),
        provider: row.get("provider"),
        secret_json: row.get("secret_json"),
        overrides_json: row.get("overrides_json"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

#[async_trait]
impl CredentialRepository for PostgresCredentialRepository {
    async fn resolve_credential(
        &self,
        workspace_id: WorkspaceId,
        source_key: &str,
        scope: CredentialScope,
        actor_id: Option<&ActorId>,
    ) -> Result<Option<Credential>, RepositoryError> {
        let row = sqlx::query(
            r#"
            SELECT * FROM credentials
            WHERE workspace_id = $1 AND source_key = $2 AND scope = $3
              AND actor_id IS NOT DISTINCT FROM $4
            "#,
        )
        .bind(workspace_id.0)
        .bind(source_key)
        .bind(scope_str(scope))
        .bind(actor_id.map(|a| a.0.clone()))
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(row_to_credential))
    }

    async fn get_credential(&self, id: CredentialId) -> Result<Option<Credential>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM credentials WHERE id = $1")
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(row_to_credential))
    }
}
