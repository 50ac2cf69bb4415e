// Copyright (c) 2026 Conduit Systems
// SPDX-License-Identifier: AGPL-3.0

//! Abstract persistence port. The core depends only on these
//! traits; storage backend selection happens at the composition root via
//! `StorageBackend` and the `create_*_repository` factories.

use async_trait::async_trait;
use std::sync::Arc;

use crate::domain::approval::{Approval, ApprovalStatus};
use crate::domain::credential::{Credential, CredentialScope};
use crate::domain::ids::{ActorId, ApprovalId, BuildId, CredentialId, PolicyId, TaskId, ToolSourceId, WorkspaceId};
use crate::domain::policy::AccessPolicy;
use crate::domain::registry_build::RegistryState;
use crate::domain::task::{NewTask, Task, TaskOutcome};
use crate::domain::tool_definition::ToolDefinition;
use crate::domain::tool_source::ToolSource;

/// Storage backend selection (spec ambient stack configuration). Mirrors the
/// teacher's `StorageBackend` enum.
#[derive(Debug, Clone)]
pub enum StorageBackend {
    InMemory,
    PostgreSQL(PostgresConfig),
}

#[derive(Debug, Clone)]
pub struct PostgresConfig {
    pub connection_string: String,
}

#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("Entity not found: {0}")]
    NotFound(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Unknown error: {0}")]
    Unknown(String),
}

impl From<sqlx::Error> for RepositoryError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => RepositoryError::NotFound("row not found".to_string()),
            other => RepositoryError::Database(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for RepositoryError {
    fn from(err: serde_json::Error) -> Self {
        RepositoryError::Serialization(err.to_string())
    }
}

#[async_trait]
pub trait TaskRepository: Send + Sync {
    async fn create_task(&self, new_task: NewTask) -> Result<Task, RepositoryError>;
    async fn get_task(&self, id: TaskId) -> Result<Option<Task>, RepositoryError>;

    /// Conditional on `status = queued`. Returns `None` to
    /// signal "lost the race" rather than an error.
    async fn mark_task_running(&self, id: TaskId) -> Result<Option<Task>, RepositoryError>;

    /// Unconditional; `None` is tolerated when the task is already terminal
    /// (error path).
    async fn mark_task_finished(&self, id: TaskId, outcome: TaskOutcome) -> Result<Option<Task>, RepositoryError>;
}

#[async_trait]
pub trait EventRepository: Send + Sync {
    /// Server assigns the next strictly monotone sequence for `task_id`
    ///. Must be linearizable per task.
    async fn append_task_event(
        &self,
        task_id: TaskId,
        payload: crate::domain::event::EventPayload,
    ) -> Result<crate::domain::event::TaskEvent, RepositoryError>;

    async fn list_task_events(&self, task_id: TaskId) -> Result<Vec<crate::domain::event::TaskEvent>, RepositoryError>;
}

#[async_trait]
pub trait ApprovalRepository: Send + Sync {
    #[allow(clippy::too_many_arguments)]
    async fn create_approval(
        &self,
        task_id: TaskId,
        workspace_id: WorkspaceId,
        call_id: String,
        tool_path: String,
        input: serde_json::Value,
    ) -> Result<Approval, RepositoryError>;

    async fn get_approval(&self, id: ApprovalId) -> Result<Option<Approval>, RepositoryError>;

    /// Conditional on `status = pending`. Idempotent:
    /// once terminal, subsequent calls return the unchanged approval rather
    /// than an error.
    async fn resolve_approval(
        &self,
        id: ApprovalId,
        decision: ApprovalStatus,
        reviewer_id: Option<String>,
        reason: Option<String>,
    ) -> Result<Approval, RepositoryError>;
}

#[async_trait]
pub trait PolicyRepository: Send + Sync {
    async fn list_access_policies(&self, workspace_id: WorkspaceId) -> Result<Vec<AccessPolicy>, RepositoryError>;
    async fn get_policy(&self, id: PolicyId) -> Result<Option<AccessPolicy>, RepositoryError>;
}

#[async_trait]
pub trait CredentialRepository: Send + Sync {
    async fn resolve_credential(
        &self,
        workspace_id: WorkspaceId,
        source_key: &str,
        scope: CredentialScope,
        actor_id: Option<&ActorId>,
    ) -> Result<Option<Credential>, RepositoryError>;

    async fn get_credential(&self, id: CredentialId) -> Result<Option<Credential>, RepositoryError>;
}

#[async_trait]
pub trait ToolSourceRepository: Send + Sync {
    async fn list_tool_sources(&self, workspace_id: WorkspaceId) -> Result<Vec<ToolSource>, RepositoryError>;
    async fn get_tool_source(&self, id: ToolSourceId) -> Result<Option<ToolSource>, RepositoryError>;
}

/// Registry build API (state machine).
#[async_trait]
pub trait RegistryRepository: Send + Sync {
    async fn get_registry_state(&self, workspace_id: WorkspaceId) -> Result<RegistryState, RepositoryError>;

    /// Transitions `(no build | ready) -> building`.
    async fn begin_build(&self, workspace_id: WorkspaceId, signature: String, build_id: BuildId) -> Result<(), RepositoryError>;

    async fn put_tools_batch(&self, build_id: BuildId, tools: Vec<ToolDefinition>) -> Result<(), RepositoryError>;

    async fn put_namespaces_batch(&self, build_id: BuildId, namespaces: Vec<String>) -> Result<(), RepositoryError>;

    async fn finish_build(&self, build_id: BuildId, warnings: Vec<String>) -> Result<(), RepositoryError>;

    async fn fail_build(&self, build_id: BuildId, reason: String) -> Result<(), RepositoryError>;

    async fn get_ready_tools(&self, workspace_id: WorkspaceId) -> Result<Vec<ToolDefinition>, RepositoryError>;
}

use crate::infrastructure::repositories::in_memory::{
    InMemoryApprovalRepository, InMemoryCredentialRepository, InMemoryEventRepository, InMemoryPolicyRepository,
    InMemoryRegistryRepository, InMemoryTaskRepository, InMemoryToolSourceRepository,
};
use crate::infrastructure::repositories::postgres_approval::PostgresApprovalRepository;
use crate::infrastructure::repositories::postgres_credential::PostgresCredentialRepository;
use crate::infrastructure::repositories::postgres_event::PostgresEventRepository;
use crate::infrastructure::repositories::postgres_policy::PostgresPolicyRepository;
use crate::infrastructure::repositories::postgres_registry::PostgresRegistryRepository;
use crate::infrastructure::repositories::postgres_task::PostgresTaskRepository;
use crate::infrastructure::repositories::postgres_tool_source::PostgresToolSourceRepository;

/// Factories mirroring the teacher's `create_*_repository` pattern
/// (`domain/repository.rs`), generalized to the broker's seven aggregates.
pub fn create_task_repository(backend: &StorageBackend, pool: Option<sqlx::PgPool>) -> Arc<dyn TaskRepository> {
    match backend {
        StorageBackend::InMemory => Arc::new(InMemoryTaskRepository::new()),
        StorageBackend::PostgreSQL(_) => Arc::new(PostgresTaskRepository::new(pool.expect("postgres backend requires a pool"))),
    }
}

pub fn create_event_repository(backend: &StorageBackend, pool: Option<sqlx::PgPool>) -> Arc<dyn EventRepository> {
    match backend {
        StorageBackend::InMemory => Arc::new(InMemoryEventRepository::new()),
        StorageBackend::PostgreSQL(_) => Arc::new(PostgresEventRepository::new(pool.expect("postgres backend requires a pool"))),
    }
}

pub fn create_approval_repository(backend: &StorageBackend, pool: Option<sqlx::PgPool>) -> Arc<dyn ApprovalRepository> {
    match backend {
        StorageBackend::InMemory => Arc::new(InMemoryApprovalRepository::new()),
        StorageBackend::PostgreSQL(_) => {
            Arc::new(PostgresApprovalRepository::new(pool.expect("postgres backend requires a pool")))
        }
    }
}

pub fn create_policy_repository(backend: &StorageBackend, pool: Option<sqlx::PgPool>) -> Arc<dyn PolicyRepository> {
    match backend {
        StorageBackend::InMemory => Arc::new(InMemoryPolicyRepository::new()),
        StorageBackend::PostgreSQL(_) => Arc::new(PostgresPolicyRepository::new(pool.expect("postgres backend requires a pool"))),
    }
}

pub fn create_credential_repository(backend: &StorageBackend, pool: Option<sqlx::PgPool>) -> Arc<dyn CredentialRepository> {
    match backend {
        StorageBackend::InMemory => Arc::new(InMemoryCredentialRepository::new()),
        StorageBackend::PostgreSQL(_) => {
            Arc::new(PostgresCredentialRepository::new(pool.expect("postgres backend requires a pool")))
        }
    }
}

pub fn create_tool_source_repository(backend: &StorageBackend, pool: Option<sqlx::PgPool>) -> Arc<dyn ToolSourceRepository> {
    match backend {
        StorageBackend::InMemory => Arc::new(InMemoryToolSourceRepository::new()),
        StorageBackend::PostgreSQL(_) => {
            Arc::new(PostgresToolSourceRepository::new(pool.expect("postgres backend requires a pool")))
        }
    }
}

pub fn create_registry_repository(backend: &StorageBackend, pool: Option<sqlx::PgPool>) -> Arc<dyn RegistryRepository> {
    match backend {
        StorageBackend::InMemory => Arc::new(InMemoryRegistryRepository::new()),
        StorageBackend::PostgreSQL(_) => {
            Arc::new(PostgresRegistryRepository::new(pool.expect("postgres backend requires a pool")))
        }
    }
}
