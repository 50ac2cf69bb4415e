// Copyright (c) 2026 Conduit Systems
// SPDX-License-Identifier: AGPL-3.0

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::domain::ids::{ActorId, ClientId, TaskId, WorkspaceId};

/// Terminal statuses a task can settle into. All are sinks (§4.10).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Queued,
    Running,
    Completed,
    Failed,
    TimedOut,
    Denied,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::TimedOut | TaskStatus::Denied
        )
    }
}

/// A unit of sandboxed code execution (`Task`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub workspace_id: WorkspaceId,
    pub actor_id: ActorId,
    pub client_id: ClientId,
    pub runtime_id: String,
    pub code: String,
    pub timeout_ms: u64,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
    pub error: Option<String>,
    pub stdout: Option<String>,
    pub stderr: Option<String>,
    pub exit_code: Option<i32>,
}

/// Fields required to create a new task; the persistence layer assigns `id`
/// and `created_at` (`CreateTask`).
#[derive(Debug, Clone)]
pub struct NewTask {
    pub workspace_id: WorkspaceId,
    pub actor_id: ActorId,
    pub client_id: ClientId,
    pub runtime_id: String,
    pub code: String,
    pub timeout_ms: u64,
    pub metadata: HashMap<String, serde_json::Value>,
}

impl Task {
    /// Build the persisted representation of a freshly created task.
    /// A real persistence implementation assigns `id`/`created_at`; this
    /// constructor is used by in-memory repositories and by callers
    /// composing the initial row before a database round-trip.
    pub fn from_new(id: TaskId, new: NewTask, now: DateTime<Utc>) -> Self {
        Self {
            id,
            workspace_id: new.workspace_id,
            actor_id: new.actor_id,
            client_id: new.client_id,
            runtime_id: new.runtime_id,
            code: new.code,
            timeout_ms: new.timeout_ms,
            metadata: new.metadata,
            status: TaskStatus::Queued,
            created_at: now,
            started_at: None,
            completed_at: None,
            updated_at: now,
            error: None,
            stdout: None,
            stderr: None,
            exit_code: None,
        }
    }
}

/// Outcome of a terminal `SandboxAdapter::run` invocation, mapped onto a
/// `Task` by `MarkTaskFinished`.
#[derive(Debug, Clone)]
pub struct TaskOutcome {
    pub status: TaskStatus,
    pub stdout: Option<String>,
    pub stderr: Option<String>,
    pub exit_code: Option<i32>,
    pub error: Option<String>,
    pub duration_ms: Option<i64>,
}
