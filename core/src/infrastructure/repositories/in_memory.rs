// Copyright (c) 2026 Conduit Systems
// SPDX-License-Identifier: AGPL-3.0

//! Thread-safe `HashMap`-backed repositories for tests and local development,
//! grounded in the teacher's `InMemoryAgentRepository` / `InMemoryExecutionRepository`
//! (`infrastructure/repositories/mod.rs`): `Arc<RwLock<HashMap<..>>>` storage,
//! cloned out on every read.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use crate::domain::approval::{Approval, ApprovalStatus};
use crate::domain::credential::{Credential, CredentialScope};
use crate::domain::event::{EventPayload, TaskEvent};
use crate::domain::ids::{ActorId, ApprovalId, BuildId, CredentialId, PolicyId, TaskId, ToolSourceId, WorkspaceId};
use crate::domain::policy::AccessPolicy;
use crate::domain::registry_build::RegistryState;
use crate::domain::repository::{
    ApprovalRepository, CredentialRepository, EventRepository, PolicyRepository, RegistryRepository, RepositoryError,
    TaskRepository, ToolSourceRepository,
};
use crate::domain::task::{NewTask, Task, TaskOutcome, TaskStatus};
use crate::domain::tool_definition::ToolDefinition;
use crate::domain::tool_source::ToolSource;

#[derive(Clone, Default)]
pub struct InMemoryTaskRepository {
    tasks: Arc<RwLock<HashMap<TaskId, Task>>>,
}

impl InMemoryTaskRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TaskRepository for InMemoryTaskRepository {
    async fn create_task(&self, new_task: NewTask) -> Result<Task, RepositoryError> {
        let id = TaskId::new();
        let task = Task::from_new(id, new_task, Utc::now());
        self.tasks.write().unwrap().insert(id, task.clone());
        Ok(task)
    }

    async fn get_task(&self, id: TaskId) -> Result<Option<Task>, RepositoryError> {
        Ok(self.tasks.read().unwrap().get(&id).cloned())
    }

    async fn mark_task_running(&self, id: TaskId) -> Result<Option<Task>, RepositoryError> {
        let mut tasks = self.tasks.write().unwrap();
        match tasks.get_mut(&id) {
            Some(task) if task.status == TaskStatus::Queued => {
                let now = Utc::now();
                task.status = TaskStatus::Running;
                task.started_at = Some(now);
                task.updated_at = now;
                Ok(Some(task.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn mark_task_finished(&self, id: TaskId, outcome: TaskOutcome) -> Result<Option<Task>, RepositoryError> {
        let mut tasks = self.tasks.write().unwrap();
        match tasks.get_mut(&id) {
            Some(task) => {
                let now = Utc::now();
                task.status = outcome.status;
                task.stdout = outcome.stdout;
                task.stderr = outcome.stderr;
                task.exit_code = outcome.exit_code;
                task.error = outcome.error;
                task.completed_at = Some(now);
                task.updated_at = now;
                Ok(Some(task.clone()))
            }
            None => Ok(None),
        }
    }
}

#[derive(Default)]
struct EventLog {
    next_sequence: i64,
    events: Vec<TaskEvent>,
}

#[derive(Clone, Default)]
pub struct InMemoryEventRepository {
    logs: Arc<Mutex<HashMap<TaskId, EventLog>>>,
}

impl InMemoryEventRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EventRepository for InMemoryEventRepository {
    async fn append_task_event(&self, task_id: TaskId, payload: EventPayload) -> Result<TaskEvent, RepositoryError> {
        let mut logs = self.logs.lock().unwrap();
        let log = logs.entry(task_id).or_default();
        log.next_sequence += 1;
        let event = TaskEvent {
            sequence: log.next_sequence,
            task_id,
            payload,
            created_at: Utc::now(),
        };
        log.events.push(event.clone());
        Ok(event)
    }

    async fn list_task_events(&self, task_id: TaskId) -> Result<Vec<TaskEvent>, RepositoryError> {
        let logs = self.logs.lock().unwrap();
        Ok(logs.get(&task_id).map(|l| l.events.clone()).unwrap_or_default())
    }
}

#[derive(Clone, Default)]
pub struct InMemoryApprovalRepository {
    approvals: Arc<RwLock<HashMap<ApprovalId, Approval>>>,
}

impl InMemoryApprovalRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ApprovalRepository for InMemoryApprovalRepository {
    async fn create_approval(
        &self,
        task_id: TaskId,
        workspace_id: WorkspaceId,
        call_id: String,
        tool_path: String,
        input: serde_json::Value,
    ) -> Result<Approval, RepositoryError> {
        let id = ApprovalId::new();
        let approval = Approval::new(id, task_id, workspace_id, call_id, tool_path, input, Utc::now());
        self.approvals.write().unwrap().insert(id, approval.clone());
        Ok(approval)
    }

    async fn get_approval(&self, id: ApprovalId) -> Result<Option<Approval>, RepositoryError> {
        Ok(self.approvals.read().unwrap().get(&id).cloned())
    }

    async fn resolve_approval(
        &self,
        id: ApprovalId,
        decision: ApprovalStatus,
        reviewer_id: Option<String>,
        reason: Option<String>,
    ) -> Result<Approval, RepositoryError> {
        let mut approvals = self.approvals.write().unwrap();
        let approval = approvals
            .get_mut(&id)
            .ok_or_else(|| RepositoryError::NotFound(format!("approval {id}")))?;
        // First resolution wins (spec P4): a terminal approval is returned unchanged.
        if approval.status == ApprovalStatus::Pending {
            approval.status = decision;
            approval.reviewer_id = reviewer_id;
            approval.reason = reason;
            approval.resolved_at = Some(Utc::now());
        }
        Ok(approval.clone())
    }
}

#[derive(Clone, Default)]
pub struct InMemoryPolicyRepository {
    policies: Arc<RwLock<HashMap<PolicyId, AccessPolicy>>>,
}

impl InMemoryPolicyRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, policy: AccessPolicy) {
        self.policies.write().unwrap().insert(policy.id, policy);
    }
}

#[async_trait]
impl PolicyRepository for InMemoryPolicyRepository {
    async fn list_access_policies(&self, workspace_id: WorkspaceId) -> Result<Vec<AccessPolicy>, RepositoryError> {
        Ok(self
            .policies
            .read()
            .unwrap()
            .values()
            .filter(|p| p.workspace_id == workspace_id)
            .cloned()
            .collect())
    }

    async fn get_policy(&self, id: PolicyId) -> Result<Option<AccessPolicy>, RepositoryError> {
        Ok(self.policies.read().unwrap().get(&id).cloned())
    }
}

#[derive(Clone, Default)]
pub struct InMemoryCredentialRepository {
    credentials: Arc<RwLock<HashMap<CredentialId, Credential>>>,
}

impl InMemoryCredentialRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, credential: Credential) {
        self.credentials.write().unwrap().insert(credential.id, credential);
    }
}

#[async_trait]
impl CredentialRepository for InMemoryCredentialRepository {
    async fn resolve_credential(
        &self,
        workspace_id: WorkspaceId,
        source_key: &str,
        scope: CredentialScope,
        actor_id: Option<&ActorId>,
    ) -> Result<Option<Credential>, RepositoryError> {
        let credentials = self.credentials.read().unwrap();
        Ok(credentials
            .values()
            .find(|c| {
                c.workspace_id == workspace_id
                    && c.source_key == source_key
                    && c.scope == scope
                    && c.actor_id.as_ref() == actor_id
            })
            .cloned())
    }

    async fn get_credential(&self, id: CredentialId) -> Result<Option<Credential>, RepositoryError> {
        Ok(self.credentials.read().unwrap().get(&id).cloned())
    }
}

#[derive(Clone, Default)]
pub struct InMemoryToolSourceRepository {
    sources: Arc<RwLock<HashMap<ToolSourceId, ToolSource>>>,
}

impl InMemoryToolSourceRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, source: ToolSource) {
        self.sources.write().unwrap().insert(source.id, source);
    }
}

#[async_trait]
impl ToolSourceRepository for InMemoryToolSourceRepository {
    async fn list_tool_sources(&self, workspace_id: WorkspaceId) -> Result<Vec<ToolSource>, RepositoryError> {
        Ok(self
            .sources
            .read()
            .unwrap()
            .values()
            .filter(|s| s.workspace_id == workspace_id)
            .cloned()
            .collect())
    }

    async fn get_tool_source(&self, id: ToolSourceId) -> Result<Option<ToolSource>, RepositoryError> {
        Ok(self.sources.read().unwrap().get(&id).cloned())
    }
}

struct BuildEntry {
    workspace_id: WorkspaceId,
    signature: String,
    tools: Vec<ToolDefinition>,
    namespaces: Vec<String>,
    warnings: Vec<String>,
}

#[derive(Default)]
pub struct InMemoryRegistryRepository {
    states: RwLock<HashMap<WorkspaceId, RegistryState>>,
    builds: RwLock<HashMap<BuildId, BuildEntry>>,
    ready_tools: RwLock<HashMap<WorkspaceId, Vec<ToolDefinition>>>,
}

impl InMemoryRegistryRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RegistryRepository for InMemoryRegistryRepository {
    async fn get_registry_state(&self, workspace_id: WorkspaceId) -> Result<RegistryState, RepositoryError> {
        Ok(self
            .states
            .read()
            .unwrap()
            .get(&workspace_id)
            .cloned()
            .unwrap_or_else(|| RegistryState::empty(workspace_id)))
    }

    async fn begin_build(&self, workspace_id: WorkspaceId, signature: String, build_id: BuildId) -> Result<(), RepositoryError> {
        let mut states = self.states.write().unwrap();
        let state = states.entry(workspace_id).or_insert_with(|| RegistryState::empty(workspace_id));
        state.building_build_id = Some(build_id);
        self.builds.write().unwrap().insert(
            build_id,
            BuildEntry {
                workspace_id,
                signature,
                tools: Vec::new(),
                namespaces: Vec::new(),
                warnings: Vec::new(),
            },
        );
        Ok(())
    }

    async fn put_tools_batch(&self, build_id: BuildId, tools: Vec<ToolDefinition>) -> Result<(), RepositoryError> {
        let mut builds = self.builds.write().unwrap();
        let entry = builds
            .get_mut(&build_id)
            .ok_or_else(|| RepositoryError::NotFound(format!("build {build_id}")))?;
        entry.tools.extend(tools);
        Ok(())
    }

    async fn put_namespaces_batch(&self, build_id: BuildId, namespaces: Vec<String>) -> Result<(), RepositoryError> {
        let mut builds = self.builds.write().unwrap();
        let entry = builds
            .get_mut(&build_id)
            .ok_or_else(|| RepositoryError::NotFound(format!("build {build_id}")))?;
        entry.namespaces.extend(namespaces);
        Ok(())
    }

    async fn finish_build(&self, build_id: BuildId, warnings: Vec<String>) -> Result<(), RepositoryError> {
        let mut builds = self.builds.write().unwrap();
        let entry = builds
            .get_mut(&build_id)
            .ok_or_else(|| RepositoryError::NotFound(format!("build {build_id}")))?;
        entry.warnings.extend(warnings);

        let mut states = self.states.write().unwrap();
        let state = states
            .entry(entry.workspace_id)
            .or_insert_with(|| RegistryState::empty(entry.workspace_id));
        state.signature = Some(entry.signature.clone());
        state.ready_build_id = Some(build_id);
        state.building_build_id = None;

        self.ready_tools.write().unwrap().insert(entry.workspace_id, entry.tools.clone());
        Ok(())
    }

    async fn fail_build(&self, build_id: BuildId, reason: String) -> Result<(), RepositoryError> {
        let builds = self.builds.read().unwrap();
        if let Some(entry) = builds.get(&build_id) {
            let mut states = self.states.write().unwrap();
            if let Some(state) = states.get_mut(&entry.workspace_id) {
                if state.building_build_id == Some(build_id) {
                    state.building_build_id = None;
                }
            }
        }
        tracing::warn!(build_id = %build_id, reason, "registry build failed");
        Ok(())
    }

    async fn get_ready_tools(&self, workspace_id: WorkspaceId) -> Result<Vec<ToolDefinition>, RepositoryError> {
        Ok(self.ready_tools.read().unwrap().get(&workspace_id).cloned().unwrap_or_default())
    }
}
