// Copyright (c) 2026 Conduit Systems
// SPDX-License-Identifier: AGPL-3.0

//! The task-level state machine: `queued -> running ->
//! {completed | failed | timed_out | denied}`. Drives a `SandboxAdapter`
//! and wires its `InvokeTool`/`EmitOutput` callbacks through the Tool
//! Invocation Pipeline and Event Log.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::domain::errors::ToolInvocationError;
use crate::domain::event::EventPayload;
use crate::domain::ids::TaskId;
use crate::domain::repository::{RepositoryError, TaskRepository};
use crate::domain::sandbox::{OutputStream, SandboxAdapter, SandboxCallbacks, SandboxRequest, ToolCall};
use crate::domain::task::{NewTask, Task, TaskOutcome, TaskStatus};

use super::event_log::EventLog;
use super::tool_invocation_pipeline::{InvocationContext, InvocationRequest, ToolInvocationPipeline};

/// Runtime adapters registered by `runtimeId` (step 2: "If
/// `task.runtimeId` is unknown or disabled"). A disabled entry is simply
/// absent from the map — the executor has no separate enable flag to check.
pub type RuntimeRegistry = HashMap<String, Arc<dyn SandboxAdapter>>;

pub struct TaskExecutor {
    tasks: Arc<dyn TaskRepository>,
    events: EventLog,
    pipeline: Arc<ToolInvocationPipeline>,
    runtimes: RuntimeRegistry,
}

impl TaskExecutor {
    pub fn new(tasks: Arc<dyn TaskRepository>, events: EventLog, pipeline: Arc<ToolInvocationPipeline>, runtimes: RuntimeRegistry) -> Self {
        Self { tasks, events, pipeline, runtimes }
    }

    /// Create a task and publish its `task.created`/`task.queued` pair
    /// (spec §2 control flow: "client -> CreateTask -> event
    /// task.created/task.queued -> scheduler"). The caller (a scheduler,
    /// out of scope here) is responsible for eventually calling `run`.
    pub async fn submit(&self, new_task: NewTask) -> Result<Task, RepositoryError> {
        let task = self.tasks.create_task(new_task).await?;

        self.events
            .publish(
                task.id,
                EventPayload::TaskCreated {
                    task_id: task.id,
                    status: "queued".to_string(),
                    runtime_id: task.runtime_id.clone(),
                    timeout_ms: task.timeout_ms,
                    workspace_id: task.workspace_id,
                    actor_id: task.actor_id.0.clone(),
                    client_id: task.client_id.0.clone(),
                    created_at: task.created_at,
                    extra: HashMap::new(),
                },
            )
            .await?;
        self.events
            .publish(task.id, EventPayload::TaskQueued { task_id: task.id, status: "queued".to_string(), extra: HashMap::new() })
            .await?;

        metrics::counter!("conduit_task_transition_total", "status" => "queued").increment(1);
        Ok(task)
    }

    /// Drive one task from `queued` through to a terminal status (spec
    /// §4.10 `Run`). Returns once the task has reached a terminal state or
    /// the executor lost the race to claim it; errors along the way are
    /// absorbed into the task's terminal status rather than propagated,
    /// per its unconditional `MarkTaskFinished` in the error path.
    pub async fn run(&self, task_id: TaskId, cancel: CancellationToken) {
        let span = tracing::info_span!("task_execution", task_id = %task_id);
        let _enter = span.enter();

        // Step 1.
        let task = match self.tasks.get_task(task_id).await {
            Ok(Some(task)) if task.status == TaskStatus::Queued => task,
            Ok(Some(task)) => {
                tracing::debug!(status = ?task.status, "task is not queued, skipping run");
                return;
            }
            Ok(None) => {
                tracing::warn!("task not found, skipping run");
                return;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to load task");
                return;
            }
        };

        // Step 2: reject an unknown or disabled runtime before marking running.
        let Some(adapter) = self.runtimes.get(&task.runtime_id).cloned() else {
            tracing::warn!(runtime_id = %task.runtime_id, "unknown or disabled runtime");
            self.finish(task_id, TaskOutcome {
                status: TaskStatus::Failed,
                stdout: None,
                stderr: None,
                exit_code: None,
                error: Some(format!("unknown or disabled runtime: {}", task.runtime_id)),
                duration_ms: None,
            })
            .await;
            return;
        };

        // Step 3: claim the task. A `None` result means another worker won the race.
        let Ok(Some(running)) = self.tasks.mark_task_running(task_id).await else {
            tracing::debug!("lost the race to mark task running");
            return;
        };
        metrics::counter!("conduit_task_transition_total", "status" => "running").increment(1);

        // Step 4.
        if let Err(e) = self
            .events
            .publish(task_id, EventPayload::TaskRunning { task_id, status: "running".to_string(), started_at: running.started_at.unwrap_or_else(Utc::now) })
            .await
        {
            tracing::error!(error = %e, "failed to publish task.running");
        }

        let callbacks = SandboxCallbacksImpl {
            pipeline: Arc::clone(&self.pipeline),
            events: self.events.clone(),
            ctx: InvocationContext {
                task_id,
                workspace_id: running.workspace_id,
                actor_id: running.actor_id.clone(),
                client_id: running.client_id.clone(),
            },
            cancel: cancel.clone(),
        };

        // Step 5/6: the adapter drives the sandbox and blocks until it completes.
        let started_at = std::time::Instant::now();
        let outcome = adapter.run(SandboxRequest { task_id, code: running.code.clone(), timeout_ms: running.timeout_ms }, &callbacks).await;
        let duration_ms = outcome.duration_ms.max(started_at.elapsed().as_millis() as i64);

        // Step 7.
        self.finish(
            task_id,
            TaskOutcome {
                status: outcome.status,
                stdout: outcome.stdout,
                stderr: outcome.stderr,
                exit_code: outcome.exit_code,
                error: outcome.error,
                duration_ms: Some(duration_ms),
            },
        )
        .await;
    }

    /// Mark a task finished and publish its terminal event (/// steps 7-8). Tolerates `MarkTaskFinished` returning `None` (task
    /// already terminal) as the error path requires.
    async fn finish(&self, task_id: TaskId, outcome: TaskOutcome) {
        let status = outcome.status;
        let exit_code = outcome.exit_code;
        let error = outcome.error.clone();
        let duration_ms = outcome.duration_ms;

        let finished: Result<Option<Task>, RepositoryError> = self.tasks.mark_task_finished(task_id, outcome).await;
        if let Err(e) = &finished {
            tracing::error!(error = %e, "failed to mark task finished");
        }

        let completed_at = finished.ok().flatten().and_then(|t| t.completed_at).unwrap_or_else(Utc::now);
        metrics::counter!("conduit_task_transition_total", "status" => status_label(status)).increment(1);

        let payload = terminal_payload(task_id, status, exit_code, duration_ms, error, completed_at);
        if let Err(e) = self.events.publish(task_id, payload).await {
            tracing::error!(error = %e, "failed to publish terminal task event");
        }
    }
}

fn status_label(status: TaskStatus) -> &'static str {
    match status {
        TaskStatus::Completed => "completed",
        TaskStatus::Failed => "failed",
        TaskStatus::TimedOut => "timed_out",
        TaskStatus::Denied => "denied",
        TaskStatus::Queued => "queued",
        TaskStatus::Running => "running",
    }
}

fn terminal_payload(
    task_id: TaskId,
    status: TaskStatus,
    exit_code: Option<i32>,
    duration_ms: Option<i64>,
    error: Option<String>,
    completed_at: chrono::DateTime<Utc>,
) -> EventPayload {
    let status_str = status_label(status).to_string();
    match status {
        TaskStatus::Completed => EventPayload::TaskCompleted { task_id, status: status_str, exit_code, duration_ms, error, completed_at },
        TaskStatus::Failed => EventPayload::TaskFailed { task_id, status: status_str, exit_code, duration_ms, error, completed_at },
        TaskStatus::TimedOut => EventPayload::TaskTimedOut { task_id, status: status_str, exit_code, duration_ms, error, completed_at },
        TaskStatus::Denied => EventPayload::TaskDenied { task_id, status: status_str, exit_code, duration_ms, error, completed_at },
        TaskStatus::Queued | TaskStatus::Running => {
            unreachable!("finish() is only ever called with a terminal TaskOutcome status")
        }
    }
}

/// Bridges a `SandboxAdapter` implementation's callbacks into the Invocation
/// Pipeline and Event Log (step 5).
struct SandboxCallbacksImpl {
    pipeline: Arc<ToolInvocationPipeline>,
    events: EventLog,
    ctx: InvocationContext,
    cancel: CancellationToken,
}

#[async_trait]
impl SandboxCallbacks for SandboxCallbacksImpl {
    async fn invoke_tool(&self, call: ToolCall) -> Result<Value, ToolInvocationError> {
        self.pipeline
            .invoke(&self.ctx, InvocationRequest { call_id: call.call_id, tool_path: call.tool_path, input: call.input }, &self.cancel)
            .await
    }

    async fn emit_output(&self, stream: OutputStream, line: String) {
        let payload = match stream {
            OutputStream::Stdout => EventPayload::TaskStdout { task_id: self.ctx.task_id, line, timestamp: Utc::now() },
            OutputStream::Stderr => EventPayload::TaskStderr { task_id: self.ctx.task_id, line, timestamp: Utc::now() },
        };
        if let Err(e) = self.events.publish(self.ctx.task_id, payload).await {
            tracing::error!(error = %e, "failed to publish sandbox output line");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ids::{ActorId, ClientId, WorkspaceId};
    use crate::domain::sandbox::SandboxOutcome;
    use crate::domain::task::NewTask;
    use crate::infrastructure::credential_providers::ProviderRegistry;
    use crate::infrastructure::protocol::mcp_client::McpConnectionPool;
    use crate::infrastructure::repositories::in_memory::{
        InMemoryApprovalRepository, InMemoryCredentialRepository, InMemoryEventRepository, InMemoryPolicyRepository,
        InMemoryRegistryRepository, InMemoryTaskRepository, InMemoryToolSourceRepository,
    };
    use std::time::Duration;

    /// A sandbox test double that invokes exactly one tool call, then
    /// reports whatever terminal status the invocation implies.
    struct ScriptedSandbox {
        call_id: String,
        tool_path: String,
        input: Value,
    }

    #[async_trait]
    impl SandboxAdapter for ScriptedSandbox {
        async fn run(&self, _request: SandboxRequest, callbacks: &dyn SandboxCallbacks) -> SandboxOutcome {
            let call = ToolCall { call_id: self.call_id.clone(), tool_path: self.tool_path.clone(), input: self.input.clone() };
            match callbacks.invoke_tool(call).await {
                Ok(value) => SandboxOutcome {
                    status: TaskStatus::Completed,
                    stdout: Some(value.to_string()),
                    stderr: None,
                    exit_code: Some(0),
                    error: None,
                    duration_ms: 5,
                },
                Err(e) if e.is_denial() => {
                    SandboxOutcome { status: TaskStatus::Denied, stdout: None, stderr: None, exit_code: None, error: Some(e.to_string()), duration_ms: 5 }
                }
                Err(e) => {
                    SandboxOutcome { status: TaskStatus::Failed, stdout: None, stderr: None, exit_code: Some(1), error: Some(e.to_string()), duration_ms: 5 }
                }
            }
        }
    }

    /// Builds an executor wired to an empty, pre-warmed tool registry for
    /// `workspace_id` — the registry's first-ever read always returns
    /// `Loading` while its background build runs, so tests
    /// warm it once up front rather than race that build from inside a
    /// task run.
    async fn executor_with(runtimes: RuntimeRegistry, workspace_id: WorkspaceId) -> (TaskExecutor, Arc<InMemoryTaskRepository>, EventLog) {
        let tasks = Arc::new(InMemoryTaskRepository::new());
        let events = EventLog::new(Arc::new(InMemoryEventRepository::new()));

        let tool_sources = Arc::new(InMemoryToolSourceRepository::new());
        let registry_repo = Arc::new(InMemoryRegistryRepository::new());
        let compiler = Arc::new(crate::application::tool_source_compiler::ToolSourceCompiler::new(
            reqwest::Client::new(),
            Arc::new(McpConnectionPool::new()),
        ));
        let registry = crate::application::tool_registry::ToolRegistry::new(tool_sources, registry_repo, compiler, Duration::from_secs(5), true);
        let _ = registry.get_tools(workspace_id).await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        let policies = Arc::new(InMemoryPolicyRepository::new());
        let credentials = crate::application::credential_resolver::CredentialResolver::new(
            Arc::new(InMemoryCredentialRepository::new()),
            Arc::new(ProviderRegistry::new()),
        );
        let approvals = crate::application::approval_manager::ApprovalManager::new(
            Arc::new(InMemoryApprovalRepository::new()),
            events.clone(),
            Duration::from_millis(10),
        );
        let dispatcher = crate::application::tool_dispatcher::ToolDispatcher::new(reqwest::Client::new(), Arc::new(McpConnectionPool::new()));
        let pipeline = Arc::new(ToolInvocationPipeline::new(registry, policies, credentials, events.clone(), approvals, dispatcher));

        let executor = TaskExecutor::new(tasks.clone(), events.clone(), pipeline, runtimes);
        (executor, tasks, events)
    }

    async fn queued_task(tasks: &InMemoryTaskRepository, workspace_id: WorkspaceId, runtime_id: &str) -> TaskId {
        let task = tasks
            .create_task(NewTask {
                workspace_id,
                actor_id: ActorId("actor-1".into()),
                client_id: ClientId("client-1".into()),
                runtime_id: runtime_id.to_string(),
                code: "tools.catalog.namespaces({})".to_string(),
                timeout_ms: 5_000,
                metadata: HashMap::new(),
            })
            .await
            .unwrap();
        task.id
    }

    #[tokio::test]
    async fn submit_publishes_created_then_queued_in_order() {
        let workspace_id = WorkspaceId::new();
        let (executor, _tasks, events) = executor_with(RuntimeRegistry::new(), workspace_id).await;

        let task = executor
            .submit(NewTask {
                workspace_id,
                actor_id: ActorId("actor-1".into()),
                client_id: ClientId("client-1".into()),
                runtime_id: "python3.11".to_string(),
                code: "tools.catalog.namespaces({})".to_string(),
                timeout_ms: 5_000,
                metadata: HashMap::new(),
            })
            .await
            .unwrap();

        assert_eq!(task.status, TaskStatus::Queued);
        let recorded = events.list(task.id).await.unwrap();
        let types: Vec<&str> = recorded.iter().map(|e| e.payload.type_name()).collect();
        assert_eq!(types, vec!["task.created", "task.queued"]);
    }

    #[tokio::test]
    async fn unknown_runtime_fails_without_running_event() {
        let workspace_id = WorkspaceId::new();
        let (executor, tasks, events) = executor_with(RuntimeRegistry::new(), workspace_id).await;
        let task_id = queued_task(&tasks, workspace_id, "python3.11").await;

        executor.run(task_id, CancellationToken::new()).await;

        let task = tasks.get_task(task_id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        let recorded = events.list(task_id).await.unwrap();
        assert!(recorded.iter().all(|e| e.payload.type_name() != "task.running"));
        assert_eq!(recorded.iter().filter(|e| e.payload.type_name() == "task.failed").count(), 1);
    }

    #[tokio::test]
    async fn happy_path_auto_tool_completes_the_task() {
        let mut runtimes = RuntimeRegistry::new();
        runtimes.insert(
            "python3.11".to_string(),
            Arc::new(ScriptedSandbox { call_id: "call-1".into(), tool_path: "catalog.namespaces".into(), input: serde_json::json!({}) }),
        );

        let workspace_id = WorkspaceId::new();
        let (executor, tasks, events) = executor_with(runtimes, workspace_id).await;
        let task_id = queued_task(&tasks, workspace_id, "python3.11").await;

        executor.run(task_id, CancellationToken::new()).await;

        let task = tasks.get_task(task_id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Completed);

        let recorded = events.list(task_id).await.unwrap();
        let types: Vec<&str> = recorded.iter().map(|e| e.payload.type_name()).collect();
        assert_eq!(types, vec!["task.running", "tool.call.started", "tool.call.completed", "task.completed"]);
    }

    #[tokio::test]
    async fn running_task_is_not_reentered() {
        let workspace_id = WorkspaceId::new();
        let (executor, tasks, events) = executor_with(RuntimeRegistry::new(), workspace_id).await;
        let task_id = queued_task(&tasks, workspace_id, "python3.11").await;
        tasks.mark_task_running(task_id).await.unwrap();

        executor.run(task_id, CancellationToken::new()).await;

        assert!(events.list(task_id).await.unwrap().is_empty());
    }
}
