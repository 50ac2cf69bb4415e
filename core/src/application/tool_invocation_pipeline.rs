// Copyright (c) 2026 Conduit Systems
// SPDX-License-Identifier: AGPL-3.0

//! Orchestrates one tool call end to end: lookup, policy decision,
//! credential resolution, approval wait, dispatch, and event publication
//!. This is the central seam the Task Executor wires a sandbox's
//! `InvokeTool` callback through.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::domain::credential::CredentialScope;
use crate::domain::errors::ToolInvocationError;
use crate::domain::ids::{ActorId, ClientId, TaskId, WorkspaceId};
use crate::domain::policy::{decide, CompiledPolicy, Decision};
use crate::domain::tool_definition::ToolDefinition;

use super::approval_manager::ApprovalManager;
use super::credential_resolver::CredentialResolver;
use super::event_log::EventLog;
use super::tool_dispatcher::ToolDispatcher;
use super::tool_registry::{ToolRegistry, ToolRegistryError};
use crate::domain::event::EventPayload;

/// The identity the call is evaluated under (`DecisionContext`,
/// `Task.actorId`/`clientId`).
#[derive(Debug, Clone)]
pub struct InvocationContext {
    pub task_id: TaskId,
    pub workspace_id: WorkspaceId,
    pub actor_id: ActorId,
    pub client_id: ClientId,
}

/// One outbound tool call a sandboxed program makes. `call_id`
/// is chosen by the sandbox and never invented here.
#[derive(Debug, Clone)]
pub struct InvocationRequest {
    pub call_id: String,
    pub tool_path: String,
    pub input: Value,
}

pub struct ToolInvocationPipeline {
    registry: Arc<ToolRegistry>,
    policies: Arc<dyn crate::domain::repository::PolicyRepository>,
    credentials: CredentialResolver,
    events: EventLog,
    approvals: ApprovalManager,
    dispatcher: ToolDispatcher,
}

impl ToolInvocationPipeline {
    pub fn new(
        registry: Arc<ToolRegistry>,
        policies: Arc<dyn crate::domain::repository::PolicyRepository>,
        credentials: CredentialResolver,
        events: EventLog,
        approvals: ApprovalManager,
        dispatcher: ToolDispatcher,
    ) -> Self {
        Self { registry, policies, credentials, events, approvals, dispatcher }
    }

    /// Execute one tool call (steps 1-10).
    pub async fn invoke(
        &self,
        ctx: &InvocationContext,
        request: InvocationRequest,
        cancel: &CancellationToken,
    ) -> Result<Value, ToolInvocationError> {
        let span = tracing::info_span!(
            "tool_invocation",
            task_id = %ctx.task_id,
            call_id = %request.call_id,
            tool_path = %request.tool_path,
        );
        let _enter = span.enter();

        // Step 1: load workspace tools and policies concurrently.
        let (lookup, policies) = tokio::join!(self.registry.get_tools(ctx.workspace_id), self.load_policies(ctx.workspace_id));
        let tools = match lookup {
            Ok(lookup) => lookup.tools,
            Err(ToolRegistryError::Loading) => {
                return Err(ToolInvocationError::ToolExecutionError(
                    "tool registry is still building its first snapshot".to_string(),
                ))
            }
            Err(ToolRegistryError::Repository(e)) => return Err(ToolInvocationError::ToolExecutionError(e.to_string())),
        };
        let policies = policies?;

        // Step 2: resolve the tool definition.
        let Some(tool) = tools.iter().find(|t| t.path == request.tool_path).cloned() else {
            return Err(ToolInvocationError::UnknownTool(request.tool_path.clone()));
        };

        // Step 3: decide, taking the GraphQL effective-path extension when applicable.
        let decision_ctx = crate::domain::policy::DecisionContext {
            workspace_id: ctx.workspace_id,
            actor_id: Some(&ctx.actor_id),
            client_id: Some(&ctx.client_id),
        };
        let (decision, deny_paths) = if let Some(marker) = &tool.graphql_source {
            graphql_decision(&tool, marker, &request.input, &decision_ctx, &policies)
        } else {
            (decide(&tool.path, &decision_ctx, &policies, tool.approval.requires_approval()), vec![tool.path.clone()])
        };
        let effective_path = tool.path.clone();

        // Step 4: a deny short-circuits before any event other than the denial itself.
        if decision == Decision::Deny {
            let reason_path = deny_paths.join(", ");
            self.events
                .publish(
                    ctx.task_id,
                    EventPayload::ToolCallDenied {
                        call_id: request.call_id.clone(),
                        tool_path: effective_path.clone(),
                        reason: Some("policy_deny".to_string()),
                        approval_id: None,
                    },
                )
                .await
                .map_err(|e| ToolInvocationError::ToolExecutionError(e.to_string()))?;
            metrics::counter!("conduit_tool_call_total", "outcome" => "denied").increment(1);
            return Err(ToolInvocationError::PolicyDenied(reason_path));
        }

        // Step 5: resolve credentials, if the tool requires any.
        let auth_headers = match &tool.credential {
            Some(spec) => match self.credentials.resolve(spec, ctx.workspace_id, Some(&ctx.actor_id)).await? {
                Some(headers) => headers,
                None => {
                    return Err(ToolInvocationError::MissingCredential {
                        source_key: spec.source_key.clone(),
                        mode: scope_str(spec.scope).to_string(),
                    })
                }
            },
            None => HashMap::new(),
        };

        // Step 6: publish the "in flight" span start. This happens before
        // the approval wait so observers see a pending approval as an open
        // span (invariants).
        self.events
            .publish(
                ctx.task_id,
                EventPayload::ToolCallStarted {
                    call_id: request.call_id.clone(),
                    tool_path: effective_path.clone(),
                    approval: if decision == Decision::RequireApproval { "required" } else { "auto" }.to_string(),
                    input: request.input.clone(),
                },
            )
            .await
            .map_err(|e| ToolInvocationError::ToolExecutionError(e.to_string()))?;

        // Step 7: wait for human approval if the decision requires it.
        if decision == Decision::RequireApproval {
            let approval = self
                .approvals
                .create(ctx.task_id, ctx.workspace_id, request.call_id.clone(), effective_path.clone(), request.input.clone())
                .await
                .map_err(|e| ToolInvocationError::ToolExecutionError(e.to_string()))?;

            let verdict = self.approvals.wait_for(approval.id, cancel).await.map_err(|e| match e {
                super::approval_manager::ApprovalWaitError::Cancelled => {
                    ToolInvocationError::ToolExecutionError("approval wait cancelled".to_string())
                }
                super::approval_manager::ApprovalWaitError::Repository(e) => ToolInvocationError::ToolExecutionError(e.to_string()),
            })?;

            if verdict == crate::domain::approval::ApprovalVerdict::Denied {
                self.events
                    .publish(
                        ctx.task_id,
                        EventPayload::ToolCallDenied {
                            call_id: request.call_id.clone(),
                            tool_path: effective_path.clone(),
                            reason: None,
                            approval_id: Some(approval.id),
                        },
                    )
                    .await
                    .map_err(|e| ToolInvocationError::ToolExecutionError(e.to_string()))?;
                metrics::counter!("conduit_tool_call_total", "outcome" => "denied").increment(1);
                return Err(ToolInvocationError::ApprovalDenied { tool_path: effective_path, approval_id: approval.id });
            }
        }

        // Step 8: dispatch against the resolved protocol runtime.
        match self.dispatcher.dispatch(&tool.run_spec, &request.input, &auth_headers, &tools).await {
            Ok(value) => {
                // Step 9.
                self.events
                    .publish(
                        ctx.task_id,
                        EventPayload::ToolCallCompleted {
                            call_id: request.call_id.clone(),
                            tool_path: effective_path.clone(),
                            output: value.clone(),
                        },
                    )
                    .await
                    .map_err(|e| ToolInvocationError::ToolExecutionError(e.to_string()))?;
                metrics::counter!("conduit_tool_call_total", "kind" => tool.run_spec.kind(), "outcome" => "completed").increment(1);
                Ok(value)
            }
            Err(err) => {
                self.events
                    .publish(
                        ctx.task_id,
                        EventPayload::ToolCallFailed {
                            call_id: request.call_id.clone(),
                            tool_path: effective_path.clone(),
                            error: err.to_string(),
                        },
                    )
                    .await
                    .map_err(|e| ToolInvocationError::ToolExecutionError(e.to_string()))?;
                metrics::counter!("conduit_tool_call_total", "kind" => tool.run_spec.kind(), "outcome" => "failed").increment(1);
                Err(err)
            }
        }
    }

    async fn load_policies(&self, workspace_id: WorkspaceId) -> Result<Vec<CompiledPolicy>, ToolInvocationError> {
        let policies = self
            .policies
            .list_access_policies(workspace_id)
            .await
            .map_err(|e| ToolInvocationError::ToolExecutionError(e.to_string()))?;
        Ok(policies.into_iter().map(CompiledPolicy::compile).collect())
    }
}

fn scope_str(scope: CredentialScope) -> &'static str {
    match scope {
        CredentialScope::Workspace => "workspace",
        CredentialScope::Actor => "actor",
    }
}

/// GraphQL extension of the policy decision. Parses the call's
/// selection set into effective `<source>.<query|mutation>.<field>` paths,
/// evaluates each independently, and combines them worst-wins. The single
/// tool definition's own path is used for event `toolPath` fields (the
/// pseudocode's `effectivePath` variable); the full field-path list is only
/// surfaced in the `PolicyDenied` message, per the spec's resolution of its
/// own "under-specified" note on raw/field tool coexistence (see DESIGN.md).
fn graphql_decision(
    tool: &ToolDefinition,
    marker: &crate::domain::tool_definition::GraphqlSourceMarker,
    input: &Value,
    ctx: &crate::domain::policy::DecisionContext,
    policies: &[CompiledPolicy],
) -> (Decision, Vec<String>) {
    use crate::domain::tool_definition::RunSpec;
    use crate::infrastructure::protocol::graphql::{effective_path, extract_top_level_fields};

    let fields = if let Some(query) = input.get("query").and_then(Value::as_str) {
        extract_top_level_fields(query).unwrap_or_default()
    } else if let RunSpec::GraphqlField { operation_type, field_name, .. } = &tool.run_spec {
        vec![(*operation_type, field_name.clone())]
    } else {
        Vec::new()
    };

    if fields.is_empty() {
        let decision = decide(&tool.path, ctx, policies, tool.approval.requires_approval());
        return (decision, vec![tool.path.clone()]);
    }

    let mut combined = Decision::Allow;
    let mut paths = Vec::with_capacity(fields.len());
    for (op, field) in &fields {
        let path = effective_path(&marker.source_name, *op, field);
        let default_requires_approval = match op {
            crate::domain::tool_definition::GraphqlOperationType::Query => marker.default_query_requires_approval,
            crate::domain::tool_definition::GraphqlOperationType::Mutation => marker.default_mutation_requires_approval,
        };
        let field_decision = decide(&path, ctx, policies, default_requires_approval);
        combined = combined.worst(field_decision);
        paths.push(path);
    }

    (combined, paths)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ids::{PolicyId, WorkspaceId};
    use crate::domain::policy::{AccessPolicy, Decision as Dec};
    use crate::domain::tool_definition::{Approval, GraphqlOperationType, GraphqlSourceMarker, RunSpec, ToolDefinition};
    use crate::domain::tool_source::{ToolSource, ToolSourceConfig};
    use crate::infrastructure::credential_providers::ProviderRegistry;
    use crate::infrastructure::protocol::mcp_client::McpConnectionPool;
    use crate::infrastructure::repositories::in_memory::{
        InMemoryApprovalRepository, InMemoryCredentialRepository, InMemoryEventRepository, InMemoryPolicyRepository,
        InMemoryRegistryRepository, InMemoryToolSourceRepository,
    };
    use std::time::Duration;

    fn pipeline() -> (ToolInvocationPipeline, Arc<InMemoryToolSourceRepository>, Arc<InMemoryPolicyRepository>, EventLog) {
        let tool_sources = Arc::new(InMemoryToolSourceRepository::new());
        let registry_repo = Arc::new(InMemoryRegistryRepository::new());
        let compiler = Arc::new(super::super::tool_source_compiler::ToolSourceCompiler::new(
            reqwest::Client::new(),
            Arc::new(McpConnectionPool::new()),
        ));
        let registry = ToolRegistry::new(tool_sources.clone(), registry_repo, compiler, Duration::from_secs(5), true);

        let policies = Arc::new(InMemoryPolicyRepository::new());
        let events = EventLog::new(Arc::new(InMemoryEventRepository::new()));
        let credentials = CredentialResolver::new(Arc::new(InMemoryCredentialRepository::new()), Arc::new(ProviderRegistry::new()));
        let approvals = ApprovalManager::new(Arc::new(InMemoryApprovalRepository::new()), events.clone(), Duration::from_millis(10));
        let dispatcher = ToolDispatcher::new(reqwest::Client::new(), Arc::new(McpConnectionPool::new()));

        let pipeline = ToolInvocationPipeline::new(registry, policies.clone(), credentials, events.clone(), approvals, dispatcher);
        (pipeline, tool_sources, policies, events)
    }

    fn ctx(task_id: TaskId, workspace_id: WorkspaceId) -> InvocationContext {
        InvocationContext { task_id, workspace_id, actor_id: ActorId("actor-1".into()), client_id: ClientId("client-1".into()) }
    }

    #[tokio::test]
    async fn unknown_tool_fails_before_any_event_is_published() {
        let (pipeline, _sources, _policies, events) = pipeline();
        let task_id = TaskId::new();
        let workspace_id = WorkspaceId::new();
        let _ = pipeline.registry.get_tools(workspace_id).await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        let err = pipeline
            .invoke(
                &ctx(task_id, workspace_id),
                InvocationRequest { call_id: "call-1".into(), tool_path: "nope.foo".into(), input: serde_json::json!({}) },
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, ToolInvocationError::UnknownTool(p) if p == "nope.foo"));
        assert!(events.list(task_id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn builtin_tool_completes_and_publishes_started_then_completed() {
        let (pipeline, _sources, _policies, events) = pipeline();
        let task_id = TaskId::new();
        let workspace_id = WorkspaceId::new();
        let _ = pipeline.registry.get_tools(workspace_id).await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        let value = pipeline
            .invoke(
                &ctx(task_id, workspace_id),
                InvocationRequest { call_id: "call-1".into(), tool_path: "catalog.namespaces".into(), input: serde_json::json!({}) },
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert!(value.get("namespaces").is_some());
        let recorded = events.list(task_id).await.unwrap();
        let types: Vec<&str> = recorded.iter().map(|e| e.payload.type_name()).collect();
        assert_eq!(types, vec!["tool.call.started", "tool.call.completed"]);
    }

    #[tokio::test]
    async fn policy_deny_emits_denied_event_and_no_started_event() {
        let (pipeline, _sources, policies, events) = pipeline();
        let task_id = TaskId::new();
        let workspace_id = WorkspaceId::new();
        let _ = pipeline.registry.get_tools(workspace_id).await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        policies.insert(AccessPolicy {
            id: PolicyId::new(),
            workspace_id,
            actor_id: None,
            client_id: None,
            tool_path_pattern: "catalog.*".into(),
            decision: Dec::Deny,
            priority: 100,
        });

        let err = pipeline
            .invoke(
                &ctx(task_id, workspace_id),
                InvocationRequest { call_id: "call-1".into(), tool_path: "catalog.namespaces".into(), input: serde_json::json!({}) },
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, ToolInvocationError::PolicyDenied(p) if p == "catalog.namespaces"));
        let recorded = events.list(task_id).await.unwrap();
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0].payload.type_name(), "tool.call.denied");
    }

    #[tokio::test]
    async fn graphql_raw_call_with_a_mutation_field_is_denied_listing_the_effective_path() {
        let (pipeline, sources, policies, _events) = pipeline();
        let task_id = TaskId::new();
        let workspace_id = WorkspaceId::new();

        sources.insert(ToolSource {
            id: crate::domain::ids::ToolSourceId::new(),
            workspace_id,
            name: "gh".into(),
            config: ToolSourceConfig::GraphQl {
                endpoint: "https://example.test/graphql".into(),
                schema: None,
                auth: None,
                default_query_approval: None,
                default_mutation_approval: None,
                overrides: HashMap::new(),
            },
            enabled: true,
            spec_hash: "h1".into(),
            auth_fingerprint: "a1".into(),
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
        });
        let _ = pipeline.registry.get_tools(workspace_id).await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        policies.insert(AccessPolicy {
            id: PolicyId::new(),
            workspace_id,
            actor_id: None,
            client_id: None,
            tool_path_pattern: "gh.mutation.*".into(),
            decision: Dec::Deny,
            priority: 0,
        });

        let err = pipeline
            .invoke(
                &ctx(task_id, workspace_id),
                InvocationRequest {
                    call_id: "call-1".into(),
                    tool_path: "gh.raw".into(),
                    input: serde_json::json!({"query": "mutation { createIssue(input: {}) { id } }"}),
                },
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, ToolInvocationError::PolicyDenied(p) if p == "gh.mutation.createIssue"));
    }

    #[test]
    fn graphql_decision_falls_back_to_tool_path_when_no_fields_parse() {
        let marker = GraphqlSourceMarker {
            source_name: "gh".into(),
            endpoint: "https://example.test/graphql".into(),
            default_query_requires_approval: false,
            default_mutation_requires_approval: true,
        };
        let tool = ToolDefinition {
            path: "gh.raw".into(),
            description: String::new(),
            approval: Approval::Required,
            source: "gh".into(),
            credential: None,
            graphql_source: Some(marker.clone()),
            run_spec: RunSpec::GraphqlRaw { endpoint: marker.endpoint.clone(), auth_headers: HashMap::new() },
            input_schema: None,
        };
        let ctx = crate::domain::policy::DecisionContext { workspace_id: WorkspaceId::new(), actor_id: None, client_id: None };
        let (decision, paths) = graphql_decision(&tool, &marker, &serde_json::json!({}), &ctx, &[]);
        assert_eq!(decision, Decision::RequireApproval);
        assert_eq!(paths, vec!["gh.raw".to_string()]);
    }

    #[test]
    fn graphql_field_tool_derives_its_own_effective_path_without_an_explicit_query() {
        let marker = GraphqlSourceMarker {
            source_name: "gh".into(),
            endpoint: "https://example.test/graphql".into(),
            default_query_requires_approval: false,
            default_mutation_requires_approval: true,
        };
        let tool = ToolDefinition {
            path: "gh.createissue".into(),
            description: String::new(),
            approval: Approval::Required,
            source: "gh".into(),
            credential: None,
            graphql_source: Some(marker.clone()),
            run_spec: RunSpec::GraphqlField {
                endpoint: marker.endpoint.clone(),
                operation_type: GraphqlOperationType::Mutation,
                field_name: "createIssue".into(),
                query_template: "mutation { createIssue }".into(),
                auth_headers: HashMap::new(),
            },
            input_schema: None,
        };
        let ctx = crate::domain::policy::DecisionContext { workspace_id: WorkspaceId::new(), actor_id: None, client_id: None };
        let (decision, paths) = graphql_decision(&tool, &marker, &serde_json::json!({}), &ctx, &[]);
        assert_eq!(decision, Decision::RequireApproval);
        assert_eq!(paths, vec!["gh.mutation.createIssue".to_string()]);
    }
}
