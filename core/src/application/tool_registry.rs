// Copyright (c) 2026 Conduit Systems
// SPDX-License-Identifier: AGPL-3.0

//! The per-workspace compiled-tool cache and its build state machine (spec
//! §4.6). Callers ask for `GetTools(workspace)`; the registry serves a ready
//! build when the signature is current, triggers a rebuild when it isn't,
//! and serves a stale build while one is in flight rather than blocking.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::domain::ids::{BuildId, WorkspaceId};
use crate::domain::registry_build::{compute_signature, SignatureInput};
use crate::domain::repository::{RegistryRepository, RepositoryError, ToolSourceRepository};
use crate::domain::tool_definition::ToolDefinition;
use crate::domain::tool_source::ToolSource;

use super::tool_source_compiler::ToolSourceCompiler;

#[derive(Debug, Error)]
pub enum ToolRegistryError {
    #[error("registry build is in progress and no prior build is ready")]
    Loading,

    #[error("repository error: {0}")]
    Repository(#[from] RepositoryError),
}

/// What `get_tools` actually served, so callers (the invocation pipeline, a
/// `tools/list` endpoint) can tell a fresh answer from a stale one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    Fresh,
    Stale,
}

#[derive(Debug, Clone)]
pub struct RegistryLookup {
    pub tools: Vec<ToolDefinition>,
    pub freshness: Freshness,
}

pub struct ToolRegistry {
    tool_sources: Arc<dyn ToolSourceRepository>,
    registry: Arc<dyn RegistryRepository>,
    compiler: Arc<ToolSourceCompiler>,
    source_build_budget: Duration,
    include_base_tools: bool,
}

impl ToolRegistry {
    pub fn new(
        tool_sources: Arc<dyn ToolSourceRepository>,
        registry: Arc<dyn RegistryRepository>,
        compiler: Arc<ToolSourceCompiler>,
        source_build_budget: Duration,
        include_base_tools: bool,
    ) -> Arc<Self> {
        Arc::new(Self { tool_sources, registry, compiler, source_build_budget, include_base_tools })
    }

    /// `GetTools(W)`: serve a current ready build, trigger a
    /// rebuild on signature drift, and serve the last ready build while the
    /// rebuild runs rather than block the caller on it.
    pub async fn get_tools(self: &Arc<Self>, workspace_id: WorkspaceId) -> Result<RegistryLookup, ToolRegistryError> {
        let sources = self.tool_sources.list_tool_sources(workspace_id).await?;
        let enabled: Vec<ToolSource> = sources.into_iter().filter(|s| s.enabled).collect();
        let signature = signature_for(&enabled);

        let state = self.registry.get_registry_state(workspace_id).await?;

        if state.signature.as_deref() == Some(signature.as_str()) && state.is_ready() {
            let tools = self.registry.get_ready_tools(workspace_id).await?;
            return Ok(RegistryLookup { tools, freshness: Freshness::Fresh });
        }

        if !state.is_building() {
            let this = Arc::clone(self);
            let build_id = BuildId::new();
            tracing::info!(workspace_id = %workspace_id, build_id = %build_id, "registry rebuild triggered");
            metrics::counter!("conduit_registry_rebuild_started_total").increment(1);
            tokio::spawn(async move {
                this.run_build(workspace_id, enabled, signature, build_id).await;
            });
        }

        if state.is_ready() {
            let tools = self.registry.get_ready_tools(workspace_id).await?;
            Ok(RegistryLookup { tools, freshness: Freshness::Stale })
        } else {
            Err(ToolRegistryError::Loading)
        }
    }

    async fn run_build(self: Arc<Self>, workspace_id: WorkspaceId, sources: Vec<ToolSource>, signature: String, build_id: BuildId) {
        let span = tracing::info_span!("registry_build", workspace_id = %workspace_id, build_id = %build_id);
        let _enter = span.enter();

        if let Err(e) = self.registry.begin_build(workspace_id, signature.clone(), build_id).await {
            tracing::warn!(error = %e, "failed to record registry build start");
            metrics::counter!("conduit_registry_rebuild_failed_total").increment(1);
            return;
        }

        let mut all_tools = Vec::new();
        let mut all_warnings = Vec::new();

        for source in &sources {
            let outcome = tokio::time::timeout(self.source_build_budget, self.compiler.compile(source)).await;
            match outcome {
                Ok(compiled) => {
                    all_warnings.extend(compiled.warnings);
                    all_tools.extend(compiled.tools);
                }
                Err(_) => {
                    tracing::warn!(source = %source.name, "tool source compilation exceeded its time budget");
                    all_warnings.push(format!("source '{}' exceeded its compile time budget and contributed no tools", source.name));
                }
            }
        }

        if self.include_base_tools {
            let existing_paths: std::collections::HashSet<String> = all_tools.iter().map(|t| t.path.clone()).collect();
            let builtins = crate::infrastructure::builtin_tools::base_tool_definitions()
                .into_iter()
                .filter(|b| !existing_paths.contains(&b.path));
            all_tools.extend(builtins);
        }

        all_tools.sort_by(|a, b| a.path.cmp(&b.path));
        let namespaces = distinct_namespaces(&all_tools);

        if let Err(e) = self.registry.put_tools_batch(build_id, all_tools).await {
            tracing::warn!(error = %e, "failed to persist compiled tools");
            let _ = self.registry.fail_build(build_id, e.to_string()).await;
            metrics::counter!("conduit_registry_rebuild_failed_total").increment(1);
            return;
        }
        if let Err(e) = self.registry.put_namespaces_batch(build_id, namespaces).await {
            tracing::warn!(error = %e, "failed to persist registry namespaces");
            let _ = self.registry.fail_build(build_id, e.to_string()).await;
            metrics::counter!("conduit_registry_rebuild_failed_total").increment(1);
            return;
        }

        match self.registry.finish_build(build_id, all_warnings).await {
            Ok(()) => {
                tracing::info!("registry build finished");
                metrics::counter!("conduit_registry_rebuild_finished_total").increment(1);
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to finish registry build");
                metrics::counter!("conduit_registry_rebuild_failed_total").increment(1);
            }
        }
    }
}

fn signature_for(sources: &[ToolSource]) -> String {
    let inputs: Vec<SignatureInput> = sources
        .iter()
        .map(|s| SignatureInput {
            source_id: s.id.to_string(),
            spec_hash: s.spec_hash.clone(),
            auth_fingerprint: s.auth_fingerprint.clone(),
            updated_at: s.updated_at,
            enabled: s.enabled,
        })
        .collect();
    compute_signature(&inputs)
}

fn distinct_namespaces(tools: &[ToolDefinition]) -> Vec<String> {
    let mut namespaces: Vec<String> =
        tools.iter().filter_map(|t| t.path.split_once('.').map(|(ns, _)| ns.to_string())).collect();
    namespaces.sort();
    namespaces.dedup();
    namespaces
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ids::WorkspaceId;
    use crate::infrastructure::protocol::mcp_client::McpConnectionPool;
    use crate::infrastructure::repositories::in_memory::{InMemoryRegistryRepository, InMemoryToolSourceRepository};

    fn registry() -> Arc<ToolRegistry> {
        let tool_sources = Arc::new(InMemoryToolSourceRepository::new());
        let registry_repo = Arc::new(InMemoryRegistryRepository::new());
        let compiler = Arc::new(ToolSourceCompiler::new(reqwest::Client::new(), Arc::new(McpConnectionPool::new())));
        ToolRegistry::new(tool_sources, registry_repo, compiler, Duration::from_secs(5), true)
    }

    #[tokio::test]
    async fn empty_workspace_with_no_sources_serves_only_builtins_once_built() {
        let reg = registry();
        let workspace_id = WorkspaceId::new();

        let first = reg.get_tools(workspace_id).await;
        assert!(matches!(first, Err(ToolRegistryError::Loading)));

        tokio::time::sleep(Duration::from_millis(50)).await;

        let second = reg.get_tools(workspace_id).await.unwrap();
        assert_eq!(second.freshness, Freshness::Fresh);
        assert!(second.tools.iter().any(|t| t.path == "discover"));
    }

    #[test]
    fn distinct_namespaces_are_sorted_and_deduped() {
        let tools = vec![
            ToolDefinition {
                path: "b.tool1".into(),
                description: String::new(),
                approval: crate::domain::tool_definition::Approval::Auto,
                source: "b".into(),
                credential: None,
                graphql_source: None,
                run_spec: crate::domain::tool_definition::RunSpec::Builtin { handler: "x".into() },
                input_schema: None,
            },
            ToolDefinition {
                path: "a.tool2".into(),
                description: String::new(),
                approval: crate::domain::tool_definition::Approval::Auto,
                source: "a".into(),
                credential: None,
                graphql_source: None,
                run_spec: crate::domain::tool_definition::RunSpec::Builtin { handler: "x".into() },
                input_schema: None,
            },
            ToolDefinition {
                path: "a.tool3".into(),
                description: String::new(),
                approval: crate::domain::tool_definition::Approval::Auto,
                source: "a".into(),
                credential: None,
                graphql_source: None,
                run_spec: crate::domain::tool_definition::RunSpec::Builtin { handler: "x".into() },
                input_schema: None,
            },
        ];
        assert_eq!(distinct_namespaces(&tools), vec!["a".to_string(), "b".to_string()]);
    }
}
