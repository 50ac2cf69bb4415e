// Copyright (c) 2026 Conduit Systems
// SPDX-License-Identifier: AGPL-3.0

//! Executes a `RunSpec` against its protocol. Pure dispatch: by
//! the time a call reaches here, policy and approval have already cleared
//! and credentials (if any) are already resolved into headers.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use crate::domain::errors::ToolInvocationError;
use crate::domain::tool_definition::{ParameterLocation, RunSpec, ToolDefinition};
use crate::domain::tool_source::McpTransport;
use crate::infrastructure::builtin_tools;
use crate::infrastructure::protocol::openapi::postman;
use crate::infrastructure::protocol::{graphql, mcp_client::McpConnectionPool, openapi};

pub struct ToolDispatcher {
    http: reqwest::Client,
    mcp_pool: Arc<McpConnectionPool>,
}

impl ToolDispatcher {
    pub fn new(http: reqwest::Client, mcp_pool: Arc<McpConnectionPool>) -> Self {
        Self { http, mcp_pool }
    }

    /// Dispatch one call by `runSpec.kind`. `auth_headers` are
    /// the headers the Credential Resolver produced for this call, if the
    /// tool carries a `ToolCredentialSpec`; `catalog` is the workspace's
    /// current ready tool list, needed only by builtin catalog handlers.
    pub async fn dispatch(
        &self,
        run_spec: &RunSpec,
        input: &Value,
        auth_headers: &HashMap<String, String>,
        catalog: &[ToolDefinition],
    ) -> Result<Value, ToolInvocationError> {
        match run_spec {
            RunSpec::Builtin { handler } => builtin_tools::dispatch(handler, input, catalog),
            RunSpec::Mcp { url, transport, query_params, tool_name } => {
                self.dispatch_mcp(url, *transport, query_params, tool_name, input).await
            }
            RunSpec::OpenApi { method, path_template, base_url, parameters, .. } => {
                self.dispatch_openapi(method, path_template, base_url, parameters, input, auth_headers).await
            }
            RunSpec::Postman { method, url_template, headers, .. } => {
                self.dispatch_postman(method, url_template, headers, input, auth_headers).await
            }
            RunSpec::GraphqlRaw { endpoint, .. } => self.dispatch_graphql_raw(endpoint, input, auth_headers).await,
            RunSpec::GraphqlField { endpoint, query_template, field_name, .. } => {
                self.dispatch_graphql_field(endpoint, query_template, field_name, input, auth_headers).await
            }
        }
    }

    async fn dispatch_mcp(
        &self,
        url: &str,
        transport: Option<McpTransport>,
        query_params: &HashMap<String, String>,
        tool_name: &str,
        input: &Value,
    ) -> Result<Value, ToolInvocationError> {
        let transport = transport.unwrap_or(McpTransport::StreamableHttp);
        let headers = query_params.clone();

        let client = self.mcp_pool.get_or_connect(url, transport, headers.clone());
        match client.call_tool(tool_name, input.clone()).await {
            Ok(result) => Ok(result),
            Err(first_error) => {
                // Reconnect once on transport error, then retry.
                self.mcp_pool.evict(url, transport, &headers);
                let retried = self.mcp_pool.get_or_connect(url, transport, headers);
                retried
                    .call_tool(tool_name, input.clone())
                    .await
                    .map_err(|_| ToolInvocationError::ToolExecutionError(first_error.to_string()))
            }
        }
    }

    async fn dispatch_openapi(
        &self,
        method: &str,
        path_template: &str,
        base_url: &str,
        parameters: &[crate::domain::tool_definition::OpenApiParameter],
        input: &Value,
        auth_headers: &HashMap<String, String>,
    ) -> Result<Value, ToolInvocationError> {
        let path = openapi::interpolate_path(path_template, input);
        let url = format!("{}{}", base_url.trim_end_matches('/'), path);

        let mut query = Vec::new();
        let mut headers = auth_headers.clone();
        for param in parameters {
            let Some(value) = input.get(&param.name) else { continue };
            let rendered = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            match param.location {
                ParameterLocation::Query => query.push((param.name.clone(), rendered)),
                ParameterLocation::Header => {
                    headers.insert(param.name.clone(), rendered);
                }
                ParameterLocation::Path | ParameterLocation::Body => {}
            }
        }

        let body = input.get("body");
        openapi::execute(&self.http, method, &url, &query, &headers, body)
            .await
            .map_err(|e| ToolInvocationError::ToolExecutionError(e.to_string()))
    }

    async fn dispatch_postman(
        &self,
        method: &str,
        url_template: &str,
        static_headers: &[(String, String)],
        input: &Value,
        auth_headers: &HashMap<String, String>,
    ) -> Result<Value, ToolInvocationError> {
        let url = postman::interpolate_url(url_template, input);
        let mut headers: HashMap<String, String> = static_headers.iter().cloned().collect();
        headers.extend(auth_headers.clone());
        let body = input.get("body");
        openapi::execute(&self.http, method, &url, &[], &headers, body)
            .await
            .map_err(|e| ToolInvocationError::ToolExecutionError(e.to_string()))
    }

    async fn dispatch_graphql_raw(
        &self,
        endpoint: &str,
        input: &Value,
        auth_headers: &HashMap<String, String>,
    ) -> Result<Value, ToolInvocationError> {
        let query = input.get("query").and_then(Value::as_str).ok_or_else(|| {
            ToolInvocationError::ToolExecutionError("graphql_raw call missing `query`".to_string())
        })?;
        let variables = input.get("variables").cloned().unwrap_or(Value::Null);
        graphql::execute(&self.http, endpoint, query, &variables, auth_headers)
            .await
            .map_err(|e| ToolInvocationError::ToolExecutionError(e.to_string()))
    }

    async fn dispatch_graphql_field(
        &self,
        endpoint: &str,
        query_template: &str,
        field_name: &str,
        input: &Value,
        auth_headers: &HashMap<String, String>,
    ) -> Result<Value, ToolInvocationError> {
        // An explicit `query` in the input behaves exactly like `graphql_raw`
        // (spec §4.7: "if input supplies an explicit query, behave as raw").
        if input.get("query").and_then(Value::as_str).is_some() {
            return self.dispatch_graphql_raw(endpoint, input, auth_headers).await;
        }

        let variables = graphql::render_variables(input);
        let envelope = graphql::execute(&self.http, endpoint, query_template, &variables, auth_headers)
            .await
            .map_err(|e| ToolInvocationError::ToolExecutionError(e.to_string()))?;

        envelope.get(field_name).cloned().ok_or_else(|| {
            ToolInvocationError::ToolExecutionError(format!("graphql response missing field `{field_name}`"))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::tool_definition::Approval;

    fn dispatcher() -> ToolDispatcher {
        ToolDispatcher::new(reqwest::Client::new(), Arc::new(McpConnectionPool::new()))
    }

    #[tokio::test]
    async fn builtin_dispatch_uses_the_provided_catalog() {
        let dispatcher = dispatcher();
        let catalog = vec![ToolDefinition {
            path: "demo.ping".into(),
            description: "ping".into(),
            approval: Approval::Auto,
            source: "demo".into(),
            credential: None,
            graphql_source: None,
            run_spec: RunSpec::Builtin { handler: "demo.ping".into() },
            input_schema: None,
        }];
        let result = dispatcher
            .dispatch(
                &RunSpec::Builtin { handler: builtin_tools::CATALOG_NAMESPACES.to_string() },
                &serde_json::json!({}),
                &HashMap::new(),
                &catalog,
            )
            .await
            .unwrap();
        assert_eq!(result["namespaces"], serde_json::json!(["demo"]));
    }

    #[tokio::test]
    async fn graphql_raw_without_query_field_is_an_execution_error() {
        let dispatcher = dispatcher();
        let err = dispatcher
            .dispatch(
                &RunSpec::GraphqlRaw { endpoint: "https://example.test/graphql".into(), auth_headers: HashMap::new() },
                &serde_json::json!({}),
                &HashMap::new(),
                &[],
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ToolInvocationError::ToolExecutionError(_)));
    }

    #[tokio::test]
    async fn graphql_field_unwraps_the_operation_name_from_the_response_envelope() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/graphql")
            .with_status(200)
            .with_body(r#"{"data":{"createIssue":{"id":"42"}}}"#)
            .create_async()
            .await;

        let dispatcher = dispatcher();
        let result = dispatcher
            .dispatch(
                &RunSpec::GraphqlField {
                    endpoint: format!("{}/graphql", server.url()),
                    operation_type: crate::domain::tool_definition::GraphqlOperationType::Mutation,
                    field_name: "createIssue".into(),
                    query_template: "mutation { createIssue { id } }".into(),
                    auth_headers: HashMap::new(),
                },
                &serde_json::json!({}),
                &HashMap::new(),
                &[],
            )
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(result, serde_json::json!({"id": "42"}));
    }

    #[tokio::test]
    async fn graphql_field_with_an_explicit_query_behaves_like_raw() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/graphql")
            .match_body(mockito::Matcher::PartialJson(serde_json::json!({"query": "{ viewer { login } }"})))
            .with_status(200)
            .with_body(r#"{"data":{"viewer":{"login":"octocat"}}}"#)
            .create_async()
            .await;

        let dispatcher = dispatcher();
        let result = dispatcher
            .dispatch(
                &RunSpec::GraphqlField {
                    endpoint: format!("{}/graphql", server.url()),
                    operation_type: crate::domain::tool_definition::GraphqlOperationType::Query,
                    field_name: "createIssue".into(),
                    query_template: "mutation { createIssue { id } }".into(),
                    auth_headers: HashMap::new(),
                },
                &serde_json::json!({"query": "{ viewer { login } }"}),
                &HashMap::new(),
                &[],
            )
            .await
            .unwrap();

        mock.assert_async().await;
        // The explicit query's own envelope is returned unwrapped, not keyed
        // by the tool's `field_name` ("createIssue" is absent here).
        assert_eq!(result, serde_json::json!({"viewer": {"login": "octocat"}}));
    }
}
