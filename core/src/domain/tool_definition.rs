// Copyright (c) 2026 Conduit Systems
// SPDX-License-Identifier: AGPL-3.0

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use crate::domain::credential::ToolCredentialSpec;
use crate::domain::tool_source::McpTransport;

/// A callable compiled from a `ToolSource` (or a builtin), cached by the
/// Tool Registry and never persisted standalone (`ToolDefinition`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub path: String,
    pub description: String,
    pub approval: Approval,
    pub source: String,
    pub credential: Option<ToolCredentialSpec>,
    /// Present for `graphql_raw`/`graphql_field` tools so the policy engine
    /// takes the GraphQL effective-path branch (step 3).
    pub graphql_source: Option<GraphqlSourceMarker>,
    pub run_spec: RunSpec,
    #[serde(default)]
    pub input_schema: Option<Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Approval {
    Auto,
    Required,
}

impl Approval {
    pub fn requires_approval(self) -> bool {
        matches!(self, Approval::Required)
    }
}

/// Marks a tool as belonging to a GraphQL source, carrying the bits the
/// policy engine needs to derive effective paths (GraphQL
/// extension, §6 glossary "Effective tool path"). The per-operation-type
/// defaults travel with the marker because the pipeline only has the
/// compiled `ToolDefinition` in hand, not the originating `ToolSource`
/// config, when it evaluates a GraphQL decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphqlSourceMarker {
    pub source_name: String,
    pub endpoint: String,
    pub default_query_requires_approval: bool,
    pub default_mutation_requires_approval: bool,
}

/// The protocol-specific data needed to dispatch a tool.
/// A tagged sum type per its re-architecture note on run specs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RunSpec {
    Builtin {
        handler: String,
    },
    Mcp {
        url: String,
        transport: Option<McpTransport>,
        query_params: HashMap<String, String>,
        tool_name: String,
    },
    OpenApi {
        method: String,
        path_template: String,
        base_url: String,
        parameters: Vec<OpenApiParameter>,
        auth_headers: HashMap<String, String>,
    },
    Postman {
        method: String,
        url_template: String,
        headers: Vec<(String, String)>,
        body_mode: PostmanBodyMode,
    },
    GraphqlRaw {
        endpoint: String,
        auth_headers: HashMap<String, String>,
    },
    GraphqlField {
        endpoint: String,
        operation_type: GraphqlOperationType,
        field_name: String,
        query_template: String,
        auth_headers: HashMap<String, String>,
    },
}

impl RunSpec {
    pub fn kind(&self) -> &'static str {
        match self {
            RunSpec::Builtin { .. } => "builtin",
            RunSpec::Mcp { .. } => "mcp",
            RunSpec::OpenApi { .. } => "openapi",
            RunSpec::Postman { .. } => "postman",
            RunSpec::GraphqlRaw { .. } => "graphql_raw",
            RunSpec::GraphqlField { .. } => "graphql_field",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenApiParameter {
    pub name: String,
    pub location: ParameterLocation,
    pub required: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParameterLocation {
    Path,
    Query,
    Header,
    Body,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PostmanBodyMode {
    Raw,
    Urlencoded,
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GraphqlOperationType {
    Query,
    Mutation,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_spec_kind_matches_dispatcher_discriminant() {
        let spec = RunSpec::GraphqlRaw {
            endpoint: "https://example.test/graphql".into(),
            auth_headers: HashMap::new(),
        };
        assert_eq!(spec.kind(), "graphql_raw");
    }

    #[test]
    fn required_approval_flag_reflects_variant() {
        assert!(Approval::Required.requires_approval());
        assert!(!Approval::Auto.requires_approval());
    }
}
