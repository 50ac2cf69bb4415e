// Copyright (c) 2026 Conduit Systems
// SPDX-License-Identifier: AGPL-3.0

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use crate::domain::ids::{ToolSourceId, WorkspaceId};

/// A workspace-registered external tool origin (`ToolSource`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSource {
    pub id: ToolSourceId,
    pub workspace_id: WorkspaceId,
    pub name: String,
    pub config: ToolSourceConfig,
    pub enabled: bool,
    pub spec_hash: String,
    pub auth_fingerprint: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Typed per-kind source configuration ("Tool source config formats").
/// A tagged sum type instead of a loosely-typed config blob.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolSourceConfig {
    Mcp {
        url: String,
        #[serde(default)]
        transport: Option<McpTransport>,
        #[serde(default)]
        query_params: HashMap<String, String>,
        #[serde(default)]
        default_approval: Option<ApprovalDefault>,
        #[serde(default)]
        overrides: HashMap<String, McpToolOverride>,
    },
    OpenApi {
        spec: OpenApiSpecRef,
        #[serde(default)]
        base_url: Option<String>,
        #[serde(default)]
        auth: Option<AuthSpec>,
        #[serde(default)]
        default_read_approval: Option<ApprovalDefault>,
        #[serde(default)]
        default_write_approval: Option<ApprovalDefault>,
        #[serde(default)]
        overrides: HashMap<String, ApprovalDefault>,
    },
    GraphQl {
        endpoint: String,
        #[serde(default)]
        schema: Option<Value>,
        #[serde(default)]
        auth: Option<AuthSpec>,
        #[serde(default)]
        default_query_approval: Option<ApprovalDefault>,
        #[serde(default)]
        default_mutation_approval: Option<ApprovalDefault>,
        #[serde(default)]
        overrides: HashMap<String, ApprovalDefault>,
    },
}

impl ToolSourceConfig {
    pub fn kind(&self) -> &'static str {
        match self {
            ToolSourceConfig::Mcp { .. } => "mcp",
            ToolSourceConfig::OpenApi { .. } => "openapi",
            ToolSourceConfig::GraphQl { .. } => "graphql",
        }
    }
}

/// Either a URL pointing at an OpenAPI document, an inline document, or a
/// Postman collection reference (`postman:<uid>`) — a sub-flavor of OpenAPI
///.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OpenApiSpecRef {
    Url(String),
    Inline(Value),
}

impl OpenApiSpecRef {
    /// True when this ref names a Postman collection (`postman:<uid>`).
    pub fn is_postman(&self) -> bool {
        matches!(self, OpenApiSpecRef::Url(u) if u.starts_with("postman:"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum McpTransport {
    Sse,
    StreamableHttp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalDefault {
    Auto,
    Required,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpToolOverride {
    pub approval: Option<ApprovalDefault>,
}

/// Authentication mode for an OpenAPI/GraphQL source (`AuthSpec`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuthSpec {
    None,
    Basic {
        #[serde(default)]
        mode: Option<CredentialMode>,
        #[serde(default)]
        username: Option<String>,
        #[serde(default)]
        password: Option<String>,
    },
    Bearer {
        #[serde(default)]
        mode: Option<CredentialMode>,
        #[serde(default)]
        token: Option<String>,
    },
    ApiKey {
        #[serde(default)]
        mode: Option<CredentialMode>,
        header: String,
        #[serde(default)]
        value: Option<String>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialMode {
    Static,
    Workspace,
    Actor,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_reflects_the_variant() {
        let config = ToolSourceConfig::Mcp {
            url: "https://example.test/mcp".into(),
            transport: None,
            query_params: HashMap::new(),
            default_approval: None,
            overrides: HashMap::new(),
        };
        assert_eq!(config.kind(), "mcp");
    }

    #[test]
    fn postman_spec_ref_is_detected_by_prefix() {
        let ref_ = OpenApiSpecRef::Url("postman:abcd-1234".into());
        assert!(ref_.is_postman());
        let ref_ = OpenApiSpecRef::Url("https://example.test/openapi.json".into());
        assert!(!ref_.is_postman());
    }
}
