// Copyright (c) 2026 Conduit Systems
// SPDX-License-Identifier: AGPL-3.0

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::ids::{ActorId, CredentialId, WorkspaceId};

/// An addressable secret attached to a tool source (`Credential`).
/// `secretJson` is opaque to the core — only a `CredentialProvider` knows
/// how to turn it into usable header values.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credential {
    pub id: CredentialId,
    pub workspace_id: WorkspaceId,
    pub source_key: String,
    pub scope: CredentialScope,
    pub actor_id: Option<ActorId>,
    pub provider: String,
    pub secret_json: Value,
    pub overrides_json: Option<Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialScope {
    Workspace,
    Actor,
}

/// HTTP auth scheme a `ToolCredentialSpec` maps a resolved credential onto
/// (step 3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthType {
    Bearer,
    ApiKey,
    Basic,
}

/// What a `ToolDefinition` requires from the credential resolver to build
/// request headers for one call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCredentialSpec {
    pub source_key: String,
    pub scope: CredentialScope,
    pub auth_type: AuthType,
    pub header_name: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credential_scope_round_trips_through_serde() {
        let json = serde_json::to_value(CredentialScope::Actor).unwrap();
        assert_eq!(json, serde_json::json!("actor"));
    }
}
