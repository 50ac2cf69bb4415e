// Copyright (c) 2026 Conduit Systems
// SPDX-License-Identifier: AGPL-3.0

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::ids::{BuildId, WorkspaceId};
use crate::domain::tool_definition::ToolDefinition;

/// Signature prefix bumped whenever the signature computation itself changes
/// shape (spec §4.6: `sig(W) = V1 || sort(...)`).
pub const SIGNATURE_VERSION: &str = "v1";

/// A workspace's compiled-tool cache, transitioning between no-build,
/// building, and ready (`RegistryBuild`, §4.6 state machine).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryState {
    pub workspace_id: WorkspaceId,
    pub signature: Option<String>,
    pub ready_build_id: Option<BuildId>,
    pub building_build_id: Option<BuildId>,
}

impl RegistryState {
    pub fn empty(workspace_id: WorkspaceId) -> Self {
        Self {
            workspace_id,
            signature: None,
            ready_build_id: None,
            building_build_id: None,
        }
    }

    pub fn is_building(&self) -> bool {
        self.building_build_id.is_some()
    }

    pub fn is_ready(&self) -> bool {
        self.ready_build_id.is_some()
    }
}

/// The materialized output of one build, batched tool entries plus
/// diagnostics (`RegistryBuild`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryBuild {
    pub id: BuildId,
    pub workspace_id: WorkspaceId,
    pub signature: String,
    pub tools: Vec<ToolDefinition>,
    pub namespaces: Vec<String>,
    pub warnings: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl RegistryBuild {
    pub fn new(id: BuildId, workspace_id: WorkspaceId, signature: String, now: DateTime<Utc>) -> Self {
        Self {
            id,
            workspace_id,
            signature,
            tools: Vec::new(),
            namespaces: Vec::new(),
            warnings: Vec::new(),
            created_at: now,
            finished_at: None,
        }
    }
}

/// One enabled source's contribution to the registry signature:
/// `s.id:s.specHash:s.authFingerprint:s.updatedAt:enabled`.
#[derive(Debug, Clone)]
pub struct SignatureInput {
    pub source_id: String,
    pub spec_hash: String,
    pub auth_fingerprint: String,
    pub updated_at: DateTime<Utc>,
    pub enabled: bool,
}

/// Compute the registry signature from a workspace's enabled sources
///. Deterministic regardless of input order: entries are sorted
/// before joining.
pub fn compute_signature(inputs: &[SignatureInput]) -> String {
    let mut entries: Vec<String> = inputs
        .iter()
        .map(|i| {
            format!(
                "{}:{}:{}:{}:{}",
                i.source_id,
                i.spec_hash,
                i.auth_fingerprint,
                i.updated_at.to_rfc3339(),
                i.enabled
            )
        })
        .collect();
    entries.sort();
    format!("{SIGNATURE_VERSION}||{}", entries.join(","))
}
