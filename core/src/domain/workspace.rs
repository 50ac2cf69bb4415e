// Copyright (c) 2026 Conduit Systems
// SPDX-License-Identifier: AGPL-3.0

use serde::{Deserialize, Serialize};

use crate::domain::ids::WorkspaceId;

/// Tenant boundary. All other entities are scoped under some workspace
/// (`Workspace`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workspace {
    pub id: WorkspaceId,
    pub name: String,
}
