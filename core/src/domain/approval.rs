// Copyright (c) 2026 Conduit Systems
// SPDX-License-Identifier: AGPL-3.0

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::ids::{ApprovalId, TaskId, WorkspaceId};

/// A gate for a single tool call awaiting human review (`Approval`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Approval {
    pub id: ApprovalId,
    pub task_id: TaskId,
    pub workspace_id: WorkspaceId,
    pub call_id: String,
    pub tool_path: String,
    pub input: Value,
    pub status: ApprovalStatus,
    pub reviewer_id: Option<String>,
    pub reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Denied,
}

impl ApprovalStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, ApprovalStatus::Approved | ApprovalStatus::Denied)
    }
}

/// The human verdict surfaced to `ApprovalManager::wait_for`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalVerdict {
    Approved,
    Denied,
}

impl Approval {
    pub fn new(
        id: ApprovalId,
        task_id: TaskId,
        workspace_id: WorkspaceId,
        call_id: String,
        tool_path: String,
        input: Value,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            task_id,
            workspace_id,
            call_id,
            tool_path,
            input,
            status: ApprovalStatus::Pending,
            reviewer_id: None,
            reason: None,
            created_at: now,
            resolved_at: None,
        }
    }

    pub fn verdict(&self) -> Option<ApprovalVerdict> {
        match self.status {
            ApprovalStatus::Approved => Some(ApprovalVerdict::Approved),
            ApprovalStatus::Denied => Some(ApprovalVerdict::Denied),
            ApprovalStatus::Pending => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_approval_is_pending_with_no_resolution() {
        let approval = Approval::new(
            ApprovalId::new(),
            TaskId::new(),
            WorkspaceId::new(),
            "call-1".into(),
            "demo.ping".into(),
            Value::Null,
            Utc::now(),
        );
        assert_eq!(approval.status, ApprovalStatus::Pending);
        assert!(approval.resolved_at.is_none());
        assert_eq!(approval.verdict(), None);
    }

    #[test]
    fn terminal_statuses_produce_a_verdict() {
        assert!(ApprovalStatus::Approved.is_terminal());
        assert!(ApprovalStatus::Denied.is_terminal());
        assert!(!ApprovalStatus::Pending.is_terminal());
    }
}
