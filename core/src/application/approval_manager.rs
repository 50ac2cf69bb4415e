// Copyright (c) 2026 Conduit Systems
// SPDX-License-Identifier: AGPL-3.0

//! Human-in-the-loop gate for tool calls requiring approval.
//! `create` and `resolve` delegate straight to `ApprovalRepository` (which
//! already enforces P4 idempotency); `wait_for` polls since no notify-on-write
//! change feed is assumed to be available.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::domain::approval::{Approval, ApprovalStatus, ApprovalVerdict};
use crate::domain::event::EventPayload;
use crate::domain::ids::{ApprovalId, TaskId, WorkspaceId};
use crate::domain::repository::{ApprovalRepository, RepositoryError};

use super::event_log::EventLog;

#[derive(Debug, thiserror::Error)]
pub enum ApprovalWaitError {
    #[error("approval wait was cancelled before resolution")]
    Cancelled,

    #[error("repository error: {0}")]
    Repository(#[from] RepositoryError),
}

pub struct ApprovalManager {
    repository: Arc<dyn ApprovalRepository>,
    events: EventLog,
    poll_interval: Duration,
}

impl ApprovalManager {
    pub fn new(repository: Arc<dyn ApprovalRepository>, events: EventLog, poll_interval: Duration) -> Self {
        Self { repository, events, poll_interval }
    }

    /// Create a pending approval and publish `approval.requested` (/// step 1).
    pub async fn create(
        &self,
        task_id: TaskId,
        workspace_id: WorkspaceId,
        call_id: String,
        tool_path: String,
        input: Value,
    ) -> Result<Approval, RepositoryError> {
        let approval = self
            .repository
            .create_approval(task_id, workspace_id, call_id.clone(), tool_path.clone(), input.clone())
            .await?;

        self.events
            .publish(
                task_id,
                EventPayload::ApprovalRequested {
                    approval_id: approval.id,
                    task_id,
                    call_id,
                    tool_path,
                    input,
                    created_at: approval.created_at,
                },
            )
            .await?;

        Ok(approval)
    }

    /// Block (by polling) until the approval reaches a terminal state or
    /// `cancel` fires (step 2). `cancel` is observed between polls
    /// so a task cancellation unblocks a pending call promptly.
    pub async fn wait_for(&self, id: ApprovalId, cancel: &CancellationToken) -> Result<ApprovalVerdict, ApprovalWaitError> {
        loop {
            let approval = self
                .repository
                .get_approval(id)
                .await?
                .ok_or_else(|| RepositoryError::NotFound(format!("approval {id}")))?;

            if let Some(verdict) = approval.verdict() {
                return Ok(verdict);
            }

            tokio::select! {
                _ = tokio::time::sleep(self.poll_interval) => {}
                _ = cancel.cancelled() => return Err(ApprovalWaitError::Cancelled),
            }
        }
    }

    /// Record a reviewer's decision and publish `approval.resolved` (spec
    /// §4.8 step 3). Idempotent: resolving an already-terminal approval a
    /// second time is a no-op at the repository layer and still
    /// publishes nothing new here since the returned approval's
    /// `resolved_at` is unchanged from the first call.
    pub async fn resolve(
        &self,
        id: ApprovalId,
        decision: ApprovalStatus,
        reviewer_id: Option<String>,
        reason: Option<String>,
    ) -> Result<Approval, RepositoryError> {
        let before = self.repository.get_approval(id).await?;
        let was_pending = before.as_ref().is_some_and(|a| !a.status.is_terminal());

        let approval = self.repository.resolve_approval(id, decision, reviewer_id.clone(), reason.clone()).await?;

        if was_pending {
            self.events
                .publish(
                    approval.task_id,
                    EventPayload::ApprovalResolved {
                        approval_id: approval.id,
                        task_id: approval.task_id,
                        tool_path: approval.tool_path.clone(),
                        decision: decision_str(approval.status).to_string(),
                        reviewer_id: approval.reviewer_id.clone(),
                        reason: approval.reason.clone(),
                        resolved_at: approval.resolved_at.unwrap_or(approval.created_at),
                    },
                )
                .await?;
        }

        Ok(approval)
    }
}

fn decision_str(status: ApprovalStatus) -> &'static str {
    use ApprovalStatus::*;
    match status {
        Approved => "approved",
        Denied => "denied",
        Pending => "pending",
    }
}
