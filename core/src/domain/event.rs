// Copyright (c) 2026 Conduit Systems
// SPDX-License-Identifier: AGPL-3.0

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use crate::domain::ids::{ApprovalId, TaskId, WorkspaceId};

/// An immutable, append-only record in a task's audit stream (`TaskEvent`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskEvent {
    pub sequence: i64,
    pub task_id: TaskId,
    pub payload: EventPayload,
    pub created_at: DateTime<Utc>,
}

/// Catch-all bag for forward-compatible fields a payload variant doesn't name
/// explicitly (spec §9: "carry unknown/forward-compat keys as an opaque
/// `extra` map" rather than reverting to a loosely typed value everywhere).
pub type Extra = HashMap<String, Value>;

/// The closed event type enumeration, expressed as a tagged sum
/// type instead of a `(type: String, payload: Value)` pair so every required
/// key is statically guaranteed present.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventPayload {
    TaskCreated {
        task_id: TaskId,
        status: String,
        runtime_id: String,
        timeout_ms: u64,
        workspace_id: WorkspaceId,
        actor_id: String,
        client_id: String,
        created_at: DateTime<Utc>,
        #[serde(default, flatten)]
        extra: Extra,
    },
    TaskQueued {
        task_id: TaskId,
        status: String,
        #[serde(default, flatten)]
        extra: Extra,
    },
    TaskRunning {
        task_id: TaskId,
        status: String,
        started_at: DateTime<Utc>,
        #[serde(default, flatten)]
        extra: Extra,
    },
    TaskCompleted {
        task_id: TaskId,
        status: String,
        exit_code: Option<i32>,
        duration_ms: Option<i64>,
        error: Option<String>,
        completed_at: DateTime<Utc>,
    },
    TaskFailed {
        task_id: TaskId,
        status: String,
        exit_code: Option<i32>,
        duration_ms: Option<i64>,
        error: Option<String>,
        completed_at: DateTime<Utc>,
    },
    TaskTimedOut {
        task_id: TaskId,
        status: String,
        exit_code: Option<i32>,
        duration_ms: Option<i64>,
        error: Option<String>,
        completed_at: DateTime<Utc>,
    },
    TaskDenied {
        task_id: TaskId,
        status: String,
        exit_code: Option<i32>,
        duration_ms: Option<i64>,
        error: Option<String>,
        completed_at: DateTime<Utc>,
    },
    TaskStdout {
        task_id: TaskId,
        line: String,
        timestamp: DateTime<Utc>,
    },
    TaskStderr {
        task_id: TaskId,
        line: String,
        timestamp: DateTime<Utc>,
    },
    ToolCallStarted {
        call_id: String,
        tool_path: String,
        approval: String,
        input: Value,
    },
    ToolCallCompleted {
        call_id: String,
        tool_path: String,
        output: Value,
    },
    ToolCallFailed {
        call_id: String,
        tool_path: String,
        error: String,
    },
    ToolCallDenied {
        call_id: String,
        tool_path: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        approval_id: Option<ApprovalId>,
    },
    ApprovalRequested {
        approval_id: ApprovalId,
        task_id: TaskId,
        call_id: String,
        tool_path: String,
        input: Value,
        created_at: DateTime<Utc>,
    },
    ApprovalResolved {
        approval_id: ApprovalId,
        task_id: TaskId,
        tool_path: String,
        decision: String,
        reviewer_id: Option<String>,
        reason: Option<String>,
        resolved_at: DateTime<Utc>,
    },
}

impl EventPayload {
    /// The dotted event type name as it appears in the closed enumeration
    ///, independent of how serde tags the variant on the wire.
    pub fn type_name(&self) -> &'static str {
        match self {
            EventPayload::TaskCreated { .. } => "task.created",
            EventPayload::TaskQueued { .. } => "task.queued",
            EventPayload::TaskRunning { .. } => "task.running",
            EventPayload::TaskCompleted { .. } => "task.completed",
            EventPayload::TaskFailed { .. } => "task.failed",
            EventPayload::TaskTimedOut { .. } => "task.timed_out",
            EventPayload::TaskDenied { .. } => "task.denied",
            EventPayload::TaskStdout { .. } => "task.stdout",
            EventPayload::TaskStderr { .. } => "task.stderr",
            EventPayload::ToolCallStarted { .. } => "tool.call.started",
            EventPayload::ToolCallCompleted { .. } => "tool.call.completed",
            EventPayload::ToolCallFailed { .. } => "tool.call.failed",
            EventPayload::ToolCallDenied { .. } => "tool.call.denied",
            EventPayload::ApprovalRequested { .. } => "approval.requested",
            EventPayload::ApprovalResolved { .. } => "approval.resolved",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_name_matches_closed_enumeration() {
        let payload = EventPayload::ToolCallStarted {
            call_id: "call-1".into(),
            tool_path: "demo.ping".into(),
            approval: "auto".into(),
            input: Value::Null,
        };
        assert_eq!(payload.type_name(), "tool.call.started");
    }

    #[test]
    fn serializes_with_type_tag() {
        let payload = EventPayload::TaskQueued {
            task_id: TaskId::new(),
            status: "queued".into(),
            extra: Extra::new(),
        };
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["type"], "task_queued");
    }
}
