// Copyright (c) 2026 Conduit Systems
// SPDX-License-Identifier: AGPL-3.0

use thiserror::Error;

use crate::domain::ids::ApprovalId;

/// The closed error taxonomy surfaced on tool-call failure. A
/// typed enum rather than a string-prefixed message (spec §9: "error
/// prefixes ... are a protocol leak between sandbox and executor").
#[derive(Debug, Clone, Error)]
pub enum ToolInvocationError {
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("{0} (policy denied)")]
    PolicyDenied(String),

    #[error("{tool_path} (approval denied)")]
    ApprovalDenied { tool_path: String, approval_id: ApprovalId },

    #[error("Missing credential: {source_key} ({mode})")]
    MissingCredential { source_key: String, mode: String },

    #[error("Tool execution failed: {0}")]
    ToolExecutionError(String),
}

impl ToolInvocationError {
    /// Whether the Task Executor should map this error to terminal `denied`
    /// rather than `failed` (error path, §7). Only a human's approval
    /// denial terminates a task as `denied`; a policy deny is a `failed`
    /// task (spec §8 scenario 2 vs. scenario 4).
    pub fn is_denial(&self) -> bool {
        matches!(self, ToolInvocationError::ApprovalDenied { .. })
    }

    /// The stable `reason` text for a `tool.call.denied` event.
    pub fn deny_reason(&self) -> Option<&'static str> {
        match self {
            ToolInvocationError::PolicyDenied(_) => Some("policy_deny"),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_approval_denial_is_classified_as_a_denial() {
        assert!(!ToolInvocationError::PolicyDenied("demo.ping".into()).is_denial());
        assert!(ToolInvocationError::ApprovalDenied {
            tool_path: "demo.ping".into(),
            approval_id: ApprovalId::new(),
        }
        .is_denial());
        assert!(!ToolInvocationError::UnknownTool("nope.foo".into()).is_denial());
    }

    #[test]
    fn policy_denied_message_contains_tool_path_and_marker() {
        let err = ToolInvocationError::PolicyDenied("demo.ping".into());
        assert_eq!(err.to_string(), "demo.ping (policy denied)");
    }
}
