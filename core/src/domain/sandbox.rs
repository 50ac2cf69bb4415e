// Copyright (c) 2026 Conduit Systems
// SPDX-License-Identifier: AGPL-3.0

use async_trait::async_trait;
use serde_json::Value;

use crate::domain::errors::ToolInvocationError;
use crate::domain::ids::TaskId;
use crate::domain::task::TaskStatus;

/// Everything the Task Executor passes a sandbox implementation for one run
/// (step 5/6).
#[derive(Debug, Clone)]
pub struct SandboxRequest {
    pub task_id: TaskId,
    pub code: String,
    pub timeout_ms: u64,
}

/// Terminal outcome a sandbox implementation reports back.
#[derive(Debug, Clone)]
pub struct SandboxOutcome {
    pub status: TaskStatus,
    pub stdout: Option<String>,
    pub stderr: Option<String>,
    pub exit_code: Option<i32>,
    pub error: Option<String>,
    pub duration_ms: i64,
}

/// A single outbound tool call the sandboxed program makes, relayed back
/// into the Invocation Pipeline via `SandboxCallbacks::invoke_tool`
///. `call_id` is chosen by the sandbox and never invented by
/// the pipeline (invariants).
#[derive(Debug, Clone)]
pub struct ToolCall {
    pub call_id: String,
    pub tool_path: String,
    pub input: Value,
}

/// The stdio stream a sandbox line belongs to (`task.stdout|stderr`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

/// Callbacks a `SandboxAdapter` implementation invokes synchronously from
/// within the running sandbox (step 5, §5 "serialized by the
/// sandbox adapter"). Implemented by the Task Executor; consumed by
/// whatever sandbox runtime is wired in at the composition root.
#[async_trait]
pub trait SandboxCallbacks: Send + Sync {
    async fn invoke_tool(&self, call: ToolCall) -> Result<Value, ToolInvocationError>;
    async fn emit_output(&self, stream: OutputStream, line: String);
}

/// The external contract the core consumes but does not implement (spec §1,
/// §4.10): an isolated execution environment for one task's code, which
/// calls back into `SandboxCallbacks` for every tool invocation and stdio
/// line and enforces `timeout_ms` itself.
#[async_trait]
pub trait SandboxAdapter: Send + Sync {
    async fn run(&self, request: SandboxRequest, callbacks: &dyn SandboxCallbacks) -> SandboxOutcome;
}
