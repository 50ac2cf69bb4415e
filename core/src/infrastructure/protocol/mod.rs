// Copyright (c) 2026 Conduit Systems
// SPDX-License-Identifier: AGPL-3.0

//! Protocol clients the Tool Source Compiler (§4.5) and Tool Dispatcher (§4.7)
//! depend on. The core never speaks MCP/OpenAPI/GraphQL itself outside these
//! modules — everything above them works in terms of `ToolDefinition` and
//! `RunSpec` (Non-goals: "it orchestrates compiled descriptors that
//! encapsulate them").

pub mod graphql;
pub mod mcp_client;
pub mod openapi;
