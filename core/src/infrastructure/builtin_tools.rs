// Copyright (c) 2026 Conduit Systems
// SPDX-License-Identifier: AGPL-3.0

//! The base tool table merged into every registry build after externals
//! (rebuild step 4: "`discover`, `catalog.namespaces`,
//! `catalog.tools`, plus system-registered ones... later entries override
//! earlier on path collision"). In-process handlers, dispatched by the Tool
//! Dispatcher for `runSpec.kind == builtin`.

use serde_json::{json, Value};

use crate::domain::errors::ToolInvocationError;
use crate::domain::tool_definition::{Approval, RunSpec, ToolDefinition};

pub const DISCOVER: &str = "discover";
pub const CATALOG_NAMESPACES: &str = "catalog.namespaces";
pub const CATALOG_TOOLS: &str = "catalog.tools";

/// The base tool set, in a stable order ("sort by remote name
/// within source" applies equally to builtins).
pub fn base_tool_definitions() -> Vec<ToolDefinition> {
    vec![
        ToolDefinition {
            path: DISCOVER.to_string(),
            description: "Search the workspace's compiled tool catalog by a free-text query.".to_string(),
            approval: Approval::Auto,
            source: "system".to_string(),
            credential: None,
            graphql_source: None,
            run_spec: RunSpec::Builtin { handler: DISCOVER.to_string() },
            input_schema: Some(json!({
                "type": "object",
                "properties": {"query": {"type": "string"}},
            })),
        },
        ToolDefinition {
            path: CATALOG_NAMESPACES.to_string(),
            description: "List the distinct top-level namespaces present in the workspace tool catalog.".to_string(),
            approval: Approval::Auto,
            source: "system".to_string(),
            credential: None,
            graphql_source: None,
            run_spec: RunSpec::Builtin { handler: CATALOG_NAMESPACES.to_string() },
            input_schema: Some(json!({"type": "object", "properties": {}})),
        },
        ToolDefinition {
            path: CATALOG_TOOLS.to_string(),
            description: "List tools in the workspace catalog, optionally filtered to one namespace.".to_string(),
            approval: Approval::Auto,
            source: "system".to_string(),
            credential: None,
            graphql_source: None,
            run_spec: RunSpec::Builtin { handler: CATALOG_TOOLS.to_string() },
            input_schema: Some(json!({
                "type": "object",
                "properties": {"namespace": {"type": "string"}},
            })),
        },
    ]
}

fn namespace_of(path: &str) -> &str {
    path.split('.').next().unwrap_or(path)
}

/// Execute one builtin handler against the workspace's current ready tool
/// list ("builtin: look up by path in a base-tool table; call its
/// in-process handler").
pub fn dispatch(handler: &str, input: &Value, tools: &[ToolDefinition]) -> Result<Value, ToolInvocationError> {
    match handler {
        DISCOVER => {
            let query = input.get("query").and_then(Value::as_str).unwrap_or("").to_ascii_lowercase();
            let matches: Vec<Value> = tools
                .iter()
                .filter(|t| query.is_empty() || t.path.to_ascii_lowercase().contains(&query) || t.description.to_ascii_lowercase().contains(&query))
                .map(tool_summary)
                .collect();
            Ok(json!({ "tools": matches }))
        }
        CATALOG_NAMESPACES => {
            let mut namespaces: Vec<&str> = tools.iter().map(|t| namespace_of(&t.path)).collect();
            namespaces.sort_unstable();
            namespaces.dedup();
            Ok(json!({ "namespaces": namespaces }))
        }
        CATALOG_TOOLS => {
            let namespace = input.get("namespace").and_then(Value::as_str);
            let matches: Vec<Value> = tools
                .iter()
                .filter(|t| namespace.map_or(true, |ns| namespace_of(&t.path) == ns))
                .map(tool_summary)
                .collect();
            Ok(json!({ "tools": matches }))
        }
        other => Err(ToolInvocationError::ToolExecutionError(format!("unknown builtin handler: {other}"))),
    }
}

fn tool_summary(tool: &ToolDefinition) -> Value {
    json!({
        "path": tool.path,
        "description": tool.description,
        "approval": if tool.approval.requires_approval() { "required" } else { "auto" },
        "source": tool.source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_tools() -> Vec<ToolDefinition> {
        let mut tools = base_tool_definitions();
        tools.push(ToolDefinition {
            path: "demo.ping".to_string(),
            description: "Ping the demo service".to_string(),
            approval: Approval::Auto,
            source: "demo".to_string(),
            credential: None,
            graphql_source: None,
            run_spec: RunSpec::Builtin { handler: "demo.ping".to_string() },
            input_schema: None,
        });
        tools
    }

    #[test]
    fn catalog_namespaces_lists_distinct_sorted_namespaces() {
        let tools = sample_tools();
        let result = dispatch(CATALOG_NAMESPACES, &json!({}), &tools).unwrap();
        let namespaces = result["namespaces"].as_array().unwrap();
        assert!(namespaces.contains(&json!("demo")));
        assert!(namespaces.contains(&json!("catalog")));
    }

    #[test]
    fn catalog_tools_filters_by_namespace() {
        let tools = sample_tools();
        let result = dispatch(CATALOG_TOOLS, &json!({"namespace": "demo"}), &tools).unwrap();
        let listed = result["tools"].as_array().unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0]["path"], "demo.ping");
    }

    #[test]
    fn discover_matches_on_path_or_description_substring() {
        let tools = sample_tools();
        let result = dispatch(DISCOVER, &json!({"query": "ping"}), &tools).unwrap();
        let found = result["tools"].as_array().unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0]["path"], "demo.ping");
    }

    #[test]
    fn unknown_handler_is_a_tool_execution_error() {
        let err = dispatch("nope", &json!({}), &[]).unwrap_err();
        assert!(matches!(err, ToolInvocationError::ToolExecutionError(_)));
    }
}
