// Copyright (c) 2026 Conduit Systems
// SPDX-License-Identifier: AGPL-3.0

//! GraphQL dispatch (`runSpec.kind` of `graphql_raw`/`graphql_field`)
//! and the field extraction the policy engine's GraphQL extension needs (spec
//! §4.3 "GraphQL extension", §6 glossary "Effective tool path").
//!
//! A full GraphQL parser is not warranted here: the policy engine only ever
//! needs the top-level operation type and field names a document touches, so
//! [`extract_top_level_fields`] is a small hand-rolled selection-set scanner
//! rather than a dependency on a GraphQL query-language crate.

use std::collections::HashMap;

use serde_json::Value;
use thiserror::Error;

use crate::domain::tool_definition::GraphqlOperationType;

#[derive(Debug, Error)]
pub enum GraphqlError {
    #[error("graphql endpoint returned errors: {0}")]
    Remote(String),

    #[error("malformed graphql document: {0}")]
    Malformed(String),

    #[error("transport error: {0}")]
    Transport(String),
}

/// Build the `<sourceName>.<query|mutation>.<field>` effective path for one
/// top-level field a raw GraphQL document touches (glossary).
pub fn effective_path(source_name: &str, operation_type: GraphqlOperationType, field: &str) -> String {
    let op = match operation_type {
        GraphqlOperationType::Query => "query",
        GraphqlOperationType::Mutation => "mutation",
    };
    format!("{source_name}.{op}.{field}")
}

/// Scan a raw GraphQL document's top-level selection set and return every
/// `(operationType, fieldName)` pair it touches, in document order. Handles
/// `query`/`mutation`/shorthand-query documents; aliases are resolved to
/// their underlying field name since policy is evaluated against the field
/// actually invoked, not the caller's alias.
pub fn extract_top_level_fields(document: &str) -> Result<Vec<(GraphqlOperationType, String)>, GraphqlError> {
    let trimmed = document.trim_start();
    let (operation_type, rest) = if let Some(rest) = trimmed.strip_prefix("mutation") {
        (GraphqlOperationType::Mutation, rest)
    } else if let Some(rest) = trimmed.strip_prefix("query") {
        (GraphqlOperationType::Query, rest)
    } else if trimmed.starts_with('{') {
        (GraphqlOperationType::Query, trimmed)
    } else {
        return Err(GraphqlError::Malformed("document has no query/mutation operation".into()));
    };

    let body_start = rest.find('{').ok_or_else(|| GraphqlError::Malformed("missing selection set".into()))?;
    let body = &rest[body_start..];
    let selection_set = take_balanced_braces(body)?;

    let mut fields = Vec::new();
    let mut depth = 0i32;
    let mut chars = selection_set.char_indices().peekable();
    let mut at_top_level_field_start = true;

    while let Some((i, ch)) = chars.next() {
        match ch {
            '{' => {
                depth += 1;
                at_top_level_field_start = false;
            }
            '}' => {
                depth -= 1;
                at_top_level_field_start = depth == 1;
            }
            c if depth == 1 && at_top_level_field_start && (c.is_alphabetic() || c == '_') => {
                let rest_of_field = &selection_set[i..];
                let token_end = rest_of_field
                    .find(|c: char| !(c.is_alphanumeric() || c == '_'))
                    .unwrap_or(rest_of_field.len());
                let first_token = &rest_of_field[..token_end];

                let field_name = if let Some(colon_rest) = rest_of_field[token_end..].trim_start().strip_prefix(':') {
                    let aliased = colon_rest.trim_start();
                    let end = aliased
                        .find(|c: char| !(c.is_alphanumeric() || c == '_'))
                        .unwrap_or(aliased.len());
                    aliased[..end].to_string()
                } else {
                    first_token.to_string()
                };

                fields.push((operation_type, field_name));
                at_top_level_field_start = false;
            }
            _ => {}
        }
    }

    if fields.is_empty() {
        return Err(GraphqlError::Malformed("selection set has no top-level fields".into()));
    }
    Ok(fields)
}

fn take_balanced_braces(s: &str) -> Result<&str, GraphqlError> {
    let mut depth = 0i32;
    for (i, ch) in s.char_indices() {
        match ch {
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Ok(&s[..=i]);
                }
            }
            _ => {}
        }
    }
    Err(GraphqlError::Malformed("unbalanced braces in selection set".into()))
}

/// Send a GraphQL request (raw passthrough or a compiled single-field
/// template) and return the `data` payload.
pub async fn execute(
    http: &reqwest::Client,
    endpoint: &str,
    query: &str,
    variables: &Value,
    headers: &HashMap<String, String>,
) -> Result<Value, GraphqlError> {
    let mut request = http.post(endpoint).json(&serde_json::json!({
        "query": query,
        "variables": variables,
    }));
    for (k, v) in headers {
        request = request.header(k, v);
    }

    let response = request.send().await.map_err(|e| GraphqlError::Transport(e.to_string()))?;
    if !response.status().is_success() {
        return Err(GraphqlError::Transport(format!("http {}", response.status())));
    }

    let body: Value = response.json().await.map_err(|e| GraphqlError::Malformed(e.to_string()))?;
    if let Some(errors) = body.get("errors").filter(|e| !e.is_null()) {
        return Err(GraphqlError::Remote(errors.to_string()));
    }
    body.get("data").cloned().ok_or_else(|| GraphqlError::Malformed("response missing data".into()))
}

/// Render a `graphql_field` tool's query template by interpolating `$var`
/// style GraphQL variable placeholders directly (the compiled template
/// already embeds the single field call; spec §4.5 GraphQL extension).
pub fn render_variables(input: &Value) -> Value {
    input.clone()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_single_query_field() {
        let doc = "query { viewer { login } }";
        let fields = extract_top_level_fields(doc).unwrap();
        assert_eq!(fields, vec![(GraphqlOperationType::Query, "viewer".to_string())]);
    }

    #[test]
    fn extracts_multiple_top_level_fields_in_order() {
        let doc = "query { viewer { login } repository(name: \"x\") { id } }";
        let fields = extract_top_level_fields(doc).unwrap();
        assert_eq!(
            fields,
            vec![
                (GraphqlOperationType::Query, "viewer".to_string()),
                (GraphqlOperationType::Query, "repository".to_string()),
            ]
        );
    }

    #[test]
    fn shorthand_query_without_keyword_defaults_to_query() {
        let doc = "{ viewer { login } }";
        let fields = extract_top_level_fields(doc).unwrap();
        assert_eq!(fields, vec![(GraphqlOperationType::Query, "viewer".to_string())]);
    }

    #[test]
    fn mutation_keyword_is_recognized() {
        let doc = "mutation { createWidget(input: {}) { id } }";
        let fields = extract_top_level_fields(doc).unwrap();
        assert_eq!(fields, vec![(GraphqlOperationType::Mutation, "createWidget".to_string())]);
    }

    #[test]
    fn aliases_resolve_to_the_underlying_field_name() {
        let doc = "query { me: viewer { login } }";
        let fields = extract_top_level_fields(doc).unwrap();
        assert_eq!(fields, vec![(GraphqlOperationType::Query, "viewer".to_string())]);
    }

    #[test]
    fn effective_path_matches_glossary_shape() {
        let path = effective_path("github", GraphqlOperationType::Mutation, "createIssue");
        assert_eq!(path, "github.mutation.createIssue");
    }

    #[test]
    fn missing_operation_keyword_is_malformed() {
        let err = extract_top_level_fields("not a document").unwrap_err();
        assert!(matches!(err, GraphqlError::Malformed(_)));
    }
}
