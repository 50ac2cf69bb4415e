// Copyright (c) 2026 Conduit Systems
// SPDX-License-Identifier: AGPL-3.0

//! OpenAPI bundling ("Compiler parses + bundles the spec") and HTTP
//! dispatch (`runSpec.kind == openapi`). Postman collections are a
//! thin variant handled by [`postman`].

use std::collections::HashMap;

use serde_json::Value;
use thiserror::Error;

use crate::domain::tool_definition::{OpenApiParameter, ParameterLocation};
use crate::domain::tool_source::OpenApiSpecRef;

#[derive(Debug, Error)]
pub enum OpenApiError {
    #[error("failed to fetch spec: {0}")]
    Fetch(String),

    #[error("malformed spec: {0}")]
    Malformed(String),

    #[error("http {status}: {body}")]
    NonSuccess { status: u16, body: String },

    #[error("transport error: {0}")]
    Transport(String),
}

/// One `(path, method)` pair bundled out of the document, the unit the
/// compiler emits one `ToolDefinition` per (OpenAPI).
#[derive(Debug, Clone)]
pub struct ParsedOperation {
    pub operation_id: String,
    pub method: String,
    pub path: String,
    pub parameters: Vec<OpenApiParameter>,
    /// Security scheme names this operation references, in document order,
    /// used to infer a `ToolCredentialSpec` (spec §4.5: "Infer credential
    /// spec from the spec's security schemes").
    pub security_schemes: Vec<String>,
}

impl ParsedOperation {
    pub fn is_write_method(&self) -> bool {
        matches!(self.method.as_str(), "POST" | "PUT" | "PATCH" | "DELETE")
    }
}

/// A security scheme declaration relevant to credential inference (spec
/// §4.4 `AuthType`, §4.5).
#[derive(Debug, Clone)]
pub enum SecurityScheme {
    Bearer,
    ApiKeyHeader { header: String },
    Other,
}

/// Download (if `spec` is a URL) or pass through (if inline) the OpenAPI
/// document. JSON first, falling back to YAML — most real-world specs ship
/// as one or the other.
pub async fn fetch_spec(spec_ref: &OpenApiSpecRef, http: &reqwest::Client) -> Result<Value, OpenApiError> {
    match spec_ref {
        OpenApiSpecRef::Inline(v) => Ok(v.clone()),
        OpenApiSpecRef::Url(url) => {
            let response = http.get(url).send().await.map_err(|e| OpenApiError::Fetch(e.to_string()))?;
            if !response.status().is_success() {
                return Err(OpenApiError::Fetch(format!("http {}", response.status())));
            }
            let text = response.text().await.map_err(|e| OpenApiError::Fetch(e.to_string()))?;
            serde_json::from_str(&text)
                .or_else(|_| serde_yaml::from_str(&text).map_err(|e| OpenApiError::Malformed(e.to_string())))
        }
    }
}

/// Walk `paths` and bundle every `(path, method)` into a `ParsedOperation`,
/// sorted by `operation_id` so compilation is deterministic (/// "sort by remote name within source").
pub fn parse_operations(spec: &Value) -> Result<Vec<ParsedOperation>, OpenApiError> {
    let paths = spec
        .get("paths")
        .and_then(Value::as_object)
        .ok_or_else(|| OpenApiError::Malformed("spec has no `paths` object".into()))?;

    let global_security = spec.get("security").and_then(Value::as_array).cloned().unwrap_or_default();

    let mut operations = Vec::new();
    for (path, methods) in paths {
        let Some(methods) = methods.as_object() else { continue };
        for (method, op) in methods {
            let method_upper = method.to_ascii_uppercase();
            if !matches!(method_upper.as_str(), "GET" | "POST" | "PUT" | "PATCH" | "DELETE") {
                continue;
            }
            let Some(op) = op.as_object() else { continue };

            let operation_id = op
                .get("operationId")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| format!("{}_{}", method_upper.to_ascii_lowercase(), path));

            let parameters = op
                .get("parameters")
                .and_then(Value::as_array)
                .map(|params| params.iter().filter_map(parse_parameter).collect())
                .unwrap_or_default();

            let security = op
                .get("security")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_else(|| global_security.clone());
            let security_schemes = security
                .iter()
                .filter_map(Value::as_object)
                .flat_map(|s| s.keys().cloned())
                .collect();

            operations.push(ParsedOperation {
                operation_id,
                method: method_upper,
                path: path.clone(),
                parameters,
                security_schemes,
            });
        }
    }

    operations.sort_by(|a, b| a.operation_id.cmp(&b.operation_id));
    Ok(operations)
}

fn parse_parameter(raw: &Value) -> Option<OpenApiParameter> {
    let obj = raw.as_object()?;
    let name = obj.get("name")?.as_str()?.to_string();
    let location = match obj.get("in")?.as_str()? {
        "path" => ParameterLocation::Path,
        "query" => ParameterLocation::Query,
        "header" => ParameterLocation::Header,
        _ => return None,
    };
    let required = obj.get("required").and_then(Value::as_bool).unwrap_or(false);
    Some(OpenApiParameter { name, location, required })
}

/// Resolve a named security scheme to its `type` ("bearer ->
/// bearer, apiKey-in-header -> apiKey with header").
pub fn resolve_security_scheme(spec: &Value, name: &str) -> Option<SecurityScheme> {
    let scheme = spec
        .get("components")?
        .get("securitySchemes")?
        .get(name)?
        .as_object()?;
    match scheme.get("type")?.as_str()? {
        "http" if scheme.get("scheme").and_then(Value::as_str) == Some("bearer") => Some(SecurityScheme::Bearer),
        "apiKey" if scheme.get("in").and_then(Value::as_str) == Some("header") => {
            let header = scheme.get("name")?.as_str()?.to_string();
            Some(SecurityScheme::ApiKeyHeader { header })
        }
        _ => Some(SecurityScheme::Other),
    }
}

/// Interpolate `{param}` placeholders in a path template from input fields
/// named after the parameter ("interpolate path parameters from
/// input").
pub fn interpolate_path(template: &str, input: &Value) -> String {
    let mut out = template.to_string();
    if let Some(obj) = input.as_object() {
        for (key, value) in obj {
            let placeholder = format!("{{{key}}}");
            if out.contains(&placeholder) {
                let rendered = match value {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                out = out.replace(&placeholder, &rendered);
            }
        }
    }
    out
}

/// Execute one HTTP call for an `openapi`/`postman` `RunSpec`.
/// `body` is `None` for parameterless GET-shaped calls.
pub async fn execute(
    http: &reqwest::Client,
    method: &str,
    url: &str,
    query: &[(String, String)],
    headers: &HashMap<String, String>,
    body: Option<&Value>,
) -> Result<Value, OpenApiError> {
    let method = reqwest::Method::from_bytes(method.as_bytes()).map_err(|e| OpenApiError::Malformed(e.to_string()))?;
    let mut request = http.request(method, url).query(query);
    for (k, v) in headers {
        request = request.header(k, v);
    }
    if let Some(body) = body {
        request = request.json(body);
    }

    let response = request.send().await.map_err(|e| OpenApiError::Transport(e.to_string()))?;
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        let truncated: String = body.chars().take(500).collect();
        return Err(OpenApiError::NonSuccess { status: status.as_u16(), body: truncated });
    }

    let bytes = response.bytes().await.map_err(|e| OpenApiError::Transport(e.to_string()))?;
    if bytes.is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_slice(&bytes).or_else(|_| Ok(Value::String(String::from_utf8_lossy(&bytes).into_owned())))
}

/// Postman Collection v2 request materialization ("Postman
/// collections"), a sub-flavor of OpenAPI dispatch.
pub mod postman {
    use super::OpenApiError;
    use crate::domain::tool_definition::PostmanBodyMode;
    use serde_json::Value;

    /// Substitute `{{variable}}` Postman template syntax the same way
    /// `interpolate_path` substitutes `{param}` for OpenAPI.
    pub fn interpolate_url(template: &str, input: &Value) -> String {
        let mut out = template.to_string();
        if let Some(obj) = input.as_object() {
            for (key, value) in obj {
                let placeholder = format!("{{{{{key}}}}}");
                if out.contains(&placeholder) {
                    let rendered = match value {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    };
                    out = out.replace(&placeholder, &rendered);
                }
            }
        }
        out
    }

    /// The `postman:<uid>` reference's collection id (spec §4.5 "sub-flavor
    /// of OpenAPI when `spec` starts with `postman:<uid>`").
    pub fn collection_uid(spec_ref: &str) -> Option<&str> {
        spec_ref.strip_prefix("postman:")
    }

    /// One request materialized out of a collection's `item` tree (folders
    /// flattened, collection-level name prefixed so siblings across folders
    /// with the same leaf name still sort and path distinctly).
    #[derive(Debug, Clone)]
    pub struct PostmanRequest {
        pub name: String,
        pub method: String,
        pub url_template: String,
        pub headers: Vec<(String, String)>,
        pub body_mode: PostmanBodyMode,
    }

    /// Fetch a collection body from the Postman API
    /// (`https://api.getpostman.com/collections/<uid>`), authenticated via
    /// `X-Api-Key` when the caller resolved one.
    pub async fn fetch_collection(uid: &str, http: &reqwest::Client, api_key: Option<&str>) -> Result<Value, OpenApiError> {
        let url = format!("https://api.getpostman.com/collections/{uid}");
        let mut request = http.get(&url);
        if let Some(key) = api_key {
            request = request.header("X-Api-Key", key);
        }
        let response = request.send().await.map_err(|e| OpenApiError::Fetch(e.to_string()))?;
        if !response.status().is_success() {
            return Err(OpenApiError::Fetch(format!("http {}", response.status())));
        }
        let body: Value = response.json().await.map_err(|e| OpenApiError::Malformed(e.to_string()))?;
        body.get("collection").cloned().ok_or_else(|| OpenApiError::Malformed("missing `collection` key".to_string()))
    }

    /// Flatten a collection's `item` array (Postman folders nest items
    /// recursively) into one `PostmanRequest` per leaf request, sorted by
    /// name for deterministic compilation ("sort by remote name within
    /// source").
    pub fn parse_items(collection: &Value) -> Vec<PostmanRequest> {
        let mut out = Vec::new();
        if let Some(items) = collection.get("item").and_then(Value::as_array) {
            walk_items(items, &mut out);
        }
        out.sort_by(|a, b| a.name.cmp(&b.name));
        out
    }

    fn walk_items(items: &[Value], out: &mut Vec<PostmanRequest>) {
        for item in items {
            if let Some(children) = item.get("item").and_then(Value::as_array) {
                walk_items(children, out);
                continue;
            }
            let Some(request) = item.get("request") else { continue };
            let name = item.get("name").and_then(Value::as_str).unwrap_or("request").to_string();
            let method = request.get("method").and_then(Value::as_str).unwrap_or("GET").to_ascii_uppercase();
            let url_template = match request.get("url") {
                Some(Value::String(raw)) => raw.clone(),
                Some(Value::Object(obj)) => obj.get("raw").and_then(Value::as_str).unwrap_or_default().to_string(),
                _ => continue,
            };
            let headers = request
                .get("header")
                .and_then(Value::as_array)
                .map(|hs| {
                    hs.iter()
                        .filter(|h| !h.get("disabled").and_then(Value::as_bool).unwrap_or(false))
                        .filter_map(|h| {
                            let key = h.get("key")?.as_str()?.to_string();
                            let value = h.get("value")?.as_str()?.to_string();
                            Some((key, value))
                        })
                        .collect()
                })
                .unwrap_or_default();
            let body_mode = match request.get("body").and_then(|b| b.get("mode")).and_then(Value::as_str) {
                Some("urlencoded") => PostmanBodyMode::Urlencoded,
                Some("raw") => PostmanBodyMode::Raw,
                _ => PostmanBodyMode::None,
            };

            out.push(PostmanRequest { name, method, url_template, headers, body_mode });
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use serde_json::json;

        #[test]
        fn collection_uid_strips_the_postman_prefix() {
            assert_eq!(collection_uid("postman:abcd-1234"), Some("abcd-1234"));
            assert_eq!(collection_uid("https://example.test"), None);
        }

        #[test]
        fn parse_items_flattens_folders_and_sorts_by_name() {
            let collection = json!({
                "item": [
                    {
                        "name": "Widgets",
                        "item": [
                            {
                                "name": "Get Widget",
                                "request": {
                                    "method": "GET",
                                    "url": {"raw": "{{baseUrl}}/widgets/{{id}}"},
                                    "header": [{"key": "Accept", "value": "application/json"}]
                                }
                            }
                        ]
                    },
                    {
                        "name": "Create Widget",
                        "request": {
                            "method": "POST",
                            "url": "{{baseUrl}}/widgets",
                            "body": {"mode": "raw", "raw": "{}"}
                        }
                    }
                ]
            });

            let requests = parse_items(&collection);
            let names: Vec<&str> = requests.iter().map(|r| r.name.as_str()).collect();
            assert_eq!(names, vec!["Create Widget", "Get Widget"]);
            let get_widget = requests.iter().find(|r| r.name == "Get Widget").unwrap();
            assert_eq!(get_widget.url_template, "{{baseUrl}}/widgets/{{id}}");
            assert_eq!(get_widget.headers, vec![("Accept".to_string(), "application/json".to_string())]);
            let create = requests.iter().find(|r| r.name == "Create Widget").unwrap();
            assert_eq!(create.body_mode, PostmanBodyMode::Raw);
        }

        #[test]
        fn disabled_headers_are_skipped() {
            let collection = json!({
                "item": [{
                    "name": "X",
                    "request": {
                        "method": "GET",
                        "url": "{{baseUrl}}/x",
                        "header": [
                            {"key": "A", "value": "1"},
                            {"key": "B", "value": "2", "disabled": true}
                        ]
                    }
                }]
            });
            let requests = parse_items(&collection);
            assert_eq!(requests[0].headers, vec![("A".to_string(), "1".to_string())]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_paths_into_sorted_operations() {
        let spec = json!({
            "paths": {
                "/widgets/{id}": {
                    "get": {"operationId": "getWidget", "parameters": [{"name": "id", "in": "path", "required": true}]},
                    "delete": {"operationId": "deleteWidget"}
                },
                "/widgets": {
                    "post": {"operationId": "createWidget"}
                }
            }
        });
        let ops = parse_operations(&spec).unwrap();
        let ids: Vec<&str> = ops.iter().map(|o| o.operation_id.as_str()).collect();
        assert_eq!(ids, vec!["createWidget", "deleteWidget", "getWidget"]);
    }

    #[test]
    fn write_methods_are_flagged_for_default_approval() {
        let spec = json!({"paths": {"/x": {"post": {"operationId": "a"}, "get": {"operationId": "b"}}}});
        let ops = parse_operations(&spec).unwrap();
        let post = ops.iter().find(|o| o.operation_id == "a").unwrap();
        let get = ops.iter().find(|o| o.operation_id == "b").unwrap();
        assert!(post.is_write_method());
        assert!(!get.is_write_method());
    }

    #[test]
    fn interpolate_path_substitutes_named_fields() {
        let out = interpolate_path("/widgets/{id}/parts/{partId}", &json!({"id": 42, "partId": "abc"}));
        assert_eq!(out, "/widgets/42/parts/abc");
    }

    #[test]
    fn bearer_security_scheme_resolves() {
        let spec = json!({
            "components": {"securitySchemes": {"bearerAuth": {"type": "http", "scheme": "bearer"}}}
        });
        assert!(matches!(resolve_security_scheme(&spec, "bearerAuth"), Some(SecurityScheme::Bearer)));
    }
}
