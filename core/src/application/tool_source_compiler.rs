// Copyright (c) 2026 Conduit Systems
// SPDX-License-Identifier: AGPL-3.0

//! Normalizes a workspace's `ToolSource` configs into compiled
//! `ToolDefinition`s. The compiler never persists anything —
//! that's the Tool Registry's job (§4.6); this module is pure
//! config-in, tools-and-warnings-out.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use crate::domain::credential::{AuthType, CredentialScope, ToolCredentialSpec};
use crate::domain::path::join_segments;
use crate::domain::tool_definition::{Approval, GraphqlOperationType, GraphqlSourceMarker, RunSpec, ToolDefinition};
use crate::domain::tool_source::{ApprovalDefault, AuthSpec, CredentialMode, OpenApiSpecRef, ToolSource, ToolSourceConfig};
use crate::infrastructure::protocol::mcp_client::McpConnectionPool;
use crate::infrastructure::protocol::openapi;

/// A source's contribution to a registry build: tools plus any recoverable
/// diagnostics ("Compiler outputs warnings, not exceptions").
#[derive(Debug, Default)]
pub struct CompiledSource {
    pub tools: Vec<ToolDefinition>,
    pub warnings: Vec<String>,
}

pub struct ToolSourceCompiler {
    http: reqwest::Client,
    mcp_pool: Arc<McpConnectionPool>,
}

impl ToolSourceCompiler {
    pub fn new(http: reqwest::Client, mcp_pool: Arc<McpConnectionPool>) -> Self {
        Self { http, mcp_pool }
    }

    /// Compile one `ToolSource` into its tool set. Deterministic:
    /// identical inputs produce identical paths and ordering (sort by remote
    /// name within source, enforced by each protocol helper).
    pub async fn compile(&self, source: &ToolSource) -> CompiledSource {
        match &source.config {
            ToolSourceConfig::Mcp { .. } => self.compile_mcp(source).await,
            ToolSourceConfig::OpenApi { .. } => self.compile_openapi(source).await,
            ToolSourceConfig::GraphQl { .. } => self.compile_graphql(source),
        }
    }

    async fn compile_mcp(&self, source: &ToolSource) -> CompiledSource {
        let ToolSourceConfig::Mcp { url, transport, query_params, default_approval, overrides } = &source.config
        else {
            unreachable!("compile_mcp called with non-mcp config")
        };

        let transport = transport.unwrap_or(crate::domain::tool_source::McpTransport::StreamableHttp);
        let client = self.mcp_pool.get_or_connect(url, transport, HashMap::new());

        let mut descriptors = match client.list_tools().await {
            Ok(d) => d,
            Err(e) => {
                return CompiledSource {
                    tools: Vec::new(),
                    warnings: vec![format!("mcp source '{}' failed to list tools: {e}", source.name)],
                }
            }
        };
        descriptors.sort_by(|a, b| a.name.cmp(&b.name));

        let tools = descriptors
            .into_iter()
            .map(|descriptor| {
                let approval = overrides
                    .get(&descriptor.name)
                    .and_then(|o| o.approval)
                    .or(*default_approval)
                    .map(approval_default_to_approval)
                    .unwrap_or(Approval::Auto);

                ToolDefinition {
                    path: join_segments(&[&source.name, &descriptor.name]),
                    description: descriptor.description.unwrap_or_default(),
                    approval,
                    source: source.name.clone(),
                    credential: None,
                    graphql_source: None,
                    run_spec: RunSpec::Mcp {
                        url: url.clone(),
                        transport: Some(transport),
                        query_params: query_params.clone(),
                        tool_name: descriptor.name,
                    },
                    input_schema: descriptor.input_schema,
                }
            })
            .collect();

        CompiledSource { tools, warnings: Vec::new() }
    }

    async fn compile_openapi(&self, source: &ToolSource) -> CompiledSource {
        let ToolSourceConfig::OpenApi {
            spec,
            base_url,
            auth,
            default_read_approval,
            default_write_approval,
            overrides,
        } = &source.config
        else {
            unreachable!("compile_openapi called with non-openapi config")
        };

        if spec.is_postman() {
            return self.compile_postman(source).await;
        }

        let document = match openapi::fetch_spec(spec, &self.http).await {
            Ok(doc) => doc,
            Err(e) => {
                return CompiledSource {
                    tools: Vec::new(),
                    warnings: vec![format!("openapi source '{}' failed to fetch spec: {e}", source.name)],
                }
            }
        };

        let operations = match openapi::parse_operations(&document) {
            Ok(ops) => ops,
            Err(e) => {
                return CompiledSource {
                    tools: Vec::new(),
                    warnings: vec![format!("openapi source '{}' has a malformed spec: {e}", source.name)],
                }
            }
        };

        let resolved_base_url = base_url.clone().or_else(|| extract_server_url(&document)).unwrap_or_default();

        let mut warnings = Vec::new();
        let tools = operations
            .into_iter()
            .map(|op| {
                let approval_override = overrides.get(&op.operation_id).copied();
                let approval = approval_override
                    .or(if op.is_write_method() { *default_write_approval } else { *default_read_approval })
                    .map(approval_default_to_approval)
                    .unwrap_or(if op.is_write_method() { Approval::Required } else { Approval::Auto });

                let credential = infer_credential(&document, &op.security_schemes, auth.as_ref());

                ToolDefinition {
                    path: join_segments(&[&source.name, &op.operation_id]),
                    description: format!("{} {}", op.method, op.path),
                    approval,
                    source: source.name.clone(),
                    credential,
                    graphql_source: None,
                    run_spec: RunSpec::OpenApi {
                        method: op.method,
                        path_template: op.path,
                        base_url: resolved_base_url.clone(),
                        parameters: op.parameters,
                        auth_headers: HashMap::new(),
                    },
                    input_schema: None,
                }
            })
            .collect();

        if resolved_base_url.is_empty() {
            warnings.push(format!("openapi source '{}' has no base_url and no server entry", source.name));
        }

        CompiledSource { tools, warnings }
    }

    async fn compile_postman(&self, source: &ToolSource) -> CompiledSource {
        let ToolSourceConfig::OpenApi { spec, auth, .. } = &source.config else {
            unreachable!("compile_postman called with non-openapi config")
        };
        let OpenApiSpecRef::Url(spec_ref) = spec else {
            unreachable!("compile_postman called on a non-postman spec ref")
        };
        let Some(uid) = openapi::postman::collection_uid(spec_ref) else {
            unreachable!("compile_postman called on a non-postman spec ref")
        };

        let collection = match openapi::postman::fetch_collection(uid, &self.http, None).await {
            Ok(doc) => doc,
            Err(e) => {
                return CompiledSource {
                    tools: Vec::new(),
                    warnings: vec![format!("postman source '{}' failed to fetch collection: {e}", source.name)],
                }
            }
        };

        let requests = openapi::postman::parse_items(&collection);
        if requests.is_empty() {
            return CompiledSource {
                tools: Vec::new(),
                warnings: vec![format!("postman source '{}' collection has no requests", source.name)],
            };
        }

        let credential = auth_spec_credential(auth.as_ref());
        let tools = requests
            .into_iter()
            .map(|req| ToolDefinition {
                path: join_segments(&[&source.name, &req.name]),
                description: format!("{} {}", req.method, req.url_template),
                approval: if matches!(req.method.as_str(), "POST" | "PUT" | "PATCH" | "DELETE") {
                    Approval::Required
                } else {
                    Approval::Auto
                },
                source: source.name.clone(),
                credential: credential.clone(),
                graphql_source: None,
                run_spec: RunSpec::Postman {
                    method: req.method,
                    url_template: req.url_template,
                    headers: req.headers,
                    body_mode: req.body_mode,
                },
                input_schema: None,
            })
            .collect();

        CompiledSource { tools, warnings: Vec::new() }
    }

    fn compile_graphql(&self, source: &ToolSource) -> CompiledSource {
        let ToolSourceConfig::GraphQl {
            endpoint,
            schema,
            auth,
            default_query_approval,
            default_mutation_approval,
            overrides,
        } = &source.config
        else {
            unreachable!("compile_graphql called with non-graphql config")
        };

        let credential = auth_spec_credential(auth.as_ref());
        let default_query_requires_approval =
            default_query_approval.map(approval_default_to_approval).unwrap_or(Approval::Auto).requires_approval();
        let default_mutation_requires_approval =
            default_mutation_approval.map(approval_default_to_approval).unwrap_or(Approval::Required).requires_approval();

        let marker = GraphqlSourceMarker {
            source_name: source.name.clone(),
            endpoint: endpoint.clone(),
            default_query_requires_approval,
            default_mutation_requires_approval,
        };

        let mut tools = vec![ToolDefinition {
            path: join_segments(&[&source.name, "raw"]),
            description: format!("Execute a raw GraphQL operation against {endpoint}"),
            approval: Approval::Required,
            source: source.name.clone(),
            credential: credential.clone(),
            graphql_source: Some(marker.clone()),
            run_spec: RunSpec::GraphqlRaw { endpoint: endpoint.clone(), auth_headers: HashMap::new() },
            input_schema: Some(serde_json::json!({
                "type": "object",
                "required": ["query"],
                "properties": {
                    "query": {"type": "string"},
                    "variables": {"type": "object"},
                },
            })),
        }];

        // Optional per-field pseudo-tools. `schema` is expected as
        // `{"queryFields": [...], "mutationFields": [...]}` — a flattened
        // projection of an introspection result rather than the raw
        // introspection payload, since only field names are needed to
        // derive effective paths ("plus optional per-field
        // pseudo-tools built from an introspection/schema payload").
        if let Some(schema) = schema {
            let mut field_tools = graphql_field_tools(source, endpoint, schema, &marker, credential.as_ref(), overrides);
            field_tools.sort_by(|a, b| a.path.cmp(&b.path));
            tools.extend(field_tools);
        }

        CompiledSource { tools, warnings: Vec::new() }
    }
}

fn graphql_field_tools(
    source: &ToolSource,
    endpoint: &str,
    schema: &Value,
    marker: &GraphqlSourceMarker,
    credential: Option<&ToolCredentialSpec>,
    overrides: &HashMap<String, ApprovalDefault>,
) -> Vec<ToolDefinition> {
    let mut tools = Vec::new();
    for (operation_type, key) in [(GraphqlOperationType::Query, "queryFields"), (GraphqlOperationType::Mutation, "mutationFields")] {
        let Some(fields) = schema.get(key).and_then(Value::as_array) else { continue };
        for field in fields {
            let Some(name) = field.as_str() else { continue };
            let approval = overrides
                .get(name)
                .copied()
                .map(approval_default_to_approval)
                .unwrap_or(match operation_type {
                    GraphqlOperationType::Query => {
                        if marker.default_query_requires_approval {
                            Approval::Required
                        } else {
                            Approval::Auto
                        }
                    }
                    GraphqlOperationType::Mutation => {
                        if marker.default_mutation_requires_approval {
                            Approval::Required
                        } else {
                            Approval::Auto
                        }
                    }
                });

            let op_keyword = match operation_type {
                GraphqlOperationType::Query => "query",
                GraphqlOperationType::Mutation => "mutation",
            };

            tools.push(ToolDefinition {
                path: join_segments(&[&source.name, name]),
                description: format!("Invoke the {op_keyword} field `{name}` on {endpoint}"),
                approval,
                source: source.name.clone(),
                credential: credential.cloned(),
                graphql_source: Some(marker.clone()),
                run_spec: RunSpec::GraphqlField {
                    endpoint: endpoint.to_string(),
                    operation_type,
                    field_name: name.to_string(),
                    query_template: format!("{op_keyword} {{ {name} }}"),
                    auth_headers: HashMap::new(),
                },
                input_schema: None,
            });
        }
    }
    tools
}

fn approval_default_to_approval(default: ApprovalDefault) -> Approval {
    match default {
        ApprovalDefault::Auto => Approval::Auto,
        ApprovalDefault::Required => Approval::Required,
    }
}

fn extract_server_url(document: &Value) -> Option<String> {
    document.get("servers")?.as_array()?.first()?.get("url")?.as_str().map(str::to_string)
}

fn infer_credential(document: &Value, scheme_names: &[String], auth: Option<&AuthSpec>) -> Option<ToolCredentialSpec> {
    if let Some(cred) = auth_spec_credential(auth) {
        return Some(cred);
    }
    let name = scheme_names.first()?;
    match openapi::resolve_security_scheme(document, name)? {
        crate::infrastructure::protocol::openapi::SecurityScheme::Bearer => Some(ToolCredentialSpec {
            source_key: name.clone(),
            scope: CredentialScope::Workspace,
            auth_type: AuthType::Bearer,
            header_name: None,
        }),
        crate::infrastructure::protocol::openapi::SecurityScheme::ApiKeyHeader { header } => Some(ToolCredentialSpec {
            source_key: name.clone(),
            scope: CredentialScope::Workspace,
            auth_type: AuthType::ApiKey,
            header_name: Some(header),
        }),
        crate::infrastructure::protocol::openapi::SecurityScheme::Other => None,
    }
}

/// Derive a `ToolCredentialSpec` from a source's declared `AuthSpec` (spec
/// §6 `AuthSpec` variants). `mode` selects whether the credential record is
/// workspace- or actor-scoped; static (inline-value) auth has no
/// credential record to resolve, so it's left for the run spec to carry
/// directly and no spec is produced here.
fn auth_spec_credential(auth: Option<&AuthSpec>) -> Option<ToolCredentialSpec> {
    match auth? {
        AuthSpec::None => None,
        AuthSpec::Basic { mode, .. } => scoped_spec("basic", *mode, AuthType::Basic, None),
        AuthSpec::Bearer { mode, .. } => scoped_spec("bearer", *mode, AuthType::Bearer, None),
        AuthSpec::ApiKey { mode, header, .. } => scoped_spec("api_key", *mode, AuthType::ApiKey, Some(header.clone())),
    }
}

fn scoped_spec(
    source_key: &str,
    mode: Option<CredentialMode>,
    auth_type: AuthType,
    header_name: Option<String>,
) -> Option<ToolCredentialSpec> {
    match mode.unwrap_or(CredentialMode::Workspace) {
        CredentialMode::Static => None,
        CredentialMode::Workspace => {
            Some(ToolCredentialSpec { source_key: source_key.to_string(), scope: CredentialScope::Workspace, auth_type, header_name })
        }
        CredentialMode::Actor => {
            Some(ToolCredentialSpec { source_key: source_key.to_string(), scope: CredentialScope::Actor, auth_type, header_name })
        }
    }
}
