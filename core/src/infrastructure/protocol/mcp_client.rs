// Copyright (c) 2026 Conduit Systems
// SPDX-License-Identifier: AGPL-3.0

//! Process-wide MCP connection pool ("Connection pool for MCP is
//! process-wide... keyed by the stable connection key", §9 "re-architect as
//! an explicit connection pool dependency... parameterized by the
//! connection-key hash"). Entries are lazy and reused across tasks.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::domain::tool_source::McpTransport;

#[derive(Debug, Error)]
pub enum McpError {
    #[error("mcp transport error: {0}")]
    Transport(String),

    #[error("mcp server returned an error: {0}")]
    Remote(String),

    #[error("malformed mcp response: {0}")]
    Malformed(String),
}

/// Remote tool descriptor returned by `tools/list` (MCP
/// compilation source).
#[derive(Debug, Clone, Deserialize)]
pub struct McpToolDescriptor {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(rename = "inputSchema", default)]
    pub input_schema: Option<Value>,
}

/// Hash the header set so two equivalent-but-differently-ordered header
/// maps collapse to the same connection key ("header-set-hash").
pub fn header_set_hash(headers: &HashMap<String, String>) -> String {
    let mut pairs: Vec<String> = headers.iter().map(|(k, v)| format!("{k}={v}")).collect();
    pairs.sort();
    let mut hasher = Sha256::new();
    hasher.update(pairs.join("\n").as_bytes());
    format!("{:x}", hasher.finalize())
}

fn connection_key(url: &str, transport: McpTransport, header_hash: &str) -> String {
    format!("{url}|{transport:?}|{header_hash}")
}

#[derive(Serialize)]
struct JsonRpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: Value,
}

#[derive(Deserialize)]
struct JsonRpcResponse {
    result: Option<Value>,
    error: Option<JsonRpcError>,
}

#[derive(Deserialize)]
struct JsonRpcError {
    message: String,
}

/// A single MCP session, addressed over the `streamable-http` or `sse`
/// transport as a JSON-RPC-over-HTTP endpoint.
pub struct McpClient {
    http: reqwest::Client,
    url: String,
    headers: HashMap<String, String>,
}

impl McpClient {
    fn new(url: String, headers: HashMap<String, String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            url,
            headers,
        }
    }

    async fn call(&self, method: &str, params: Value) -> Result<Value, McpError> {
        let mut request = self.http.post(&self.url).json(&JsonRpcRequest {
            jsonrpc: "2.0",
            id: 1,
            method,
            params,
        });
        for (k, v) in &self.headers {
            request = request.header(k, v);
        }

        let response = request.send().await.map_err(|e| McpError::Transport(e.to_string()))?;
        if !response.status().is_success() {
            return Err(McpError::Transport(format!("http {}", response.status())));
        }

        let body: JsonRpcResponse = response.json().await.map_err(|e| McpError::Malformed(e.to_string()))?;
        if let Some(error) = body.error {
            return Err(McpError::Remote(error.message));
        }
        body.result.ok_or_else(|| McpError::Malformed("missing result".into()))
    }

    pub async fn list_tools(&self) -> Result<Vec<McpToolDescriptor>, McpError> {
        let result = self.call("tools/list", serde_json::json!({})).await?;
        let tools = result
            .get("tools")
            .cloned()
            .ok_or_else(|| McpError::Malformed("tools/list response missing tools".into()))?;
        serde_json::from_value(tools).map_err(|e| McpError::Malformed(e.to_string()))
    }

    pub async fn call_tool(&self, name: &str, arguments: Value) -> Result<Value, McpError> {
        let result = self
            .call("tools/call", serde_json::json!({"name": name, "arguments": arguments}))
            .await?;
        result
            .get("content")
            .cloned()
            .or_else(|| result.get("structuredContent").cloned())
            .ok_or_else(|| McpError::Malformed("tools/call response missing content".into()))
    }
}

#[derive(Default)]
pub struct McpConnectionPool {
    clients: DashMap<String, Arc<McpClient>>,
}

impl McpConnectionPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_connect(&self, url: &str, transport: McpTransport, headers: HashMap<String, String>) -> Arc<McpClient> {
        let key = connection_key(url, transport, &header_set_hash(&headers));
        self.clients
            .entry(key)
            .or_insert_with(|| Arc::new(McpClient::new(url.to_string(), headers)))
            .clone()
    }

    /// Drop a connection after a transport error so the next call builds a
    /// fresh one ("on transport error close connection, reconnect
    /// once, retry").
    pub fn evict(&self, url: &str, transport: McpTransport, headers: &HashMap<String, String>) {
        let key = connection_key(url, transport, &header_set_hash(headers));
        self.clients.remove(&key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_set_hash_is_order_independent() {
        let mut a = HashMap::new();
        a.insert("x".to_string(), "1".to_string());
        a.insert("y".to_string(), "2".to_string());
        let mut b = HashMap::new();
        b.insert("y".to_string(), "2".to_string());
        b.insert("x".to_string(), "1".to_string());
        assert_eq!(header_set_hash(&a), header_set_hash(&b));
    }

    #[test]
    fn get_or_connect_reuses_the_same_client_for_the_same_key() {
        let pool = McpConnectionPool::new();
        let a = pool.get_or_connect("https://mcp.example.test", McpTransport::StreamableHttp, HashMap::new());
        let b = pool.get_or_connect("https://mcp.example.test", McpTransport::StreamableHttp, HashMap::new());
        assert!(Arc::ptr_eq(&a, &b));
    }
}
