//! MCP (Model Context Protocol) JSON-RPC 2.0 message types.

use portico_core::{PromptDescriptor, ResourceDescriptor, ToolDescriptor};
use serde::{Deserialize, Serialize};

/// Protocol revision sent in `initialize`.
pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// Content types a streamable-HTTP client must accept.
pub const STREAMABLE_ACCEPT: &str = "application/json, text/event-stream";

/// Header carrying the server-assigned session.
pub const SESSION_HEADER: &str = "Mcp-Session-Id";

/// JSON-RPC 2.0 request.
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: &'static str,
    pub id: u64,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

impl JsonRpcRequest {
    pub fn new(id: u64, method: impl Into<String>, params: Option<serde_json::Value>) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            method: method.into(),
            params,
        }
    }

    /// The `initialize` request identifying this client as `client_name`.
    pub fn initialize(id: u64, client_name: &str, client_version: &str) -> Self {
        Self::new(
            id,
            "initialize",
            Some(initialize_params(client_name, client_version)),
        )
    }
}

/// Parameters of an `initialize` request with empty client capabilities.
pub fn initialize_params(client_name: &str, client_version: &str) -> serde_json::Value {
    serde_json::json!({
        "protocolVersion": PROTOCOL_VERSION,
        "capabilities": {},
        "clientInfo": {
            "name": client_name,
            "version": client_version
        }
    })
}

/// JSON-RPC 2.0 notification (no id, no response).
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcNotification {
    pub jsonrpc: &'static str,
    pub method: String,
    pub params: serde_json::Value,
}

impl JsonRpcNotification {
    pub fn new(method: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0",
            method: method.into(),
            params: serde_json::json!({}),
        }
    }
}

/// JSON-RPC 2.0 response.
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcResponse {
    #[allow(dead_code)]
    pub jsonrpc: String,
    pub id: Option<u64>,
    pub result: Option<serde_json::Value>,
    pub error: Option<JsonRpcError>,
}

/// JSON-RPC 2.0 error object.
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    pub data: Option<serde_json::Value>,
}

/// MCP server capabilities from the `initialize` response.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ServerCapabilities {
    #[serde(default)]
    pub tools: Option<serde_json::Value>,
    #[serde(default)]
    pub resources: Option<serde_json::Value>,
    #[serde(default)]
    pub prompts: Option<serde_json::Value>,
}

/// MCP initialize response.
#[derive(Debug, Clone, Deserialize)]
pub struct InitializeResult {
    #[serde(rename = "protocolVersion")]
    pub protocol_version: String,
    #[serde(default)]
    pub capabilities: ServerCapabilities,
    #[serde(default, rename = "serverInfo")]
    pub server_info: Option<ServerInfo>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerInfo {
    pub name: String,
    #[serde(default)]
    pub version: String,
}

/// Result of `tools/list`.
#[derive(Debug, Clone, Deserialize)]
pub struct ListToolsResult {
    #[serde(default)]
    pub tools: Vec<ToolDescriptor>,
    #[serde(default, rename = "nextCursor")]
    pub next_cursor: Option<String>,
}

/// Result of `resources/list`.
#[derive(Debug, Clone, Deserialize)]
pub struct ListResourcesResult {
    #[serde(default)]
    pub resources: Vec<ResourceDescriptor>,
    #[serde(default, rename = "nextCursor")]
    pub next_cursor: Option<String>,
}

/// Result of `prompts/list`.
#[derive(Debug, Clone, Deserialize)]
pub struct ListPromptsResult {
    #[serde(default)]
    pub prompts: Vec<PromptDescriptor>,
    #[serde(default, rename = "nextCursor")]
    pub next_cursor: Option<String>,
}

/// True when `body` looks like a JSON-RPC answer: an envelope marker plus a
/// `result` or `error` member.
pub fn is_jsonrpc_envelope(body: &str) -> bool {
    body.contains("\"jsonrpc\"") && (body.contains("\"result\"") || body.contains("\"error\""))
}

/// Server name carried by an `initialize` answer, either in
/// `result.serverInfo` or in `error.data.serverInfo`.
pub fn server_name_from_body(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    value
        .pointer("/result/serverInfo/name")
        .or_else(|| value.pointer("/error/data/serverInfo/name"))
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Extracts the `data:` payload of every event in a `text/event-stream` body.
pub fn event_stream_payloads(body: &str) -> Vec<String> {
    let mut payloads = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    for line in body.lines() {
        let line = line.trim_end_matches('\r');
        if line.is_empty() {
            if !current.is_empty() {
                payloads.push(current.join("\n"));
                current.clear();
            }
            continue;
        }
        if let Some(data) = line.strip_prefix("data:") {
            current.push(data.strip_prefix(' ').unwrap_or(data));
        }
    }
    if !current.is_empty() {
        payloads.push(current.join("\n"));
    }
    payloads
}
