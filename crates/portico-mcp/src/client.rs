//! MCP client. Talks to an MCP server over streamable HTTP and exchanges
//! JSON-RPC 2.0 messages.

use crate::auth::ApplyAuth;
use crate::protocol::*;
use portico_core::{
    AuthPolicy, PorticoError, PorticoResult, PromptDescriptor, ResourceDescriptor, ToolDescriptor,
};
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use serde::de::DeserializeOwned;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Upper bound on `nextCursor` pages followed for one list call.
const MAX_PAGES: usize = 50;

/// MCP client bound to one streamable-HTTP endpoint.
pub struct McpHttpClient {
    http: reqwest::Client,
    endpoint: String,
    auth: AuthPolicy,
    session_id: RwLock<Option<String>>,
    next_id: AtomicU64,
}

impl McpHttpClient {
    /// Creates a client with its own connection pool and request timeout.
    pub fn new(
        endpoint: impl Into<String>,
        auth: AuthPolicy,
        timeout: Duration,
    ) -> PorticoResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PorticoError::Http(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self::with_client(http, endpoint, auth))
    }

    /// Creates a client sharing an existing `reqwest::Client`.
    pub fn with_client(http: reqwest::Client, endpoint: impl Into<String>, auth: AuthPolicy) -> Self {
        Self {
            http,
            endpoint: endpoint.into(),
            auth,
            session_id: RwLock::new(None),
            next_id: AtomicU64::new(1),
        }
    }

    /// The endpoint this client talks to.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Send a JSON-RPC request and wait for the response.
    async fn request(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> PorticoResult<JsonRpcResponse> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let req = JsonRpcRequest::new(id, method, params);

        let mut builder = self
            .http
            .post(&self.endpoint)
            .header(ACCEPT, STREAMABLE_ACCEPT)
            .json(&req)
            .with_auth(&self.auth);
        if let Some(session) = self.session_id.read().await.as_deref() {
            builder = builder.header(SESSION_HEADER, session);
        }

        let resp = builder.send().await.map_err(|e| {
            PorticoError::Discovery(format!("MCP request '{method}' to {} failed: {e}", self.endpoint))
        })?;

        let status = resp.status();
        if !status.is_success() {
            return Err(PorticoError::Discovery(format!(
                "MCP request '{method}' to {} returned HTTP {status}",
                self.endpoint
            )));
        }

        if let Some(session) = resp
            .headers()
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
        {
            *self.session_id.write().await = Some(session.to_string());
        }

        let is_event_stream = resp
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.contains("text/event-stream"));

        let body = resp.text().await.map_err(|e| {
            PorticoError::Discovery(format!("Failed to read '{method}' response body: {e}"))
        })?;

        let resp = if is_event_stream {
            event_stream_payloads(&body)
                .iter()
                .filter_map(|payload| serde_json::from_str::<JsonRpcResponse>(payload).ok())
                .find(|r| r.id == Some(id))
                .ok_or_else(|| {
                    PorticoError::Discovery(format!(
                        "No response to '{method}' in event stream from {}",
                        self.endpoint
                    ))
                })?
        } else {
            serde_json::from_str::<JsonRpcResponse>(&body).map_err(|e| {
                PorticoError::Discovery(format!("Invalid JSON-RPC response to '{method}': {e}"))
            })?
        };

        if let Some(err) = &resp.error {
            return Err(PorticoError::Discovery(format!(
                "MCP error {}: {}",
                err.code, err.message
            )));
        }

        Ok(resp)
    }

    /// Send a JSON-RPC request and decode its `result`.
    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> PorticoResult<T> {
        let resp = self.request(method, params).await?;
        let result = resp
            .result
            .ok_or_else(|| PorticoError::Discovery(format!("Empty {method} result")))?;
        serde_json::from_value(result)
            .map_err(|e| PorticoError::Discovery(format!("Failed to parse {method} result: {e}")))
    }

    /// Send a JSON-RPC notification (no response expected).
    async fn notify(&self, method: &str) -> PorticoResult<()> {
        let mut builder = self
            .http
            .post(&self.endpoint)
            .header(ACCEPT, STREAMABLE_ACCEPT)
            .json(&JsonRpcNotification::new(method))
            .with_auth(&self.auth);
        if let Some(session) = self.session_id.read().await.as_deref() {
            builder = builder.header(SESSION_HEADER, session);
        }

        let resp = builder
            .send()
            .await
            .map_err(|e| PorticoError::Discovery(format!("Failed to send {method}: {e}")))?;
        if !resp.status().is_success() {
            return Err(PorticoError::Discovery(format!(
                "Notification {method} returned HTTP {}",
                resp.status()
            )));
        }
        Ok(())
    }

    /// Perform the MCP initialize handshake, followed by `notifications/initialized`.
    pub async fn initialize(&self) -> PorticoResult<InitializeResult> {
        let params = initialize_params("portico", env!("CARGO_PKG_VERSION"));
        let result: InitializeResult = self.call("initialize", Some(params)).await?;

        info!(
            endpoint = %self.endpoint,
            version = %result.protocol_version,
            "MCP server initialized"
        );

        // Some servers answer notifications with 4xx; the session is usable regardless.
        if let Err(e) = self.notify("notifications/initialized").await {
            debug!(endpoint = %self.endpoint, error = %e, "initialized notification rejected");
        }

        Ok(result)
    }

    /// List available tools, following pagination cursors.
    pub async fn list_tools(&self) -> PorticoResult<Vec<ToolDescriptor>> {
        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;
        for _ in 0..MAX_PAGES {
            let page: ListToolsResult = self.call("tools/list", cursor_params(&cursor)).await?;
            tools.extend(page.tools);
            match page.next_cursor {
                Some(next) if !next.is_empty() => cursor = Some(next),
                _ => break,
            }
        }
        Ok(tools)
    }

    /// List readable resources, following pagination cursors.
    pub async fn list_resources(&self) -> PorticoResult<Vec<ResourceDescriptor>> {
        let mut resources = Vec::new();
        let mut cursor: Option<String> = None;
        for _ in 0..MAX_PAGES {
            let page: ListResourcesResult =
                self.call("resources/list", cursor_params(&cursor)).await?;
            resources.extend(page.resources);
            match page.next_cursor {
                Some(next) if !next.is_empty() => cursor = Some(next),
                _ => break,
            }
        }
        Ok(resources)
    }

    /// List prompt templates, following pagination cursors.
    pub async fn list_prompts(&self) -> PorticoResult<Vec<PromptDescriptor>> {
        let mut prompts = Vec::new();
        let mut cursor: Option<String> = None;
        for _ in 0..MAX_PAGES {
            let page: ListPromptsResult = self.call("prompts/list", cursor_params(&cursor)).await?;
            prompts.extend(page.prompts);
            match page.next_cursor {
                Some(next) if !next.is_empty() => cursor = Some(next),
                _ => break,
            }
        }
        Ok(prompts)
    }
}

fn cursor_params(cursor: &Option<String>) -> Option<serde_json::Value> {
    cursor
        .as_ref()
        .map(|c| serde_json::json!({ "cursor": c }))
}
