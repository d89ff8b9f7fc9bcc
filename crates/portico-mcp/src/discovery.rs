//! Capability discovery: the initialize / list handshake that fills an
//! adapter's [`CapabilitySnapshot`].

use crate::client::McpHttpClient;
use async_trait::async_trait;
use chrono::Utc;
use portico_core::{
    AuthPolicy, CapabilitySnapshot, PorticoError, PorticoResult, ServerIdentity,
};
use std::time::Duration;
use tracing::info;

/// Enumerates what an MCP endpoint exposes.
#[async_trait]
pub trait CapabilityDiscoverer: Send + Sync {
    /// Runs the handshake against `endpoint`, attaching `auth` to every call.
    ///
    /// Any failure is returned as [`PorticoError::Discovery`].
    async fn discover(&self, endpoint: &str, auth: &AuthPolicy)
        -> PorticoResult<CapabilitySnapshot>;
}

/// [`CapabilityDiscoverer`] speaking streamable HTTP.
pub struct HttpCapabilityDiscoverer {
    http: reqwest::Client,
}

impl HttpCapabilityDiscoverer {
    /// Creates a discoverer whose requests time out after `timeout`.
    pub fn new(timeout: Duration) -> PorticoResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PorticoError::Http(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self { http })
    }
}

#[async_trait]
impl CapabilityDiscoverer for HttpCapabilityDiscoverer {
    async fn discover(
        &self,
        endpoint: &str,
        auth: &AuthPolicy,
    ) -> PorticoResult<CapabilitySnapshot> {
        let client = McpHttpClient::with_client(self.http.clone(), endpoint, auth.clone());
        let init = client.initialize().await?;

        let tools = client.list_tools().await?;
        let resources = if init.capabilities.resources.is_some() {
            client.list_resources().await?
        } else {
            Vec::new()
        };
        let prompts = if init.capabilities.prompts.is_some() {
            client.list_prompts().await?
        } else {
            Vec::new()
        };

        let server_info = init
            .server_info
            .map(|s| ServerIdentity {
                name: s.name,
                version: s.version,
                protocol_version: init.protocol_version.clone(),
            })
            .unwrap_or_else(|| ServerIdentity {
                protocol_version: init.protocol_version.clone(),
                ..Default::default()
            });

        info!(
            endpoint = %endpoint,
            server = %server_info.name,
            tools = tools.len(),
            resources = resources.len(),
            prompts = prompts.len(),
            "MCP capabilities discovered"
        );

        Ok(CapabilitySnapshot {
            server_info,
            tools,
            resources,
            prompts,
            last_refreshed: Utc::now(),
        })
    }
}
