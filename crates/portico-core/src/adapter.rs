//! Adapter records, sidecar launch specifications and authentication policies.

use crate::capability::CapabilitySnapshot;
use crate::scan::ConnectionKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// --- Sidecar launch specification ---

/// Kind of launcher a sidecar needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeFamily {
    /// A container image started with `docker run`.
    Docker,
    /// A Node package started with `npx`.
    Npx,
    /// A Python package started with `uv`/`uvx`.
    Uv,
    /// A Python script or module.
    Python,
}

impl std::fmt::Display for RuntimeFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RuntimeFamily::Docker => write!(f, "docker"),
            RuntimeFamily::Npx => write!(f, "npx"),
            RuntimeFamily::Uv => write!(f, "uv"),
            RuntimeFamily::Python => write!(f, "python"),
        }
    }
}

/// A `NAME=value` pair passed to a sidecar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvVar {
    pub name: String,
    pub value: String,
}

impl EnvVar {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Normalized description of how to launch a sidecar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SidecarSpec {
    /// Launcher family.
    #[serde(rename = "commandType")]
    pub runtime: RuntimeFamily,
    /// Executable to run.
    pub command: String,
    /// Arguments passed to the executable.
    #[serde(default)]
    pub args: Vec<String>,
    /// Environment for the process.
    #[serde(default)]
    pub env: Vec<EnvVar>,
    /// Assigned port; zero until the sidecar runtime allocates one.
    #[serde(default)]
    pub port: u16,
}

impl SidecarSpec {
    /// Full command line, for logs.
    pub fn command_line(&self) -> String {
        std::iter::once(self.command.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

// --- Authentication policy ---

/// Where an API key travels on outbound requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApiKeyLocation {
    Header,
    Query,
    Cookie,
}

/// Authentication policy attached to an adapter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum AuthPolicy {
    /// No credentials.
    #[default]
    None,
    /// `Authorization: Bearer <token>`.
    Bearer {
        /// The bearer token.
        token: String,
    },
    /// HTTP basic credentials.
    Basic {
        /// User name.
        username: String,
        /// Password.
        password: String,
    },
    /// An API key placed in a header, query parameter or cookie.
    #[serde(rename = "apikey")]
    ApiKey {
        /// The key value.
        key: String,
        /// Where the key is sent.
        location: ApiKeyLocation,
        /// Header, parameter or cookie name.
        name: String,
    },
}

impl AuthPolicy {
    /// Short label for logs. Never includes secrets.
    pub fn kind(&self) -> &'static str {
        match self {
            AuthPolicy::None => "none",
            AuthPolicy::Bearer { .. } => "bearer",
            AuthPolicy::Basic { .. } => "basic",
            AuthPolicy::ApiKey { .. } => "apikey",
        }
    }
}

// --- Adapters ---

/// What an adapter routes traffic to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum AdapterBackend {
    /// A remote MCP endpoint reached directly.
    Remote {
        /// Endpoint URL.
        #[serde(rename = "remoteUrl")]
        url: String,
        /// Transport the endpoint speaks.
        transport: ConnectionKind,
    },
    /// A local sidecar wrapping a stdio server.
    Sidecar {
        /// Launch specification.
        #[serde(rename = "sidecarConfig")]
        spec: SidecarSpec,
        /// Endpoint reported by the sidecar runtime after deployment.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        endpoint: Option<String>,
    },
}

/// A provisioned adapter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdapterResource {
    /// Unique name, the adapter's primary identity.
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Catalog entry the adapter was created from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub catalog_id: Option<String>,
    #[serde(flatten)]
    pub backend: AdapterBackend,
    #[serde(default)]
    pub environment_variables: HashMap<String, String>,
    #[serde(default)]
    pub authentication: AuthPolicy,
    /// `None` until the first successful capability handshake.
    #[serde(default)]
    pub capabilities: Option<CapabilitySnapshot>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub last_updated_at: DateTime<Utc>,
}

impl AdapterResource {
    /// Connection kind implied by the backend.
    pub fn connection_kind(&self) -> ConnectionKind {
        match &self.backend {
            AdapterBackend::Remote { transport, .. } => *transport,
            AdapterBackend::Sidecar { .. } => ConnectionKind::SidecarHttp,
        }
    }

    /// The sidecar launch specification, if the adapter owns one.
    pub fn sidecar(&self) -> Option<&SidecarSpec> {
        match &self.backend {
            AdapterBackend::Sidecar { spec, .. } => Some(spec),
            AdapterBackend::Remote { .. } => None,
        }
    }

    /// The endpoint traffic and capability handshakes go to, once known.
    pub fn live_endpoint(&self) -> Option<&str> {
        match &self.backend {
            AdapterBackend::Remote { url, .. } => Some(url),
            AdapterBackend::Sidecar { endpoint, .. } => endpoint.as_deref(),
        }
    }

    /// Marks the record as modified now.
    pub fn touch(&mut self) {
        self.last_updated_at = Utc::now();
    }
}

/// Partial update applied by `UpdateAdapter`. The name is immutable.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdapterUpdate {
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub environment_variables: Option<HashMap<String, String>>,
    #[serde(default)]
    pub authentication: Option<AuthPolicy>,
}

impl AdapterUpdate {
    /// Applies the present fields to `adapter`.
    pub fn apply_to(self, adapter: &mut AdapterResource) {
        if let Some(description) = self.description {
            adapter.description = description;
        }
        if let Some(env) = self.environment_variables {
            adapter.environment_variables = env;
        }
        if let Some(auth) = self.authentication {
            adapter.authentication = auth;
        }
        adapter.touch();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sidecar_adapter() -> AdapterResource {
        AdapterResource {
            name: "fs".into(),
            description: String::new(),
            catalog_id: Some("filesystem".into()),
            backend: AdapterBackend::Sidecar {
                spec: SidecarSpec {
                    runtime: RuntimeFamily::Npx,
                    command: "npx".into(),
                    args: vec!["-y".into(), "@modelcontextprotocol/server-filesystem".into()],
                    env: vec![],
                    port: 0,
                },
                endpoint: None,
            },
            environment_variables: HashMap::new(),
            authentication: AuthPolicy::None,
            capabilities: None,
            created_by: "alice".into(),
            created_at: Utc::now(),
            last_updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_sidecar_backend_implies_sidecar_kind() {
        let adapter = sidecar_adapter();
        assert_eq!(adapter.connection_kind(), ConnectionKind::SidecarHttp);
        assert!(adapter.sidecar().is_some());
        assert!(adapter.live_endpoint().is_none());
    }

    #[test]
    fn test_adapter_json_shape() {
        let json = serde_json::to_value(sidecar_adapter()).unwrap();
        assert_eq!(json["backend"], "sidecar");
        assert_eq!(json["sidecarConfig"]["commandType"], "npx");
        assert_eq!(json["authentication"]["type"], "none");
        assert!(json["capabilities"].is_null());

        let back: AdapterResource = serde_json::from_value(json).unwrap();
        assert_eq!(back, sidecar_adapter_with_times(&back));
    }

    fn sidecar_adapter_with_times(other: &AdapterResource) -> AdapterResource {
        let mut a = sidecar_adapter();
        a.created_at = other.created_at;
        a.last_updated_at = other.last_updated_at;
        a
    }

    #[test]
    fn test_auth_policy_variants_parse() {
        let policy: AuthPolicy = serde_json::from_str(
            r#"{"type":"apikey","key":"k-1","location":"query","name":"api_key"}"#,
        )
        .unwrap();
        assert_eq!(
            policy,
            AuthPolicy::ApiKey {
                key: "k-1".into(),
                location: ApiKeyLocation::Query,
                name: "api_key".into()
            }
        );
        assert_eq!(policy.kind(), "apikey");

        let bearer: AuthPolicy = serde_json::from_str(r#"{"type":"bearer","token":"t"}"#).unwrap();
        assert_eq!(bearer.kind(), "bearer");
    }

    #[test]
    fn test_update_keeps_unset_fields() {
        let mut adapter = sidecar_adapter();
        adapter.environment_variables.insert("ROOT".into(), "/srv".into());
        AdapterUpdate {
            description: Some("files".into()),
            ..Default::default()
        }
        .apply_to(&mut adapter);
        assert_eq!(adapter.description, "files");
        assert_eq!(adapter.environment_variables["ROOT"], "/srv");
    }
}
