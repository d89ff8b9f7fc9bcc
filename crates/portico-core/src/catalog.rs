//! Catalog entries describing installable or connectable MCP servers.

use crate::scan::ConnectionKind;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Whether an entry can be reached directly or needs a local sidecar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransportRequirement {
    /// A network endpoint the gateway can talk to directly.
    Direct,
    /// A stdio-only server that must be wrapped by a sidecar.
    SidecarRequired,
}

/// Transport a package speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PackageTransportKind {
    /// Standard input/output.
    Stdio,
    /// Server-sent events.
    Sse,
    /// Streamable HTTP.
    #[serde(alias = "http")]
    StreamableHttp,
    /// Anything else.
    #[serde(other)]
    Unknown,
}

/// Transport section of a package.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackageTransport {
    /// Transport kind.
    #[serde(rename = "type")]
    pub kind: PackageTransportKind,
    /// Endpoint for network transports.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// Environment variable a package documents.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageEnvVar {
    /// Variable name.
    pub name: String,
    /// Human-readable description.
    #[serde(default)]
    pub description: String,
    /// Whether the server refuses to start without it.
    #[serde(default)]
    pub is_required: bool,
    /// Value used when the caller supplies none.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
}

/// One deployable package of a catalog entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Package {
    /// Registry the package comes from (`npm`, `pypi`, `oci`, `remote`, ...).
    pub registry_type: String,
    /// Package or image identifier within the registry.
    pub identifier: String,
    /// Package version.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Transport the package speaks once started.
    pub transport: PackageTransport,
    /// Documented environment variables.
    #[serde(default)]
    pub environment_variables: Vec<PackageEnvVar>,
}

/// A catalog entry (`MCPServer`) owned by the registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct McpServer {
    /// Catalog identity.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Description.
    #[serde(default)]
    pub description: String,
    /// Version of the server.
    #[serde(default)]
    pub version: String,
    /// Deployable packages.
    #[serde(default)]
    pub packages: Vec<Package>,
    /// Registry validation status.
    #[serde(default = "default_validation_status", rename = "validation_status")]
    pub validation_status: String,
    /// Free-form deployment metadata, may carry `sidecarConfig`.
    #[serde(default, rename = "_meta")]
    pub meta: Map<String, Value>,
    /// Remote endpoint for directly reachable servers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Container image reference.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    /// Set at catalog-ingestion time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transport_requirement: Option<TransportRequirement>,
}

fn default_validation_status() -> String {
    "new".to_string()
}

impl McpServer {
    /// Creates a bare entry with no packages.
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            version: String::new(),
            packages: Vec::new(),
            validation_status: default_validation_status(),
            meta: Map::new(),
            url: None,
            image: None,
            transport_requirement: None,
        }
    }

    /// Derives the transport requirement from the entry's declared structure.
    ///
    /// An entry needs a sidecar when any package speaks stdio or when it
    /// carries sidecar launch metadata.
    pub fn derive_transport_requirement(&self) -> TransportRequirement {
        let stdio_package = self
            .packages
            .iter()
            .any(|p| p.transport.kind == PackageTransportKind::Stdio || p.registry_type == "stdio");
        if stdio_package || self.meta.contains_key("sidecarConfig") {
            TransportRequirement::SidecarRequired
        } else {
            TransportRequirement::Direct
        }
    }

    /// The declared requirement, or the derived one for entries that predate ingestion.
    pub fn transport_requirement(&self) -> TransportRequirement {
        self.transport_requirement
            .unwrap_or_else(|| self.derive_transport_requirement())
    }

    /// Remote URL and transport for a directly reachable entry.
    pub fn remote_endpoint(&self) -> Option<(String, ConnectionKind)> {
        let network_kind = |kind: PackageTransportKind| match kind {
            PackageTransportKind::Sse => Some(ConnectionKind::Sse),
            PackageTransportKind::StreamableHttp => Some(ConnectionKind::StreamableHttp),
            PackageTransportKind::Stdio | PackageTransportKind::Unknown => None,
        };

        if let Some(url) = self.url.as_deref().filter(|u| !u.is_empty()) {
            let kind = self
                .packages
                .iter()
                .find_map(|p| network_kind(p.transport.kind))
                .unwrap_or(ConnectionKind::StreamableHttp);
            return Some((url.to_string(), kind));
        }

        self.packages.iter().find_map(|p| {
            let kind = network_kind(p.transport.kind)?;
            let url = p.transport.url.clone().or_else(|| {
                (p.registry_type == "remote").then(|| p.identifier.clone())
            })?;
            Some((url, kind))
        })
    }
}
