//! Scan requests, scan jobs and the servers they discover.

use crate::{PorticoError, PorticoResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// --- Scan configuration ---

/// Caller-supplied description of a network scan.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanConfig {
    /// Address ranges in CIDR notation or single IP addresses.
    #[serde(alias = "scanRanges")]
    pub ranges: Vec<String>,
    /// Ports to probe on every address.
    pub ports: Vec<PortSpec>,
    /// Per-probe timeout, e.g. `5s` or `500ms`.
    #[serde(default = "default_timeout")]
    pub timeout: String,
    /// Upper bound on simultaneous probes, 1 to 100.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    /// Skip the gateway's own listening addresses.
    #[serde(default = "default_true", alias = "excludeProxy")]
    pub exclude_self: bool,
    /// Extra exclusions matched as substrings of generated targets.
    #[serde(default)]
    pub exclude_addresses: Vec<String>,
}

fn default_timeout() -> String {
    "30s".to_string()
}
fn default_max_concurrent() -> usize {
    10
}
fn default_true() -> bool {
    true
}

impl ScanConfig {
    /// Builds a config with default timeout, concurrency and self-exclusion.
    pub fn new(ranges: Vec<String>, ports: Vec<PortSpec>) -> Self {
        Self {
            ranges,
            ports,
            timeout: default_timeout(),
            max_concurrent: default_max_concurrent(),
            exclude_self: true,
            exclude_addresses: Vec::new(),
        }
    }

    /// Expands every port specification into a flat, deduplicated port list.
    pub fn expanded_ports(&self) -> PorticoResult<Vec<u16>> {
        let mut out = Vec::new();
        for spec in &self.ports {
            for port in spec.expand()? {
                if !out.contains(&port) {
                    out.push(port);
                }
            }
        }
        Ok(out)
    }
}

/// A single port or an inclusive `start-end` range.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PortSpec {
    /// One port number.
    Single(u16),
    /// A port given as text: `"8080"` or `"8000-8010"`.
    Text(String),
}

impl PortSpec {
    /// Returns the ports this specification covers.
    pub fn expand(&self) -> PorticoResult<Vec<u16>> {
        match self {
            PortSpec::Single(0) => Err(PorticoError::Validation("port 0 is not scannable".into())),
            PortSpec::Single(p) => Ok(vec![*p]),
            PortSpec::Text(text) => {
                let text = text.trim();
                match text.split_once('-') {
                    Some((start, end)) => {
                        let start = parse_port(start)?;
                        let end = parse_port(end)?;
                        if start > end {
                            return Err(PorticoError::Validation(format!(
                                "inverted port range {text}"
                            )));
                        }
                        Ok((start..=end).collect())
                    }
                    None => Ok(vec![parse_port(text)?]),
                }
            }
        }
    }
}

impl From<u16> for PortSpec {
    fn from(port: u16) -> Self {
        PortSpec::Single(port)
    }
}

fn parse_port(s: &str) -> PorticoResult<u16> {
    match s.trim().parse::<u16>() {
        Ok(0) | Err(_) => Err(PorticoError::Validation(format!("invalid port {s}"))),
        Ok(p) => Ok(p),
    }
}

// --- Scan jobs ---

/// Lifecycle state of a [`ScanJob`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanStatus {
    /// Probing is in progress (or was abandoned by cancellation).
    Running,
    /// Every target was processed.
    Completed,
    /// A fatal error stopped the scan.
    Failed,
}

impl ScanStatus {
    /// Completed and failed jobs never change again.
    pub fn is_terminal(self) -> bool {
        !matches!(self, ScanStatus::Running)
    }
}

impl std::fmt::Display for ScanStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScanStatus::Running => write!(f, "running"),
            ScanStatus::Completed => write!(f, "completed"),
            ScanStatus::Failed => write!(f, "failed"),
        }
    }
}

/// One scan request and its outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanJob {
    /// Time-ordered identifier.
    pub id: String,
    /// The configuration the scan was started with.
    pub config: ScanConfig,
    /// Current status.
    pub status: ScanStatus,
    /// When the job was created.
    pub started_at: DateTime<Utc>,
    /// When the job reached a terminal status.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    /// Set when the job was cancelled before finishing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cancelled_at: Option<DateTime<Utc>>,
    /// MCP-positive servers found by this job.
    #[serde(default)]
    pub results: Vec<DiscoveredServer>,
    /// Error text for failed jobs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ScanJob {
    /// Creates a running job.
    pub fn new(id: impl Into<String>, config: ScanConfig) -> Self {
        Self {
            id: id.into(),
            config,
            status: ScanStatus::Running,
            started_at: Utc::now(),
            finished_at: None,
            cancelled_at: None,
            results: Vec::new(),
            error: None,
        }
    }

    /// Transitions to `completed`. Returns false if the job was already terminal.
    pub fn complete(&mut self, results: Vec<DiscoveredServer>) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.status = ScanStatus::Completed;
        self.results = results;
        self.finished_at = Some(Utc::now());
        true
    }

    /// Transitions to `failed`. Returns false if the job was already terminal.
    pub fn fail(&mut self, error: impl Into<String>) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.status = ScanStatus::Failed;
        self.error = Some(error.into());
        self.finished_at = Some(Utc::now());
        true
    }
}

// --- Discovered servers ---

/// Application protocol spoken by a discovered server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServerProtocol {
    /// Model Context Protocol.
    #[serde(rename = "MCP")]
    Mcp,
}

impl std::fmt::Display for ServerProtocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServerProtocol::Mcp => write!(f, "MCP"),
        }
    }
}

/// How an MCP server is reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConnectionKind {
    /// Server-sent event stream.
    #[serde(rename = "SSE")]
    Sse,
    /// Streamable request/response over HTTP.
    StreamableHttp,
    /// Remote endpoint addressed directly.
    RemoteHttp,
    /// Local process speaking over standard input/output.
    LocalStdio,
    /// Local sidecar process exposing a stdio server over HTTP.
    SidecarHttp,
}

/// Authentication scheme observed on a discovered server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthType {
    /// No authentication challenge.
    None,
    /// A static bearer token that any value satisfies.
    Token,
    /// Bearer enforcement on a managed adapter endpoint.
    Bearer,
    /// OAuth protected resource.
    Oauth,
    /// Some other challenge.
    Other,
    /// Could not be determined.
    Unknown,
}

impl std::fmt::Display for AuthType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AuthType::None => "none",
            AuthType::Token => "token",
            AuthType::Bearer => "bearer",
            AuthType::Oauth => "oauth",
            AuthType::Other => "other",
            AuthType::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// Coarse exposure rating of a server's authentication posture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VulnerabilityTier {
    /// Strong authentication.
    Low,
    /// Weak or unrecognised authentication.
    Medium,
    /// Unprotected.
    High,
}

/// Authentication type and vulnerability tier, always decided together.
///
/// The only way to build one is through the named constructors, each of
/// which fixes the tier that belongs to its authentication type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "RawPosture")]
pub struct AuthPosture {
    auth_type: AuthType,
    #[serde(rename = "vulnerability_score")]
    tier: VulnerabilityTier,
}

/// Wire form of [`AuthPosture`], checked before it becomes one.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawPosture {
    auth_type: AuthType,
    #[serde(rename = "vulnerability_score")]
    tier: VulnerabilityTier,
}

impl TryFrom<RawPosture> for AuthPosture {
    type Error = String;

    fn try_from(raw: RawPosture) -> Result<Self, Self::Error> {
        let posture = AuthPosture::for_auth_type(raw.auth_type);
        if posture.tier != raw.tier {
            return Err(format!(
                "vulnerability_score {:?} does not match authType {}",
                raw.tier, raw.auth_type
            ));
        }
        Ok(posture)
    }
}

impl AuthPosture {
    /// No challenge at all.
    pub fn unprotected() -> Self {
        Self { auth_type: AuthType::None, tier: VulnerabilityTier::High }
    }

    /// A bearer challenge that accepted an arbitrary token.
    pub fn static_token() -> Self {
        Self { auth_type: AuthType::Token, tier: VulnerabilityTier::Medium }
    }

    /// A managed adapter endpoint that enforces bearer credentials.
    pub fn enforced_bearer() -> Self {
        Self { auth_type: AuthType::Bearer, tier: VulnerabilityTier::Low }
    }

    /// An OAuth protected resource.
    pub fn oauth() -> Self {
        Self { auth_type: AuthType::Oauth, tier: VulnerabilityTier::Low }
    }

    /// A challenge of an unrecognised kind.
    pub fn other_challenge() -> Self {
        Self { auth_type: AuthType::Other, tier: VulnerabilityTier::Medium }
    }

    /// Enforcement on a managed adapter endpoint that could not be scored.
    pub fn undetermined() -> Self {
        Self { auth_type: AuthType::Unknown, tier: VulnerabilityTier::Medium }
    }

    /// The posture that goes with `auth_type`.
    pub fn for_auth_type(auth_type: AuthType) -> Self {
        match auth_type {
            AuthType::None => Self::unprotected(),
            AuthType::Token => Self::static_token(),
            AuthType::Bearer => Self::enforced_bearer(),
            AuthType::Oauth => Self::oauth(),
            AuthType::Other => Self::other_challenge(),
            AuthType::Unknown => Self::undetermined(),
        }
    }

    /// The observed authentication type.
    pub fn auth_type(&self) -> AuthType {
        self.auth_type
    }

    /// The vulnerability tier paired with [`Self::auth_type`].
    pub fn tier(&self) -> VulnerabilityTier {
        self.tier
    }
}

/// Health of a discovered server at detection time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerHealth {
    /// Responded to a probe with an MCP-shaped answer.
    Healthy,
}

/// An MCP endpoint found by a scan.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveredServer {
    /// Unique per detection event.
    pub id: String,
    /// Name reported in `serverInfo`, or one derived from the address.
    pub name: String,
    /// Scheme, host and port, e.g. `http://10.0.0.5:8080`.
    pub address: String,
    /// Always MCP once classified.
    pub protocol: ServerProtocol,
    /// Transport the positive probe used.
    pub connection: ConnectionKind,
    /// Health at detection time.
    pub status: ServerHealth,
    /// Last time a scan saw this server.
    pub last_seen: DateTime<Utc>,
    /// Detection method, auth type and other probe facts.
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    /// Authentication classification.
    #[serde(flatten)]
    pub posture: AuthPosture,
    /// Full URL the positive probe answered on, route path included.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    /// Stable identity of the physical server across scans. Set by the
    /// discovery cache.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
}

impl DiscoveredServer {
    /// Records a positive detection. The posture is mirrored into the metadata map.
    pub fn new(
        id: impl Into<String>,
        address: impl Into<String>,
        connection: ConnectionKind,
        posture: AuthPosture,
        detection_method: &str,
    ) -> Self {
        let address = address.into();
        let mut metadata = HashMap::new();
        metadata.insert("detectionMethod".to_string(), detection_method.to_string());
        metadata.insert("authType".to_string(), posture.auth_type().to_string());
        Self {
            id: id.into(),
            name: default_server_name(&address),
            address,
            protocol: ServerProtocol::Mcp,
            connection,
            status: ServerHealth::Healthy,
            last_seen: Utc::now(),
            metadata,
            posture,
            endpoint: None,
            fingerprint: None,
        }
    }

    /// URL to speak MCP on: the probed endpoint, else `address/mcp`.
    pub fn mcp_url(&self) -> String {
        match &self.endpoint {
            Some(endpoint) => endpoint.clone(),
            None => format!("{}/mcp", self.address.trim_end_matches('/')),
        }
    }

    /// Host and port portion of the address.
    pub fn host_port(&self) -> &str {
        self.address
            .split_once("://")
            .map_or(self.address.as_str(), |(_, rest)| rest)
            .trim_end_matches('/')
    }

    /// Port of the address, if one is present.
    pub fn port(&self) -> Option<u16> {
        self.host_port().rsplit_once(':').and_then(|(_, p)| p.parse().ok())
    }
}

fn default_server_name(address: &str) -> String {
    let host_port = address.split_once("://").map_or(address, |(_, rest)| rest);
    format!("mcp-{}", host_port.replace(['.', ':', '/'], "-"))
}
