//! Protocol prober: reachability check, two-phase MCP detection and
//! authentication classification.

use portico_core::{AuthPosture, ConnectionKind, DiscoveredServer, PorticoError, PorticoResult};
use portico_mcp::protocol::{
    event_stream_payloads, initialize_params, is_jsonrpc_envelope, server_name_from_body,
    JsonRpcRequest, STREAMABLE_ACCEPT,
};
use reqwest::header::{HeaderMap, ACCEPT, AUTHORIZATION, CACHE_CONTROL, CONTENT_TYPE, WWW_AUTHENTICATE};
use reqwest::{StatusCode, Url};
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tracing::debug;
use uuid::Uuid;

/// Token sent when checking whether a bearer challenge accepts any value.
pub const SYNTHETIC_TOKEN: &str = "portico-probe-token";

/// Bytes of response body inspected for a JSON-RPC envelope.
const BODY_PREFIX_LIMIT: usize = 4096;

/// Outcome of probing one target.
#[derive(Debug, Clone)]
pub struct ProbeOutcome {
    /// The probed target.
    pub address: String,
    /// Whether a TCP connection could be opened.
    pub reachable: bool,
    /// Time spent on the whole probe.
    pub response_time: Duration,
    /// Present only for MCP-positive targets.
    pub server: Option<DiscoveredServer>,
}

/// How a positive detection was made.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectionMethod {
    /// `GET` declaring `Accept: text/event-stream`.
    EventStream,
    /// `POST` of an `initialize` request.
    StreamableHttp,
}

impl DetectionMethod {
    /// Label stored in discovered-server metadata.
    pub fn as_str(self) -> &'static str {
        match self {
            DetectionMethod::EventStream => "event-stream",
            DetectionMethod::StreamableHttp => "streamable-http",
        }
    }

    fn connection(self) -> ConnectionKind {
        match self {
            DetectionMethod::EventStream => ConnectionKind::Sse,
            DetectionMethod::StreamableHttp => ConnectionKind::StreamableHttp,
        }
    }
}

/// A positive detection before it becomes a [`DiscoveredServer`].
#[derive(Debug, Clone)]
pub struct Detection {
    /// Which probe phase succeeded.
    pub method: DetectionMethod,
    /// Authentication classification.
    pub posture: AuthPosture,
    /// `serverInfo.name`, when the response carried one.
    pub server_name: Option<String>,
}

// --- Classification ---

/// True when a challenge advertises OAuth.
pub fn has_oauth_indicator(challenge: &str) -> bool {
    let lower = challenge.to_ascii_lowercase();
    lower.contains("oauth") || lower.contains("resource_metadata")
}

fn is_auth_rejection(status: StatusCode) -> bool {
    status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN
}

/// Classifies a direct origin server from an MCP-positive response.
///
/// `token_retry_accepted` is `Some(true)` when a bearer challenge was retried
/// with [`SYNTHETIC_TOKEN`] and the retry returned 200. Statuses other than
/// 200, 401 and 403 are treated as unprotected.
pub fn classify_direct(
    status: StatusCode,
    challenge: Option<&str>,
    token_retry_accepted: Option<bool>,
) -> AuthPosture {
    if is_auth_rejection(status) {
        if token_retry_accepted == Some(true) {
            AuthPosture::static_token()
        } else if challenge.is_some_and(has_oauth_indicator) {
            AuthPosture::oauth()
        } else {
            AuthPosture::other_challenge()
        }
    } else {
        AuthPosture::unprotected()
    }
}

/// Classifies a managed adapter endpoint by the enforcement it applies itself.
pub fn classify_adapter_route(status: StatusCode, challenge: Option<&str>) -> AuthPosture {
    if status == StatusCode::OK {
        AuthPosture::unprotected()
    } else if is_auth_rejection(status) {
        if challenge.is_some_and(|c| c.contains("Bearer")) {
            AuthPosture::enforced_bearer()
        } else {
            AuthPosture::other_challenge()
        }
    } else {
        AuthPosture::undetermined()
    }
}

/// True when the URL routes through a managed adapter rather than an origin.
pub fn is_adapter_route(url: &str) -> bool {
    url.contains("/adapters/") && url.contains("/mcp")
}

/// The MCP endpoint for a target: the target itself when it carries a path,
/// otherwise `target/mcp`.
pub fn mcp_endpoint(target: &str) -> PorticoResult<Url> {
    let mut url = Url::parse(target)
        .map_err(|e| PorticoError::Validation(format!("invalid probe target {target}: {e}")))?;
    if url.path() == "/" || url.path().is_empty() {
        url.set_path("/mcp");
    }
    Ok(url)
}

// --- Prober ---

/// Probes targets for MCP endpoints.
pub struct Prober {
    http: reqwest::Client,
}

impl Prober {
    /// Creates a prober that never follows redirects.
    pub fn new() -> PorticoResult<Self> {
        let http = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| PorticoError::Http(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self { http })
    }

    /// Probes one target. Never fails: errors count as a negative detection.
    pub async fn probe(&self, target: &str, timeout: Duration) -> ProbeOutcome {
        let started = Instant::now();
        let mut outcome = ProbeOutcome {
            address: target.to_string(),
            reachable: false,
            response_time: Duration::ZERO,
            server: None,
        };

        let endpoint = match mcp_endpoint(target) {
            Ok(url) => url,
            Err(e) => {
                debug!(target = %target, error = %e, "Skipping malformed target");
                return outcome;
            }
        };

        outcome.reachable = tcp_reachable(&endpoint, timeout).await;
        if !outcome.reachable {
            outcome.response_time = started.elapsed();
            return outcome;
        }

        let detection = match self.event_stream_probe(&endpoint, timeout).await {
            Some(d) => Some(d),
            None => self.streamable_probe(&endpoint, timeout).await,
        };
        outcome.response_time = started.elapsed();

        if let Some(detection) = detection {
            let address = base_address(&endpoint);
            let mut server = DiscoveredServer::new(
                Uuid::now_v7().to_string(),
                address,
                detection.method.connection(),
                detection.posture,
                detection.method.as_str(),
            );
            if let Some(name) = detection.server_name {
                server.name = name;
            }
            server.endpoint = Some(endpoint.to_string());
            server.metadata.insert(
                "responseTimeMs".to_string(),
                outcome.response_time.as_millis().to_string(),
            );
            if is_adapter_route(endpoint.as_str()) {
                server
                    .metadata
                    .insert("probePath".to_string(), "adapter".to_string());
            }
            debug!(
                target = %target,
                method = detection.method.as_str(),
                auth_type = %detection.posture.auth_type(),
                "MCP endpoint detected"
            );
            outcome.server = Some(server);
        }

        outcome
    }

    /// Phase one: a `GET` accepting an event stream. Conclusive only on 200.
    async fn event_stream_probe(&self, endpoint: &Url, timeout: Duration) -> Option<Detection> {
        let resp = self
            .http
            .get(endpoint.clone())
            .header(ACCEPT, "text/event-stream")
            .header(CACHE_CONTROL, "no-cache")
            .timeout(timeout)
            .send()
            .await
            .ok()?;

        if resp.status() != StatusCode::OK {
            return None;
        }

        let content_type = header_str(resp.headers(), CONTENT_TYPE).unwrap_or_default();
        let positive = if content_type.contains("text/event-stream") {
            true
        } else if content_type.contains("application/json") {
            let body = read_prefix(resp).await;
            is_jsonrpc_envelope(&body)
        } else {
            false
        };

        positive.then(|| Detection {
            method: DetectionMethod::EventStream,
            posture: AuthPosture::unprotected(),
            server_name: None,
        })
    }

    /// Phase two: `POST` an `initialize` request and classify the answer.
    ///
    /// A bearer rejection on a direct origin is retried with
    /// [`SYNTHETIC_TOKEN`]; an envelope in either answer makes the target
    /// MCP-positive.
    async fn streamable_probe(&self, endpoint: &Url, timeout: Duration) -> Option<Detection> {
        let resp = self.send_initialize(endpoint, timeout, None).await?;
        let status = resp.status();
        let challenge = header_str(resp.headers(), WWW_AUTHENTICATE);
        let body = read_prefix(resp).await;

        let mut positive = mcp_positive(&body);
        let mut server_name = extract_server_name(&body);

        let posture = if is_adapter_route(endpoint.as_str()) {
            classify_adapter_route(status, challenge.as_deref())
        } else {
            let bearer_rejection = is_auth_rejection(status)
                && challenge.as_deref().is_some_and(|c| c.contains("Bearer"));
            let retry = if bearer_rejection {
                let accepted = match self
                    .send_initialize(endpoint, timeout, Some(SYNTHETIC_TOKEN))
                    .await
                {
                    Some(retry) => {
                        let accepted = retry.status() == StatusCode::OK;
                        let retry_body = read_prefix(retry).await;
                        if accepted && mcp_positive(&retry_body) {
                            positive = true;
                            server_name = server_name.or_else(|| extract_server_name(&retry_body));
                        }
                        accepted
                    }
                    None => false,
                };
                Some(accepted)
            } else {
                None
            };
            classify_direct(status, challenge.as_deref(), retry)
        };

        positive.then(|| Detection {
            method: DetectionMethod::StreamableHttp,
            posture,
            server_name,
        })
    }

    async fn send_initialize(
        &self,
        endpoint: &Url,
        timeout: Duration,
        token: Option<&str>,
    ) -> Option<reqwest::Response> {
        let request = JsonRpcRequest::new(
            1,
            "initialize",
            Some(initialize_params("mcp-discovery", "1.0")),
        );
        let mut builder = self
            .http
            .post(endpoint.clone())
            .header(ACCEPT, STREAMABLE_ACCEPT)
            .json(&request)
            .timeout(timeout);
        if let Some(token) = token {
            builder = builder.header(AUTHORIZATION, format!("Bearer {token}"));
        }
        builder.send().await.ok()
    }
}

async fn tcp_reachable(endpoint: &Url, timeout: Duration) -> bool {
    let (Some(host), Some(port)) = (endpoint.host_str(), endpoint.port_or_known_default()) else {
        return false;
    };
    let authority = format!("{host}:{port}");
    matches!(
        tokio::time::timeout(timeout, TcpStream::connect(authority.as_str())).await,
        Ok(Ok(_))
    )
}

/// `scheme://host:port` of an endpoint.
fn base_address(endpoint: &Url) -> String {
    let host = endpoint.host_str().unwrap_or_default();
    match endpoint.port_or_known_default() {
        Some(port) => format!("{}://{host}:{port}", endpoint.scheme()),
        None => format!("{}://{host}", endpoint.scheme()),
    }
}

fn header_str(headers: &HeaderMap, name: reqwest::header::HeaderName) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

/// Reads at most [`BODY_PREFIX_LIMIT`] bytes, stopping early once an envelope is visible.
async fn read_prefix(mut resp: reqwest::Response) -> String {
    let mut buf: Vec<u8> = Vec::new();
    while let Ok(Some(chunk)) = resp.chunk().await {
        buf.extend_from_slice(&chunk);
        if buf.len() >= BODY_PREFIX_LIMIT || is_jsonrpc_envelope(&String::from_utf8_lossy(&buf)) {
            break;
        }
    }
    buf.truncate(BODY_PREFIX_LIMIT);
    String::from_utf8_lossy(&buf).into_owned()
}

/// A JSON body or any event-stream payload carrying a JSON-RPC envelope.
fn mcp_positive(body: &str) -> bool {
    is_jsonrpc_envelope(body)
        || event_stream_payloads(body)
            .iter()
            .any(|payload| is_jsonrpc_envelope(payload))
}

fn extract_server_name(body: &str) -> Option<String> {
    server_name_from_body(body).or_else(|| {
        event_stream_payloads(body)
            .iter()
            .find_map(|payload| server_name_from_body(payload))
    })
}
