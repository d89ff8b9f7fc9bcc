use thiserror::Error;

/// A convenience `Result` alias using [`PorticoError`].
pub type PorticoResult<T> = Result<T, PorticoError>;

/// Top-level error type for the discovery and provisioning engine.
///
/// Each variant corresponds to a failure class. Provisioning failures use the
/// variant of the stage that failed so callers can tell them apart.
#[derive(Error, Debug)]
pub enum PorticoError {
    /// Malformed input rejected before any state change.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Unknown scan job, adapter, catalog entry or discovered server.
    #[error("Not found: {0}")]
    NotFound(String),

    /// A record with the same identity already exists.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// The MCP capability handshake against an endpoint failed.
    #[error("Capability discovery error: {0}")]
    Discovery(String),

    /// Sidecar deployment or teardown failed, or no sidecar runtime is configured.
    #[error("Deployment error: {0}")]
    Deployment(String),

    /// A persistence operation on a store failed.
    #[error("Store error: {0}")]
    Store(String),

    /// A network probe failed in a way that is not a negative detection.
    #[error("Probe error: {0}")]
    Probe(String),

    /// An outbound HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(String),

    /// An error in configuration parsing or validation.
    #[error("Config error: {0}")]
    Config(String),

    /// A JSON serialization or deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A standard I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl PorticoError {
    /// Returns true for the typed "not found" condition.
    pub fn is_not_found(&self) -> bool {
        matches!(self, PorticoError::NotFound(_))
    }
}
