//! `portico.toml` configuration.
//!
//! Every section is optional; a missing file yields the defaults.

use portico_adapters::ProcessRuntimeConfig;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug, Deserialize)]
pub struct PorticoConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// JSON array of catalog entries seeded at startup.
    #[serde(default)]
    pub catalog_path: Option<PathBuf>,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub discovery: DiscoveryConfig,
    #[serde(default)]
    pub sidecar: ProcessRuntimeConfig,
    #[serde(default)]
    pub security: SecurityConfig,
}

impl Default for PorticoConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            catalog_path: None,
            server: ServerConfig::default(),
            discovery: DiscoveryConfig::default(),
            sidecar: ProcessRuntimeConfig::default(),
            security: SecurityConfig::default(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct DiscoveryConfig {
    /// Per-probe timeout used by `portico scan` when `--timeout` is absent.
    #[serde(default = "default_probe_timeout")]
    pub default_timeout: String,
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    #[serde(default = "default_true")]
    pub exclude_self: bool,
    /// Port the gateway is reachable on from scanned networks, when it
    /// differs from `server.port` (e.g. behind NAT).
    #[serde(default)]
    pub advertised_port: Option<u16>,
    /// Extra `host:port` strings never scanned.
    #[serde(default)]
    pub self_addresses: Vec<String>,
    /// Timeout of capability handshakes.
    #[serde(default = "default_handshake_timeout")]
    pub handshake_timeout: String,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            default_timeout: default_probe_timeout(),
            max_concurrent: default_max_concurrent(),
            exclude_self: true,
            advertised_port: None,
            self_addresses: Vec::new(),
            handshake_timeout: default_handshake_timeout(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct SecurityConfig {
    #[serde(default)]
    pub api_keys: Vec<String>,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8911
}
fn default_probe_timeout() -> String {
    "5s".to_string()
}
fn default_max_concurrent() -> usize {
    10
}
fn default_true() -> bool {
    true
}
fn default_handshake_timeout() -> String {
    "10s".to_string()
}

/// Reads `path`, or returns the defaults when it does not exist.
pub async fn load_config(path: &Path) -> anyhow::Result<PorticoConfig> {
    if !tokio::fs::try_exists(path).await.unwrap_or(false) {
        info!(path = %path.display(), "Config file not found, using defaults");
        return Ok(PorticoConfig::default());
    }
    let raw = tokio::fs::read_to_string(path).await.map_err(|e| {
        anyhow::anyhow!("Failed to read config file '{}': {e}", path.display())
    })?;
    let config: PorticoConfig = toml::from_str(&raw)
        .map_err(|e| anyhow::anyhow!("Invalid config file '{}': {e}", path.display()))?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config: PorticoConfig = toml::from_str("").unwrap();
        assert_eq!(config.server.port, 8911);
        assert_eq!(config.data_dir, PathBuf::from("./data"));
        assert!(config.discovery.exclude_self);
        assert_eq!(config.sidecar.port_range_start, 8000);
        assert_eq!(config.sidecar.port_range_end, 9000);
        assert!(config.security.api_keys.is_empty());
    }

    #[test]
    fn test_sections_parse() {
        let config: PorticoConfig = toml::from_str(
            r#"
            data_dir = "/var/lib/portico"
            catalog_path = "catalog.json"

            [server]
            port = 9100

            [discovery]
            default_timeout = "2s"
            advertised_port = 443

            [sidecar]
            port_range_start = 18000
            port_range_end = 18100
            max_retries = 5

            [security]
            api_keys = ["k1", "k2"]
            "#,
        )
        .unwrap();
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 9100);
        assert_eq!(config.discovery.default_timeout, "2s");
        assert_eq!(config.discovery.advertised_port, Some(443));
        assert_eq!(config.discovery.max_concurrent, 10);
        assert_eq!(config.sidecar.max_retries, 5);
        assert_eq!(config.sidecar.port_range_start, 18000);
        assert_eq!(config.security.api_keys.len(), 2);
        assert_eq!(config.catalog_path, Some(PathBuf::from("catalog.json")));
    }

    #[tokio::test]
    async fn test_missing_file_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config(&dir.path().join("absent.toml")).await.unwrap();
        assert_eq!(config.server.port, 8911);

        let bad = dir.path().join("bad.toml");
        tokio::fs::write(&bad, "[server]\nport = \"nope\"").await.unwrap();
        assert!(load_config(&bad).await.is_err());
    }
}
