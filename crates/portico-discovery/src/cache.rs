//! Fingerprint-keyed cache of discovered servers.

use portico_core::DiscoveredServer;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Stable identity of a server across scans: host, port and protocol.
pub fn fingerprint(server: &DiscoveredServer) -> String {
    let host_port = server.host_port();
    let (host, port) = host_port.rsplit_once(':').unwrap_or((host_port, ""));
    let protocol = serde_json::to_value(server.protocol)
        .ok()
        .and_then(|v| v.as_str().map(str::to_string))
        .unwrap_or_default();
    let digest = Sha256::digest(format!("{host}|{port}|{protocol}").as_bytes());
    hex::encode(digest)
}

/// Process-wide view of every server any scan has found.
///
/// Entries are keyed by [`fingerprint`], so re-detecting a server replaces
/// its record instead of adding one. Each record keeps the id of the
/// detection that produced it and carries the fingerprint as its stable key.
#[derive(Default)]
pub struct DiscoveredCache {
    entries: RwLock<HashMap<String, DiscoveredServer>>,
}

impl DiscoveredCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or refreshes servers; returns them with their fingerprints set.
    pub async fn upsert_all(&self, servers: &[DiscoveredServer]) -> Vec<DiscoveredServer> {
        let mut entries = self.entries.write().await;
        servers
            .iter()
            .map(|server| {
                let key = fingerprint(server);
                let mut record = server.clone();
                record.fingerprint = Some(key.clone());
                entries.insert(key, record.clone());
                record
            })
            .collect()
    }

    /// All cached servers ordered by address.
    pub async fn list(&self) -> Vec<DiscoveredServer> {
        let mut servers: Vec<DiscoveredServer> =
            self.entries.read().await.values().cloned().collect();
        servers.sort_by(|a, b| a.address.cmp(&b.address));
        servers
    }

    /// Looks a server up by its fingerprint or by the id of its latest detection.
    pub async fn get(&self, key: &str) -> Option<DiscoveredServer> {
        let entries = self.entries.read().await;
        if let Some(server) = entries.get(key) {
            return Some(server.clone());
        }
        entries.values().find(|s| s.id == key).cloned()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}
