use async_trait::async_trait;
use portico_core::{McpServer, PorticoError, PorticoResult};
use std::collections::HashMap;
use std::path::Path;
use tokio::sync::RwLock;
use tracing::info;

/// Read/write access to catalog entries.
///
/// Implementations set `transport_requirement` at ingestion time so that
/// provisioning never has to guess it.
#[async_trait]
pub trait CatalogStore: Send + Sync {
    async fn get_by_id(&self, id: &str) -> PorticoResult<McpServer>;
    async fn list_all(&self) -> PorticoResult<Vec<McpServer>>;
    async fn create(&self, entry: McpServer) -> PorticoResult<McpServer>;
    async fn update(&self, entry: McpServer) -> PorticoResult<McpServer>;
    async fn delete(&self, id: &str) -> PorticoResult<()>;
}

/// Fills in the transport requirement when the entry does not declare one.
pub fn ingest(mut entry: McpServer) -> PorticoResult<McpServer> {
    if entry.id.trim().is_empty() {
        return Err(PorticoError::Validation("catalog entry id is required".into()));
    }
    if entry.name.trim().is_empty() {
        return Err(PorticoError::Validation(format!(
            "catalog entry {} has no name",
            entry.id
        )));
    }
    if entry.transport_requirement.is_none() {
        entry.transport_requirement = Some(entry.derive_transport_requirement());
    }
    Ok(entry)
}

/// Reads a JSON array of catalog entries.
pub async fn load_catalog_file(path: &Path) -> PorticoResult<Vec<McpServer>> {
    let data = tokio::fs::read_to_string(path).await?;
    let entries: Vec<McpServer> = serde_json::from_str(&data).map_err(|e| {
        PorticoError::Config(format!("Failed to parse catalog {}: {e}", path.display()))
    })?;
    entries.into_iter().map(ingest).collect()
}

#[derive(Default)]
pub struct InMemoryCatalogStore {
    entries: RwLock<HashMap<String, McpServer>>,
}

impl InMemoryCatalogStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a store; later duplicates of an id replace earlier ones.
    pub fn from_entries(entries: Vec<McpServer>) -> PorticoResult<Self> {
        let mut map = HashMap::new();
        for entry in entries {
            let entry = ingest(entry)?;
            map.insert(entry.id.clone(), entry);
        }
        info!(entries = map.len(), "Catalog loaded");
        Ok(Self {
            entries: RwLock::new(map),
        })
    }
}

#[async_trait]
impl CatalogStore for InMemoryCatalogStore {
    async fn get_by_id(&self, id: &str) -> PorticoResult<McpServer> {
        self.entries
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| PorticoError::NotFound(format!("catalog entry {id}")))
    }

    async fn list_all(&self) -> PorticoResult<Vec<McpServer>> {
        let mut entries: Vec<McpServer> = self.entries.read().await.values().cloned().collect();
        entries.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(entries)
    }

    async fn create(&self, entry: McpServer) -> PorticoResult<McpServer> {
        let entry = ingest(entry)?;
        let mut entries = self.entries.write().await;
        if entries.contains_key(&entry.id) {
            return Err(PorticoError::Conflict(format!(
                "catalog entry {} already exists",
                entry.id
            )));
        }
        entries.insert(entry.id.clone(), entry.clone());
        Ok(entry)
    }

    async fn update(&self, entry: McpServer) -> PorticoResult<McpServer> {
        let entry = ingest(entry)?;
        let mut entries = self.entries.write().await;
        match entries.get_mut(&entry.id) {
            Some(existing) => {
                *existing = entry.clone();
                Ok(entry)
            }
            None => Err(PorticoError::NotFound(format!("catalog entry {}", entry.id))),
        }
    }

    async fn delete(&self, id: &str) -> PorticoResult<()> {
        self.entries
            .write()
            .await
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| PorticoError::NotFound(format!("catalog entry {id}")))
    }
}
