use async_trait::async_trait;
use portico_core::{AdapterResource, PorticoError, PorticoResult};
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;

/// Longest accepted adapter name.
pub const MAX_ADAPTER_NAME_LEN: usize = 63;

/// Adapter names double as file names and URL path segments.
pub fn validate_adapter_name(name: &str) -> PorticoResult<()> {
    let valid_chars = name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    let starts_alnum = name.chars().next().is_some_and(|c| c.is_ascii_alphanumeric());
    if name.is_empty() || name.len() > MAX_ADAPTER_NAME_LEN || !valid_chars || !starts_alnum {
        return Err(PorticoError::Validation(format!(
            "invalid adapter name {name:?}: use 1-{MAX_ADAPTER_NAME_LEN} letters, digits, '-' or '_', starting with a letter or digit"
        )));
    }
    Ok(())
}

/// Persistence for adapter records, keyed by adapter name.
#[async_trait]
pub trait AdapterStore: Send + Sync {
    async fn get(&self, name: &str) -> PorticoResult<Option<AdapterResource>>;
    /// Fails with `Conflict` when the name is taken.
    async fn create(&self, adapter: &AdapterResource) -> PorticoResult<()>;
    /// Fails with `NotFound` when the record does not exist.
    async fn update(&self, adapter: &AdapterResource) -> PorticoResult<()>;
    /// Removing a missing record is not an error.
    async fn delete(&self, name: &str) -> PorticoResult<()>;
    /// Adapters created by `creator`.
    async fn list(&self, creator: &str) -> PorticoResult<Vec<AdapterResource>>;
    async fn list_all(&self) -> PorticoResult<Vec<AdapterResource>>;
}

// ---------------------------------------------------------------------------
// InMemoryAdapterStore
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct InMemoryAdapterStore {
    adapters: RwLock<HashMap<String, AdapterResource>>,
}

impl InMemoryAdapterStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AdapterStore for InMemoryAdapterStore {
    async fn get(&self, name: &str) -> PorticoResult<Option<AdapterResource>> {
        Ok(self.adapters.read().await.get(name).cloned())
    }

    async fn create(&self, adapter: &AdapterResource) -> PorticoResult<()> {
        let mut adapters = self.adapters.write().await;
        if adapters.contains_key(&adapter.name) {
            return Err(PorticoError::Conflict(format!(
                "adapter {} already exists",
                adapter.name
            )));
        }
        adapters.insert(adapter.name.clone(), adapter.clone());
        Ok(())
    }

    async fn update(&self, adapter: &AdapterResource) -> PorticoResult<()> {
        let mut adapters = self.adapters.write().await;
        match adapters.get_mut(&adapter.name) {
            Some(existing) => {
                *existing = adapter.clone();
                Ok(())
            }
            None => Err(PorticoError::NotFound(format!("adapter {}", adapter.name))),
        }
    }

    async fn delete(&self, name: &str) -> PorticoResult<()> {
        self.adapters.write().await.remove(name);
        Ok(())
    }

    async fn list(&self, creator: &str) -> PorticoResult<Vec<AdapterResource>> {
        Ok(sorted(
            self.adapters
                .read()
                .await
                .values()
                .filter(|a| a.created_by == creator)
                .cloned()
                .collect(),
        ))
    }

    async fn list_all(&self) -> PorticoResult<Vec<AdapterResource>> {
        Ok(sorted(self.adapters.read().await.values().cloned().collect()))
    }
}

fn sorted(mut adapters: Vec<AdapterResource>) -> Vec<AdapterResource> {
    adapters.sort_by(|a, b| a.name.cmp(&b.name));
    adapters
}

// ---------------------------------------------------------------------------
// FileAdapterStore
// ---------------------------------------------------------------------------

/// One pretty-printed JSON file per adapter.
pub struct FileAdapterStore {
    dir: PathBuf,
}

impl FileAdapterStore {
    pub async fn new(dir: PathBuf) -> PorticoResult<Self> {
        tokio::fs::create_dir_all(&dir).await?;
        Ok(Self { dir })
    }

    fn adapter_path(&self, name: &str) -> PorticoResult<PathBuf> {
        validate_adapter_name(name)?;
        Ok(self.dir.join(format!("{name}.json")))
    }

    async fn read_file(&self, path: PathBuf) -> PorticoResult<AdapterResource> {
        let data = tokio::fs::read_to_string(&path).await?;
        serde_json::from_str(&data).map_err(|e| {
            PorticoError::Store(format!("Failed to parse adapter {}: {e}", path.display()))
        })
    }
}

#[async_trait]
impl AdapterStore for FileAdapterStore {
    async fn get(&self, name: &str) -> PorticoResult<Option<AdapterResource>> {
        let path = self.adapter_path(name)?;
        if !path.exists() {
            return Ok(None);
        }
        self.read_file(path).await.map(Some)
    }

    async fn create(&self, adapter: &AdapterResource) -> PorticoResult<()> {
        let path = self.adapter_path(&adapter.name)?;
        let json = serde_json::to_string_pretty(adapter)?;
        let mut file = match tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
        {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                return Err(PorticoError::Conflict(format!(
                    "adapter {} already exists",
                    adapter.name
                )));
            }
            Err(e) => return Err(e.into()),
        };
        file.write_all(json.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }

    async fn update(&self, adapter: &AdapterResource) -> PorticoResult<()> {
        let path = self.adapter_path(&adapter.name)?;
        if !path.exists() {
            return Err(PorticoError::NotFound(format!("adapter {}", adapter.name)));
        }
        let json = serde_json::to_string_pretty(adapter)?;
        tokio::fs::write(path, json).await?;
        Ok(())
    }

    async fn delete(&self, name: &str) -> PorticoResult<()> {
        let path = self.adapter_path(name)?;
        if path.exists() {
            tokio::fs::remove_file(path).await?;
        }
        Ok(())
    }

    async fn list(&self, creator: &str) -> PorticoResult<Vec<AdapterResource>> {
        let all = self.list_all().await?;
        Ok(all.into_iter().filter(|a| a.created_by == creator).collect())
    }

    async fn list_all(&self) -> PorticoResult<Vec<AdapterResource>> {
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        let mut adapters = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("json") {
                adapters.push(self.read_file(path).await?);
            }
        }
        Ok(sorted(adapters))
    }
}
