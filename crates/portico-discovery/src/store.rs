use async_trait::async_trait;
use portico_core::{PorticoResult, ScanJob};
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Persistence for finished scan jobs.
#[async_trait]
pub trait ScanResultStore: Send + Sync {
    async fn save(&self, job: &ScanJob) -> PorticoResult<()>;
    async fn get(&self, id: &str) -> PorticoResult<Option<ScanJob>>;
    async fn list(&self) -> PorticoResult<Vec<ScanJob>>;
}

/// In-process scan history. Lost on restart.
#[derive(Default)]
pub struct InMemoryScanStore {
    jobs: RwLock<HashMap<String, ScanJob>>,
}

impl InMemoryScanStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ScanResultStore for InMemoryScanStore {
    async fn save(&self, job: &ScanJob) -> PorticoResult<()> {
        self.jobs.write().await.insert(job.id.clone(), job.clone());
        Ok(())
    }

    async fn get(&self, id: &str) -> PorticoResult<Option<ScanJob>> {
        Ok(self.jobs.read().await.get(id).cloned())
    }

    async fn list(&self) -> PorticoResult<Vec<ScanJob>> {
        let mut jobs: Vec<ScanJob> = self.jobs.read().await.values().cloned().collect();
        jobs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(jobs)
    }
}
