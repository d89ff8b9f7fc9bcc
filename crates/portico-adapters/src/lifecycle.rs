use crate::runtime::SidecarRuntime;
use crate::store::AdapterStore;
use portico_core::{AdapterBackend, AdapterResource, AdapterUpdate, PorticoError, PorticoResult};
use portico_mcp::CapabilityDiscoverer;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

/// Result of `DeleteAdapter`. The record is always gone; teardown problems
/// are reported as warnings.
#[derive(Debug, Clone, Serialize)]
pub struct DeleteOutcome {
    pub deleted: bool,
    pub warnings: Vec<String>,
}

/// Result of restoring persisted sidecar adapters at startup.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RestoreOutcome {
    /// Adapters whose sidecar was relaunched.
    pub restored: Vec<String>,
    /// Adapters removed because their sidecar could not be relaunched.
    pub removed: Vec<String>,
}

/// Reads, updates, re-syncs and deletes adapters on behalf of their creator.
///
/// Adapters owned by someone else are reported as not found.
pub struct AdapterLifecycle {
    adapters: Arc<dyn AdapterStore>,
    discoverer: Arc<dyn CapabilityDiscoverer>,
    runtime: Option<Arc<dyn SidecarRuntime>>,
}

impl AdapterLifecycle {
    pub fn new(
        adapters: Arc<dyn AdapterStore>,
        discoverer: Arc<dyn CapabilityDiscoverer>,
        runtime: Option<Arc<dyn SidecarRuntime>>,
    ) -> Self {
        Self {
            adapters,
            discoverer,
            runtime,
        }
    }

    pub async fn get_adapter(&self, creator: &str, name: &str) -> PorticoResult<AdapterResource> {
        match self.adapters.get(name).await? {
            Some(adapter) if adapter.created_by == creator => Ok(adapter),
            _ => Err(PorticoError::NotFound(format!("adapter {name}"))),
        }
    }

    pub async fn list_adapters(&self, creator: &str) -> PorticoResult<Vec<AdapterResource>> {
        self.adapters.list(creator).await
    }

    /// Total adapters across all creators.
    pub async fn count(&self) -> PorticoResult<usize> {
        Ok(self.adapters.list_all().await?.len())
    }

    pub async fn update_adapter(
        &self,
        creator: &str,
        name: &str,
        update: AdapterUpdate,
    ) -> PorticoResult<AdapterResource> {
        let mut adapter = self.get_adapter(creator, name).await?;
        update.apply_to(&mut adapter);
        self.adapters.update(&adapter).await?;
        info!(adapter = %name, "Adapter updated");
        Ok(adapter)
    }

    /// Re-runs capability discovery against the adapter's live endpoint.
    pub async fn sync_adapter_capabilities(
        &self,
        creator: &str,
        name: &str,
    ) -> PorticoResult<AdapterResource> {
        let mut adapter = self.get_adapter(creator, name).await?;
        let endpoint = adapter
            .live_endpoint()
            .ok_or_else(|| {
                PorticoError::Validation(format!("adapter {name} has no live endpoint yet"))
            })?
            .to_string();

        let snapshot = self
            .discoverer
            .discover(&endpoint, &adapter.authentication)
            .await?;
        info!(
            adapter = %name,
            tools = snapshot.tools.len(),
            resources = snapshot.resources.len(),
            prompts = snapshot.prompts.len(),
            "Adapter capabilities synced"
        );
        adapter.capabilities = Some(snapshot);
        adapter.touch();
        self.adapters.update(&adapter).await?;
        Ok(adapter)
    }

    /// Relaunches the sidecar of every persisted sidecar adapter.
    ///
    /// Sidecars do not outlive the process that started them, so after a
    /// restart each record points at a dead endpoint. A record whose sidecar
    /// cannot be relaunched is deleted.
    pub async fn restore_sidecars(&self) -> PorticoResult<RestoreOutcome> {
        let mut outcome = RestoreOutcome::default();
        for mut adapter in self.adapters.list_all().await? {
            let Some(spec) = adapter.sidecar().cloned() else {
                continue;
            };
            let name = adapter.name.clone();

            let deployed = match &self.runtime {
                Some(runtime) => {
                    runtime
                        .deploy(&name, &spec, &adapter.environment_variables)
                        .await
                }
                None => Err(PorticoError::Deployment(
                    "no sidecar runtime is configured".into(),
                )),
            };
            let deployment = match deployed {
                Ok(deployment) => deployment,
                Err(e) => {
                    warn!(adapter = %name, error = %e, "Sidecar could not be restored, removing adapter");
                    self.adapters.delete(&name).await?;
                    outcome.removed.push(name);
                    continue;
                }
            };

            if let AdapterBackend::Sidecar { spec, endpoint } = &mut adapter.backend {
                spec.port = deployment.port;
                *endpoint = Some(deployment.endpoint.clone());
            }
            adapter.touch();
            if let Err(e) = self.adapters.update(&adapter).await {
                if let Some(runtime) = &self.runtime {
                    if let Err(cleanup) = runtime.cleanup(&name).await {
                        warn!(adapter = %name, error = %cleanup, "Rollback teardown failed");
                    }
                }
                return Err(e);
            }
            info!(
                adapter = %name,
                port = deployment.port,
                endpoint = %deployment.endpoint,
                "Sidecar restored"
            );
            outcome.restored.push(name);
        }
        Ok(outcome)
    }

    /// Tears down the sidecar (best effort) and removes the record.
    pub async fn delete_adapter(&self, creator: &str, name: &str) -> PorticoResult<DeleteOutcome> {
        let adapter = self.get_adapter(creator, name).await?;
        let mut warnings = Vec::new();

        if adapter.sidecar().is_some() {
            let teardown = match &self.runtime {
                Some(runtime) => runtime.cleanup(name).await,
                None => Err(PorticoError::Deployment(
                    "no sidecar runtime is configured".into(),
                )),
            };
            if let Err(e) = teardown {
                warn!(adapter = %name, error = %e, "Sidecar teardown failed, deleting record anyway");
                warnings.push(format!("sidecar teardown failed: {e}"));
            }
        }

        self.adapters.delete(name).await?;
        info!(adapter = %name, warnings = warnings.len(), "Adapter deleted");
        Ok(DeleteOutcome {
            deleted: true,
            warnings,
        })
    }
}
