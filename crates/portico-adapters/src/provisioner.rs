//! Adapter provisioning.
//!
//! An adapter record exists in the store only while its backing resource
//! does: a reachable remote endpoint, or a sidecar the runtime confirmed as
//! deployed. Sidecar adapters are persisted before deployment and removed
//! again if deployment fails, before control returns to the caller.

use crate::catalog::CatalogStore;
use crate::resolver::{default_launch_spec, resolve_sidecar_spec};
use crate::runtime::SidecarRuntime;
use crate::store::{validate_adapter_name, AdapterStore};
use chrono::Utc;
use portico_core::{
    AdapterBackend, AdapterResource, AuthPolicy, McpServer, PorticoError, PorticoResult,
    TransportRequirement,
};
use portico_mcp::CapabilityDiscoverer;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Input of `CreateAdapter`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateAdapterRequest {
    /// Catalog entry id, or its name.
    #[serde(alias = "catalogRef")]
    pub mcp_server_id: String,
    /// Unique adapter name.
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub environment_variables: HashMap<String, String>,
    #[serde(default)]
    pub authentication: Option<AuthPolicy>,
}

/// Turns catalog entries into running adapters.
pub struct AdapterProvisioner {
    catalog: Arc<dyn CatalogStore>,
    adapters: Arc<dyn AdapterStore>,
    discoverer: Arc<dyn CapabilityDiscoverer>,
    runtime: Option<Arc<dyn SidecarRuntime>>,
}

impl AdapterProvisioner {
    pub fn new(
        catalog: Arc<dyn CatalogStore>,
        adapters: Arc<dyn AdapterStore>,
        discoverer: Arc<dyn CapabilityDiscoverer>,
        runtime: Option<Arc<dyn SidecarRuntime>>,
    ) -> Self {
        Self {
            catalog,
            adapters,
            discoverer,
            runtime,
        }
    }

    /// Looks an entry up by id, then by name.
    pub async fn resolve_entry(&self, reference: &str) -> PorticoResult<McpServer> {
        match self.catalog.get_by_id(reference).await {
            Ok(entry) => Ok(entry),
            Err(e) if e.is_not_found() => self
                .catalog
                .list_all()
                .await?
                .into_iter()
                .find(|entry| entry.name == reference)
                .ok_or_else(|| PorticoError::NotFound(format!("catalog entry {reference}"))),
            Err(e) => Err(e),
        }
    }

    /// The record `create_adapter_from_entry` would start from. No side effects.
    pub fn plan_adapter(
        &self,
        creator: &str,
        entry: &McpServer,
        request: &CreateAdapterRequest,
    ) -> PorticoResult<AdapterResource> {
        validate_adapter_name(&request.name)?;

        let backend = match entry.transport_requirement() {
            TransportRequirement::Direct => {
                let (url, transport) = entry.remote_endpoint().ok_or_else(|| {
                    PorticoError::Validation(format!(
                        "catalog entry {} has no remote endpoint",
                        entry.id
                    ))
                })?;
                AdapterBackend::Remote { url, transport }
            }
            TransportRequirement::SidecarRequired => {
                let spec = resolve_sidecar_spec(entry, &request.environment_variables)
                    .unwrap_or_else(|| {
                        info!(entry = %entry.id, "No sidecar metadata, using default launch spec");
                        default_launch_spec()
                    });
                AdapterBackend::Sidecar {
                    spec,
                    endpoint: None,
                }
            }
        };

        let now = Utc::now();
        Ok(AdapterResource {
            name: request.name.clone(),
            description: request
                .description
                .clone()
                .unwrap_or_else(|| entry.description.clone()),
            catalog_id: Some(entry.id.clone()),
            backend,
            environment_variables: request.environment_variables.clone(),
            authentication: request.authentication.clone().unwrap_or_default(),
            capabilities: None,
            created_by: creator.to_string(),
            created_at: now,
            last_updated_at: now,
        })
    }

    /// `CreateAdapter`: resolves the catalog reference and provisions the adapter.
    pub async fn create_adapter(
        &self,
        creator: &str,
        request: CreateAdapterRequest,
    ) -> PorticoResult<AdapterResource> {
        let entry = self.resolve_entry(&request.mcp_server_id).await?;
        self.create_adapter_from_entry(creator, &entry, request).await
    }

    /// Provisions an adapter for an already resolved entry.
    pub async fn create_adapter_from_entry(
        &self,
        creator: &str,
        entry: &McpServer,
        request: CreateAdapterRequest,
    ) -> PorticoResult<AdapterResource> {
        let mut adapter = self.plan_adapter(creator, entry, &request)?;
        if self.adapters.get(&adapter.name).await?.is_some() {
            return Err(PorticoError::Conflict(format!(
                "adapter {} already exists",
                adapter.name
            )));
        }

        match adapter.backend.clone() {
            AdapterBackend::Remote { url, .. } => {
                let snapshot = self
                    .discoverer
                    .discover(&url, &adapter.authentication)
                    .await?;
                adapter.capabilities = Some(snapshot);
                self.adapters.create(&adapter).await?;
                info!(
                    adapter = %adapter.name,
                    entry = %entry.id,
                    url = %url,
                    "Remote adapter created"
                );
                Ok(adapter)
            }
            AdapterBackend::Sidecar { .. } => self.provision_sidecar(adapter).await,
        }
    }

    async fn provision_sidecar(&self, mut adapter: AdapterResource) -> PorticoResult<AdapterResource> {
        self.adapters.create(&adapter).await?;

        let spec = match &adapter.backend {
            AdapterBackend::Sidecar { spec, .. } => spec.clone(),
            AdapterBackend::Remote { .. } => {
                return Err(PorticoError::Validation(format!(
                    "adapter {} has no sidecar",
                    adapter.name
                )))
            }
        };

        let deployed = match &self.runtime {
            Some(runtime) => {
                runtime
                    .deploy(&adapter.name, &spec, &adapter.environment_variables)
                    .await
            }
            None => Err(PorticoError::Deployment(
                "no sidecar runtime is configured".into(),
            )),
        };

        let deployment = match deployed {
            Ok(deployment) => deployment,
            Err(e) => {
                self.rollback(&adapter.name).await;
                return Err(match e {
                    PorticoError::Deployment(_) => e,
                    other => PorticoError::Deployment(other.to_string()),
                });
            }
        };

        if let AdapterBackend::Sidecar { spec, endpoint } = &mut adapter.backend {
            spec.port = deployment.port;
            *endpoint = Some(deployment.endpoint.clone());
        }

        match self
            .discoverer
            .discover(&deployment.endpoint, &adapter.authentication)
            .await
        {
            Ok(snapshot) => adapter.capabilities = Some(snapshot),
            Err(e) => warn!(
                adapter = %adapter.name,
                error = %e,
                "Sidecar capabilities not yet available; sync later"
            ),
        }
        adapter.touch();

        if let Err(e) = self.adapters.update(&adapter).await {
            if let Some(runtime) = &self.runtime {
                if let Err(cleanup) = runtime.cleanup(&adapter.name).await {
                    warn!(adapter = %adapter.name, error = %cleanup, "Sidecar cleanup failed");
                }
            }
            self.rollback(&adapter.name).await;
            return Err(PorticoError::Store(format!(
                "Failed to record deployment of {}: {e}",
                adapter.name
            )));
        }

        info!(
            adapter = %adapter.name,
            port = deployment.port,
            endpoint = %deployment.endpoint,
            "Sidecar adapter created"
        );
        Ok(adapter)
    }

    async fn rollback(&self, name: &str) {
        match self.adapters.delete(name).await {
            Ok(()) => warn!(adapter = %name, "Rolled back adapter record"),
            Err(e) => error!(adapter = %name, error = %e, "Rollback of adapter record failed"),
        }
    }
}
