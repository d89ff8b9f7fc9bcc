//! Adapter CRUD and registration of discovered servers.

use crate::error::{parse_body, ApiResult};
use crate::middleware::Creator;
use crate::server::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use portico_adapters::{CreateAdapterRequest, DeleteOutcome};
use portico_core::{
    AdapterResource, AdapterUpdate, AuthPolicy, ConnectionKind, DiscoveredServer, McpServer,
    Package, PackageTransport, PackageTransportKind, TransportRequirement,
};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

/// `POST /adapters`
pub async fn create_adapter(
    State(state): State<Arc<AppState>>,
    Creator(creator): Creator,
    body: String,
) -> ApiResult<(StatusCode, Json<AdapterResource>)> {
    let request: CreateAdapterRequest = parse_body(&body)?;
    let adapter = state.provisioner.create_adapter(&creator, request).await?;
    Ok((StatusCode::CREATED, Json(adapter)))
}

/// `GET /adapters`: the caller's adapters.
pub async fn list_adapters(
    State(state): State<Arc<AppState>>,
    Creator(creator): Creator,
) -> ApiResult<Json<Vec<AdapterResource>>> {
    Ok(Json(state.lifecycle.list_adapters(&creator).await?))
}

/// `GET /adapters/{name}`
pub async fn get_adapter(
    State(state): State<Arc<AppState>>,
    Creator(creator): Creator,
    Path(name): Path<String>,
) -> ApiResult<Json<AdapterResource>> {
    Ok(Json(state.lifecycle.get_adapter(&creator, &name).await?))
}

/// `PUT /adapters/{name}`
pub async fn update_adapter(
    State(state): State<Arc<AppState>>,
    Creator(creator): Creator,
    Path(name): Path<String>,
    body: String,
) -> ApiResult<Json<AdapterResource>> {
    let update: AdapterUpdate = parse_body(&body)?;
    Ok(Json(
        state.lifecycle.update_adapter(&creator, &name, update).await?,
    ))
}

/// `DELETE /adapters/{name}`
pub async fn delete_adapter(
    State(state): State<Arc<AppState>>,
    Creator(creator): Creator,
    Path(name): Path<String>,
) -> ApiResult<Json<DeleteOutcome>> {
    Ok(Json(state.lifecycle.delete_adapter(&creator, &name).await?))
}

/// `POST /adapters/{name}/sync`
pub async fn sync_adapter(
    State(state): State<Arc<AppState>>,
    Creator(creator): Creator,
    Path(name): Path<String>,
) -> ApiResult<Json<AdapterResource>> {
    Ok(Json(
        state
            .lifecycle
            .sync_adapter_capabilities(&creator, &name)
            .await?,
    ))
}

/// Body of `POST /register`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub discovered_server_id: String,
    /// Adapter name; derived from the server name when omitted.
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub authentication: Option<AuthPolicy>,
    #[serde(default)]
    pub environment_variables: HashMap<String, String>,
    /// Return the planned adapter without provisioning it.
    #[serde(default)]
    pub dry_run: bool,
}

/// `POST /register`: provisions an adapter for a cached discovered server.
pub async fn register_discovered(
    State(state): State<Arc<AppState>>,
    Creator(creator): Creator,
    body: String,
) -> ApiResult<Response> {
    let request: RegisterRequest = parse_body(&body)?;
    let server = state
        .supervisor
        .find_discovered(&request.discovered_server_id)
        .await?;

    let entry = catalog_entry_for(&server);
    let create = CreateAdapterRequest {
        mcp_server_id: entry.id.clone(),
        name: request
            .name
            .clone()
            .unwrap_or_else(|| adapter_name_for(&server)),
        description: request.description.clone(),
        environment_variables: request.environment_variables.clone(),
        authentication: request.authentication.clone(),
    };

    if request.dry_run {
        let adapter = state.provisioner.plan_adapter(&creator, &entry, &create)?;
        return Ok(Json(serde_json::json!({"dryRun": true, "adapter": adapter})).into_response());
    }

    let adapter = state
        .provisioner
        .create_adapter_from_entry(&creator, &entry, create)
        .await?;
    info!(
        server_id = %server.id,
        address = %server.address,
        adapter = %adapter.name,
        "Discovered server registered"
    );
    Ok((StatusCode::CREATED, Json(adapter)).into_response())
}

/// Catalog entry describing a discovered server as a direct remote.
pub fn catalog_entry_for(server: &DiscoveredServer) -> McpServer {
    let url = server.mcp_url();
    let kind = match server.connection {
        ConnectionKind::Sse => PackageTransportKind::Sse,
        _ => PackageTransportKind::StreamableHttp,
    };

    let mut entry = McpServer::new(format!("discovered-{}", server.id), server.name.clone());
    entry.description = format!("MCP server discovered at {}", server.address);
    entry.packages.push(Package {
        registry_type: "remote".into(),
        identifier: url.clone(),
        version: None,
        transport: PackageTransport { kind, url: None },
        environment_variables: Vec::new(),
    });
    entry.url = Some(url);
    entry.transport_requirement = Some(TransportRequirement::Direct);
    entry
}

/// Adapter-name-safe rendering of the server name.
fn adapter_name_for(server: &DiscoveredServer) -> String {
    let mut name = String::with_capacity(server.name.len());
    for c in server.name.chars() {
        if c.is_ascii_alphanumeric() || c == '_' {
            name.push(c.to_ascii_lowercase());
        } else if !name.ends_with('-') {
            name.push('-');
        }
    }
    let name = name.trim_matches(|c| c == '-' || c == '_');
    let name: String = name.chars().take(portico_adapters::MAX_ADAPTER_NAME_LEN).collect();
    if name.is_empty() {
        format!("discovered-{}", server.id.chars().take(8).collect::<String>())
    } else {
        name
    }
}
