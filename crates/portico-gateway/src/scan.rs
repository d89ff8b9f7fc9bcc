//! Scan control and the discovered-server cache.

use crate::error::{parse_body, ApiResult};
use crate::server::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use portico_core::{DiscoveredServer, ScanConfig, ScanJob};
use std::sync::Arc;
use tracing::info;

/// `POST /scan`: validates the config and starts a background job.
pub async fn start_scan(
    State(state): State<Arc<AppState>>,
    body: String,
) -> ApiResult<(StatusCode, Json<serde_json::Value>)> {
    let config: ScanConfig = parse_body(&body)?;
    let job = state.supervisor.start_scan(config).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(serde_json::json!({"scanId": job.id, "status": job.status})),
    ))
}

/// `GET /scan`
pub async fn list_scans(State(state): State<Arc<AppState>>) -> ApiResult<Json<Vec<ScanJob>>> {
    Ok(Json(state.supervisor.list_scans().await?))
}

/// `GET /scan/{id}`
pub async fn get_scan(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<ScanJob>> {
    Ok(Json(state.supervisor.get_scan(&id).await?))
}

/// `DELETE /scan/{id}`: signals cancellation. The job stays `running`
/// with `cancelledAt` set.
pub async fn cancel_scan(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<ScanJob>> {
    let job = state.supervisor.cancel_scan(&id).await?;
    info!(scan_id = %id, "Scan cancellation requested over HTTP");
    Ok(Json(job))
}

/// `GET /servers`
pub async fn list_servers(State(state): State<Arc<AppState>>) -> Json<Vec<DiscoveredServer>> {
    Json(state.supervisor.list_discovered().await)
}
