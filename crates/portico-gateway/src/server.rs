use crate::adapters::{
    create_adapter, delete_adapter, get_adapter, list_adapters, register_discovered,
    sync_adapter, update_adapter,
};
use crate::middleware::{auth_middleware, AuthConfig};
use crate::scan::{cancel_scan, get_scan, list_scans, list_servers, start_scan};
use axum::{
    extract::State,
    middleware as axum_mw,
    routing::{get, post},
    Json, Router,
};
use portico_adapters::{AdapterLifecycle, AdapterProvisioner};
use portico_discovery::ScanSupervisor;
use std::sync::Arc;
use tracing::warn;

/// Shared application state.
pub struct AppState {
    pub supervisor: Arc<ScanSupervisor>,
    pub provisioner: Arc<AdapterProvisioner>,
    pub lifecycle: Arc<AdapterLifecycle>,
}

/// The main gateway server.
pub struct GatewayServer;

impl GatewayServer {
    /// Build the gateway without auth.
    pub fn build(state: Arc<AppState>) -> Router {
        Self::build_with_auth(state, AuthConfig::default())
    }

    /// Build the gateway with API-key auth on every route except `/health`.
    pub fn build_with_auth(state: Arc<AppState>, auth: AuthConfig) -> Router {
        let api = Router::new()
            .route("/scan", post(start_scan).get(list_scans))
            .route("/scan/{id}", get(get_scan).delete(cancel_scan))
            .route("/servers", get(list_servers))
            .route("/register", post(register_discovered))
            .route("/adapters", post(create_adapter).get(list_adapters))
            .route(
                "/adapters/{name}",
                get(get_adapter).put(update_adapter).delete(delete_adapter),
            )
            .route("/adapters/{name}/sync", post(sync_adapter));

        let api = if auth.is_enabled() {
            api.layer(axum_mw::from_fn_with_state(Arc::new(auth), auth_middleware))
        } else {
            api
        };

        api.route("/health", get(health_handler)).with_state(state)
    }
}

async fn health_handler(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let adapters = match state.lifecycle.count().await {
        Ok(n) => n,
        Err(e) => {
            warn!(error = %e, "Adapter count unavailable for health check");
            0
        }
    };
    Json(serde_json::json!({
        "status": "ok",
        "service": "portico",
        "activeScans": state.supervisor.active_count().await,
        "adapters": adapters,
    }))
}
