#![allow(clippy::unwrap_used, clippy::expect_used)]

//! Integration tests for the portico-adapters crate.
//!
//! Covers: AdapterProvisioner (direct and sidecar paths, rollback),
//! AdapterLifecycle (ownership, delete, update, sync, restart restore),
//! FileAdapterStore, and HttpCapabilityDiscoverer against a wiremock remote.

use async_trait::async_trait;
use chrono::Utc;
use portico_adapters::{
    AdapterLifecycle, AdapterProvisioner, AdapterStore, CatalogStore, CreateAdapterRequest,
    FileAdapterStore, InMemoryAdapterStore, InMemoryCatalogStore, ProcessRuntimeConfig,
    ProcessSidecarRuntime, SidecarDeployment, SidecarRuntime,
};
use portico_core::{
    AdapterBackend, AdapterResource, AdapterUpdate, AuthPolicy, CapabilitySnapshot,
    ConnectionKind, McpServer, Package, PackageTransport, PackageTransportKind, PorticoError,
    PorticoResult, RuntimeFamily, ServerIdentity, SidecarSpec, ToolDescriptor,
};
use portico_mcp::{CapabilityDiscoverer, HttpCapabilityDiscoverer};
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

// ---------------------------------------------------------------------------
// Test doubles
// ---------------------------------------------------------------------------

fn snapshot(name: &str) -> CapabilitySnapshot {
    CapabilitySnapshot {
        server_info: ServerIdentity {
            name: name.into(),
            version: "1.0.0".into(),
            protocol_version: "2024-11-05".into(),
        },
        tools: vec![ToolDescriptor {
            name: "echo".into(),
            description: String::new(),
            input_schema: json!({"type": "object"}),
        }],
        resources: vec![],
        prompts: vec![],
        last_refreshed: Utc::now(),
    }
}

/// Records every endpoint it is asked about; fails when told to.
#[derive(Default)]
struct StubDiscoverer {
    fail: bool,
    endpoints: Mutex<Vec<String>>,
}

impl StubDiscoverer {
    fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    fn endpoints(&self) -> Vec<String> {
        self.endpoints.lock().unwrap().clone()
    }
}

#[async_trait]
impl CapabilityDiscoverer for StubDiscoverer {
    async fn discover(&self, endpoint: &str, _auth: &AuthPolicy) -> PorticoResult<CapabilitySnapshot> {
        self.endpoints.lock().unwrap().push(endpoint.to_string());
        if self.fail {
            return Err(PorticoError::Discovery(format!("{endpoint} refused the handshake")));
        }
        Ok(snapshot("stub"))
    }
}

#[derive(Default)]
struct StubRuntime {
    fail_deploy: bool,
    fail_cleanup: bool,
    deploys: AtomicUsize,
    cleanups: AtomicUsize,
}

#[async_trait]
impl SidecarRuntime for StubRuntime {
    async fn deploy(
        &self,
        _adapter_id: &str,
        _spec: &SidecarSpec,
        _env: &HashMap<String, String>,
    ) -> PorticoResult<SidecarDeployment> {
        self.deploys.fetch_add(1, Ordering::SeqCst);
        if self.fail_deploy {
            return Err(PorticoError::Deployment("image pull failed".into()));
        }
        Ok(SidecarDeployment {
            port: 8042,
            endpoint: "http://127.0.0.1:8042/mcp".into(),
        })
    }

    async fn cleanup(&self, adapter_id: &str) -> PorticoResult<()> {
        self.cleanups.fetch_add(1, Ordering::SeqCst);
        if self.fail_cleanup {
            return Err(PorticoError::Deployment(format!("{adapter_id}: container is stuck")));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

fn remote_entry(url: &str) -> McpServer {
    let mut entry = McpServer::new("remote-weather", "weather");
    entry.url = Some(url.to_string());
    entry.packages.push(Package {
        registry_type: "remote".into(),
        identifier: url.to_string(),
        version: None,
        transport: PackageTransport {
            kind: PackageTransportKind::StreamableHttp,
            url: None,
        },
        environment_variables: vec![],
    });
    entry
}

fn stdio_entry() -> McpServer {
    let mut entry = McpServer::new("fs-server", "filesystem");
    entry.packages.push(Package {
        registry_type: "npm".into(),
        identifier: "@modelcontextprotocol/server-filesystem".into(),
        version: None,
        transport: PackageTransport {
            kind: PackageTransportKind::Stdio,
            url: None,
        },
        environment_variables: vec![],
    });
    entry.meta.insert(
        "sidecarConfig".into(),
        json!({"commandType": "npx", "command": "npx", "args": ["-y", "@modelcontextprotocol/server-filesystem", "{{root}}"]}),
    );
    entry
}

struct Harness {
    store: Arc<InMemoryAdapterStore>,
    discoverer: Arc<StubDiscoverer>,
    runtime: Option<Arc<StubRuntime>>,
    provisioner: AdapterProvisioner,
    lifecycle: AdapterLifecycle,
}

async fn harness(
    entries: Vec<McpServer>,
    discoverer: StubDiscoverer,
    runtime: Option<StubRuntime>,
) -> Harness {
    let catalog = Arc::new(InMemoryCatalogStore::new());
    for entry in entries {
        catalog.create(entry).await.unwrap();
    }
    let store = Arc::new(InMemoryAdapterStore::new());
    let discoverer = Arc::new(discoverer);
    let runtime = runtime.map(Arc::new);
    let dyn_runtime = runtime.clone().map(|r| r as Arc<dyn SidecarRuntime>);

    Harness {
        provisioner: AdapterProvisioner::new(
            catalog,
            store.clone(),
            discoverer.clone(),
            dyn_runtime.clone(),
        ),
        lifecycle: AdapterLifecycle::new(store.clone(), discoverer.clone(), dyn_runtime),
        store,
        discoverer,
        runtime,
    }
}

fn request(catalog_ref: &str, name: &str) -> CreateAdapterRequest {
    CreateAdapterRequest {
        mcp_server_id: catalog_ref.into(),
        name: name.into(),
        ..CreateAdapterRequest::default()
    }
}

// ---------------------------------------------------------------------------
// 1. Direct adapters
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_direct_adapter_never_touches_sidecars() {
    let h = harness(
        vec![remote_entry("https://mcp.example/mcp")],
        StubDiscoverer::default(),
        Some(StubRuntime::default()),
    )
    .await;

    let adapter = h
        .provisioner
        .create_adapter("alice", request("remote-weather", "weather"))
        .await
        .unwrap();

    assert!(adapter.sidecar().is_none());
    assert_eq!(adapter.connection_kind(), ConnectionKind::StreamableHttp);
    assert_eq!(adapter.live_endpoint(), Some("https://mcp.example/mcp"));
    assert_eq!(adapter.capabilities.as_ref().unwrap().tools[0].name, "echo");
    assert_eq!(h.discoverer.endpoints(), vec!["https://mcp.example/mcp"]);
    assert_eq!(h.runtime.as_ref().unwrap().deploys.load(Ordering::SeqCst), 0);
    assert!(h.store.get("weather").await.unwrap().is_some());
}

#[tokio::test]
async fn test_direct_discovery_failure_persists_nothing() {
    let h = harness(
        vec![remote_entry("https://mcp.example/mcp")],
        StubDiscoverer::failing(),
        None,
    )
    .await;

    let err = h
        .provisioner
        .create_adapter("alice", request("remote-weather", "weather"))
        .await
        .unwrap_err();
    assert!(matches!(err, PorticoError::Discovery(_)));
    assert!(h.store.get("weather").await.unwrap().is_none());
}

#[tokio::test]
async fn test_catalog_reference_falls_back_to_name() {
    let h = harness(
        vec![remote_entry("https://mcp.example/mcp")],
        StubDiscoverer::default(),
        None,
    )
    .await;

    let adapter = h
        .provisioner
        .create_adapter("alice", request("weather", "by-name"))
        .await
        .unwrap();
    assert_eq!(adapter.catalog_id.as_deref(), Some("remote-weather"));

    let err = h
        .provisioner
        .create_adapter("alice", request("nothing-like-it", "x"))
        .await
        .unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn test_duplicate_name_conflicts() {
    let h = harness(
        vec![remote_entry("https://mcp.example/mcp")],
        StubDiscoverer::default(),
        None,
    )
    .await;
    h.provisioner
        .create_adapter("alice", request("remote-weather", "weather"))
        .await
        .unwrap();
    let err = h
        .provisioner
        .create_adapter("bob", request("remote-weather", "weather"))
        .await
        .unwrap_err();
    assert!(matches!(err, PorticoError::Conflict(_)));
}

#[tokio::test]
async fn test_invalid_adapter_name_rejected() {
    let h = harness(
        vec![remote_entry("https://mcp.example/mcp")],
        StubDiscoverer::default(),
        None,
    )
    .await;
    let err = h
        .provisioner
        .create_adapter("alice", request("remote-weather", "../escape"))
        .await
        .unwrap_err();
    assert!(matches!(err, PorticoError::Validation(_)));
}

// ---------------------------------------------------------------------------
// 2. Sidecar adapters
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_failed_deployment_leaves_no_record() {
    let h = harness(
        vec![stdio_entry()],
        StubDiscoverer::default(),
        Some(StubRuntime {
            fail_deploy: true,
            ..StubRuntime::default()
        }),
    )
    .await;

    let err = h
        .provisioner
        .create_adapter("alice", request("fs-server", "files"))
        .await
        .unwrap_err();
    assert!(matches!(err, PorticoError::Deployment(_)));
    assert!(h.store.get("files").await.unwrap().is_none());
    assert!(h.lifecycle.get_adapter("alice", "files").await.unwrap_err().is_not_found());
    // never queried an address that does not exist
    assert!(h.discoverer.endpoints().is_empty());
}

#[tokio::test]
async fn test_missing_runtime_is_deployment_failure() {
    let h = harness(vec![stdio_entry()], StubDiscoverer::default(), None).await;

    let err = h
        .provisioner
        .create_adapter("alice", request("fs-server", "files"))
        .await
        .unwrap_err();
    assert!(matches!(err, PorticoError::Deployment(_)));
    assert!(h.store.list_all().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_sidecar_adapter_records_runtime_port_and_capabilities() {
    let h = harness(
        vec![stdio_entry()],
        StubDiscoverer::default(),
        Some(StubRuntime::default()),
    )
    .await;

    let mut req = request("fs-server", "files");
    req.environment_variables.insert("root".into(), "/srv/data".into());
    let adapter = h.provisioner.create_adapter("alice", req).await.unwrap();

    assert_eq!(adapter.connection_kind(), ConnectionKind::SidecarHttp);
    let spec = adapter.sidecar().unwrap();
    assert_eq!(spec.port, 8042);
    assert_eq!(spec.args.last().unwrap(), "/srv/data");
    assert_eq!(adapter.live_endpoint(), Some("http://127.0.0.1:8042/mcp"));
    assert!(adapter.capabilities.is_some());
    assert_eq!(h.discoverer.endpoints(), vec!["http://127.0.0.1:8042/mcp"]);

    let stored = h.store.get("files").await.unwrap().unwrap();
    assert_eq!(stored, adapter);
}

#[tokio::test]
async fn test_sidecar_discovery_failure_keeps_unrefreshed_adapter() {
    let h = harness(
        vec![stdio_entry()],
        StubDiscoverer::failing(),
        Some(StubRuntime::default()),
    )
    .await;

    let adapter = h
        .provisioner
        .create_adapter("alice", request("fs-server", "files"))
        .await
        .unwrap();
    assert!(adapter.capabilities.is_none());
    assert!(h.store.get("files").await.unwrap().is_some());
}

#[tokio::test]
async fn test_sidecar_without_metadata_uses_default_spec() {
    let mut entry = stdio_entry();
    entry.meta.clear();
    let h = harness(vec![entry], StubDiscoverer::default(), Some(StubRuntime::default())).await;

    let adapter = h
        .provisioner
        .create_adapter("alice", request("fs-server", "files"))
        .await
        .unwrap();
    assert_eq!(
        adapter.sidecar().unwrap().command_line(),
        "npx -y @modelcontextprotocol/server-everything"
    );
}

// ---------------------------------------------------------------------------
// 3. Lifecycle
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_delete_removes_record_even_when_teardown_fails() {
    let h = harness(
        vec![stdio_entry()],
        StubDiscoverer::default(),
        Some(StubRuntime {
            fail_cleanup: true,
            ..StubRuntime::default()
        }),
    )
    .await;
    h.provisioner
        .create_adapter("alice", request("fs-server", "files"))
        .await
        .unwrap();

    let outcome = h.lifecycle.delete_adapter("alice", "files").await.unwrap();
    assert!(outcome.deleted);
    assert_eq!(outcome.warnings.len(), 1);
    assert!(outcome.warnings[0].contains("stuck"));
    assert_eq!(h.runtime.as_ref().unwrap().cleanups.load(Ordering::SeqCst), 1);
    assert!(h.store.get("files").await.unwrap().is_none());
}

#[tokio::test]
async fn test_delete_direct_adapter_skips_teardown() {
    let h = harness(
        vec![remote_entry("https://mcp.example/mcp")],
        StubDiscoverer::default(),
        Some(StubRuntime::default()),
    )
    .await;
    h.provisioner
        .create_adapter("alice", request("remote-weather", "weather"))
        .await
        .unwrap();

    let outcome = h.lifecycle.delete_adapter("alice", "weather").await.unwrap();
    assert!(outcome.warnings.is_empty());
    assert_eq!(h.runtime.as_ref().unwrap().cleanups.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_ownership_is_checked_before_mutation() {
    let h = harness(
        vec![remote_entry("https://mcp.example/mcp")],
        StubDiscoverer::default(),
        None,
    )
    .await;
    h.provisioner
        .create_adapter("alice", request("remote-weather", "weather"))
        .await
        .unwrap();

    assert!(h.lifecycle.delete_adapter("mallory", "weather").await.unwrap_err().is_not_found());
    let update = AdapterUpdate {
        description: Some("hijacked".into()),
        ..AdapterUpdate::default()
    };
    assert!(h
        .lifecycle
        .update_adapter("mallory", "weather", update.clone())
        .await
        .unwrap_err()
        .is_not_found());
    assert!(h.lifecycle.list_adapters("mallory").await.unwrap().is_empty());

    let updated = h.lifecycle.update_adapter("alice", "weather", update).await.unwrap();
    assert_eq!(updated.description, "hijacked");
    assert_eq!(h.lifecycle.list_adapters("alice").await.unwrap().len(), 1);
    assert_eq!(h.lifecycle.count().await.unwrap(), 1);
}

#[tokio::test]
async fn test_sync_requires_live_endpoint() {
    let h = harness(vec![], StubDiscoverer::default(), None).await;
    let now = Utc::now();
    let pending = portico_core::AdapterResource {
        name: "pending".into(),
        description: String::new(),
        catalog_id: None,
        backend: AdapterBackend::Sidecar {
            spec: portico_adapters::default_launch_spec(),
            endpoint: None,
        },
        environment_variables: HashMap::new(),
        authentication: AuthPolicy::None,
        capabilities: None,
        created_by: "alice".into(),
        created_at: now,
        last_updated_at: now,
    };
    h.store.create(&pending).await.unwrap();

    let err = h
        .lifecycle
        .sync_adapter_capabilities("alice", "pending")
        .await
        .unwrap_err();
    assert!(matches!(err, PorticoError::Validation(_)));
}

// ---------------------------------------------------------------------------
// 4. Real handshake against a remote
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_sync_refreshes_from_remote_server() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/mcp"))
        .and(body_partial_json(json!({"method": "initialize"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "jsonrpc": "2.0", "id": 1,
            "result": {"protocolVersion": "2024-11-05", "capabilities": {"tools": {}}, "serverInfo": {"name": "live"}}
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/mcp"))
        .and(body_partial_json(json!({"method": "notifications/initialized"})))
        .respond_with(ResponseTemplate::new(202))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/mcp"))
        .and(body_partial_json(json!({"method": "tools/list"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "jsonrpc": "2.0", "id": 2, "result": {"tools": [{"name": "lookup"}, {"name": "search"}]}
        })))
        .mount(&server)
        .await;

    let url = format!("{}/mcp", server.uri());
    let catalog = Arc::new(InMemoryCatalogStore::from_entries(vec![remote_entry(&url)]).unwrap());
    let store = Arc::new(InMemoryAdapterStore::new());
    let discoverer = Arc::new(HttpCapabilityDiscoverer::new(Duration::from_secs(5)).unwrap());
    let provisioner = AdapterProvisioner::new(catalog, store.clone(), discoverer.clone(), None);
    let lifecycle = AdapterLifecycle::new(store, discoverer, None);

    let adapter = provisioner
        .create_adapter("alice", request("remote-weather", "live"))
        .await
        .unwrap();
    let caps = adapter.capabilities.unwrap();
    assert_eq!(caps.server_info.name, "live");
    assert_eq!(caps.tools.len(), 2);

    let synced = lifecycle.sync_adapter_capabilities("alice", "live").await.unwrap();
    assert!(synced.capabilities.unwrap().last_refreshed >= caps.last_refreshed);
}

// ---------------------------------------------------------------------------
// 5. FileAdapterStore
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_file_store_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileAdapterStore::new(dir.path().join("adapters")).await.unwrap();
    let h = harness(
        vec![remote_entry("https://mcp.example/mcp")],
        StubDiscoverer::default(),
        None,
    )
    .await;
    let adapter = h
        .provisioner
        .create_adapter("alice", request("remote-weather", "weather"))
        .await
        .unwrap();

    store.create(&adapter).await.unwrap();
    assert!(matches!(
        store.create(&adapter).await,
        Err(PorticoError::Conflict(_))
    ));
    assert_eq!(store.get("weather").await.unwrap().unwrap(), adapter);
    assert_eq!(store.list("alice").await.unwrap().len(), 1);
    assert!(store.list("bob").await.unwrap().is_empty());

    let mut ghost = adapter.clone();
    ghost.name = "ghost".into();
    assert!(store.update(&ghost).await.unwrap_err().is_not_found());

    store.delete("weather").await.unwrap();
    assert!(store.get("weather").await.unwrap().is_none());
    assert!(store.list_all().await.unwrap().is_empty());
    assert!(store.get("../weather").await.is_err());
}

// ---------------------------------------------------------------------------
// 6. Restart on the same data directory
// ---------------------------------------------------------------------------

fn sidecar_record(name: &str, command: &str, args: &[&str]) -> AdapterResource {
    let now = Utc::now();
    AdapterResource {
        name: name.into(),
        description: String::new(),
        catalog_id: None,
        backend: AdapterBackend::Sidecar {
            spec: SidecarSpec {
                runtime: RuntimeFamily::Python,
                command: command.into(),
                args: args.iter().map(|a| a.to_string()).collect(),
                env: vec![],
                port: 0,
            },
            endpoint: None,
        },
        environment_variables: HashMap::new(),
        authentication: AuthPolicy::None,
        capabilities: None,
        created_by: "alice".into(),
        created_at: now,
        last_updated_at: now,
    }
}

#[cfg(unix)]
fn process_runtime(start: u16, end: u16) -> Arc<ProcessSidecarRuntime> {
    Arc::new(ProcessSidecarRuntime::new(ProcessRuntimeConfig {
        port_range_start: start,
        port_range_end: end,
        max_retries: 1,
        initial_backoff_ms: 10,
        startup_grace_ms: 100,
        host: "127.0.0.1".into(),
    }))
}

#[cfg(unix)]
async fn boot(
    data: &std::path::Path,
    runtime: &Arc<ProcessSidecarRuntime>,
) -> (Arc<FileAdapterStore>, AdapterLifecycle) {
    let store = Arc::new(FileAdapterStore::new(data.to_path_buf()).await.unwrap());
    let lifecycle = AdapterLifecycle::new(
        store.clone(),
        Arc::new(StubDiscoverer::default()),
        Some(runtime.clone() as Arc<dyn SidecarRuntime>),
    );
    (store, lifecycle)
}

#[cfg(unix)]
#[tokio::test]
async fn test_restart_relaunches_persisted_sidecars() {
    let dir = tempfile::tempdir().unwrap();
    let data = dir.path().join("adapters");

    // first process lifetime
    let first_runtime = process_runtime(18800, 18820);
    let (store, lifecycle) = boot(&data, &first_runtime).await;
    store.create(&sidecar_record("fs1", "sleep", &["30"])).await.unwrap();
    store
        .create(&sidecar_record("broken", "/nonexistent/portico-sidecar", &[]))
        .await
        .unwrap();

    let mut outcome = lifecycle.restore_sidecars().await.unwrap();
    outcome.removed.sort();
    assert_eq!(outcome.restored, vec!["fs1"]);
    assert_eq!(outcome.removed, vec!["broken"]);
    assert!(store.get("broken").await.unwrap().is_none());
    first_runtime.shutdown_all().await;
    drop(lifecycle);
    drop(store);

    // second process lifetime on the same directory
    let second_runtime = process_runtime(18800, 18820);
    let (store, lifecycle) = boot(&data, &second_runtime).await;
    let outcome = lifecycle.restore_sidecars().await.unwrap();
    assert_eq!(outcome.restored, vec!["fs1"]);
    assert!(outcome.removed.is_empty());

    let fs1 = store.get("fs1").await.unwrap().unwrap();
    let port = fs1.sidecar().unwrap().port;
    assert!((18800..=18820).contains(&port));
    assert_eq!(
        fs1.live_endpoint(),
        Some(format!("http://127.0.0.1:{port}/mcp").as_str())
    );
    assert_eq!(second_runtime.allocated_ports().await, 1);

    let deleted = lifecycle.delete_adapter("alice", "fs1").await.unwrap();
    assert!(deleted.warnings.is_empty());
    assert_eq!(second_runtime.allocated_ports().await, 0);
}

#[tokio::test]
async fn test_restore_without_runtime_drops_sidecar_records() {
    let h = harness(vec![], StubDiscoverer::default(), None).await;
    h.store.create(&sidecar_record("orphan", "sleep", &["30"])).await.unwrap();

    let outcome = h.lifecycle.restore_sidecars().await.unwrap();
    assert_eq!(outcome.removed, vec!["orphan"]);
    assert!(h.store.get("orphan").await.unwrap().is_none());
}
