mod config;

use crate::config::{load_config, PorticoConfig};
use clap::{Parser, Subcommand};
use portico_adapters::{
    load_catalog_file, AdapterLifecycle, AdapterProvisioner, FileAdapterStore,
    InMemoryCatalogStore, ProcessSidecarRuntime, SidecarRuntime,
};
use portico_core::{parse_duration, PortSpec, ScanConfig, ScanStatus};
use portico_discovery::{DiscoveredCache, InMemoryScanStore, ScanSupervisor, SupervisorConfig};
use portico_gateway::{AppState, AuthConfig, GatewayServer};
use portico_mcp::HttpCapabilityDiscoverer;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "portico", about = "Portico: MCP server discovery and adapter gateway")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "portico.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the gateway server
    Serve {
        /// Host to bind to (overrides config)
        #[arg(long)]
        host: Option<String>,
        /// Port to listen on (overrides config)
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Run one scan and print the discovered servers as JSON
    Scan {
        /// CIDR block or single address; repeatable
        #[arg(long = "range", required = true)]
        ranges: Vec<String>,
        /// Port or inclusive `start-end` range; repeatable
        #[arg(long = "port", required = true)]
        ports: Vec<String>,
        /// Per-probe timeout, e.g. `5s` (overrides config)
        #[arg(long)]
        timeout: Option<String>,
        /// Simultaneous probes (overrides config)
        #[arg(long)]
        max_concurrent: Option<usize>,
    },
    /// Validate a catalog file and show each entry's transport requirement
    Catalog {
        /// JSON array of catalog entries
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli.config).await?;

    match cli.command {
        Commands::Serve { host, port } => serve(config, host, port).await,
        Commands::Scan {
            ranges,
            ports,
            timeout,
            max_concurrent,
        } => scan_once(config, ranges, ports, timeout, max_concurrent).await,
        Commands::Catalog { file } => {
            let entries = load_catalog_file(&file).await?;
            if entries.is_empty() {
                println!("No catalog entries in {}", file.display());
            }
            for entry in &entries {
                println!(
                    "{}\t{}\t{:?}",
                    entry.id,
                    entry.name,
                    entry.transport_requirement()
                );
            }
            Ok(())
        }
    }
}

fn supervisor_for(config: &PorticoConfig, listen_port: u16) -> anyhow::Result<Arc<ScanSupervisor>> {
    let supervisor = ScanSupervisor::new(
        SupervisorConfig {
            listen_port: config.discovery.advertised_port.unwrap_or(listen_port),
            extra_self_addresses: config.discovery.self_addresses.clone(),
        },
        Arc::new(InMemoryScanStore::new()),
        Arc::new(DiscoveredCache::new()),
    )?;
    Ok(Arc::new(supervisor))
}

async fn serve(config: PorticoConfig, host: Option<String>, port: Option<u16>) -> anyhow::Result<()> {
    let host = host.unwrap_or_else(|| config.server.host.clone());
    let port = port.unwrap_or(config.server.port);

    info!(host = %host, port, "Starting Portico gateway");

    let auth_config = AuthConfig::new(config.security.api_keys.clone());
    if auth_config.is_enabled() {
        info!(keys = config.security.api_keys.len(), "API key auth enabled");
    }

    let catalog = match &config.catalog_path {
        Some(path) => {
            let entries = load_catalog_file(path).await?;
            info!(path = %path.display(), entries = entries.len(), "Catalog loaded");
            InMemoryCatalogStore::from_entries(entries)?
        }
        None => InMemoryCatalogStore::new(),
    };

    let adapters = Arc::new(FileAdapterStore::new(config.data_dir.join("adapters")).await?);
    let discoverer = Arc::new(HttpCapabilityDiscoverer::new(parse_duration(
        &config.discovery.handshake_timeout,
    )?)?);
    let runtime = Arc::new(ProcessSidecarRuntime::new(config.sidecar.clone()));
    let dyn_runtime: Arc<dyn SidecarRuntime> = runtime.clone();
    let supervisor = supervisor_for(&config, port)?;

    let lifecycle = Arc::new(AdapterLifecycle::new(
        adapters.clone(),
        discoverer.clone(),
        Some(dyn_runtime.clone()),
    ));
    let restored = lifecycle.restore_sidecars().await?;
    if !restored.restored.is_empty() || !restored.removed.is_empty() {
        info!(
            restored = restored.restored.len(),
            removed = ?restored.removed,
            "Persisted sidecars reconciled"
        );
    }

    let state = Arc::new(AppState {
        supervisor: supervisor.clone(),
        provisioner: Arc::new(AdapterProvisioner::new(
            Arc::new(catalog),
            adapters,
            discoverer,
            Some(dyn_runtime),
        )),
        lifecycle,
    });
    let app = GatewayServer::build_with_auth(state, auth_config);

    let addr = format!("{host}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(addr = %addr, "Portico gateway listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "Failed to listen for shutdown signal");
            }
        })
        .await?;

    info!("Shutting down");
    supervisor.shutdown().await;
    runtime.shutdown_all().await;
    Ok(())
}

async fn scan_once(
    config: PorticoConfig,
    ranges: Vec<String>,
    ports: Vec<String>,
    timeout: Option<String>,
    max_concurrent: Option<usize>,
) -> anyhow::Result<()> {
    let mut scan = ScanConfig::new(ranges, ports.into_iter().map(PortSpec::Text).collect());
    scan.timeout = timeout.unwrap_or_else(|| config.discovery.default_timeout.clone());
    scan.max_concurrent = max_concurrent.unwrap_or(config.discovery.max_concurrent);
    scan.exclude_self = config.discovery.exclude_self;

    let supervisor = supervisor_for(&config, config.server.port)?;
    let job = supervisor.start_scan(scan).await?;

    let job = loop {
        tokio::time::sleep(Duration::from_millis(200)).await;
        let current = supervisor.get_scan(&job.id).await?;
        if current.status != ScanStatus::Running {
            break current;
        }
    };

    if job.status == ScanStatus::Failed {
        anyhow::bail!(
            "Scan {} failed: {}",
            job.id,
            job.error.as_deref().unwrap_or("unknown error")
        );
    }

    info!(scan_id = %job.id, servers = job.results.len(), "Scan finished");
    println!("{}", serde_json::to_string_pretty(&job.results)?);
    Ok(())
}
