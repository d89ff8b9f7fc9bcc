use async_trait::async_trait;
use portico_core::{PorticoError, PorticoResult, RuntimeFamily, SidecarSpec};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::net::TcpListener;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tracing::{info, warn};

/// Where a deployed sidecar can be reached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SidecarDeployment {
    /// Port allocated by the runtime.
    pub port: u16,
    /// MCP endpoint, e.g. `http://127.0.0.1:8004/mcp`.
    pub endpoint: String,
}

/// Launches and tears down sidecars. Owns port allocation.
#[async_trait]
pub trait SidecarRuntime: Send + Sync {
    /// Starts a sidecar for `adapter_id` and reports where it listens.
    async fn deploy(
        &self,
        adapter_id: &str,
        spec: &SidecarSpec,
        env: &HashMap<String, String>,
    ) -> PorticoResult<SidecarDeployment>;

    /// Stops the sidecar of `adapter_id` and frees its port.
    async fn cleanup(&self, adapter_id: &str) -> PorticoResult<()>;
}

/// Settings for [`ProcessSidecarRuntime`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessRuntimeConfig {
    #[serde(default = "default_port_range_start")]
    pub port_range_start: u16,
    #[serde(default = "default_port_range_end")]
    pub port_range_end: u16,
    /// Launch attempts before giving up.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    /// How long a fresh process must stay alive to count as started.
    #[serde(default = "default_startup_grace_ms")]
    pub startup_grace_ms: u64,
    /// Host written into reported endpoints.
    #[serde(default = "default_host")]
    pub host: String,
}

fn default_port_range_start() -> u16 {
    8000
}
fn default_port_range_end() -> u16 {
    9000
}
fn default_max_retries() -> u32 {
    3
}
fn default_initial_backoff_ms() -> u64 {
    500
}
fn default_startup_grace_ms() -> u64 {
    1500
}
fn default_host() -> String {
    "127.0.0.1".to_string()
}

impl Default for ProcessRuntimeConfig {
    fn default() -> Self {
        Self {
            port_range_start: default_port_range_start(),
            port_range_end: default_port_range_end(),
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff_ms(),
            startup_grace_ms: default_startup_grace_ms(),
            host: default_host(),
        }
    }
}

const MAX_BACKOFF: Duration = Duration::from_secs(30);

// ---------------------------------------------------------------------------
// PortPool
// ---------------------------------------------------------------------------

/// Serialized allocation of ports from an inclusive range.
pub struct PortPool {
    start: u16,
    end: u16,
    host: String,
    in_use: Mutex<HashSet<u16>>,
}

impl PortPool {
    pub fn new(start: u16, end: u16, host: impl Into<String>) -> Self {
        Self {
            start,
            end,
            host: host.into(),
            in_use: Mutex::new(HashSet::new()),
        }
    }

    /// Lowest port that is neither handed out nor bound by another process.
    pub async fn allocate(&self) -> PorticoResult<u16> {
        let mut in_use = self.in_use.lock().await;
        for port in self.start..=self.end {
            if in_use.contains(&port) {
                continue;
            }
            if TcpListener::bind((self.host.as_str(), port)).is_ok() {
                in_use.insert(port);
                return Ok(port);
            }
        }
        Err(PorticoError::Deployment(format!(
            "no free sidecar ports in {}-{}",
            self.start, self.end
        )))
    }

    pub async fn release(&self, port: u16) {
        self.in_use.lock().await.remove(&port);
    }

    pub async fn allocated(&self) -> usize {
        self.in_use.lock().await.len()
    }
}

// ---------------------------------------------------------------------------
// ProcessSidecarRuntime
// ---------------------------------------------------------------------------

struct RunningSidecar {
    child: Child,
    port: u16,
}

/// Entry of the running table. A slot is reserved before launching so a
/// second deploy of the same adapter is refused while the first starts.
enum Slot {
    Starting,
    Running(RunningSidecar),
}

/// Runs sidecars as local child processes.
///
/// Every process gets `PORT` and `MCP_PORT` set to its allocated port. For
/// `docker run` commands the port is published and the environment passed
/// with `-e`, since containers do not inherit the launcher's environment.
pub struct ProcessSidecarRuntime {
    config: ProcessRuntimeConfig,
    ports: PortPool,
    running: Mutex<HashMap<String, Slot>>,
}

impl ProcessSidecarRuntime {
    pub fn new(config: ProcessRuntimeConfig) -> Self {
        let ports = PortPool::new(config.port_range_start, config.port_range_end, config.host.clone());
        Self {
            config,
            ports,
            running: Mutex::new(HashMap::new()),
        }
    }

    /// Ports currently held by live sidecars.
    pub async fn allocated_ports(&self) -> usize {
        self.ports.allocated().await
    }

    /// Kills every running sidecar.
    pub async fn shutdown_all(&self) {
        let mut running = self.running.lock().await;
        for (adapter_id, slot) in running.drain() {
            let Slot::Running(mut sidecar) = slot else {
                continue;
            };
            if let Err(e) = sidecar.child.kill().await {
                warn!(adapter = %adapter_id, error = %e, "Failed to stop sidecar");
            }
            self.ports.release(sidecar.port).await;
        }
    }

    async fn launch(
        &self,
        spec: &SidecarSpec,
        env: &BTreeMap<String, String>,
        port: u16,
    ) -> PorticoResult<Child> {
        let mut args = spec.args.clone();
        if spec.runtime == RuntimeFamily::Docker {
            let at = usize::from(args.first().map(String::as_str) == Some("run"));
            let mut injected = vec!["-p".to_string(), format!("{port}:{port}")];
            for (key, value) in env {
                injected.push("-e".to_string());
                injected.push(format!("{key}={value}"));
            }
            let tail = args.split_off(at);
            args.extend(injected);
            args.extend(tail);
        }

        let mut cmd = Command::new(&spec.command);
        cmd.args(&args)
            .envs(env)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| {
            PorticoError::Deployment(format!("Failed to spawn sidecar '{}': {e}", spec.command))
        })?;

        tokio::time::sleep(Duration::from_millis(self.config.startup_grace_ms)).await;
        match child.try_wait()? {
            None => Ok(child),
            Some(status) => Err(PorticoError::Deployment(format!(
                "sidecar '{}' exited during startup ({status})",
                spec.command_line()
            ))),
        }
    }
}

#[async_trait]
impl SidecarRuntime for ProcessSidecarRuntime {
    async fn deploy(
        &self,
        adapter_id: &str,
        spec: &SidecarSpec,
        env: &HashMap<String, String>,
    ) -> PorticoResult<SidecarDeployment> {
        {
            let mut running = self.running.lock().await;
            if running.contains_key(adapter_id) {
                return Err(PorticoError::Deployment(format!(
                    "sidecar for {adapter_id} is already running"
                )));
            }
            running.insert(adapter_id.to_string(), Slot::Starting);
        }

        let port = match self.ports.allocate().await {
            Ok(port) => port,
            Err(e) => {
                self.running.lock().await.remove(adapter_id);
                return Err(e);
            }
        };
        let mut process_env: BTreeMap<String, String> = spec
            .env
            .iter()
            .map(|v| (v.name.clone(), v.value.clone()))
            .collect();
        process_env.extend(env.iter().map(|(k, v)| (k.clone(), v.clone())));
        process_env.insert("PORT".to_string(), port.to_string());
        process_env.insert("MCP_PORT".to_string(), port.to_string());

        let max_retries = self.config.max_retries.max(1);
        let mut delay = Duration::from_millis(self.config.initial_backoff_ms);
        let mut last_error = None;

        for attempt in 1..=max_retries {
            match self.launch(spec, &process_env, port).await {
                Ok(child) => {
                    self.running.lock().await.insert(
                        adapter_id.to_string(),
                        Slot::Running(RunningSidecar { child, port }),
                    );
                    let endpoint = format!("http://{}:{port}/mcp", self.config.host);
                    info!(
                        adapter = %adapter_id,
                        port = port,
                        command = %spec.command_line(),
                        "Sidecar started"
                    );
                    return Ok(SidecarDeployment { port, endpoint });
                }
                Err(e) => {
                    warn!(
                        adapter = %adapter_id,
                        attempt = attempt,
                        max_retries = max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Sidecar launch failed, retrying..."
                    );
                    last_error = Some(e);
                    if attempt < max_retries {
                        tokio::time::sleep(delay).await;
                        delay = (delay * 2).min(MAX_BACKOFF);
                    }
                }
            }
        }

        self.ports.release(port).await;
        self.running.lock().await.remove(adapter_id);
        Err(PorticoError::Deployment(format!(
            "sidecar for {adapter_id} failed after {max_retries} attempts: {}",
            last_error.map(|e| e.to_string()).unwrap_or_default()
        )))
    }

    async fn cleanup(&self, adapter_id: &str) -> PorticoResult<()> {
        let mut sidecar = {
            let mut running = self.running.lock().await;
            match running.remove(adapter_id) {
                Some(Slot::Running(sidecar)) => sidecar,
                Some(Slot::Starting) => {
                    running.insert(adapter_id.to_string(), Slot::Starting);
                    return Err(PorticoError::Conflict(format!(
                        "sidecar for {adapter_id} is still starting"
                    )));
                }
                None => {
                    return Err(PorticoError::NotFound(format!(
                        "no running sidecar for {adapter_id}"
                    )))
                }
            }
        };
        let killed = sidecar.child.kill().await;
        self.ports.release(sidecar.port).await;
        killed.map_err(|e| {
            PorticoError::Deployment(format!("Failed to stop sidecar for {adapter_id}: {e}"))
        })?;
        info!(adapter = %adapter_id, port = sidecar.port, "Sidecar stopped");
        Ok(())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn fast_config(start: u16, end: u16) -> ProcessRuntimeConfig {
        ProcessRuntimeConfig {
            port_range_start: start,
            port_range_end: end,
            max_retries: 2,
            initial_backoff_ms: 10,
            startup_grace_ms: 100,
            host: "127.0.0.1".into(),
        }
    }

    fn spec(command: &str, args: &[&str]) -> SidecarSpec {
        SidecarSpec {
            runtime: RuntimeFamily::Python,
            command: command.into(),
            args: args.iter().map(|a| a.to_string()).collect(),
            env: vec![],
            port: 0,
        }
    }

    #[tokio::test]
    async fn test_deploy_and_cleanup_releases_port() {
        let runtime = ProcessSidecarRuntime::new(fast_config(18700, 18720));
        let deployment = runtime
            .deploy("a1", &spec("sleep", &["30"]), &HashMap::new())
            .await
            .unwrap();
        assert!((18700..=18720).contains(&deployment.port));
        assert_eq!(
            deployment.endpoint,
            format!("http://127.0.0.1:{}/mcp", deployment.port)
        );
        assert_eq!(runtime.allocated_ports().await, 1);

        runtime.cleanup("a1").await.unwrap();
        assert_eq!(runtime.allocated_ports().await, 0);
        assert!(runtime.cleanup("a1").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_process_exiting_during_startup_fails_after_retries() {
        let runtime = ProcessSidecarRuntime::new(fast_config(18721, 18730));
        let err = runtime
            .deploy("a2", &spec("false", &[]), &HashMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, PorticoError::Deployment(_)));
        assert!(err.to_string().contains("after 2 attempts"));
        assert_eq!(runtime.allocated_ports().await, 0);
    }

    #[tokio::test]
    async fn test_missing_executable_is_deployment_error() {
        let runtime = ProcessSidecarRuntime::new(fast_config(18731, 18740));
        let err = runtime
            .deploy("a3", &spec("/nonexistent/portico-sidecar", &[]), &HashMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, PorticoError::Deployment(_)));
    }

    #[tokio::test]
    async fn test_concurrent_deploys_of_one_adapter_start_one_process() {
        let runtime = ProcessSidecarRuntime::new(fast_config(18742, 18760));
        let sleeper = spec("sleep", &["30"]);
        let env = HashMap::new();
        let (first, second) = tokio::join!(
            runtime.deploy("dup", &sleeper, &env),
            runtime.deploy("dup", &sleeper, &env)
        );

        assert_eq!(usize::from(first.is_ok()) + usize::from(second.is_ok()), 1);
        let refused = first.err().or(second.err()).unwrap();
        assert!(refused.to_string().contains("already running"));
        assert_eq!(runtime.allocated_ports().await, 1);

        runtime.cleanup("dup").await.unwrap();
        assert_eq!(runtime.allocated_ports().await, 0);
    }

    #[tokio::test]
    async fn test_failed_deploy_frees_the_slot() {
        let runtime = ProcessSidecarRuntime::new(fast_config(18761, 18770));
        assert!(runtime.deploy("retry", &spec("false", &[]), &HashMap::new()).await.is_err());
        runtime
            .deploy("retry", &spec("sleep", &["30"]), &HashMap::new())
            .await
            .unwrap();
        runtime.shutdown_all().await;
        assert_eq!(runtime.allocated_ports().await, 0);
    }

    #[tokio::test]
    async fn test_port_pool_exhaustion() {
        let pool = PortPool::new(18741, 18741, "127.0.0.1");
        let port = pool.allocate().await.unwrap();
        assert_eq!(port, 18741);
        assert!(pool.allocate().await.is_err());
        pool.release(port).await;
        assert_eq!(pool.allocate().await.unwrap(), 18741);
    }
}
