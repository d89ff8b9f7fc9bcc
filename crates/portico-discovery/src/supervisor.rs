//! Scan job supervision: validation, background execution under a
//! concurrency bound, cancellation and result persistence.

use crate::cache::DiscoveredCache;
use crate::cidr::expand_cidr;
use crate::prober::Prober;
use crate::store::ScanResultStore;
use crate::targets::{generate_targets, self_addresses};
use chrono::Utc;
use portico_core::{
    parse_duration, DiscoveredServer, PorticoError, PorticoResult, ScanConfig, ScanJob, ScanStatus,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{RwLock, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Upper bound for `maxConcurrent`.
pub const MAX_CONCURRENCY: usize = 100;

/// How long a cancelled job stays visible after cancellation.
const ABANDONED_RETENTION: Duration = Duration::from_secs(15 * 60);

/// How the supervisor recognises its own listening addresses.
#[derive(Debug, Clone, Default)]
pub struct SupervisorConfig {
    /// Port the HTTP surface listens on.
    pub listen_port: u16,
    /// Extra `host:port` strings treated as self.
    pub extra_self_addresses: Vec<String>,
}

struct ActiveScan {
    job: ScanJob,
    cancel: CancellationToken,
}

enum ScanOutcome {
    Finished(Vec<DiscoveredServer>),
    Abandoned,
}

/// Runs scan jobs in the background and tracks their lifecycle.
///
/// Jobs live in the active table while running. Completed and failed jobs
/// move to the result store. A cancelled job is abandoned: it stays in the
/// active table as `running` with `cancelledAt` set and is never persisted.
pub struct ScanSupervisor {
    active: RwLock<HashMap<String, ActiveScan>>,
    store: Arc<dyn ScanResultStore>,
    cache: Arc<DiscoveredCache>,
    prober: Arc<Prober>,
    self_addresses: Vec<String>,
    shutdown: CancellationToken,
}

impl ScanSupervisor {
    /// Builds a supervisor that excludes every local interface address on
    /// `config.listen_port`, plus `config.extra_self_addresses`.
    pub fn new(
        config: SupervisorConfig,
        store: Arc<dyn ScanResultStore>,
        cache: Arc<DiscoveredCache>,
    ) -> PorticoResult<Self> {
        let mut own = self_addresses(config.listen_port);
        own.extend(config.extra_self_addresses);
        Ok(Self {
            active: RwLock::new(HashMap::new()),
            store,
            cache,
            prober: Arc::new(Prober::new()?),
            self_addresses: own,
            shutdown: CancellationToken::new(),
        })
    }

    /// Checks a scan config and returns the parsed per-probe timeout.
    pub fn validate(config: &ScanConfig) -> PorticoResult<Duration> {
        if config.ranges.is_empty() {
            return Err(PorticoError::Validation(
                "at least one scan range is required".into(),
            ));
        }
        for range in &config.ranges {
            expand_cidr(range)?;
        }
        if config.ports.is_empty() {
            return Err(PorticoError::Validation("at least one port is required".into()));
        }
        config.expanded_ports()?;
        let timeout = parse_duration(&config.timeout)?;
        if !(1..=MAX_CONCURRENCY).contains(&config.max_concurrent) {
            return Err(PorticoError::Validation(format!(
                "maxConcurrent must be between 1 and {MAX_CONCURRENCY}, got {}",
                config.max_concurrent
            )));
        }
        Ok(timeout)
    }

    /// Validates the config, registers a running job and starts it in the background.
    pub async fn start_scan(self: &Arc<Self>, config: ScanConfig) -> PorticoResult<ScanJob> {
        let timeout = Self::validate(&config)?;
        let id = Uuid::now_v7().to_string();
        let job = ScanJob::new(id.clone(), config.clone());
        let cancel = self.shutdown.child_token();

        {
            let mut active = self.active.write().await;
            prune_abandoned(&mut active);
            active.insert(
                id.clone(),
                ActiveScan {
                    job: job.clone(),
                    cancel: cancel.clone(),
                },
            );
        }
        info!(
            scan_id = %id,
            ranges = ?config.ranges,
            max_concurrent = config.max_concurrent,
            "Scan started"
        );

        let worker = tokio::spawn(Arc::clone(self).execute(config, timeout, cancel));
        self.supervise(id, worker);

        Ok(job)
    }

    /// Waits for a scan worker and records its outcome. A panicked or
    /// aborted worker fails the job.
    fn supervise(self: &Arc<Self>, id: String, worker: JoinHandle<PorticoResult<ScanOutcome>>) {
        let supervisor = Arc::clone(self);
        tokio::spawn(async move {
            let outcome = match worker.await {
                Ok(outcome) => outcome,
                Err(e) => Err(PorticoError::Probe(format!("scan task aborted: {e}"))),
            };
            supervisor.finish(&id, outcome).await;
        });
    }

    async fn execute(
        self: Arc<Self>,
        config: ScanConfig,
        timeout: Duration,
        cancel: CancellationToken,
    ) -> PorticoResult<ScanOutcome> {
        let targets = generate_targets(&config, &self.self_addresses)?;
        let semaphore = Arc::new(Semaphore::new(config.max_concurrent));
        let mut probes = JoinSet::new();
        let mut abandoned = false;

        for target in targets {
            let permit = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    abandoned = true;
                    break;
                }
                permit = Arc::clone(&semaphore).acquire_owned() => {
                    permit.map_err(|e| PorticoError::Probe(e.to_string()))?
                }
            };
            let prober = Arc::clone(&self.prober);
            probes.spawn(async move {
                let _permit = permit;
                prober.probe(&target, timeout).await
            });
        }

        // In-flight probes finish or time out on their own.
        let mut results = Vec::new();
        while let Some(joined) = probes.join_next().await {
            let outcome = joined.map_err(|e| PorticoError::Probe(format!("probe task failed: {e}")))?;
            if let Some(server) = outcome.server {
                results.push(server);
            }
        }

        if abandoned || cancel.is_cancelled() {
            return Ok(ScanOutcome::Abandoned);
        }
        results.sort_by(|a, b| a.address.cmp(&b.address));
        Ok(ScanOutcome::Finished(results))
    }

    async fn finish(&self, id: &str, outcome: PorticoResult<ScanOutcome>) {
        let results = match outcome {
            Ok(ScanOutcome::Abandoned) => {
                warn!(scan_id = %id, "Scan abandoned after cancellation");
                return;
            }
            Ok(ScanOutcome::Finished(results)) => Ok(results),
            Err(e) => Err(e),
        };

        let job = {
            let mut active = self.active.write().await;
            let Some(entry) = active.get_mut(id) else {
                return;
            };
            if entry.job.cancelled_at.is_some() {
                warn!(scan_id = %id, "Scan abandoned after cancellation");
                return;
            }
            match results {
                Ok(results) => {
                    let stored = self.cache.upsert_all(&results).await;
                    entry.job.complete(stored);
                    info!(scan_id = %id, servers = entry.job.results.len(), "Scan completed");
                }
                Err(e) => {
                    error!(scan_id = %id, error = %e, "Scan failed");
                    entry.job.fail(e.to_string());
                }
            }
            entry.job.clone()
        };

        match self.store.save(&job).await {
            Ok(()) => {
                self.active.write().await.remove(id);
            }
            Err(e) => {
                error!(scan_id = %id, error = %e, "Failed to persist scan result");
            }
        }
    }

    /// Signals a running job to stop. In-flight probes are left to finish.
    pub async fn cancel_scan(&self, id: &str) -> PorticoResult<ScanJob> {
        {
            let mut active = self.active.write().await;
            if let Some(entry) = active.get_mut(id) {
                if entry.job.status.is_terminal() {
                    return Err(PorticoError::Conflict(format!("scan {id} already finished")));
                }
                entry.cancel.cancel();
                if entry.job.cancelled_at.is_none() {
                    entry.job.cancelled_at = Some(Utc::now());
                    info!(scan_id = %id, "Scan cancelled");
                }
                return Ok(entry.job.clone());
            }
        }
        if self.store.get(id).await?.is_some() {
            return Err(PorticoError::Conflict(format!("scan {id} already finished")));
        }
        Err(PorticoError::NotFound(format!("scan {id}")))
    }

    /// Cancels every active job.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let now = Utc::now();
        let mut active = self.active.write().await;
        for entry in active.values_mut() {
            if entry.job.status == ScanStatus::Running && entry.job.cancelled_at.is_none() {
                entry.job.cancelled_at = Some(now);
            }
        }
        info!(jobs = active.len(), "Scan supervisor shut down");
    }

    /// The live job if still active, else the persisted record.
    pub async fn get_scan(&self, id: &str) -> PorticoResult<ScanJob> {
        if let Some(entry) = self.active.read().await.get(id) {
            return Ok(entry.job.clone());
        }
        self.store
            .get(id)
            .await?
            .ok_or_else(|| PorticoError::NotFound(format!("scan {id}")))
    }

    /// Active and persisted jobs, newest first.
    pub async fn list_scans(&self) -> PorticoResult<Vec<ScanJob>> {
        let mut jobs: Vec<ScanJob> = self
            .active
            .read()
            .await
            .values()
            .map(|entry| entry.job.clone())
            .collect();
        for job in self.store.list().await? {
            if !jobs.iter().any(|j| j.id == job.id) {
                jobs.push(job);
            }
        }
        jobs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(jobs)
    }

    /// Every server any completed scan has found.
    pub async fn list_discovered(&self) -> Vec<DiscoveredServer> {
        self.cache.list().await
    }

    /// Looks up a cached discovered server by fingerprint or detection id.
    pub async fn find_discovered(&self, id: &str) -> PorticoResult<DiscoveredServer> {
        self.cache
            .get(id)
            .await
            .ok_or_else(|| PorticoError::NotFound(format!("discovered server {id}")))
    }

    /// Number of jobs still probing.
    pub async fn active_count(&self) -> usize {
        self.active
            .read()
            .await
            .values()
            .filter(|entry| entry.job.status == ScanStatus::Running && entry.job.cancelled_at.is_none())
            .count()
    }
}

/// Drops cancelled jobs whose retention has expired.
fn prune_abandoned(active: &mut HashMap<String, ActiveScan>) {
    let Ok(retention) = chrono::Duration::from_std(ABANDONED_RETENTION) else {
        return;
    };
    let cutoff = Utc::now() - retention;
    active.retain(|id, entry| match entry.job.cancelled_at {
        Some(at) if at < cutoff => {
            debug!(scan_id = %id, "Evicting abandoned scan");
            false
        }
        _ => true,
    });
}
