//! Worker Supervisor: admission control, staggered worker startup, crash
//! restart with backoff, and graceful shutdown.
//!
//! Grounded on `WorkerSystemService` (the reference implementation's
//! `services/infrastructure/worker_system_svc.py`): that class plays three
//! roles at once — admission-control driver, `ComponentLifecycleHandler`,
//! and process supervisor. We keep the same shape, but the reference's
//! `threading.Timer` per pending restart becomes a `tokio::spawn`'d sleep
//! tracked in `pending_restarts` so it can be cancelled the same way
//! (`dict.pop` there, `JoinHandle::abort` here), and its `multiprocessing`
//! worker handles become `tokio::process::Child` with the worker's own
//! stdout standing in for the health pipe.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};

use tagfleet_core::capacity::CapacityEstimate;
use tagfleet_core::config::CoreConfig;
use tagfleet_core::health::{ComponentPolicy, ComponentStatus};
use tagfleet_core::restart::{RestartDecision, RestartPolicy};
use tagfleet_core::tier::{fixed_fast_path, select_execution_tier, TierDecision};
use tagfleet_probe::ResourceProbe;
use tagfleet_store::{ProbeLockStatus, Store};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{Result, SupervisorError};
use crate::monitor::{now_wall_ms, ComponentLifecycleHandler, HealthMonitor, StatusChangeContext};

/// Delay between starting consecutive workers, so they don't all hit the
/// ML backend's preflight check at once.
const WORKER_STAGGER_DELAY_S: u64 = 2;

const DEFAULT_WORKER_POLICY: ComponentPolicy = ComponentPolicy {
    startup_timeout_s: 60,
    staleness_interval_s: 5,
    max_consecutive_misses: 3,
    min_recovery_s: 5,
    max_recovery_s: 120,
};

const SHUTDOWN_JOIN_TIMEOUT: Duration = Duration::from_secs(10);

const PROBE_POLL_INTERVAL_S: u64 = 5;
const PROBE_TIMEOUT_S: u64 = 120;

const LEADER_ID: &str = "supervisor";

fn worker_component_id(index: u32) -> String {
    format!("worker:tag:{index}")
}

fn parse_worker_index(component_id: &str) -> Result<u32> {
    component_id
        .rsplit(':')
        .next()
        .and_then(|s| s.parse::<u32>().ok())
        .ok_or_else(|| SupervisorError::MalformedComponentId(component_id.to_string()))
}

struct RunningWorker {
    child: Child,
}

/// Owns worker subprocess lifecycle: starting the fleet at admission-control
/// time, restarting crashed workers with backoff, and shutting the fleet
/// down cleanly. Constructed behind an `Arc` so it can hand a clone of
/// itself to the `HealthMonitor` as a [`ComponentLifecycleHandler`] and
/// still spawn tasks that call back into its own async methods.
pub struct WorkerSupervisor {
    config: CoreConfig,
    worker_binary: PathBuf,
    store: Arc<StdMutex<Store>>,
    monitor: Arc<HealthMonitor>,
    resource_probe: Arc<ResourceProbe>,
    restart_policy: RestartPolicy,
    workers: Mutex<HashMap<u32, RunningWorker>>,
    pending_restarts: Mutex<HashMap<String, JoinHandle<()>>>,
    tier: Mutex<Option<TierDecision>>,
    /// `CancellationToken` is one-shot; `start_all_workers` replaces it with
    /// a fresh token so the supervisor can be started, stopped, and started
    /// again within the same process (tests exercise this).
    stopping: StdMutex<CancellationToken>,
    self_ref: std::sync::Weak<WorkerSupervisor>,
}

impl WorkerSupervisor {
    #[must_use]
    pub fn new(
        config: CoreConfig,
        worker_binary: PathBuf,
        store: Arc<StdMutex<Store>>,
        monitor: Arc<HealthMonitor>,
        resource_probe: Arc<ResourceProbe>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak| WorkerSupervisor {
            config,
            worker_binary,
            store,
            monitor,
            resource_probe,
            restart_policy: RestartPolicy::default(),
            workers: Mutex::new(HashMap::new()),
            pending_restarts: Mutex::new(HashMap::new()),
            tier: Mutex::new(None),
            stopping: StdMutex::new(CancellationToken::new()),
            self_ref: weak.clone(),
        })
    }

    /// Current cached tier decision, if admission control has run
    /// (`get_resource_status` in the reference implementation).
    pub async fn resource_status(&self) -> Option<TierDecision> {
        self.tier.lock().await.clone()
    }

    pub async fn worker_statuses(&self) -> HashMap<String, ComponentStatus> {
        self.monitor.get_all_statuses().await
    }

    /// Run admission control (unless bypassed), reap stale claims, and
    /// stagger-start the calculated worker fleet.
    pub async fn start_all_workers(&self) -> Result<()> {
        let enabled = self.is_worker_system_enabled().await?;
        if !enabled {
            info!("worker system disabled, starting zero workers");
            return Ok(());
        }

        let decision = self.run_admission_control().await?;
        info!(
            tier = %decision.tier,
            workers = decision.calculated_workers,
            reason = %decision.reason,
            "admission control decided tier"
        );
        *self.tier.lock().await = Some(decision.clone());

        self.cleanup_stale_claims().await?;
        *self.stopping.lock().unwrap() = CancellationToken::new();

        if decision.calculated_workers == 0 {
            warn!(reason = %decision.reason, "tier planner refused to start any workers");
            return Ok(());
        }

        for index in 0..decision.calculated_workers {
            if index > 0 {
                tokio::time::sleep(Duration::from_secs(WORKER_STAGGER_DELAY_S)).await;
            }
            self.spawn_worker(index).await?;
        }

        Ok(())
    }

    /// Cancel all pending restarts, stop accepting new ones, unregister
    /// every worker from the Health Monitor, then join (or kill) each
    /// subprocess.
    pub async fn stop_all_workers(&self) -> Result<()> {
        let pending: Vec<JoinHandle<()>> =
            self.pending_restarts.lock().await.drain().map(|(_, h)| h).collect();
        for handle in pending {
            handle.abort();
        }

        self.stopping.lock().unwrap().cancel();

        let component_ids: Vec<String> = {
            let workers = self.workers.lock().await;
            workers.keys().map(|i| worker_component_id(*i)).collect()
        };
        for component_id in &component_ids {
            self.monitor.unregister_component(component_id).await;
        }

        let mut workers = self.workers.lock().await;
        for (index, mut worker) in workers.drain() {
            let component_id = worker_component_id(index);
            // Dropping our end of the worker's stdin closes the pipe,
            // signalling the stop condition across the process boundary —
            // the worker observes EOF on its own stdin the same way the
            // Health Monitor observes EOF on the worker's stdout.
            worker.child.stdin.take();
            match tokio::time::timeout(SHUTDOWN_JOIN_TIMEOUT, worker.child.wait()).await {
                Ok(Ok(status)) => debug!(%component_id, ?status, "worker exited"),
                Ok(Err(e)) => warn!(%component_id, error = %e, "error waiting for worker to exit"),
                Err(_) => {
                    warn!(%component_id, "worker did not exit within shutdown timeout, killing");
                    let _ = worker.child.start_kill();
                }
            }
        }
        drop(workers);

        self.cleanup_stale_claims().await
    }

    async fn is_worker_system_enabled(&self) -> Result<bool> {
        let store = Arc::clone(&self.store);
        blocking(move || store.lock().unwrap().is_worker_system_enabled()).await
    }

    async fn cleanup_stale_claims(&self) -> Result<()> {
        let store = Arc::clone(&self.store);
        let heartbeat_timeout_ms = i64::try_from(self.config.heartbeat_timeout_ms).unwrap_or(i64::MAX);
        let now = i64::try_from(now_wall_ms()).unwrap_or(i64::MAX);
        let removed = blocking(move || store.lock().unwrap().cleanup_all_stale_claims(now, heartbeat_timeout_ms)).await?;
        if removed > 0 {
            info!(removed, "cleaned up stale claims before worker startup");
        }
        Ok(())
    }

    async fn run_admission_control(&self) -> Result<TierDecision> {
        if !self.config.resource_management.enabled {
            return Ok(fixed_fast_path(self.config.worker_count));
        }

        let hash = tagfleet_probe::capacity::model_set_hash(Path::new(&self.config.models_dir), now_wall_ms());
        let gpu_capable = self.resource_probe.check_gpu_capability().await;

        let existing = {
            let store = Arc::clone(&self.store);
            let hash = hash.clone();
            blocking(move || store.lock().unwrap().get_capacity_estimate(&hash)).await?
        };

        let estimate = match existing {
            Some(estimate) => estimate,
            None => self.get_or_run_capacity_probe(&hash, gpu_capable).await?,
        };

        Ok(select_execution_tier(
            &estimate,
            self.config.vram_budget_mb,
            self.config.ram_budget_mb,
            self.config.worker_count,
        ))
    }

    /// Leader-election capacity probe: the first caller to acquire the probe
    /// lock for this model set hash measures it and persists the result;
    /// everyone else polls for completion, falling back to a conservative
    /// estimate if the leader doesn't finish before `PROBE_TIMEOUT_S`.
    async fn get_or_run_capacity_probe(&self, hash: &str, gpu_capable: bool) -> Result<CapacityEstimate> {
        let now = i64::try_from(now_wall_ms()).unwrap_or(i64::MAX);
        let acquired = {
            let store = Arc::clone(&self.store);
            let hash = hash.to_string();
            blocking(move || store.lock().unwrap().try_acquire_probe_lock(&hash, LEADER_ID, now)).await?
        };

        if acquired {
            return self.run_capacity_probe_as_leader(hash).await;
        }

        let deadline = Instant::now() + Duration::from_secs(PROBE_TIMEOUT_S);
        loop {
            if Instant::now() >= deadline {
                warn!(model_set_hash = %hash, "capacity probe leader timed out, using conservative estimate");
                return Ok(CapacityEstimate::conservative(hash.to_string(), gpu_capable));
            }
            tokio::time::sleep(Duration::from_secs(PROBE_POLL_INTERVAL_S)).await;

            let status = {
                let store = Arc::clone(&self.store);
                let hash = hash.to_string();
                blocking(move || store.lock().unwrap().get_probe_lock_status(&hash)).await?
            };
            if matches!(status, Some(ProbeLockStatus::Complete)) {
                let store = Arc::clone(&self.store);
                let hash_owned = hash.to_string();
                if let Some(estimate) =
                    blocking(move || store.lock().unwrap().get_capacity_estimate(&hash_owned)).await?
                {
                    return Ok(estimate);
                }
            }
        }
    }

    async fn run_capacity_probe_as_leader(&self, hash: String) -> Result<CapacityEstimate> {
        let start = Instant::now();
        // Loading backbones/heads to measure warmup cost is ML-runtime
        // specific and out of scope for this crate; the probe measures the
        // process's own baseline footprint, matching the injectable-warmup
        // seam in `tagfleet_probe::capacity::measure`.
        let estimate = tagfleet_probe::capacity::measure(hash.clone(), self.config.ram_detection_mode, || async {}).await;
        let probe_duration_s = start.elapsed().as_secs_f64();

        let store = Arc::clone(&self.store);
        let estimate_to_save = estimate.clone();
        let now = i64::try_from(now_wall_ms()).unwrap_or(i64::MAX);
        blocking(move || {
            let store = store.lock().unwrap();
            store.save_capacity_estimate(&estimate_to_save, probe_duration_s, LEADER_ID, now)?;
            store.complete_probe_lock(&estimate_to_save.model_set_hash, now)
        })
        .await?;

        Ok(estimate)
    }

    async fn spawn_worker(&self, index: u32) -> Result<()> {
        let component_id = worker_component_id(index);
        let tier = self.tier.lock().await.clone();

        let mut command = Command::new(&self.worker_binary);
        command
            .arg("--worker-id")
            .arg(&component_id)
            .arg("--db-path")
            .arg(&self.config.db_path)
            .arg("--models-dir")
            .arg(&self.config.models_dir)
            .stdout(std::process::Stdio::piped())
            .stdin(std::process::Stdio::piped())
            .stderr(std::process::Stdio::inherit());
        if let Some(tier) = &tier {
            command.arg("--tier").arg(tier.tier.to_string());
            if tier.config.prefer_gpu {
                command.arg("--prefer-gpu");
            }
        }

        let mut child = command.spawn()?;
        let stdout = child.stdout.take().expect("worker spawned with piped stdout");

        self.workers.lock().await.insert(index, RunningWorker { child });
        self.monitor
            .register_component(component_id.clone(), DEFAULT_WORKER_POLICY, stdout)
            .await;

        info!(%component_id, "started discovery worker");
        Ok(())
    }

    async fn cancel_pending_restart(&self, component_id: &str) {
        if let Some(handle) = self.pending_restarts.lock().await.remove(component_id) {
            handle.abort();
        }
    }

    async fn handle_worker_dead(&self, component_id: String) {
        if self.stopping.lock().unwrap().is_cancelled() {
            debug!(%component_id, "worker died during shutdown, not restarting");
            return;
        }

        self.cancel_pending_restart(&component_id).await;

        let index = match parse_worker_index(&component_id) {
            Ok(index) => index,
            Err(e) => {
                error!(error = %e, "cannot restart worker with malformed component id");
                return;
            }
        };

        let now = now_wall_ms();
        let restart_state = {
            let store = Arc::clone(&self.store);
            let cid = component_id.clone();
            blocking(move || store.lock().unwrap().get_restart_state(&cid)).await
        };
        let (restart_count, last_restart_wall_ms) = match restart_state {
            Ok(state) => state,
            Err(e) => {
                error!(%component_id, error = %e, "failed to read restart state, not restarting");
                return;
            }
        };

        let decision = self.restart_policy.should_restart(
            restart_count,
            last_restart_wall_ms.map(|v| v.max(0) as u64),
            now,
        );

        match decision {
            RestartDecision::Restart { backoff_s } => {
                info!(%component_id, backoff_s, "scheduling worker restart");
                self.schedule_restart(component_id, index, backoff_s).await;
            }
            RestartDecision::MarkFailed { reason } => {
                error!(%component_id, %reason, "worker permanently failed");
                self.monitor.set_failed(&component_id).await;
                let store = Arc::clone(&self.store);
                let cid = component_id.clone();
                let reason_owned = reason.clone();
                let now = i64::try_from(now_wall_ms()).unwrap_or(i64::MAX);
                let _ = blocking(move || store.lock().unwrap().mark_restart_failed_permanent(&cid, &reason_owned, now)).await;
            }
        }
    }

    async fn schedule_restart(&self, component_id: String, index: u32, backoff_s: u64) {
        let Some(this) = self.self_ref.upgrade() else {
            return;
        };
        let cid = component_id.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(backoff_s)).await;
            this.restart_worker(cid, index).await;
        });
        self.pending_restarts.lock().await.insert(component_id, handle);
    }

    async fn restart_worker(&self, component_id: String, index: u32) {
        self.pending_restarts.lock().await.remove(&component_id);

        if self.stopping.lock().unwrap().is_cancelled() {
            info!(%component_id, "supervisor is stopping, abandoning scheduled restart");
            return;
        }

        match self.is_worker_system_enabled().await {
            Ok(true) => {}
            Ok(false) => {
                info!(%component_id, "worker system disabled, abandoning scheduled restart");
                return;
            }
            Err(e) => {
                error!(%component_id, error = %e, "failed to check worker-enabled flag, abandoning restart");
                return;
            }
        }

        let now = i64::try_from(now_wall_ms()).unwrap_or(i64::MAX);
        let store = Arc::clone(&self.store);
        let cid = component_id.clone();
        if let Err(e) = blocking(move || store.lock().unwrap().increment_restart_count(&cid, now)).await {
            error!(%component_id, error = %e, "failed to persist restart count, abandoning restart");
            return;
        }

        self.workers.lock().await.remove(&index);
        if let Err(e) = self.spawn_worker(index).await {
            error!(%component_id, error = %e, "failed to respawn worker");
        }
    }
}

impl ComponentLifecycleHandler for WorkerSupervisor {
    fn on_status_change(&self, component_id: &str, ctx: StatusChangeContext) {
        match ctx.new {
            ComponentStatus::Unhealthy => {
                warn!(%component_id, misses = ctx.consecutive_misses, "worker reported unhealthy");
            }
            ComponentStatus::Dead => {
                let Some(this) = self.self_ref.upgrade() else {
                    return;
                };
                let component_id = component_id.to_string();
                tokio::spawn(async move {
                    this.handle_worker_dead(component_id).await;
                });
            }
            _ => {}
        }
    }
}

/// Run a blocking `Store` call on the blocking thread pool and flatten the
/// join error (the closure should never panic; if it does, that's a bug we
/// want to surface rather than swallow as a `SupervisorError`).
async fn blocking<F, T>(f: F) -> Result<T>
where
    F: FnOnce() -> tagfleet_store::Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .expect("blocking store task panicked")
        .map_err(SupervisorError::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_worker_index_from_component_id() {
        assert_eq!(parse_worker_index("worker:tag:0").unwrap(), 0);
        assert_eq!(parse_worker_index("worker:tag:12").unwrap(), 12);
    }

    #[test]
    fn rejects_malformed_component_id() {
        assert!(parse_worker_index("not-a-worker-id").is_err());
        assert!(parse_worker_index("worker:tag:abc").is_err());
    }

    #[test]
    fn worker_component_id_round_trips_with_parse() {
        for i in 0..5 {
            assert_eq!(parse_worker_index(&worker_component_id(i)).unwrap(), i);
        }
    }
}
